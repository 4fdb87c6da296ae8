//! Scenario: Order In Flight During An Emergency Stop
//!
//! # Invariants under test
//! - An order already at the venue when a stop lands may still fill. Its
//!   fills are booked and then closed again, so a LOCKED account never
//!   keeps contracts.
//! - The lock and its cause survive the second flatten.
//!
//! GREEN when:
//! - Stop confirms LOCKED(ManualStop) while the submit is still pending.
//! - After the late 10-lot fills: ledger and venue flat, one flatten call,
//!   balance unchanged.

use std::sync::Arc;
use std::time::Duration;

use pfg_broker_paper::PaperBridge;
use pfg_config::{AccountConfig, GuardianConfig, InstrumentConfig};
use pfg_coordinator::{CapabilityRegistry, Coordinator, CoordinatorDeps, StopTarget};
use pfg_guardian::{
    ExecutionBridge, ExecutionFailure, FlattenLeg, MemoryStore, OrderAck, OrderRequest,
    RecordingAlerts,
};
use pfg_schemas::{AccountId, Direction, FillEvent, GuardianState, LockCause, Phase, Signal};
use tokio::sync::Notify;

/// Paper venue whose `submit` parks until the test releases it.
struct SlowSubmitVenue {
    inner: PaperBridge,
    entered: Notify,
    release: Notify,
}

#[async_trait::async_trait]
impl ExecutionBridge for SlowSubmitVenue {
    async fn submit(&self, order: &OrderRequest) -> Result<OrderAck, ExecutionFailure> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.submit(order).await
    }

    async fn cancel_all_orders(&self, account: &AccountId) -> Result<usize, ExecutionFailure> {
        self.inner.cancel_all_orders(account).await
    }

    async fn flatten_all(
        &self,
        account: &AccountId,
        legs: &[FlattenLeg],
    ) -> Result<Vec<FillEvent>, ExecutionFailure> {
        self.inner.flatten_all(account, legs).await
    }

    async fn open_position_count(&self, account: &AccountId) -> Result<usize, ExecutionFailure> {
        self.inner.open_position_count(account).await
    }
}

fn config() -> GuardianConfig {
    let mut a = AccountConfig::new("EVAL-A", Phase::Evaluation, 50_000.0);
    a.symbols = vec!["ES".to_string()];
    a.stale_after_ms = 0;
    GuardianConfig {
        instruments: vec![InstrumentConfig {
            symbol: "ES".to_string(),
            point_value: 50.0,
        }],
        phase_rules: Default::default(),
        accounts: vec![a],
        emergency_stop: Default::default(),
        storage: Default::default(),
    }
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn scenario_late_fill_on_locked_account_is_flattened() {
    let venue = Arc::new(SlowSubmitVenue {
        inner: PaperBridge::new(),
        entered: Notify::new(),
        release: Notify::new(),
    });
    let deps = CoordinatorDeps::new(
        venue.clone(),
        Arc::new(RecordingAlerts::new()),
        Arc::new(MemoryStore::new()),
    );
    let coord = Coordinator::start(&config(), CapabilityRegistry::new(), deps).unwrap();
    let a = AccountId::new("EVAL-A");

    let sig = Signal::new("ES", Direction::Long, 5_000.0, 4_990.0, 5_020.0, 0.9).with_edge(0.6, 2.0);
    let routed = coord.route_signal(&sig).await;
    assert_eq!(routed.len(), 1);
    let out = routed[0].result.as_ref().unwrap();
    assert_eq!(out.order.as_ref().unwrap().qty_signed, 10);

    // The order has passed the stop-epoch check and sits at the venue.
    venue.entered.notified().await;

    let stops = coord
        .emergency_stop(StopTarget::Account(a.clone()))
        .await
        .unwrap();
    let status = stops[0].result.as_ref().unwrap();
    assert_eq!(status.guardian_state, GuardianState::Locked);
    assert!(status.positions.is_empty());
    assert_eq!(venue.inner.flatten_calls(&a), 0);

    venue.release.notify_one();

    eventually(|| {
        let s = coord.get_status(&a).unwrap();
        venue.inner.flatten_calls(&a) == 1
            && s.guardian_state == GuardianState::Locked
            && s.positions.is_empty()
    })
    .await;

    let s = coord.get_status(&a).unwrap();
    assert_eq!(s.lock_cause, Some(LockCause::ManualStop));
    assert_eq!(s.balance_micros, 50_000_000_000);
    assert!(venue.inner.positions(&a).is_empty());

    coord.shutdown().await;
}
