//! Scenario: Emergency Stop Discards Queued Signals
//!
//! # Invariants under test
//! - A signal queued before an emergency stop is never sized or routed:
//!   it is answered Cancelled.
//! - The stop itself locks every targeted account with cause ManualStop and
//!   flattens it at the venue.
//! - Sizing requests after the stop are refused by the guardian, not lost.
//! - Every status change and routed order reaches bus subscribers.
//!
//! GREEN when:
//! - Signal queued ahead of the stop -> Err(Cancelled), zero venue submits.
//! - Both accounts LOCKED(ManualStop), venue flat.
//! - Subscriber sees a LOCKED status for each account.

use std::sync::Arc;

use chrono::Utc;
use pfg_broker_paper::{PaperBridge, PaperCall};
use pfg_config::{AccountConfig, GuardianConfig, InstrumentConfig};
use pfg_coordinator::{
    CapabilityRegistry, Coordinator, CoordinatorDeps, CoordinatorError, CoordinatorEvent,
    QueuedSignals, StopTarget,
};
use pfg_guardian::{MemoryStore, RecordingAlerts};
use pfg_schemas::{
    AccountId, Direction, FillEvent, GuardianState, LockCause, Phase, Signal,
};
use pfg_sizing::SizingReason;

fn config() -> GuardianConfig {
    let accounts = ["EVAL-A", "EVAL-B"]
        .iter()
        .map(|id| {
            let mut a = AccountConfig::new(*id, Phase::Evaluation, 50_000.0);
            a.symbols = vec!["ES".to_string()];
            a.stale_after_ms = 0;
            a
        })
        .collect();
    GuardianConfig {
        instruments: vec![InstrumentConfig {
            symbol: "ES".to_string(),
            point_value: 50.0,
        }],
        phase_rules: Default::default(),
        accounts,
        emergency_stop: Default::default(),
        storage: Default::default(),
    }
}

fn signal() -> Signal {
    Signal::new("ES", Direction::Long, 5_000.0, 4_990.0, 5_020.0, 0.9).with_edge(0.6, 2.0)
}

fn start(venue: Arc<PaperBridge>, caps: CapabilityRegistry) -> Coordinator {
    let deps = CoordinatorDeps::new(
        venue,
        Arc::new(RecordingAlerts::new()),
        Arc::new(MemoryStore::new()),
    );
    Coordinator::start(&config(), caps, deps).unwrap()
}

#[tokio::test]
async fn scenario_signal_queued_before_stop_is_cancelled() {
    let venue = Arc::new(PaperBridge::new());
    let coord = start(venue.clone(), CapabilityRegistry::new());
    let a = AccountId::new("EVAL-A");
    let b = AccountId::new("EVAL-B");
    let mut bus = coord.subscribe();

    // Open exposure on A so the stop has something to close.
    coord
        .submit_fill(&a, FillEvent::new("ES", 2, 5_000.0, Utc::now()))
        .await
        .unwrap();
    venue.set_position(&a, "ES", 2);

    // Both futures are polled once before the workers run: the signal is
    // queued first, then the stop bumps the epoch and queues behind it.
    let sig = signal();
    let (routed, stops) = tokio::join!(
        coord.route_signal(&sig),
        coord.emergency_stop(StopTarget::All)
    );

    assert_eq!(routed.len(), 2);
    for r in &routed {
        assert_eq!(
            r.result,
            Err(CoordinatorError::Cancelled {
                account_id: r.account_id.clone()
            })
        );
    }
    assert!(!venue
        .calls()
        .iter()
        .any(|c| matches!(c, PaperCall::Submit { .. })));

    let stops = stops.unwrap();
    assert_eq!(stops.len(), 2);
    for s in &stops {
        let status = s.result.as_ref().unwrap();
        assert_eq!(status.guardian_state, GuardianState::Locked);
        assert_eq!(status.lock_cause, Some(LockCause::ManualStop));
    }
    assert!(venue.positions(&a).is_empty());
    assert_eq!(venue.flatten_calls(&a), 1);

    // After the stop has been applied, requests are answered again, by a
    // locked guardian.
    let decision = coord.size_position(&b, signal()).await.unwrap();
    assert_eq!(decision.reason, SizingReason::GuardianBlocked);
    assert_eq!(decision.contracts, 0);

    let mut locked = Vec::new();
    while let Ok(ev) = bus.try_recv() {
        if let CoordinatorEvent::Status(s) = ev {
            if s.guardian_state == GuardianState::Locked && !locked.contains(&s.account_id) {
                locked.push(s.account_id);
            }
        }
    }
    locked.sort();
    assert_eq!(locked, vec![a, b]);

    coord.shutdown().await;
}

#[tokio::test]
async fn scenario_stop_for_one_account_leaves_the_other_trading() {
    let venue = Arc::new(PaperBridge::new());
    let queued = Arc::new(QueuedSignals::new("manual"));
    let mut caps = CapabilityRegistry::new();
    caps.register_provider(queued.clone()).unwrap();
    let coord = start(venue.clone(), caps);
    let a = AccountId::new("EVAL-A");
    let b = AccountId::new("EVAL-B");

    let stops = coord
        .emergency_stop(StopTarget::Account(a.clone()))
        .await
        .unwrap();
    assert_eq!(stops.len(), 1);
    assert_eq!(stops[0].account_id, a);

    queued.push(signal());
    let routed = coord.route_from_provider("manual").await.unwrap().unwrap();
    assert_eq!(routed.len(), 2);
    let a_out = routed[0].result.as_ref().unwrap();
    assert_eq!(
        a_out.sizing.as_ref().unwrap().reason,
        SizingReason::GuardianBlocked
    );
    let b_out = routed[1].result.as_ref().unwrap();
    assert_eq!(b_out.order.as_ref().unwrap().qty_signed, 10);

    // Drained provider.
    assert!(coord.route_from_provider("manual").await.unwrap().is_none());
    assert!(coord.route_from_provider("nobody").await.is_err());

    assert_eq!(
        coord
            .emergency_stop(StopTarget::Account(AccountId::new("GHOST")))
            .await
            .unwrap_err(),
        CoordinatorError::UnknownAccount {
            account_id: AccountId::new("GHOST")
        }
    );
    assert_eq!(coord.get_status(&b).unwrap().guardian_state, GuardianState::Active);
}
