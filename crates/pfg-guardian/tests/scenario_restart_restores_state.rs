//! Scenario: Restart Restores State, Fail-Closed
//!
//! # Invariants under test
//! - A guardian booted from its last snapshot reports the same balance,
//!   high-water mark, day count and compliance band it had before restart.
//! - Restore never resets the high-water mark.
//! - A snapshot that contradicts itself boots the account LOCKED(Fatal) with
//!   one alert instead of trading on bad numbers.
//! - An account that crashed mid-stop comes back locked and the reload
//!   re-runs the stop against the open position.
//!
//! GREEN when:
//! - Restored status equals pre-restart status (CAUTION, HWM $52,000).
//! - Tampered equity -> LOCKED(Fatal), alert raised, signals blocked.
//! - Persisted FLATTENING + open position -> reload flattens it.
//! - Unreadable snapshot file -> LOCKED(Fatal), replaced by a readable one.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use pfg_config::{AccountConfig, EmergencyStopPolicy, PhaseRules};
use pfg_guardian::{
    ExecutionBridge, ExecutionFailure, FlattenLeg, Guardian, GuardianDeps, GuardianEvent,
    GuardianSetup, JsonFileStore, OrderAck, OrderRequest, RecordingAlerts, SnapshotStore,
};
use pfg_ledger::{Instrument, Micros};
use pfg_schemas::{
    AccountId, Direction, FillEvent, GuardianState, LockCause, Phase, RiskState, Signal, TickEvent,
};
use pfg_sizing::{KellySizer, SizingReason};

#[derive(Default)]
struct CountingBridge {
    flatten_calls: AtomicUsize,
}

#[async_trait::async_trait]
impl ExecutionBridge for CountingBridge {
    async fn submit(&self, _order: &OrderRequest) -> Result<OrderAck, ExecutionFailure> {
        Err(ExecutionFailure::Rejected {
            reason: "not used".to_string(),
        })
    }

    async fn cancel_all_orders(&self, _account: &AccountId) -> Result<usize, ExecutionFailure> {
        Ok(0)
    }

    async fn flatten_all(
        &self,
        _account: &AccountId,
        legs: &[FlattenLeg],
    ) -> Result<Vec<FillEvent>, ExecutionFailure> {
        self.flatten_calls.fetch_add(1, Ordering::SeqCst);
        Ok(legs
            .iter()
            .map(|l| FillEvent::new(l.symbol.clone(), l.qty_to_close, l.reference_price, Utc::now()))
            .collect())
    }

    async fn open_position_count(&self, _account: &AccountId) -> Result<usize, ExecutionFailure> {
        Ok(0)
    }
}

fn at(day: u32, hour: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, day, hour, min, 0).unwrap()
}

fn setup() -> GuardianSetup {
    let mut account = AccountConfig::new("EVAL-3", Phase::Evaluation, 50_000.0);
    account.symbols = vec!["NQ".to_string()];
    account.stale_after_ms = 0;
    GuardianSetup {
        account,
        phase_rules: PhaseRules::default(),
        instruments: vec![Instrument::new("NQ", Micros::from_usd(20))],
        emergency_stop: EmergencyStopPolicy::default(),
        sizer: Box::new(KellySizer::full()),
    }
}

struct Harness {
    bridge: Arc<CountingBridge>,
    alerts: Arc<RecordingAlerts>,
    store: Arc<JsonFileStore>,
}

impl Harness {
    fn new(dir: &std::path::Path) -> Self {
        Self {
            bridge: Arc::new(CountingBridge::default()),
            alerts: Arc::new(RecordingAlerts::new()),
            store: Arc::new(JsonFileStore::new(dir).unwrap()),
        }
    }

    fn boot(&self, now: DateTime<Utc>) -> Guardian {
        let persisted = self.store.load(&AccountId::new("EVAL-3")).unwrap();
        let deps = GuardianDeps {
            bridge: self.bridge.clone(),
            alerts: self.alerts.clone(),
            store: self.store.clone(),
            audit: None,
        };
        Guardian::boot(setup(), deps, persisted, now).unwrap()
    }
}

/// +$2000 to a $52,000 high, then give back $1500: trailing usage
/// 1500 / 2080 -> CAUTION.
async fn trade_into_caution(g: &mut Guardian) {
    let events = [
        GuardianEvent::Fill(FillEvent::new("NQ", 1, 18_000.0, at(2, 15, 0))),
        GuardianEvent::Tick(TickEvent::new("NQ", 18_100.0, at(2, 15, 5))),
        GuardianEvent::Fill(FillEvent::new("NQ", -1, 18_100.0, at(2, 15, 6))),
        GuardianEvent::Fill(FillEvent::new("NQ", 1, 18_100.0, at(2, 15, 10))),
        GuardianEvent::Fill(FillEvent::new("NQ", -1, 18_025.0, at(2, 15, 20))),
    ];
    for ev in events {
        g.handle(ev, at(2, 15, 30)).await.unwrap();
    }
}

#[tokio::test]
async fn scenario_restart_reports_identical_status() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::new(dir.path());

    let mut g = h.boot(at(2, 14, 0));
    trade_into_caution(&mut g).await;
    let before = g.status();
    assert_eq!(before.risk_state, RiskState::Caution);
    assert_eq!(before.guardian_state, GuardianState::Active);
    assert_eq!(before.high_water_mark_micros, Micros::from_usd(52_000).raw());
    assert_eq!(before.equity_micros, Micros::from_usd(50_500).raw());
    drop(g);

    let mut g = h.boot(at(2, 16, 0));
    let after = g.status();
    assert_eq!(after.risk_state, before.risk_state);
    assert_eq!(after.guardian_state, before.guardian_state);
    assert_eq!(after.high_water_mark_micros, before.high_water_mark_micros);
    assert_eq!(after.balance_micros, before.balance_micros);
    assert_eq!(after.daily_start_balance_micros, before.daily_start_balance_micros);
    assert_eq!(after.day_count, before.day_count);
    assert_eq!(after.usage_ppm, before.usage_ppm);
    assert!(h.alerts.alerts().is_empty());

    let out = g.handle(GuardianEvent::Reload, at(2, 16, 0)).await.unwrap();
    assert_eq!(out.status.guardian_state, GuardianState::Active);
    assert_eq!(h.bridge.flatten_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn scenario_inconsistent_snapshot_boots_fatal_locked() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::new(dir.path());
    let mut g = h.boot(at(2, 14, 0));
    trade_into_caution(&mut g).await;
    drop(g);

    let mut snap = h.store.load(&AccountId::new("EVAL-3")).unwrap().unwrap();
    snap.equity_micros += Micros::from_usd(5_000).raw();
    h.store.save(&snap).unwrap();

    let mut g = h.boot(at(2, 16, 0));
    assert_eq!(g.machine().state, GuardianState::Locked);
    assert_eq!(g.machine().lock, Some(LockCause::Fatal));
    assert!(g.machine().fatal);
    assert_eq!(h.alerts.alerts().len(), 1);
    assert!(h.alerts.alerts()[0].message.contains("STATE_CORRUPTION"));
    assert!(g.status().fatal.is_some());

    let sig = Signal::new("NQ", Direction::Long, 18_000.0, 17_900.0, 18_200.0, 0.9);
    let out = g.handle(GuardianEvent::Signal(sig), at(2, 16, 1)).await.unwrap();
    assert_eq!(out.sizing.unwrap().reason, SizingReason::GuardianBlocked);

    // The fatal lock was persisted: another restart stays locked.
    let g = h.boot(at(2, 16, 5));
    assert_eq!(g.machine().lock, Some(LockCause::Fatal));
}

#[tokio::test]
async fn scenario_crash_mid_stop_is_resumed_on_reload() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::new(dir.path());
    let mut g = h.boot(at(2, 14, 0));
    g.handle(
        GuardianEvent::Fill(FillEvent::new("NQ", 1, 18_000.0, at(2, 15, 0))),
        at(2, 15, 0),
    )
    .await
    .unwrap();
    drop(g);

    let mut snap = h.store.load(&AccountId::new("EVAL-3")).unwrap().unwrap();
    snap.guardian_state = GuardianState::Flattening;
    snap.lock_cause = Some(LockCause::ManualStop);
    snap.locked_on = Some(snap.date);
    h.store.save(&snap).unwrap();

    let mut g = h.boot(at(2, 15, 30));
    assert_eq!(g.machine().state, GuardianState::Locked);
    assert!(!g.ledger().is_flat());

    let out = g.handle(GuardianEvent::Reload, at(2, 15, 30)).await.unwrap();
    assert_eq!(h.bridge.flatten_calls.load(Ordering::SeqCst), 1);
    assert!(g.ledger().is_flat());
    assert_eq!(out.status.lock_cause, Some(LockCause::ManualStop));
    assert!(h.alerts.alerts().is_empty());
}

#[tokio::test]
async fn scenario_unreadable_snapshot_boots_fatal_locked() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::new(dir.path());
    std::fs::write(h.store.path_for(&AccountId::new("EVAL-3")), "{ truncated").unwrap();

    let deps = GuardianDeps {
        bridge: h.bridge.clone(),
        alerts: h.alerts.clone(),
        store: h.store.clone(),
        audit: None,
    };
    let g = Guardian::boot_from_store(setup(), deps, at(2, 14, 0)).unwrap();
    assert_eq!(g.machine().lock, Some(LockCause::Fatal));
    assert!(g.machine().fatal);
    assert_eq!(h.alerts.alerts().len(), 1);
    // The replacement snapshot is readable and keeps the lock.
    let snap = h.store.load(&AccountId::new("EVAL-3")).unwrap().unwrap();
    assert_eq!(snap.lock_cause, Some(LockCause::Fatal));
    assert!(snap.fatal_unacknowledged);
}
