//! Scenario: Daily Rollover + Day Count
//!
//! # Invariants under test
//! - `daily_start_balance` is reset exactly once per trading-day boundary,
//!   to the equity at that boundary (open positions included).
//! - `day_count` increments once per day that contained at least one fill,
//!   regardless of how many fills that day had.
//! - A restored snapshot keeps its high-water mark even when equity has
//!   fallen below it.
//!
//! GREEN when:
//! - Three fills on one day count as one day.
//! - A fill-free day is skipped.
//! - Re-closing the same day changes nothing.

use chrono::{NaiveDate, TimeZone, Utc};
use pfg_ledger::{AccountLedger, DayClose, Fill, Instrument, Micros, SnapshotMeta};
use pfg_schemas::{AccountId, GuardianState, Phase, RiskState};

fn d(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, day).unwrap()
}

#[test]
fn scenario_fill_days_and_rollover_balances() {
    let t = Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap();
    let mut l = AccountLedger::new(
        AccountId::new("A"),
        Phase::Evaluation,
        Micros::from_usd(100_000),
        t,
        d(2),
        [Instrument::new("MES", Micros::from_usd(5))],
    );

    // Day 2: three fills, net long 1 @ 5000 after a scalp.
    l.record_fill(&Fill::new("MES", 2, Micros::from_usd(5000), t)).unwrap();
    l.record_fill(&Fill::new("MES", -1, Micros::from_usd(5010), t)).unwrap();
    l.mark_to_market("MES", Micros::from_usd(4990)).unwrap();

    // realized +50, open lot (5000) marked at 4990 = -50
    assert_eq!(l.balance(), Micros::from_usd(100_050));
    assert_eq!(l.equity(), Micros::from_usd(100_000));
    // peak was right after the scalp: the remaining lot was marked at 5010
    assert_eq!(l.high_water_mark(), Micros::from_usd(100_100));

    match l.close_day(d(3)) {
        DayClose::Rolled {
            counted,
            daily_start_balance,
            ..
        } => {
            assert!(counted);
            assert_eq!(daily_start_balance, Micros::from_usd(100_000));
        }
        DayClose::Unchanged => panic!("day 3 must roll"),
    }
    assert_eq!(l.close_day(d(3)), DayClose::Unchanged);
    assert_eq!(l.close_day(d(2)), DayClose::Unchanged);

    // Day 3: no fills.
    l.close_day(d(4));
    assert_eq!(l.day_count(), 1);

    // Day 4: one fill closes the lot.
    l.record_fill(&Fill::new("MES", -1, Micros::from_usd(4980), t)).unwrap();
    assert!(l.is_flat());
    assert_eq!(l.figures().trading_days(), 2);
    l.close_day(d(5));
    assert_eq!(l.day_count(), 2);
    assert_eq!(l.daily_start_balance(), Micros::from_usd(99_950));
}

#[test]
fn scenario_restore_keeps_high_water_mark() {
    let t = Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap();
    let instruments = || [Instrument::new("ES", Micros::from_usd(50))];
    let mut l = AccountLedger::new(
        AccountId::new("B"),
        Phase::Performance,
        Micros::from_usd(50_000),
        t,
        d(2),
        instruments(),
    );
    l.record_fill(&Fill::new("ES", 1, Micros::from_usd(5000), t)).unwrap();
    l.mark_to_market("ES", Micros::from_usd(5040)).unwrap();
    l.mark_to_market("ES", Micros::from_usd(4960)).unwrap();

    let snap = l.snapshot(SnapshotMeta {
        risk_state: RiskState::Caution,
        guardian_state: GuardianState::Active,
        lock_cause: None,
        locked_on: None,
        fatal_unacknowledged: false,
        saved_at: t,
    });
    assert_eq!(snap.high_water_mark_micros, 52_000_000_000);
    assert_eq!(snap.equity_micros, 48_000_000_000);

    let back = AccountLedger::restore(&snap, instruments()).unwrap();
    assert_eq!(back.high_water_mark(), Micros::from_usd(52_000));
    assert_eq!(back.equity(), Micros::from_usd(48_000));
    assert_eq!(back.qty_signed("ES"), 1);
}
