//! Snapshot consistency checks run before a persisted account is trusted.

use chrono::{DateTime, NaiveDate, Utc};
use pfg_ledger::AccountLedger;
use pfg_schemas::{AccountId, AccountSnapshot, GuardianState};

/// A persisted snapshot that cannot be trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateCorruption {
    pub reason: String,
}

impl StateCorruption {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for StateCorruption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "STATE_CORRUPTION: {}", self.reason)
    }
}

impl std::error::Error for StateCorruption {}

/// Check `snap` against itself and against the ledger rebuilt from it.
///
/// `today` is the current trading day; a snapshot dated after it means the
/// clock went backwards or the file came from elsewhere.
pub fn check_snapshot(
    snap: &AccountSnapshot,
    expected: &AccountId,
    restored: &AccountLedger,
    today: NaiveDate,
) -> Result<(), StateCorruption> {
    if &snap.account_id != expected {
        return Err(StateCorruption::new(format!(
            "snapshot belongs to '{}', expected '{}'",
            snap.account_id, expected
        )));
    }
    if snap.initial_balance_micros <= 0 {
        return Err(StateCorruption::new("initial balance must be positive"));
    }
    if snap.daily_start_balance_micros <= 0 {
        return Err(StateCorruption::new("daily start balance must be positive"));
    }
    if snap.high_water_mark_micros < 0 {
        return Err(StateCorruption::new("negative high-water mark"));
    }
    if snap.high_water_mark_micros > 0 && snap.high_water_mark_micros < snap.equity_micros {
        return Err(StateCorruption::new(format!(
            "high-water mark {} below equity {}",
            snap.high_water_mark_micros, snap.equity_micros
        )));
    }
    if restored.equity().raw() != snap.equity_micros {
        return Err(StateCorruption::new(format!(
            "equity {} does not match balance + open P&L {}",
            snap.equity_micros,
            restored.equity().raw()
        )));
    }
    if snap.date > today {
        return Err(StateCorruption::new(format!(
            "snapshot dated {} is after the current trading day {}",
            snap.date, today
        )));
    }
    check_day_count(snap.day_count, snap.opened_at, snap.date)?;
    if snap.guardian_state == GuardianState::Locked && snap.lock_cause.is_none() {
        return Err(StateCorruption::new("LOCKED without a lock cause"));
    }
    Ok(())
}

fn check_day_count(day_count: u32, opened_at: DateTime<Utc>, date: NaiveDate) -> Result<(), StateCorruption> {
    // One day of slack for the trading-day offset from UTC.
    let span = (date - opened_at.date_naive()).num_days();
    if span < -1 {
        return Err(StateCorruption::new(format!(
            "trading day {date} precedes period start {opened_at}"
        )));
    }
    if i64::from(day_count) > span.max(0) + 1 {
        return Err(StateCorruption::new(format!(
            "day count {day_count} exceeds the {} day(s) since {opened_at}",
            span.max(0) + 1
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pfg_ledger::{Instrument, LedgerError, Micros};
    use pfg_schemas::{Phase, RiskState};

    fn snap() -> AccountSnapshot {
        AccountSnapshot {
            account_id: AccountId::new("acc"),
            phase: Phase::Evaluation,
            date: NaiveDate::from_ymd_opt(2026, 3, 10).unwrap(),
            opened_at: Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).unwrap(),
            initial_balance_micros: 50_000_000_000,
            balance_micros: 48_000_000_000,
            equity_micros: 48_000_000_000,
            high_water_mark_micros: 52_000_000_000,
            daily_start_balance_micros: 49_000_000_000,
            day_count: 4,
            had_fill_today: true,
            risk_state: RiskState::Caution,
            guardian_state: GuardianState::Active,
            lock_cause: None,
            locked_on: None,
            fatal_unacknowledged: false,
            positions: vec![],
            saved_at: Utc.with_ymd_and_hms(2026, 3, 10, 20, 0, 0).unwrap(),
        }
    }

    fn check(s: &AccountSnapshot) -> Result<(), StateCorruption> {
        let ledger = AccountLedger::restore(s, [Instrument::new("ES", Micros::from_usd(50))])
            .map_err(|e: LedgerError| StateCorruption::new(e.to_string()))?;
        check_snapshot(s, &AccountId::new("acc"), &ledger, NaiveDate::from_ymd_opt(2026, 3, 11).unwrap())
    }

    #[test]
    fn consistent_snapshot_passes() {
        assert_eq!(check(&snap()), Ok(()));
    }

    #[test]
    fn each_inconsistency_is_reported() {
        let mut s = snap();
        s.high_water_mark_micros = 47_000_000_000;
        assert!(check(&s).is_err());

        let mut s = snap();
        s.equity_micros = 48_500_000_000;
        assert!(check(&s).is_err());

        let mut s = snap();
        s.day_count = 30;
        assert!(check(&s).is_err());

        let mut s = snap();
        s.guardian_state = GuardianState::Locked;
        assert!(check(&s).is_err());

        let mut s = snap();
        s.account_id = AccountId::new("other");
        assert!(check(&s).is_err());

        let mut s = snap();
        s.date = NaiveDate::from_ymd_opt(2026, 3, 12).unwrap();
        assert!(check(&s).is_err());
    }
}
