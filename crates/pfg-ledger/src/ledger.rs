//! Per-account ledger.
//!
//! [`accounting`](crate::accounting) holds the FIFO mechanics; this module
//! owns the invariant-checking boundary and the account-level figures a
//! prop-firm rule set is measured against:
//!
//! - `balance`: initial balance + realized P&L - fees.
//! - `equity`: balance + unrealized P&L at the last marks.
//! - `high_water_mark`: running max of equity. No operation lowers it.
//! - `daily_start_balance`: equity at the last trading-day boundary.
//! - `day_count`: closed trading days that contained at least one fill.
//!
//! The ledger does no IO and reads no clock; the caller supplies trading
//! days and timestamps.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use pfg_schemas::{
    AccountId, AccountSnapshot, GuardianState, LockCause, Phase, PositionView, RiskState,
};

use crate::accounting::{apply_fill, unrealized_micros};
use crate::fixedpoint::Micros;
use crate::types::{AccountFigures, DayClose, Fill, Instrument, OpenExposure, PositionState};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    ZeroQty,
    NonPositivePrice { price_micros: i64 },
    NegativeFee { fee_micros: i64 },
    EmptySymbol,
    UnknownInstrument { symbol: String },
    NonFinite { field: &'static str },
    /// Restored snapshot belongs to another account.
    AccountMismatch { expected: String, found: String },
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ZeroQty => write!(f, "ledger invariant: qty_delta must be non-zero"),
            Self::NonPositivePrice { price_micros } => {
                write!(f, "ledger invariant: price_micros must be > 0, got {price_micros}")
            }
            Self::NegativeFee { fee_micros } => {
                write!(f, "ledger invariant: fee_micros must be >= 0, got {fee_micros}")
            }
            Self::EmptySymbol => write!(f, "ledger invariant: symbol must not be empty"),
            Self::UnknownInstrument { symbol } => {
                write!(f, "ledger invariant: no instrument configured for '{symbol}'")
            }
            Self::NonFinite { field } => write!(f, "ledger invariant: {field} is not finite"),
            Self::AccountMismatch { expected, found } => {
                write!(f, "snapshot account '{found}' does not match ledger '{expected}'")
            }
        }
    }
}

impl std::error::Error for LedgerError {}

// ---------------------------------------------------------------------------
// Snapshot metadata
// ---------------------------------------------------------------------------

/// Guardian-owned fields that travel with a ledger snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotMeta {
    pub risk_state: RiskState,
    pub guardian_state: GuardianState,
    pub lock_cause: Option<LockCause>,
    pub locked_on: Option<NaiveDate>,
    pub fatal_unacknowledged: bool,
    pub saved_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// AccountLedger
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct AccountLedger {
    account_id: AccountId,
    phase: Phase,
    opened_at: DateTime<Utc>,
    trading_day: NaiveDate,
    initial_balance: Micros,
    balance: Micros,
    high_water_mark: Micros,
    daily_start_balance: Micros,
    day_count: u32,
    had_fill_today: bool,
    point_values: BTreeMap<String, Micros>,
    positions: BTreeMap<String, PositionState>,
    fill_count: u64,
}

impl AccountLedger {
    /// Fresh account at the start of an evaluation period.
    ///
    /// The high-water mark starts at zero and is first raised by the first
    /// fill or mark.
    pub fn new(
        account_id: AccountId,
        phase: Phase,
        initial_balance: Micros,
        opened_at: DateTime<Utc>,
        trading_day: NaiveDate,
        instruments: impl IntoIterator<Item = Instrument>,
    ) -> Self {
        Self {
            account_id,
            phase,
            opened_at,
            trading_day,
            initial_balance,
            balance: initial_balance,
            high_water_mark: Micros::ZERO,
            daily_start_balance: initial_balance,
            day_count: 0,
            had_fill_today: false,
            point_values: instruments
                .into_iter()
                .map(|i| (i.symbol, i.point_value))
                .collect(),
            positions: BTreeMap::new(),
            fill_count: 0,
        }
    }

    // -----------------------------------------------------------------------
    // Write surface
    // -----------------------------------------------------------------------

    /// Apply an execution, then raise the high-water mark to equity.
    ///
    /// # Errors
    /// [`LedgerError`] on any invalid field. The ledger is not mutated on
    /// error.
    pub fn record_fill(&mut self, fill: &Fill) -> Result<Micros, LedgerError> {
        let point_value = self.validate_fill(fill)?;

        let pos = self
            .positions
            .entry(fill.symbol.clone())
            .or_insert_with(|| PositionState::new(fill.symbol.clone(), fill.price, fill.ts_utc));
        let was_flat = pos.is_flat();

        let realized = apply_fill(pos, fill.qty_delta, fill.price, point_value);
        pos.mark = fill.price;
        if was_flat {
            pos.opened_at = fill.ts_utc;
            pos.stop = fill.stop;
            pos.target = fill.target;
        }
        if pos.is_flat() {
            self.positions.remove(&fill.symbol);
        }

        self.balance = self.balance.saturating_add(realized).saturating_sub(fill.fee);
        self.had_fill_today = true;
        self.fill_count += 1;
        self.raise_high_water_mark();
        Ok(realized)
    }

    /// Update the mark of `symbol`. Realized balance is untouched; equity
    /// and the high-water mark follow the new unrealized P&L.
    pub fn mark_to_market(&mut self, symbol: &str, price: Micros) -> Result<Micros, LedgerError> {
        if symbol.trim().is_empty() {
            return Err(LedgerError::EmptySymbol);
        }
        if !self.point_values.contains_key(symbol) {
            return Err(LedgerError::UnknownInstrument {
                symbol: symbol.to_string(),
            });
        }
        if price.raw() <= 0 {
            return Err(LedgerError::NonPositivePrice {
                price_micros: price.raw(),
            });
        }
        if let Some(pos) = self.positions.get_mut(symbol) {
            pos.mark = price;
        }
        self.raise_high_water_mark();
        Ok(self.equity())
    }

    /// Close the current trading day if `new_day` is later.
    ///
    /// Archives `daily_start_balance = equity` and counts the closed day iff
    /// it had a fill. Calling twice with the same day is a no-op.
    pub fn close_day(&mut self, new_day: NaiveDate) -> DayClose {
        if new_day <= self.trading_day {
            return DayClose::Unchanged;
        }
        let previous = self.trading_day;
        let counted = self.had_fill_today;
        if counted {
            self.day_count += 1;
        }
        self.daily_start_balance = self.equity();
        self.had_fill_today = false;
        self.trading_day = new_day;
        DayClose::Rolled {
            previous,
            counted,
            daily_start_balance: self.daily_start_balance,
        }
    }

    /// Close every open position at its last mark. Returns realized P&L.
    ///
    /// Used to reconcile the ledger after the broker confirmed a flatten
    /// without reporting the closing executions.
    pub fn flatten_at_marks(&mut self) -> Micros {
        let mut realized = Micros::ZERO;
        for (symbol, mut pos) in std::mem::take(&mut self.positions) {
            let qty = pos.qty_signed();
            if qty == 0 {
                continue;
            }
            let pv = self.point_values.get(&symbol).copied().unwrap_or(Micros::ZERO);
            let mark = pos.mark;
            realized = realized.saturating_add(apply_fill(&mut pos, -qty, mark, pv));
        }
        self.balance = self.balance.saturating_add(realized);
        self.raise_high_water_mark();
        realized
    }

    /// Start a new evaluation period from the initial balance. Positions
    /// must already be flat; any residue is dropped.
    pub fn reset_period(&mut self, phase: Phase, opened_at: DateTime<Utc>, trading_day: NaiveDate) {
        self.phase = phase;
        self.opened_at = opened_at;
        self.trading_day = trading_day;
        self.balance = self.initial_balance;
        self.high_water_mark = Micros::ZERO;
        self.daily_start_balance = self.initial_balance;
        self.day_count = 0;
        self.had_fill_today = false;
        self.positions.clear();
    }

    fn raise_high_water_mark(&mut self) {
        let eq = self.equity();
        if eq > self.high_water_mark {
            self.high_water_mark = eq;
        }
    }

    fn validate_fill(&self, fill: &Fill) -> Result<Micros, LedgerError> {
        if fill.symbol.trim().is_empty() {
            return Err(LedgerError::EmptySymbol);
        }
        if fill.qty_delta == 0 {
            return Err(LedgerError::ZeroQty);
        }
        if fill.price.raw() <= 0 {
            return Err(LedgerError::NonPositivePrice {
                price_micros: fill.price.raw(),
            });
        }
        if fill.fee.is_negative() {
            return Err(LedgerError::NegativeFee {
                fee_micros: fill.fee.raw(),
            });
        }
        self.point_values
            .get(&fill.symbol)
            .copied()
            .ok_or_else(|| LedgerError::UnknownInstrument {
                symbol: fill.symbol.clone(),
            })
    }

    // -----------------------------------------------------------------------
    // Read surface
    // -----------------------------------------------------------------------

    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn trading_day(&self) -> NaiveDate {
        self.trading_day
    }

    pub fn initial_balance(&self) -> Micros {
        self.initial_balance
    }

    pub fn balance(&self) -> Micros {
        self.balance
    }

    pub fn high_water_mark(&self) -> Micros {
        self.high_water_mark
    }

    pub fn daily_start_balance(&self) -> Micros {
        self.daily_start_balance
    }

    pub fn day_count(&self) -> u32 {
        self.day_count
    }

    pub fn had_fill_today(&self) -> bool {
        self.had_fill_today
    }

    pub fn fill_count(&self) -> u64 {
        self.fill_count
    }

    pub fn unrealized(&self) -> Micros {
        self.positions.values().fold(Micros::ZERO, |acc, pos| {
            let pv = self.point_values.get(&pos.symbol).copied().unwrap_or(Micros::ZERO);
            acc.saturating_add(unrealized_micros(pos, pv))
        })
    }

    pub fn equity(&self) -> Micros {
        self.balance.saturating_add(self.unrealized())
    }

    pub fn is_flat(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn qty_signed(&self, symbol: &str) -> i64 {
        self.positions.get(symbol).map(|p| p.qty_signed()).unwrap_or(0)
    }

    pub fn trades_symbol(&self, symbol: &str) -> bool {
        self.point_values.contains_key(symbol)
    }

    pub fn point_value(&self, symbol: &str) -> Option<Micros> {
        self.point_values.get(symbol).copied()
    }

    pub fn positions(&self) -> Vec<PositionView> {
        self.positions
            .values()
            .map(|p| {
                let pv = self.point_values.get(&p.symbol).copied().unwrap_or(Micros::ZERO);
                p.view(unrealized_micros(p, pv))
            })
            .collect()
    }

    /// What an emergency flatten has to close, in symbol order.
    pub fn open_exposures(&self) -> Vec<OpenExposure> {
        self.positions
            .values()
            .filter(|p| !p.is_flat())
            .map(|p| OpenExposure {
                symbol: p.symbol.clone(),
                qty_signed: p.qty_signed(),
                mark: p.mark,
            })
            .collect()
    }

    pub fn figures(&self) -> AccountFigures {
        AccountFigures {
            phase: self.phase,
            initial_balance: self.initial_balance,
            balance: self.balance,
            equity: self.equity(),
            high_water_mark: self.high_water_mark,
            daily_start_balance: self.daily_start_balance,
            day_count: self.day_count,
            had_fill_today: self.had_fill_today,
        }
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    pub fn snapshot(&self, meta: SnapshotMeta) -> AccountSnapshot {
        AccountSnapshot {
            account_id: self.account_id.clone(),
            phase: self.phase,
            date: self.trading_day,
            opened_at: self.opened_at,
            initial_balance_micros: self.initial_balance.raw(),
            balance_micros: self.balance.raw(),
            equity_micros: self.equity().raw(),
            high_water_mark_micros: self.high_water_mark.raw(),
            daily_start_balance_micros: self.daily_start_balance.raw(),
            day_count: self.day_count,
            had_fill_today: self.had_fill_today,
            risk_state: meta.risk_state,
            guardian_state: meta.guardian_state,
            lock_cause: meta.lock_cause,
            locked_on: meta.locked_on,
            fatal_unacknowledged: meta.fatal_unacknowledged,
            positions: self.positions.values().map(PositionState::to_snapshot).collect(),
            saved_at: meta.saved_at,
        }
    }

    /// Rebuild a ledger from a snapshot. The persisted high-water mark is
    /// kept as-is; restore never lowers it. Consistency of the snapshot's
    /// figures is checked by the caller.
    pub fn restore(
        snap: &AccountSnapshot,
        instruments: impl IntoIterator<Item = Instrument>,
    ) -> Result<Self, LedgerError> {
        let point_values: BTreeMap<String, Micros> = instruments
            .into_iter()
            .map(|i| (i.symbol, i.point_value))
            .collect();

        let mut positions = BTreeMap::new();
        for p in &snap.positions {
            if !point_values.contains_key(&p.symbol) {
                return Err(LedgerError::UnknownInstrument {
                    symbol: p.symbol.clone(),
                });
            }
            let state = PositionState::from_snapshot(p);
            if !state.is_flat() {
                positions.insert(p.symbol.clone(), state);
            }
        }

        Ok(Self {
            account_id: snap.account_id.clone(),
            phase: snap.phase,
            opened_at: snap.opened_at,
            trading_day: snap.date,
            initial_balance: Micros::new(snap.initial_balance_micros),
            balance: Micros::new(snap.balance_micros),
            high_water_mark: Micros::new(snap.high_water_mark_micros),
            daily_start_balance: Micros::new(snap.daily_start_balance_micros),
            day_count: snap.day_count,
            had_fill_today: snap.had_fill_today,
            point_values,
            positions,
            fill_count: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Instrument;
    use chrono::TimeZone;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn ts(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, d, h, 0, 0).unwrap()
    }

    fn ledger() -> AccountLedger {
        AccountLedger::new(
            AccountId::new("ACC-1"),
            Phase::Evaluation,
            Micros::from_usd(50_000),
            ts(2, 14),
            day(2),
            [Instrument::new("ES", Micros::from_usd(50))],
        )
    }

    fn fill(qty: i64, price: i64) -> Fill {
        Fill::new("ES", qty, Micros::from_usd(price), ts(2, 15))
    }

    #[test]
    fn invalid_fill_leaves_ledger_untouched() {
        let mut l = ledger();
        assert_eq!(l.record_fill(&fill(0, 5000)), Err(LedgerError::ZeroQty));
        assert!(matches!(
            l.record_fill(&fill(1, 0)),
            Err(LedgerError::NonPositivePrice { .. })
        ));
        assert!(matches!(
            l.record_fill(&Fill::new("CL", 1, Micros::from_usd(70), ts(2, 15))),
            Err(LedgerError::UnknownInstrument { .. })
        ));
        assert!(matches!(
            l.record_fill(&fill(1, 5000).with_fee(Micros::new(-1))),
            Err(LedgerError::NegativeFee { .. })
        ));
        assert_eq!(l.balance(), Micros::from_usd(50_000));
        assert_eq!(l.high_water_mark(), Micros::ZERO);
        assert!(!l.had_fill_today());
    }

    #[test]
    fn fee_is_debited_from_balance() {
        let mut l = ledger();
        l.record_fill(&fill(1, 5000).with_fee(Micros::new(2_500_000))).unwrap();
        assert_eq!(l.balance(), Micros::new(50_000_000_000 - 2_500_000));
    }

    #[test]
    fn mark_to_market_moves_equity_not_balance() {
        let mut l = ledger();
        l.record_fill(&fill(2, 5000)).unwrap();
        let eq = l.mark_to_market("ES", Micros::from_usd(4990)).unwrap();
        assert_eq!(l.balance(), Micros::from_usd(50_000));
        assert_eq!(eq, Micros::from_usd(49_000));
    }

    #[test]
    fn high_water_mark_follows_marks_up_but_not_down() {
        let mut l = ledger();
        l.record_fill(&fill(1, 5000)).unwrap();
        l.mark_to_market("ES", Micros::from_usd(5040)).unwrap();
        assert_eq!(l.high_water_mark(), Micros::from_usd(52_000));
        l.mark_to_market("ES", Micros::from_usd(5000)).unwrap();
        assert_eq!(l.high_water_mark(), Micros::from_usd(52_000));
        assert_eq!(l.equity(), Micros::from_usd(50_000));
    }

    #[test]
    fn close_day_rolls_once_and_counts_fill_days() {
        let mut l = ledger();
        l.record_fill(&fill(1, 5000)).unwrap();
        l.mark_to_market("ES", Micros::from_usd(4990)).unwrap();

        let rolled = l.close_day(day(3));
        assert_eq!(
            rolled,
            DayClose::Rolled {
                previous: day(2),
                counted: true,
                daily_start_balance: Micros::from_usd(49_500),
            }
        );
        assert_eq!(l.close_day(day(3)), DayClose::Unchanged);
        assert_eq!(l.day_count(), 1);

        // A day without fills is not counted.
        l.close_day(day(4));
        assert_eq!(l.day_count(), 1);
        assert_eq!(l.daily_start_balance(), Micros::from_usd(49_500));
    }

    #[test]
    fn flatten_at_marks_realizes_open_pnl() {
        let mut l = ledger();
        l.record_fill(&fill(-1, 5000)).unwrap();
        l.mark_to_market("ES", Micros::from_usd(5010)).unwrap();
        let realized = l.flatten_at_marks();
        assert_eq!(realized, Micros::from_usd(-500));
        assert!(l.is_flat());
        assert_eq!(l.balance(), Micros::from_usd(49_500));
    }

    #[test]
    fn snapshot_restore_preserves_figures() {
        let mut l = ledger();
        l.record_fill(&fill(1, 5000)).unwrap();
        l.mark_to_market("ES", Micros::from_usd(5020)).unwrap();
        let meta = SnapshotMeta {
            risk_state: RiskState::Safe,
            guardian_state: GuardianState::Active,
            lock_cause: None,
            locked_on: None,
            fatal_unacknowledged: false,
            saved_at: ts(2, 16),
        };
        let snap = l.snapshot(meta);
        let back = AccountLedger::restore(&snap, [Instrument::new("ES", Micros::from_usd(50))]).unwrap();
        assert_eq!(back.figures(), l.figures());
        assert_eq!(back.open_exposures(), l.open_exposures());
    }
}
