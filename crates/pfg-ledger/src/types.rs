use chrono::{DateTime, Utc};
use pfg_schemas::{FillEvent, LotSnapshot, PositionSnapshot, PositionView};

use crate::fixedpoint::Micros;
use crate::LedgerError;

/// Contract specification needed for P&L.
///
/// `point_value` is the USD value of a 1.0 price move for one contract
/// (ES = $50, NQ = $20, MES = $5).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instrument {
    pub symbol: String,
    pub point_value: Micros,
}

impl Instrument {
    pub fn new(symbol: impl Into<String>, point_value: Micros) -> Self {
        Self {
            symbol: symbol.into(),
            point_value,
        }
    }
}

/// A validated execution, ready to be applied.
///
/// `qty_delta` is signed (+buy, -sell). `price` and `fee` are micros.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fill {
    pub symbol: String,
    pub qty_delta: i64,
    pub price: Micros,
    pub fee: Micros,
    pub ts_utc: DateTime<Utc>,
    pub stop: Option<Micros>,
    pub target: Option<Micros>,
}

impl Fill {
    pub fn new(symbol: impl Into<String>, qty_delta: i64, price: Micros, ts_utc: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            qty_delta,
            price,
            fee: Micros::ZERO,
            ts_utc,
            stop: None,
            target: None,
        }
    }

    pub fn with_fee(mut self, fee: Micros) -> Self {
        self.fee = fee;
        self
    }

    /// Convert a wire fill. Non-finite numbers are rejected here; the
    /// remaining invariants are checked when the fill is recorded.
    pub fn from_event(ev: &FillEvent) -> Result<Self, LedgerError> {
        let price = Micros::from_f64(ev.price).ok_or(LedgerError::NonFinite { field: "price" })?;
        let fee = Micros::from_f64(ev.fee).ok_or(LedgerError::NonFinite { field: "fee" })?;
        let stop = match ev.stop {
            Some(v) => Some(Micros::from_f64(v).ok_or(LedgerError::NonFinite { field: "stop" })?),
            None => None,
        };
        let target = match ev.target {
            Some(v) => Some(Micros::from_f64(v).ok_or(LedgerError::NonFinite { field: "target" })?),
            None => None,
        };
        Ok(Self {
            symbol: ev.symbol.clone(),
            qty_delta: ev.qty_delta,
            price,
            fee,
            ts_utc: ev.ts_utc,
            stop,
            target,
        })
    }
}

/// A FIFO lot. `qty_signed` carries direction: +long, -short.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Lot {
    pub qty_signed: i64,
    pub entry_price: Micros,
}

impl Lot {
    pub fn long(qty: i64, entry_price: Micros) -> Self {
        debug_assert!(qty > 0);
        Self {
            qty_signed: qty,
            entry_price,
        }
    }

    pub fn short(qty: i64, entry_price: Micros) -> Self {
        debug_assert!(qty > 0);
        Self {
            qty_signed: -qty,
            entry_price,
        }
    }

    pub fn is_long(&self) -> bool {
        self.qty_signed > 0
    }

    pub fn is_short(&self) -> bool {
        self.qty_signed < 0
    }

    pub fn abs_qty(&self) -> i64 {
        self.qty_signed.abs()
    }
}

/// Open position for one symbol. All lots share one direction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PositionState {
    pub symbol: String,
    /// FIFO lots in chronological order.
    pub lots: Vec<Lot>,
    /// Last mark; starts at the opening fill price.
    pub mark: Micros,
    pub stop: Option<Micros>,
    pub target: Option<Micros>,
    pub opened_at: DateTime<Utc>,
}

impl PositionState {
    pub fn new(symbol: impl Into<String>, mark: Micros, opened_at: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            lots: Vec::new(),
            mark,
            stop: None,
            target: None,
            opened_at,
        }
    }

    pub fn qty_signed(&self) -> i64 {
        self.lots.iter().map(|l| l.qty_signed).sum()
    }

    pub fn is_flat(&self) -> bool {
        self.qty_signed() == 0
    }

    /// Quantity-weighted entry price (float; reporting only).
    pub fn avg_entry(&self) -> f64 {
        let qty: i64 = self.lots.iter().map(|l| l.abs_qty()).sum();
        if qty == 0 {
            return 0.0;
        }
        let notional: f64 = self
            .lots
            .iter()
            .map(|l| l.abs_qty() as f64 * l.entry_price.to_f64())
            .sum();
        notional / qty as f64
    }

    pub fn view(&self, unrealized: Micros) -> PositionView {
        PositionView {
            symbol: self.symbol.clone(),
            quantity: self.qty_signed(),
            entry: self.avg_entry(),
            mark: self.mark.to_f64(),
            stop: self.stop.map(Micros::to_f64),
            target: self.target.map(Micros::to_f64),
            unrealized_pnl_micros: unrealized.raw(),
            opened_at: self.opened_at,
        }
    }

    pub fn to_snapshot(&self) -> PositionSnapshot {
        PositionSnapshot {
            symbol: self.symbol.clone(),
            lots: self
                .lots
                .iter()
                .map(|l| LotSnapshot {
                    qty_signed: l.qty_signed,
                    entry_price_micros: l.entry_price.raw(),
                })
                .collect(),
            mark_price_micros: self.mark.raw(),
            stop_price_micros: self.stop.map(Micros::raw),
            target_price_micros: self.target.map(Micros::raw),
            opened_at: self.opened_at,
        }
    }

    pub fn from_snapshot(s: &PositionSnapshot) -> Self {
        Self {
            symbol: s.symbol.clone(),
            lots: s
                .lots
                .iter()
                .map(|l| Lot {
                    qty_signed: l.qty_signed,
                    entry_price: Micros::new(l.entry_price_micros),
                })
                .collect(),
            mark: Micros::new(s.mark_price_micros),
            stop: s.stop_price_micros.map(Micros::new),
            target: s.target_price_micros.map(Micros::new),
            opened_at: s.opened_at,
        }
    }
}

/// One open exposure that an emergency flatten has to close.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenExposure {
    pub symbol: String,
    pub qty_signed: i64,
    pub mark: Micros,
}

/// The account figures the compliance engine reads. Nothing else.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccountFigures {
    pub phase: pfg_schemas::Phase,
    pub initial_balance: Micros,
    pub balance: Micros,
    pub equity: Micros,
    pub high_water_mark: Micros,
    pub daily_start_balance: Micros,
    /// Closed trading days that contained at least one fill.
    pub day_count: u32,
    pub had_fill_today: bool,
}

impl AccountFigures {
    /// Trading days counted so far, including today once it has a fill.
    pub fn trading_days(&self) -> u32 {
        self.day_count + u32::from(self.had_fill_today)
    }
}

/// Result of [`AccountLedger::close_day`](crate::AccountLedger::close_day).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DayClose {
    /// The supplied day is not after the current trading day.
    Unchanged,
    Rolled {
        previous: chrono::NaiveDate,
        /// Whether the closed day was counted toward `day_count`.
        counted: bool,
        daily_start_balance: Micros,
    },
}
