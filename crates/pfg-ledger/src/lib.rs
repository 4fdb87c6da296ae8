//! pfg-ledger
//!
//! Account ledger for prop-firm accounts: FIFO lots with per-instrument point
//! values, fixed-point money, running high-water mark, daily start balance
//! and fill-day counting.
//!
//! Deterministic and pure: no IO, no wall clock.

mod accounting;
mod fixedpoint;
mod ledger;
mod types;

pub use accounting::{apply_fill, pnl_micros, unrealized_micros};
pub use fixedpoint::{mul_ppm_ceil, mul_ppm_floor, ratio_ppm_ceil, Micros, Ppm, MICROS_SCALE, PPM_SCALE};
pub use ledger::{AccountLedger, LedgerError, SnapshotMeta};
pub use types::{AccountFigures, DayClose, Fill, Instrument, Lot, OpenExposure, PositionState};
