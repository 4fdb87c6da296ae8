//! pfg-risk
//!
//! Compliance engine for prop-firm accounts.
//!
//! - Daily loss usage against the day's start balance
//! - Trailing drawdown usage against the high-water mark
//! - Profit target + trading-day window
//! - Market-data freshness escalation
//!
//! Deterministic, pure logic. No IO, no wall clock: the caller supplies the
//! evaluation instant for freshness checks. Predictable conditions (zero
//! denominators, stale feeds, expired windows) come back as flags on the
//! outcome, never as errors.

mod engine;
mod freshness;
mod types;

pub use engine::{classify_usage, evaluate, evaluate_with_freshness};
pub use freshness::{FeedClock, Freshness};
pub use types::*;
