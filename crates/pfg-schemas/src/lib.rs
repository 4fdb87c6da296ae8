//! pfg-schemas
//!
//! Wire and persistence types shared by every guardian crate. Prices and
//! quantities arriving from the outside world are plain `f64`/`i64`; money
//! that is persisted is stored as raw micros (`*_micros`, 1 USD = 1_000_000)
//! so a snapshot reload reproduces the ledger bit-for-bit.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity / phase
// ---------------------------------------------------------------------------

/// Stable identifier of one prop-firm account.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub String);

impl AccountId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Program stage the account is in. Each stage carries its own rule set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Evaluation,
    Performance,
    Live,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Evaluation => "EVALUATION",
            Phase::Performance => "PERFORMANCE",
            Phase::Live => "LIVE",
        }
    }

    /// Live accounts have no profit target and no day window.
    pub fn has_profit_target(&self) -> bool {
        !matches!(self, Phase::Live)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Signals / market events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1 for long, -1 for short.
    pub fn sign(&self) -> i64 {
        match self {
            Direction::Long => 1,
            Direction::Short => -1,
        }
    }
}

/// A candidate trade produced by an upstream signal provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub direction: Direction,
    pub entry: f64,
    pub stop: f64,
    pub target: f64,
    /// Provider confidence in [0, 1].
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub win_probability: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payoff_ratio: Option<f64>,
}

impl Signal {
    pub fn new(
        symbol: impl Into<String>,
        direction: Direction,
        entry: f64,
        stop: f64,
        target: f64,
        confidence: f64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            direction,
            entry,
            stop,
            target,
            confidence,
            strategy_tag: None,
            win_probability: None,
            payoff_ratio: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.strategy_tag = Some(tag.into());
        self
    }

    pub fn with_edge(mut self, win_probability: f64, payoff_ratio: f64) -> Self {
        self.win_probability = Some(win_probability);
        self.payoff_ratio = Some(payoff_ratio);
        self
    }

    /// Absolute distance between entry and stop, in price units.
    pub fn stop_distance(&self) -> f64 {
        (self.entry - self.stop).abs()
    }

    /// Reward/risk implied by the signal's own target and stop.
    /// `None` when the stop distance is zero or the numbers are not finite.
    pub fn implied_payoff_ratio(&self) -> Option<f64> {
        let risk = self.stop_distance();
        let reward = (self.target - self.entry).abs();
        if risk > 0.0 && risk.is_finite() && reward.is_finite() {
            Some(reward / risk)
        } else {
            None
        }
    }

    /// Stop sits on the losing side of entry for the signal's direction.
    pub fn stop_on_correct_side(&self) -> bool {
        match self.direction {
            Direction::Long => self.stop < self.entry,
            Direction::Short => self.stop > self.entry,
        }
    }
}

/// A broker execution report. `qty_delta` is signed: positive buys,
/// negative sells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillEvent {
    pub symbol: String,
    pub qty_delta: i64,
    pub price: f64,
    #[serde(default)]
    pub fee: f64,
    pub ts_utc: DateTime<Utc>,
    /// Protective levels attached to the order that produced this fill.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<f64>,
}

impl FillEvent {
    pub fn new(symbol: impl Into<String>, qty_delta: i64, price: f64, ts_utc: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            qty_delta,
            price,
            fee: 0.0,
            ts_utc,
            stop: None,
            target: None,
        }
    }

    pub fn with_fee(mut self, fee: f64) -> Self {
        self.fee = fee;
        self
    }
}

/// A last-trade / mark price update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickEvent {
    pub symbol: String,
    pub price: f64,
    pub ts_utc: DateTime<Utc>,
}

impl TickEvent {
    pub fn new(symbol: impl Into<String>, price: f64, ts_utc: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            ts_utc,
        }
    }
}

// ---------------------------------------------------------------------------
// Risk / guardian states
// ---------------------------------------------------------------------------

/// Compliance classification of an account at one evaluation instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskState {
    Safe,
    Caution,
    Danger,
    Locked,
    Violated,
    Passed,
}

impl RiskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskState::Safe => "SAFE",
            RiskState::Caution => "CAUTION",
            RiskState::Danger => "DANGER",
            RiskState::Locked => "LOCKED",
            RiskState::Violated => "VIOLATED",
            RiskState::Passed => "PASSED",
        }
    }

    /// New risk may only be opened in SAFE or CAUTION.
    pub fn permits_new_risk(&self) -> bool {
        matches!(self, RiskState::Safe | RiskState::Caution)
    }
}

impl std::fmt::Display for RiskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Externally visible state of an account's guardian.
///
/// `Flattening` is transient: it is published while an emergency stop is
/// in flight and is never persisted as a resting state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GuardianState {
    Active,
    Warning,
    Flattening,
    Locked,
    Violated,
    Passed,
}

impl GuardianState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuardianState::Active => "ACTIVE",
            GuardianState::Warning => "WARNING",
            GuardianState::Flattening => "FLATTENING",
            GuardianState::Locked => "LOCKED",
            GuardianState::Violated => "VIOLATED",
            GuardianState::Passed => "PASSED",
        }
    }

    /// Only ACTIVE and WARNING ever consult the sizer.
    pub fn accepts_signals(&self) -> bool {
        matches!(self, GuardianState::Active | GuardianState::Warning)
    }

    /// VIOLATED and PASSED end the evaluation period.
    pub fn is_terminal(&self) -> bool {
        matches!(self, GuardianState::Violated | GuardianState::Passed)
    }

    pub fn is_locked_out(&self) -> bool {
        matches!(
            self,
            GuardianState::Flattening
                | GuardianState::Locked
                | GuardianState::Violated
                | GuardianState::Passed
        )
    }
}

impl std::fmt::Display for GuardianState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a guardian is LOCKED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockCause {
    /// Usage crossed the lock threshold. Clears at the next trading day.
    RuleBreach,
    /// Operator emergency stop. Cleared only by operator reset on a later day.
    ManualStop,
    /// Emergency stop could not be confirmed, or persisted state was corrupt.
    Fatal,
}

impl LockCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockCause::RuleBreach => "RULE_BREACH",
            LockCause::ManualStop => "MANUAL_STOP",
            LockCause::Fatal => "FATAL",
        }
    }

    pub fn clears_at_rollover(&self) -> bool {
        matches!(self, LockCause::RuleBreach)
    }
}

impl std::fmt::Display for LockCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Positions / snapshots
// ---------------------------------------------------------------------------

/// Read-only view of one open position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionView {
    pub symbol: String,
    /// Signed net contracts (negative = short).
    pub quantity: i64,
    /// Volume-weighted entry of the open lots.
    pub entry: f64,
    pub mark: f64,
    pub stop: Option<f64>,
    pub target: Option<f64>,
    pub unrealized_pnl_micros: i64,
    pub opened_at: DateTime<Utc>,
}

/// One FIFO lot as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotSnapshot {
    pub qty_signed: i64,
    pub entry_price_micros: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub symbol: String,
    pub lots: Vec<LotSnapshot>,
    pub mark_price_micros: i64,
    #[serde(default)]
    pub stop_price_micros: Option<i64>,
    #[serde(default)]
    pub target_price_micros: Option<i64>,
    pub opened_at: DateTime<Utc>,
}

/// Persisted per-account state, written on every guardian state change and
/// at every trading-day rollover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub account_id: AccountId,
    pub phase: Phase,
    /// Trading day the snapshot belongs to.
    pub date: NaiveDate,
    pub opened_at: DateTime<Utc>,
    pub initial_balance_micros: i64,
    pub balance_micros: i64,
    pub equity_micros: i64,
    pub high_water_mark_micros: i64,
    pub daily_start_balance_micros: i64,
    pub day_count: u32,
    #[serde(default)]
    pub had_fill_today: bool,
    pub risk_state: RiskState,
    pub guardian_state: GuardianState,
    #[serde(default)]
    pub lock_cause: Option<LockCause>,
    /// Trading day on which the current lock was applied.
    #[serde(default)]
    pub locked_on: Option<NaiveDate>,
    #[serde(default)]
    pub fatal_unacknowledged: bool,
    #[serde(default)]
    pub positions: Vec<PositionSnapshot>,
    pub saved_at: DateTime<Utc>,
}

/// Live status published by an account's guardian.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountStatus {
    pub account_id: AccountId,
    pub phase: Phase,
    pub guardian_state: GuardianState,
    pub risk_state: RiskState,
    pub lock_cause: Option<LockCause>,
    /// Message of an unacknowledged fatal alert, if any.
    pub fatal: Option<String>,
    pub trading_day: NaiveDate,
    pub balance_micros: i64,
    pub equity_micros: i64,
    pub high_water_mark_micros: i64,
    pub daily_start_balance_micros: i64,
    pub day_count: u32,
    pub usage_ppm: i64,
    pub risk_budget_remaining_ppm: i64,
    pub stale_data: bool,
    pub positions: Vec<PositionView>,
    pub updated_at: DateTime<Utc>,
}
