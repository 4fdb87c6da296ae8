use pfg_ledger::{Micros, Ppm};
use pfg_schemas::RiskState;
use serde::Serialize;

/// Usage at or above this is CAUTION.
pub const CAUTION_PPM: Ppm = Ppm::new(700_000);
/// Usage at or above this is DANGER.
pub const DANGER_PPM: Ppm = Ppm::new(900_000);
/// Usage at or above this is LOCKED.
pub const LOCK_PPM: Ppm = Ppm::new(980_000);
/// Usage at or above this is VIOLATED.
pub const VIOLATION_PPM: Ppm = Ppm::ONE;

/// Which limit produced the reported usage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BindingLimit {
    /// Neither limit has any usage.
    None,
    DailyLoss,
    TrailingDrawdown,
}

/// Why the engine chose its state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    WithinLimits,
    CautionBand,
    DangerBand,
    LockThreshold,
    LimitBreached,
    WindowExpired,
    ProfitTargetReached,
    StaleData,
}

/// Degraded-input flags. None of these is an error; each is already folded
/// into the state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ComplianceFlags {
    pub stale_data: bool,
    /// Daily allowance rounded to zero or below; daily usage treated as 0.
    pub degenerate_daily: bool,
    /// High-water mark not yet established; trailing usage treated as 0.
    pub degenerate_trailing: bool,
    pub window_expired: bool,
}

impl ComplianceFlags {
    pub fn degenerate_denominator(&self) -> bool {
        self.degenerate_daily || self.degenerate_trailing
    }
}

/// One evaluation of an account against its rule set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ComplianceOutcome {
    pub state: RiskState,
    pub reason: ReasonCode,
    pub usage: Ppm,
    pub daily_loss_used: Ppm,
    pub trailing_dd_used: Ppm,
    pub risk_budget_remaining: Ppm,
    pub binding: BindingLimit,
    pub daily_allowance: Micros,
    pub trailing_allowance: Micros,
    /// `equity - initial_balance`.
    pub profit: Micros,
    pub profit_target: Micros,
    pub flags: ComplianceFlags,
}

impl ComplianceOutcome {
    pub fn usage_ratio(&self) -> f64 {
        self.usage.as_f64()
    }

    pub fn risk_budget_ratio(&self) -> f64 {
        self.risk_budget_remaining.as_f64()
    }
}
