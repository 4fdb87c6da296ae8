use pfg_config::AccountConfig;
use pfg_ledger::{Micros, Ppm};
use pfg_schemas::{RiskState, Signal};
use serde::Serialize;

/// Per-account sizing parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct SizingProfile {
    pub max_contracts: u32,
    pub minimum_confidence: f64,
    /// Aggressiveness multiplier m in [0.5, 1.5].
    pub aggressiveness: f64,
    pub default_win_probability: f64,
    pub default_payoff_ratio: f64,
}

impl SizingProfile {
    pub fn from_account(cfg: &AccountConfig) -> Self {
        Self {
            max_contracts: cfg.max_contracts,
            minimum_confidence: cfg.minimum_confidence,
            aggressiveness: cfg.aggressiveness,
            default_win_probability: cfg.default_win_probability,
            default_payoff_ratio: cfg.default_payoff_ratio,
        }
    }
}

/// Everything a sizer may look at.
#[derive(Clone, Debug)]
pub struct SizingInput<'a> {
    pub signal: &'a Signal,
    pub equity: Micros,
    pub risk_state: RiskState,
    /// Remaining risk budget (f_max).
    pub risk_budget: Ppm,
    /// USD per 1.0 price move per contract.
    pub point_value: Micros,
    pub profile: &'a SizingProfile,
}

impl SizingInput<'_> {
    /// Signal override, else the account default.
    pub fn win_probability(&self) -> f64 {
        self.signal
            .win_probability
            .unwrap_or(self.profile.default_win_probability)
    }

    /// Signal override, else the signal's own target/stop, else the account
    /// default.
    pub fn payoff_ratio(&self) -> f64 {
        self.signal
            .payoff_ratio
            .or_else(|| self.signal.implied_payoff_ratio())
            .unwrap_or(self.profile.default_payoff_ratio)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SizingReason {
    Sized,
    CappedAtMax,
    /// Kelly fraction is zero or negative.
    NoEdge,
    RiskStateBlocked,
    LowConfidence,
    InvalidSignal,
    BudgetExhausted,
    /// Positive fraction, but less than one contract of risk.
    BelowOneContract,
    /// The account is locked out or the request was superseded by a stop.
    GuardianBlocked,
}

impl SizingReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SizingReason::Sized => "SIZED",
            SizingReason::CappedAtMax => "CAPPED_AT_MAX",
            SizingReason::NoEdge => "NO_EDGE",
            SizingReason::RiskStateBlocked => "RISK_STATE_BLOCKED",
            SizingReason::LowConfidence => "LOW_CONFIDENCE",
            SizingReason::InvalidSignal => "INVALID_SIGNAL",
            SizingReason::BudgetExhausted => "BUDGET_EXHAUSTED",
            SizingReason::BelowOneContract => "BELOW_ONE_CONTRACT",
            SizingReason::GuardianBlocked => "GUARDIAN_BLOCKED",
        }
    }
}

impl std::fmt::Display for SizingReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SizingDecision {
    pub contracts: u32,
    /// Final fraction after clamping and the aggressiveness multiplier.
    pub kelly_fraction: f64,
    pub reason: SizingReason,
    pub rationale: String,
}

impl SizingDecision {
    pub fn zero(reason: SizingReason, rationale: impl Into<String>) -> Self {
        Self {
            contracts: 0,
            kelly_fraction: 0.0,
            reason,
            rationale: rationale.into(),
        }
    }

    pub fn is_tradeable(&self) -> bool {
        self.contracts > 0
    }
}

/// Size-position capability.
///
/// Implementations never panic and never fail: bad input is a zero-contract
/// decision with a reason.
pub trait PositionSizing: Send + Sync {
    fn name(&self) -> &str;
    fn size(&self, input: &SizingInput<'_>) -> SizingDecision;
}
