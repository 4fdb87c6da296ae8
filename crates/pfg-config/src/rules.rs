//! Prop-firm rule sets.
//!
//! Percentages are written as fractions (`0.05` = 5%) in configuration and
//! converted once to [`Ppm`] by [`RuleSet::limits`], so every comparison the
//! compliance engine makes is integer-exact.

use pfg_ledger::Ppm;
use pfg_schemas::Phase;
use serde::{Deserialize, Serialize};

use crate::ConfigurationError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    pub profit_target_pct: f64,
    pub daily_loss_pct: f64,
    pub trailing_dd_pct: f64,
    pub min_days: u32,
    pub max_days: u32,
    pub safety_margin_pct: f64,
}

/// Integer form of a validated [`RuleSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleLimits {
    pub profit_target: Ppm,
    pub daily_loss: Ppm,
    pub trailing_dd: Ppm,
    pub safety_margin: Ppm,
    pub min_days: u32,
    pub max_days: u32,
}

impl RuleSet {
    pub fn evaluation_default() -> Self {
        Self {
            profit_target_pct: 0.06,
            daily_loss_pct: 0.02,
            trailing_dd_pct: 0.04,
            min_days: 5,
            max_days: 30,
            safety_margin_pct: 0.50,
        }
    }

    pub fn performance_default() -> Self {
        Self {
            profit_target_pct: 0.05,
            daily_loss_pct: 0.02,
            trailing_dd_pct: 0.04,
            min_days: 10,
            max_days: 60,
            safety_margin_pct: 0.40,
        }
    }

    /// Live accounts have no target; the day window is wide open.
    pub fn live_default() -> Self {
        Self {
            profit_target_pct: 1.0,
            daily_loss_pct: 0.015,
            trailing_dd_pct: 0.03,
            min_days: 0,
            max_days: u32::MAX,
            safety_margin_pct: 0.30,
        }
    }

    pub fn default_for(phase: Phase) -> Self {
        match phase {
            Phase::Evaluation => Self::evaluation_default(),
            Phase::Performance => Self::performance_default(),
            Phase::Live => Self::live_default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        check_pct("profit_target_pct", self.profit_target_pct)?;
        check_pct("daily_loss_pct", self.daily_loss_pct)?;
        check_pct("trailing_dd_pct", self.trailing_dd_pct)?;
        check_pct("safety_margin_pct", self.safety_margin_pct)?;
        if self.min_days > self.max_days {
            return Err(ConfigurationError::DayWindowInverted {
                min_days: self.min_days,
                max_days: self.max_days,
            });
        }
        Ok(())
    }

    /// Validated integer limits.
    pub fn limits(&self) -> Result<RuleLimits, ConfigurationError> {
        self.validate()?;
        Ok(RuleLimits {
            profit_target: to_ppm("profit_target_pct", self.profit_target_pct)?,
            daily_loss: to_ppm("daily_loss_pct", self.daily_loss_pct)?,
            trailing_dd: to_ppm("trailing_dd_pct", self.trailing_dd_pct)?,
            safety_margin: to_ppm("safety_margin_pct", self.safety_margin_pct)?,
            min_days: self.min_days,
            max_days: self.max_days,
        })
    }
}

fn check_pct(field: &'static str, value: f64) -> Result<(), ConfigurationError> {
    if value.is_finite() && value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(ConfigurationError::PercentOutOfRange { field, value })
    }
}

fn to_ppm(field: &'static str, value: f64) -> Result<Ppm, ConfigurationError> {
    match Ppm::from_fraction(value) {
        // a positive fraction below half a ppm would round to zero
        Some(p) if p > Ppm::ZERO => Ok(p),
        _ => Err(ConfigurationError::PercentOutOfRange { field, value }),
    }
}

/// One rule set per program phase. Missing entries fall back to the
/// phase presets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRules {
    #[serde(default = "RuleSet::evaluation_default")]
    pub evaluation: RuleSet,
    #[serde(default = "RuleSet::performance_default")]
    pub performance: RuleSet,
    #[serde(default = "RuleSet::live_default")]
    pub live: RuleSet,
}

impl Default for PhaseRules {
    fn default() -> Self {
        Self {
            evaluation: RuleSet::evaluation_default(),
            performance: RuleSet::performance_default(),
            live: RuleSet::live_default(),
        }
    }
}

impl PhaseRules {
    pub fn for_phase(&self, phase: Phase) -> &RuleSet {
        match phase {
            Phase::Evaluation => &self.evaluation,
            Phase::Performance => &self.performance,
            Phase::Live => &self.live,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.evaluation.validate()?;
        self.performance.validate()?;
        self.live.validate()
    }
}
