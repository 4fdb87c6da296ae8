//! Risk-budget-constrained Kelly sizing.
//!
//! ```text
//! raw      = p - (1 - p) / b
//! fraction = clamp(raw, 0, f_max) * m * scale
//! contracts = floor(equity * fraction / (stop_distance * point_value))
//! ```
//!
//! `f_max` is the account's remaining risk budget, `m` its aggressiveness
//! multiplier and `scale` the fractional-Kelly factor of the registered
//! sizer (1.0 for full Kelly, 0.5 for half Kelly).

use crate::{PositionSizing, SizingDecision, SizingInput, SizingReason};

/// `p - (1 - p) / b`. May be negative. `None` for p outside (0, 1), b <= 0
/// or non-finite inputs.
pub fn raw_kelly(p: f64, b: f64) -> Option<f64> {
    if !(p.is_finite() && b.is_finite()) || p <= 0.0 || p >= 1.0 || b <= 0.0 {
        return None;
    }
    Some(p - (1.0 - p) / b)
}

/// `clamp(raw, 0, f_max) * m`.
pub fn kelly_fraction(raw: f64, f_max: f64, m: f64) -> f64 {
    let capped = if f_max > 0.0 { raw.clamp(0.0, f_max) } else { 0.0 };
    capped * m
}

#[derive(Clone, Debug)]
pub struct KellySizer {
    name: String,
    scale: f64,
}

impl KellySizer {
    pub fn full() -> Self {
        Self {
            name: "kelly".to_string(),
            scale: 1.0,
        }
    }

    pub fn half() -> Self {
        Self {
            name: "half_kelly".to_string(),
            scale: 0.5,
        }
    }

    pub fn scaled(name: impl Into<String>, scale: f64) -> Self {
        Self {
            name: name.into(),
            scale,
        }
    }
}

impl PositionSizing for KellySizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self, input: &SizingInput<'_>) -> SizingDecision {
        let sig = input.signal;
        let profile = input.profile;

        // 1) Guardian/compliance gate.
        if !input.risk_state.permits_new_risk() {
            return SizingDecision::zero(
                SizingReason::RiskStateBlocked,
                format!("risk state {} does not permit new risk", input.risk_state),
            );
        }

        // 2) Shape of the signal itself.
        let entry_ok = sig.entry.is_finite() && sig.entry > 0.0;
        let stop_ok = sig.stop.is_finite() && sig.stop > 0.0;
        if !entry_ok || !stop_ok || !sig.target.is_finite() {
            return SizingDecision::zero(SizingReason::InvalidSignal, "entry/stop/target must be positive finite prices");
        }
        if sig.stop_distance() <= 0.0 {
            return SizingDecision::zero(SizingReason::InvalidSignal, "zero stop distance");
        }
        if !sig.stop_on_correct_side() {
            return SizingDecision::zero(
                SizingReason::InvalidSignal,
                format!("stop {} is on the wrong side of entry {} for {:?}", sig.stop, sig.entry, sig.direction),
            );
        }
        if !(sig.confidence.is_finite() && (0.0..=1.0).contains(&sig.confidence)) {
            return SizingDecision::zero(SizingReason::InvalidSignal, format!("confidence {} outside [0, 1]", sig.confidence));
        }
        if !input.point_value.is_positive() {
            return SizingDecision::zero(SizingReason::InvalidSignal, format!("no point value for {}", sig.symbol));
        }
        if !(0.5..=1.5).contains(&profile.aggressiveness) {
            return SizingDecision::zero(
                SizingReason::InvalidSignal,
                format!("aggressiveness {} outside [0.5, 1.5]", profile.aggressiveness),
            );
        }

        // 3) Confidence floor.
        if sig.confidence < profile.minimum_confidence {
            return SizingDecision::zero(
                SizingReason::LowConfidence,
                format!("confidence {:.3} < minimum {:.3}", sig.confidence, profile.minimum_confidence),
            );
        }

        // 4) Edge.
        let p = input.win_probability();
        let b = input.payoff_ratio();
        let raw = match raw_kelly(p, b) {
            Some(r) => r,
            None => {
                return SizingDecision::zero(
                    SizingReason::InvalidSignal,
                    format!("win probability {p} / payoff ratio {b} out of range"),
                )
            }
        };
        if raw <= 0.0 {
            return SizingDecision::zero(SizingReason::NoEdge, format!("kelly {raw:.4} <= 0 (p={p:.3}, b={b:.3})"));
        }

        // 5) Budget.
        let f_max = input.risk_budget.as_f64();
        if f_max <= 0.0 {
            return SizingDecision::zero(SizingReason::BudgetExhausted, "risk budget exhausted");
        }
        let fraction = kelly_fraction(raw, f_max, profile.aggressiveness) * self.scale;
        if !(fraction.is_finite() && fraction > 0.0) {
            return SizingDecision::zero(SizingReason::NoEdge, format!("scaled fraction {fraction:.4} <= 0"));
        }

        // 6) Contracts.
        let risk_per_contract = sig.stop_distance() * input.point_value.to_f64();
        let raw_contracts = (input.equity.to_f64() * fraction / risk_per_contract).floor();
        if !raw_contracts.is_finite() || raw_contracts < 1.0 {
            return SizingDecision {
                contracts: 0,
                kelly_fraction: fraction,
                reason: SizingReason::BelowOneContract,
                rationale: format!(
                    "fraction {fraction:.4} of {:.2} covers less than one contract at {risk_per_contract:.2} risk",
                    input.equity.to_f64()
                ),
            };
        }

        let max = f64::from(profile.max_contracts);
        let (contracts, reason) = if raw_contracts > max {
            (profile.max_contracts, SizingReason::CappedAtMax)
        } else {
            (raw_contracts as u32, SizingReason::Sized)
        };

        SizingDecision {
            contracts,
            kelly_fraction: fraction,
            reason,
            rationale: format!(
                "p={p:.3} b={b:.3} raw={raw:.4} f_max={f_max:.4} m={:.2} -> f={fraction:.4}; \
                 {contracts} x {} ({risk_per_contract:.2} risk/contract)",
                profile.aggressiveness, sig.symbol
            ),
        }
    }
}
