use pfg_config::RuleLimits;
use pfg_ledger::{mul_ppm_ceil, mul_ppm_floor, ratio_ppm_ceil, AccountFigures, Micros, Ppm};
use pfg_schemas::RiskState;

use crate::freshness::Freshness;
use crate::{
    BindingLimit, ComplianceFlags, ComplianceOutcome, ReasonCode, CAUTION_PPM, DANGER_PPM,
    LOCK_PPM, VIOLATION_PPM,
};

/// Band for a usage figure alone (no terminal or freshness rules).
pub fn classify_usage(usage: Ppm) -> (RiskState, ReasonCode) {
    if usage >= VIOLATION_PPM {
        (RiskState::Violated, ReasonCode::LimitBreached)
    } else if usage >= LOCK_PPM {
        (RiskState::Locked, ReasonCode::LockThreshold)
    } else if usage >= DANGER_PPM {
        (RiskState::Danger, ReasonCode::DangerBand)
    } else if usage >= CAUTION_PPM {
        (RiskState::Caution, ReasonCode::CautionBand)
    } else {
        (RiskState::Safe, ReasonCode::WithinLimits)
    }
}

/// Evaluate an account against its limits with freshness ignored.
pub fn evaluate(figures: &AccountFigures, limits: &RuleLimits) -> ComplianceOutcome {
    evaluate_with_freshness(figures, limits, &Freshness::Untracked)
}

/// Evaluate an account against its limits.
///
/// Pure function of its inputs. Precedence, highest first:
/// VIOLATED (limit breached or day window expired), PASSED, LOCKED, DANGER,
/// CAUTION, SAFE. Stale data lifts SAFE/CAUTION to DANGER.
pub fn evaluate_with_freshness(
    figures: &AccountFigures,
    limits: &RuleLimits,
    freshness: &Freshness,
) -> ComplianceOutcome {
    let mut flags = ComplianceFlags::default();

    // 1) Daily loss: loss rounded up against an allowance rounded down.
    let daily_allowance = mul_ppm_floor(figures.daily_start_balance, limits.daily_loss);
    let daily_loss = figures
        .daily_start_balance
        .saturating_sub(figures.equity)
        .clamp_non_negative();
    let daily_loss_used = ratio_ppm_ceil(daily_loss, daily_allowance).unwrap_or_else(|| {
        flags.degenerate_daily = true;
        Ppm::ZERO
    });

    // 2) Trailing drawdown from the high-water mark.
    let (trailing_allowance, trailing_dd_used) = if figures.high_water_mark.is_positive() {
        let allowance = mul_ppm_floor(figures.high_water_mark, limits.trailing_dd);
        let drawdown = figures
            .high_water_mark
            .saturating_sub(figures.equity)
            .clamp_non_negative();
        let used = ratio_ppm_ceil(drawdown, allowance).unwrap_or_else(|| {
            flags.degenerate_trailing = true;
            Ppm::ZERO
        });
        (allowance, used)
    } else {
        flags.degenerate_trailing = true;
        (Micros::ZERO, Ppm::ZERO)
    };

    // 3) Usage and the limit that binds.
    let usage = daily_loss_used.max(trailing_dd_used);
    let binding = if usage == Ppm::ZERO {
        BindingLimit::None
    } else if daily_loss_used >= trailing_dd_used {
        BindingLimit::DailyLoss
    } else {
        BindingLimit::TrailingDrawdown
    };

    let risk_budget_remaining = limits.safety_margin.saturating_sub_floor_zero(usage);

    // 4) Profit target and day window (not in LIVE).
    let profit = figures.equity.saturating_sub(figures.initial_balance);
    let profit_target = mul_ppm_ceil(figures.initial_balance, limits.profit_target);
    let days = figures.trading_days();
    let graded = figures.phase.has_profit_target();
    let passed = graded
        && profit >= profit_target
        && days >= limits.min_days
        && days <= limits.max_days;
    flags.window_expired = graded && days > limits.max_days && !passed;

    // 5) Classify.
    let (mut state, mut reason) = if usage >= VIOLATION_PPM {
        (RiskState::Violated, ReasonCode::LimitBreached)
    } else if flags.window_expired {
        (RiskState::Violated, ReasonCode::WindowExpired)
    } else if passed {
        (RiskState::Passed, ReasonCode::ProfitTargetReached)
    } else {
        classify_usage(usage)
    };

    // 6) Stale data never reads as SAFE.
    if freshness.is_stale() {
        flags.stale_data = true;
        if matches!(state, RiskState::Safe | RiskState::Caution) {
            state = RiskState::Danger;
            reason = ReasonCode::StaleData;
        }
    }

    ComplianceOutcome {
        state,
        reason,
        usage,
        daily_loss_used,
        trailing_dd_used,
        risk_budget_remaining,
        binding,
        daily_allowance,
        trailing_allowance,
        profit,
        profit_target,
        flags,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pfg_config::RuleSet;
    use pfg_schemas::Phase;

    fn limits() -> RuleLimits {
        RuleSet {
            profit_target_pct: 0.06,
            daily_loss_pct: 0.02,
            trailing_dd_pct: 0.05,
            min_days: 5,
            max_days: 30,
            safety_margin_pct: 0.5,
        }
        .limits()
        .unwrap()
    }

    fn figures(equity: i64, hwm: i64, dsb: i64) -> AccountFigures {
        AccountFigures {
            phase: Phase::Evaluation,
            initial_balance: Micros::from_usd(50_000),
            balance: Micros::from_usd(equity),
            equity: Micros::from_usd(equity),
            high_water_mark: Micros::from_usd(hwm),
            daily_start_balance: Micros::from_usd(dsb),
            day_count: 2,
            had_fill_today: false,
        }
    }

    #[test]
    fn band_edges_are_inclusive_on_the_upper_state() {
        assert_eq!(classify_usage(Ppm::new(699_999)).0, RiskState::Safe);
        assert_eq!(classify_usage(Ppm::new(700_000)).0, RiskState::Caution);
        assert_eq!(classify_usage(Ppm::new(900_000)).0, RiskState::Danger);
        assert_eq!(classify_usage(Ppm::new(980_000)).0, RiskState::Locked);
        assert_eq!(classify_usage(Ppm::new(1_000_000)).0, RiskState::Violated);
    }

    #[test]
    fn trailing_drawdown_example_is_caution() {
        let o = evaluate(&figures(50_000, 52_000, 50_000), &limits());
        // 2000 / 2600 = 0.7692..
        assert_eq!(o.trailing_dd_used, Ppm::new(769_231));
        assert_eq!(o.binding, BindingLimit::TrailingDrawdown);
        assert_eq!(o.state, RiskState::Caution);
        assert_eq!(o.risk_budget_remaining, Ppm::ZERO);
    }

    #[test]
    fn zero_high_water_mark_is_not_a_division_fault() {
        let o = evaluate(&figures(50_000, 0, 50_000), &limits());
        assert_eq!(o.trailing_dd_used, Ppm::ZERO);
        assert!(o.flags.degenerate_trailing);
        assert_eq!(o.state, RiskState::Safe);
        assert_eq!(o.binding, BindingLimit::None);
        assert_eq!(o.risk_budget_remaining, Ppm::new(500_000));
    }

    #[test]
    fn daily_loss_at_allowance_is_violated() {
        // allowance = 2% of 50,000 = 1,000
        let o = evaluate(&figures(49_000, 50_000, 50_000), &limits());
        assert_eq!(o.daily_loss_used, Ppm::ONE);
        assert_eq!(o.state, RiskState::Violated);
        assert_eq!(o.reason, ReasonCode::LimitBreached);
    }

    #[test]
    fn stale_data_lifts_safe_to_danger() {
        let f = Freshness::Stale {
            symbol: "ES".into(),
            age_ms: 60_000,
        };
        let o = evaluate_with_freshness(&figures(50_000, 50_000, 50_000), &limits(), &f);
        assert_eq!(o.state, RiskState::Danger);
        assert_eq!(o.reason, ReasonCode::StaleData);
        assert!(o.flags.stale_data);
    }

    #[test]
    fn stale_data_does_not_soften_lock() {
        let f = Freshness::Stale {
            symbol: "ES".into(),
            age_ms: 60_000,
        };
        // daily 990/1000 = 0.99
        let o = evaluate_with_freshness(&figures(49_010, 50_000, 50_000), &limits(), &f);
        assert_eq!(o.state, RiskState::Locked);
    }
}
