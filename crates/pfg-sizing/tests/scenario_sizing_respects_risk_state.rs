//! Scenario: Sizing Respects Compliance State
//!
//! # Invariants under test
//! - A sizer resolved from the default registry by configured name sizes
//!   in SAFE and CAUTION only.
//! - The same signal sized as the account's usage climbs gets no larger:
//!   a shrinking risk budget shrinks the position.
//! - A positive-edge signal too small for one contract is reported as such,
//!   not as "no edge".
//!
//! GREEN when:
//! - SAFE/CAUTION produce contracts; DANGER and above produce zero.
//! - Contract counts are non-increasing as the budget shrinks.

use pfg_config::{AccountConfig, RuleSet};
use pfg_ledger::{Micros, Ppm};
use pfg_schemas::{Direction, Phase, RiskState, Signal};
use pfg_sizing::{SizerRegistry, SizingInput, SizingProfile, SizingReason};

fn profile() -> SizingProfile {
    let mut cfg = AccountConfig::new("eval-1", Phase::Evaluation, 50_000.0);
    cfg.max_contracts = 20;
    cfg.minimum_confidence = 0.55;
    SizingProfile::from_account(&cfg)
}

fn signal() -> Signal {
    // implied payoff 8/4 = 2.0; p = 0.6 -> raw Kelly 0.4
    Signal::new("NQ", Direction::Long, 18_000.0, 17_996.0, 18_008.0, 0.8).with_edge(0.6, 2.0)
}

#[test]
fn scenario_only_safe_and_caution_size() {
    let reg = SizerRegistry::with_defaults();
    let sizer = reg.instantiate("kelly").unwrap();
    let profile = profile();
    let sig = signal();

    for (state, expect_trade) in [
        (RiskState::Safe, true),
        (RiskState::Caution, true),
        (RiskState::Danger, false),
        (RiskState::Locked, false),
        (RiskState::Violated, false),
        (RiskState::Passed, false),
    ] {
        let d = sizer.size(&SizingInput {
            signal: &sig,
            equity: Micros::from_usd(50_000),
            risk_state: state,
            risk_budget: Ppm::new(100_000),
            point_value: Micros::from_usd(20),
            profile: &profile,
        });
        assert_eq!(d.is_tradeable(), expect_trade, "{state:?}: {d:?}");
        if !expect_trade {
            assert_eq!(d.reason, SizingReason::RiskStateBlocked);
        }
    }
}

#[test]
fn scenario_shrinking_budget_never_grows_position() {
    let reg = SizerRegistry::with_defaults();
    let sizer = reg.instantiate("kelly").unwrap();
    let profile = profile();
    let sig = signal();

    // evaluation safety margin 0.5; usage climbing from 0 to the margin
    let margin = RuleSet::default_for(Phase::Evaluation).limits().unwrap().safety_margin;
    let mut last = u32::MAX;
    for usage in [0, 100_000, 200_000, 300_000, 400_000, 450_000, 490_000, 500_000] {
        let budget = margin.saturating_sub_floor_zero(Ppm::new(usage));
        let d = sizer.size(&SizingInput {
            signal: &sig,
            equity: Micros::from_usd(50_000),
            risk_state: RiskState::Safe,
            risk_budget: budget,
            point_value: Micros::from_usd(20),
            profile: &profile,
        });
        assert!(d.contracts <= last, "usage {usage}: {} > {last}", d.contracts);
        last = d.contracts;
    }
    assert_eq!(last, 0);
}

#[test]
fn scenario_positive_edge_below_one_contract() {
    let reg = SizerRegistry::with_defaults();
    let sizer = reg.instantiate("half_kelly").unwrap();
    let profile = profile();
    // 200-point stop on NQ at $20/pt = $4,000 risk per contract;
    // 50,000 * min(0.4, 0.01) * 0.5 = $250 of risk
    let sig = Signal::new("NQ", Direction::Short, 18_000.0, 18_200.0, 17_600.0, 0.9).with_edge(0.6, 2.0);
    let d = sizer.size(&SizingInput {
        signal: &sig,
        equity: Micros::from_usd(50_000),
        risk_state: RiskState::Caution,
        risk_budget: Ppm::new(10_000),
        point_value: Micros::from_usd(20),
        profile: &profile,
    });
    assert_eq!(d.contracts, 0);
    assert_eq!(d.reason, SizingReason::BelowOneContract);
    assert!(d.kelly_fraction > 0.0);
}
