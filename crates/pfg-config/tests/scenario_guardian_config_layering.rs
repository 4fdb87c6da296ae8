//! Scenario: Guardian Config Layering + Hashing
//!
//! GREEN when:
//! - A base + overlay pair deserializes into a validated `GuardianConfig`
//!   with the overlay's values in force.
//! - Omitted sections fall back to presets (phase rules, emergency stop).
//! - Key order in YAML does not change the config hash.
//! - Invalid rule percentages fail the load with CONFIG_INVALID.

use pfg_config::{load_guardian_config_from_strings, RuleSet};
use pfg_schemas::Phase;

const BASE: &str = r#"
instruments:
  - symbol: ES
    point_value: 50
  - symbol: NQ
    point_value: 20
accounts:
  - id: EVAL-1
    phase: EVALUATION
    initial_balance: 50000
    symbols: [ES, NQ]
  - id: LIVE-1
    phase: LIVE
    initial_balance: 100000
    symbols: [NQ]
    strategy_tags: [orb]
    max_contracts: 3
"#;

const OVERLAY: &str = r#"
phase_rules:
  evaluation:
    profit_target_pct: 0.08
    daily_loss_pct: 0.03
    trailing_dd_pct: 0.05
    min_days: 4
    max_days: 20
    safety_margin_pct: 0.6
emergency_stop:
  base_backoff_ms: 50
"#;

const BASE_REORDERED: &str = r#"
accounts:
  - phase: EVALUATION
    initial_balance: 50000
    id: EVAL-1
    symbols: [ES, NQ]
  - symbols: [NQ]
    id: LIVE-1
    max_contracts: 3
    phase: LIVE
    strategy_tags: [orb]
    initial_balance: 100000
instruments:
  - point_value: 50
    symbol: ES
  - symbol: NQ
    point_value: 20
"#;

#[test]
fn scenario_overlay_takes_effect_and_presets_fill_gaps() {
    let loaded = load_guardian_config_from_strings(&[BASE, OVERLAY]).unwrap();
    let cfg = &loaded.config;

    assert_eq!(cfg.accounts.len(), 2);
    assert_eq!(cfg.phase_rules.evaluation.profit_target_pct, 0.08);
    assert_eq!(cfg.phase_rules.performance, RuleSet::performance_default());
    assert_eq!(cfg.emergency_stop.base_backoff_ms, 50);
    assert_eq!(cfg.emergency_stop.max_attempts, 3);

    let eval = cfg.account("EVAL-1").unwrap();
    assert_eq!(eval.phase, Phase::Evaluation);
    assert_eq!(eval.max_contracts, 10);
    assert_eq!(eval.sizer, "kelly");
    assert_eq!(eval.rollover.timezone, "America/New_York");
    assert_eq!(eval.rules_for(&cfg.phase_rules, eval.phase).min_days, 4);

    let live = cfg.account("LIVE-1").unwrap();
    assert_eq!(cfg.instruments_for(live).unwrap().len(), 1);
    assert!(live.accepts_signal("NQ", Some("orb")));
}

#[test]
fn scenario_key_order_does_not_change_hash() {
    let a = load_guardian_config_from_strings(&[BASE]).unwrap();
    let b = load_guardian_config_from_strings(&[BASE_REORDERED]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
    assert_eq!(a.config_hash.len(), 64);

    let c = load_guardian_config_from_strings(&[BASE, OVERLAY]).unwrap();
    assert_ne!(a.config_hash, c.config_hash);
}

#[test]
fn scenario_invalid_percentage_fails_load() {
    let bad = r#"
phase_rules:
  evaluation:
    profit_target_pct: 0.06
    daily_loss_pct: 1.5
    trailing_dd_pct: 0.05
    min_days: 5
    max_days: 30
    safety_margin_pct: 0.5
"#;
    let err = load_guardian_config_from_strings(&[BASE, bad]).unwrap_err();
    let chain = format!("{err:#}");
    assert!(chain.contains("CONFIG_INVALID daily_loss_pct=1.5"), "{chain}");
}

#[test]
fn scenario_unknown_instrument_fails_load() {
    let bad = r#"
instruments:
  - symbol: ES
    point_value: 50
accounts:
  - id: X
    phase: LIVE
    initial_balance: 1000
    symbols: [CL]
"#;
    let err = load_guardian_config_from_strings(&[bad]).unwrap_err();
    assert!(format!("{err:#}").contains("unknown instrument 'CL'"));
}
