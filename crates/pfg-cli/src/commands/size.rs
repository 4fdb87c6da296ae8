//! `pfg size`: run a registered sizer on one hand-built signal.

use anyhow::{Context, Result};
use pfg_ledger::{Micros, Ppm};
use pfg_schemas::Signal;
use pfg_sizing::{PositionSizing, SizerRegistry, SizingInput, SizingProfile};

use super::{parse_direction, parse_risk_state};
use crate::SizeArgs;

pub fn size(args: &SizeArgs) -> Result<()> {
    let direction = parse_direction(&args.direction)?;
    let risk_state = parse_risk_state(&args.risk_state)?;
    let equity = Micros::from_f64(args.equity).context("--equity must be finite")?;
    let point_value = Micros::from_f64(args.point_value).context("--point-value must be finite")?;
    let risk_budget = Ppm::from_fraction(args.risk_budget.clamp(0.0, 1.0)).context("--risk-budget must be finite")?;

    let sizer = SizerRegistry::with_defaults()
        .instantiate(&args.sizer)
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let mut signal = Signal::new(
        args.symbol.clone(),
        direction,
        args.entry,
        args.stop,
        args.target,
        args.confidence,
    );
    signal.win_probability = args.p;
    signal.payoff_ratio = args.b;

    let profile = SizingProfile {
        max_contracts: args.max_contracts,
        minimum_confidence: args.minimum_confidence,
        aggressiveness: args.aggressiveness,
        default_win_probability: 0.5,
        default_payoff_ratio: 1.5,
    };
    let input = SizingInput {
        signal: &signal,
        equity,
        risk_state,
        risk_budget,
        point_value,
        profile: &profile,
    };
    let decision = sizer.size(&input);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&decision)?);
    } else {
        println!("sizer={}", sizer.name());
        println!("contracts={}", decision.contracts);
        println!("reason={}", decision.reason);
        println!("kelly_fraction={:.6}", decision.kelly_fraction);
        println!("rationale={}", decision.rationale);
    }
    Ok(())
}
