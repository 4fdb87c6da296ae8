//! `pfg snapshot-check`: the boot-time consistency checks, run offline.
//!
//! The snapshot is restored into a ledger with the account's configured
//! instruments, checked exactly as the guardian checks it before trusting
//! it, and re-evaluated against the account's rule set.

use anyhow::{Context, Result};
use pfg_guardian::check_snapshot;
use pfg_ledger::AccountLedger;
use pfg_schemas::AccountSnapshot;
use tracing::warn;

use super::{parse_as_of, path_refs};

pub fn snapshot_check(config_paths: &[String], snapshot: &str, as_of: Option<&str>) -> Result<()> {
    let loaded = pfg_config::load_guardian_config(&path_refs(config_paths))?;
    let cfg = &loaded.config;

    let raw = std::fs::read_to_string(snapshot).with_context(|| format!("read snapshot failed: {snapshot}"))?;
    let snap: AccountSnapshot =
        serde_json::from_str(&raw).with_context(|| format!("STATE_CORRUPTION: {snapshot} is not a valid snapshot"))?;

    let account = cfg
        .account(snap.account_id.as_str())
        .with_context(|| format!("account '{}' is not in the config", snap.account_id))?;
    let instruments = cfg.instruments_for(account)?;
    let calendar = account.rollover.calendar()?;
    let now = parse_as_of(as_of)?;
    let today = calendar.trading_day(now);

    let ledger = AccountLedger::restore(&snap, instruments)
        .map_err(|e| anyhow::anyhow!("STATE_CORRUPTION: {e}"))?;
    check_snapshot(&snap, &account.account_id(), &ledger, today)?;

    let limits = account.rules_for(&cfg.phase_rules, snap.phase).limits()?;
    let outcome = pfg_risk::evaluate(&ledger.figures(), &limits);

    println!("snapshot_ok=true");
    println!("account_id={}", snap.account_id);
    println!("phase={}", snap.phase);
    println!("trading_day={}", snap.date);
    println!("guardian_state={}", snap.guardian_state);
    println!(
        "lock_cause={}",
        snap.lock_cause.map(|c| c.to_string()).unwrap_or_else(|| "none".to_string())
    );
    println!("fatal_unacknowledged={}", snap.fatal_unacknowledged);
    println!("balance_micros={}", snap.balance_micros);
    println!("equity_micros={}", snap.equity_micros);
    println!("high_water_mark_micros={}", snap.high_water_mark_micros);
    println!("day_count={}", snap.day_count);
    println!("open_positions={}", ledger.positions().len());
    println!("persisted_risk_state={}", snap.risk_state);
    println!("risk_state={}", outcome.state);
    println!("usage_ppm={}", outcome.usage.raw());
    println!("risk_budget_remaining_ppm={}", outcome.risk_budget_remaining.raw());

    if outcome.state != snap.risk_state {
        warn!(
            persisted = %snap.risk_state,
            recomputed = %outcome.state,
            "persisted risk state differs from the re-evaluation"
        );
    }
    Ok(())
}
