//! `pfg config-hash` and `pfg config-check`.

use anyhow::Result;
use pfg_sizing::SizerRegistry;

use super::path_refs;

pub fn config_hash(paths: &[String]) -> Result<()> {
    let loaded = pfg_config::load_layered_yaml(&path_refs(paths))?;
    println!("config_hash={}", loaded.config_hash);
    println!("{}", loaded.canonical_json);
    Ok(())
}

/// Validates the schema, rule sets and every account's sizer, then prints
/// one line per account with the limits it resolves to.
pub fn config_check(paths: &[String]) -> Result<()> {
    let loaded = pfg_config::load_guardian_config(&path_refs(paths))?;
    let cfg = &loaded.config;
    let sizers = SizerRegistry::with_defaults();

    for a in &cfg.accounts {
        if !sizers.contains(&a.sizer) {
            anyhow::bail!("CONFIG_INVALID account={} unknown sizer '{}'", a.id, a.sizer);
        }
        a.rollover.calendar()?;
    }

    println!("config_ok=true");
    println!("config_hash={}", loaded.config_hash);
    println!("accounts={}", cfg.accounts.len());
    println!("instruments={}", cfg.instruments.len());
    for a in &cfg.accounts {
        let limits = a.rules_for(&cfg.phase_rules, a.phase).limits()?;
        println!(
            "account={} phase={} balance={:.2} symbols={} sizer={} daily_loss={:.4} trailing_dd={:.4} profit_target={}",
            a.id,
            a.phase,
            a.initial_balance,
            a.symbols.join(","),
            a.sizer,
            limits.daily_loss.as_f64(),
            limits.trailing_dd.as_f64(),
            if a.phase.has_profit_target() {
                format!("{:.4}", limits.profit_target.as_f64())
            } else {
                "none".to_string()
            },
        );
    }
    match &cfg.storage.snapshot_dir {
        Some(dir) => println!("snapshot_dir={dir}"),
        None => println!("snapshot_dir=memory"),
    }
    Ok(())
}
