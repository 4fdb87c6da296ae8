//! Command handlers for the `pfg` CLI.
//!
//! Shared parsing helpers live here; each submodule owns one command family.

pub mod audit;
pub mod config;
pub mod size;
pub mod snapshot;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use pfg_schemas::{Direction, RiskState};

pub fn path_refs(paths: &[String]) -> Vec<&str> {
    paths.iter().map(|s| s.as_str()).collect()
}

pub fn parse_direction(s: &str) -> Result<Direction> {
    match s.trim().to_uppercase().as_str() {
        "LONG" | "BUY" => Ok(Direction::Long),
        "SHORT" | "SELL" => Ok(Direction::Short),
        other => anyhow::bail!("invalid --direction '{}'. expected one of: LONG | SHORT", other),
    }
}

pub fn parse_risk_state(s: &str) -> Result<RiskState> {
    match s.trim().to_uppercase().as_str() {
        "SAFE" => Ok(RiskState::Safe),
        "CAUTION" => Ok(RiskState::Caution),
        "DANGER" => Ok(RiskState::Danger),
        "LOCKED" => Ok(RiskState::Locked),
        "VIOLATED" => Ok(RiskState::Violated),
        "PASSED" => Ok(RiskState::Passed),
        other => anyhow::bail!(
            "invalid --risk-state '{}'. expected one of: SAFE | CAUTION | DANGER | LOCKED | VIOLATED | PASSED",
            other
        ),
    }
}

/// `None` means now.
pub fn parse_as_of(s: Option<&str>) -> Result<DateTime<Utc>> {
    match s {
        None => Ok(Utc::now()),
        Some(raw) => Ok(DateTime::parse_from_rfc3339(raw.trim())
            .with_context(|| format!("invalid --as-of '{raw}', expected RFC 3339"))?
            .with_timezone(&Utc)),
    }
}
