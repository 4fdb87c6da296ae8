//! pfg-config
//!
//! Typed guardian configuration: rule sets per phase, per-account settings,
//! instrument table, emergency-stop policy and storage paths.
//!
//! Loading is layered: YAML documents are merged in order (later layers win),
//! canonicalized to JSON and hashed with SHA-256 so every guardian run can be
//! tied to the exact configuration it used. Literal secrets are refused; the
//! guardian never needs broker credentials in its own config.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;

mod account;
mod error;
mod rules;

pub use account::{
    AccountConfig, EmergencyStopPolicy, GuardianConfig, InstrumentConfig, RolloverConfig,
    StorageConfig, TradingCalendar,
};
pub use error::ConfigurationError;
pub use rules::{PhaseRules, RuleLimits, RuleSet};

/// Leaf string values starting with any of these abort the load.
const SECRET_PREFIXES: &[&str] = &[
    "sk-",
    "sk_live",
    "sk_test",
    "AKIA",
    "-----BEGIN",
    "ghp_",
    "gho_",
    "glpat-",
    "xoxb-",
    "xoxp-",
];

// ---------------------------------------------------------------------------
// Layered loading
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_hash: String,
    pub canonical_json: String,
    pub config_json: Value,
}

/// A merged, hashed and validated guardian configuration.
#[derive(Debug, Clone)]
pub struct LoadedGuardianConfig {
    pub config_hash: String,
    pub canonical_json: String,
    pub config: GuardianConfig,
}

pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut docs: Vec<String> = Vec::new();
    for p in paths {
        let raw = fs::read_to_string(p).with_context(|| format!("failed to read yaml path: {p}"))?;
        docs.push(raw);
    }
    let doc_refs: Vec<&str> = docs.iter().map(|s| s.as_str()).collect();
    load_layered_yaml_from_strings(&doc_refs)
}

pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    let mut merged = serde_json::json!({});
    for raw in yaml_docs {
        let v_yaml: serde_yaml::Value = serde_yaml::from_str(raw).context("invalid yaml")?;
        let v_json = serde_json::to_value(v_yaml).context("yaml->json conversion failed")?;
        merged = deep_merge(merged, v_json);
    }

    enforce_no_secret_literals(&merged)?;

    let canonical_json = canonicalize_json(&merged)?;
    let config_hash = sha256_hex(canonical_json.as_bytes());
    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        config_json: merged,
    })
}

/// Load layers from disk and deserialize + validate the guardian config.
pub fn load_guardian_config(paths: &[&str]) -> Result<LoadedGuardianConfig> {
    let loaded = load_layered_yaml(paths)?;
    into_guardian_config(loaded)
}

pub fn load_guardian_config_from_strings(yaml_docs: &[&str]) -> Result<LoadedGuardianConfig> {
    let loaded = load_layered_yaml_from_strings(yaml_docs)?;
    into_guardian_config(loaded)
}

fn into_guardian_config(loaded: LoadedConfig) -> Result<LoadedGuardianConfig> {
    let config: GuardianConfig = serde_json::from_value(loaded.config_json)
        .context("config does not match the guardian schema")?;
    config.validate().context("guardian config failed validation")?;
    Ok(LoadedGuardianConfig {
        config_hash: loaded.config_hash,
        canonical_json: loaded.canonical_json,
        config,
    })
}

fn deep_merge(a: Value, b: Value) -> Value {
    match (a, b) {
        (Value::Object(mut a_map), Value::Object(b_map)) => {
            for (k, b_val) in b_map {
                let a_val = a_map.remove(&k).unwrap_or(Value::Null);
                a_map.insert(k, deep_merge(a_val, b_val));
            }
            Value::Object(a_map)
        }
        (_, b_other) => b_other,
    }
}

fn canonicalize_json(v: &Value) -> Result<String> {
    // serde_json's default Map is ordered by key, so this is stable for
    // any key order in the source YAML.
    serde_json::to_string(v).context("canonical json serialize failed")
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// Secret guard
// ---------------------------------------------------------------------------

fn enforce_no_secret_literals(v: &Value) -> Result<()> {
    let mut leaves = Vec::new();
    collect_leaf_pointers(v, "", &mut leaves);

    for ptr in leaves {
        if let Some(s) = v.pointer(&ptr).and_then(|val| val.as_str()) {
            if looks_like_secret(s) {
                bail!("CONFIG_SECRET_DETECTED leaf={} value=REDACTED", ptr);
            }
        }
    }
    Ok(())
}

fn looks_like_secret(s: &str) -> bool {
    let t = s.trim();
    if t.len() < 8 {
        return false;
    }
    SECRET_PREFIXES.iter().any(|p| t.starts_with(p))
}

fn collect_leaf_pointers(v: &Value, prefix: &str, out: &mut Vec<String>) {
    match v {
        Value::Object(map) => {
            for (k, vv) in map.iter() {
                let next = format!("{}/{}", prefix, escape_pointer_token(k));
                collect_leaf_pointers(vv, &next, out);
            }
        }
        Value::Array(arr) => {
            for (i, vv) in arr.iter().enumerate() {
                let next = format!("{}/{}", prefix, i);
                collect_leaf_pointers(vv, &next, out);
            }
        }
        _ => {
            let p = if prefix.is_empty() {
                String::new()
            } else {
                prefix.to_string()
            };
            out.push(p);
        }
    }
}

fn escape_pointer_token(s: &str) -> String {
    s.replace('~', "~0").replace('/', "~1")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_layer_overrides_nested_key_only() {
        let base = "a:\n  x: 1\n  y: 2\n";
        let over = "a:\n  y: 3\n";
        let l = load_layered_yaml_from_strings(&[base, over]).unwrap();
        assert_eq!(l.config_json.pointer("/a/x").and_then(Value::as_i64), Some(1));
        assert_eq!(l.config_json.pointer("/a/y").and_then(Value::as_i64), Some(3));
    }

    #[test]
    fn secret_inside_array_is_detected() {
        let doc = "accounts:\n  - id: \"sk_live_0123456789\"\n";
        let err = load_layered_yaml_from_strings(&[doc]).unwrap_err();
        assert!(err.to_string().contains("CONFIG_SECRET_DETECTED"));
        assert!(!err.to_string().contains("sk_live_0123456789"));
    }
}
