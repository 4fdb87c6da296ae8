//! Transition audit trail.
//!
//! JSON Lines, one guardian state change per line, hash-chained: each line
//! carries `hash_prev` (previous line's `hash_self`) and `hash_self`
//! (SHA-256 of the line's canonical JSON without `hash_self`). Editing or
//! removing a line breaks the chain at that point.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use pfg_schemas::{AccountId, GuardianState, LockCause};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::state::EventKind;

/// Namespace for deterministic event ids.
const AUDIT_NAMESPACE: Uuid = Uuid::from_bytes([
    0x5b, 0x1e, 0x0c, 0x4f, 0x93, 0x2a, 0x4d, 0x61, 0x8e, 0x07, 0xc2, 0x3b, 0x71, 0xd4, 0x9a, 0x10,
]);

/// What changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub account_id: AccountId,
    pub event: EventKind,
    pub from: GuardianState,
    pub to: GuardianState,
    pub lock_cause: Option<LockCause>,
    pub usage_ppm: i64,
    pub equity_micros: i64,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub seq: u64,
    pub ts_utc: DateTime<Utc>,
    pub event_type: String,
    pub payload: Value,
    pub hash_prev: Option<String>,
    pub hash_self: Option<String>,
}

/// Append-only writer. Resumes the chain of an existing file.
#[derive(Debug)]
pub struct TransitionAudit {
    path: PathBuf,
    last_hash: Option<String>,
    seq: u64,
}

impl TransitionAudit {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| format!("create_dir_all {:?}", parent))?;
            }
        }

        let mut last_hash = None;
        let mut seq = 0u64;
        if path.exists() {
            let content =
                fs::read_to_string(&path).with_context(|| format!("read audit log {:?}", path))?;
            for (i, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let ev: AuditEvent = serde_json::from_str(line.trim())
                    .with_context(|| format!("parse audit event at line {}", i + 1))?;
                last_hash = ev.hash_self;
                seq += 1;
            }
        }

        Ok(Self {
            path,
            last_hash,
            seq,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn last_hash(&self) -> Option<&str> {
        self.last_hash.as_deref()
    }

    pub fn record(&mut self, rec: &TransitionRecord, ts_utc: DateTime<Utc>) -> Result<AuditEvent> {
        let payload = serde_json::to_value(rec).context("serialize transition record failed")?;
        self.append("GUARDIAN_TRANSITION", payload, ts_utc)
    }

    pub fn append(&mut self, event_type: &str, payload: Value, ts_utc: DateTime<Utc>) -> Result<AuditEvent> {
        let event_id = derive_event_id(self.last_hash.as_deref(), &payload, self.seq)?;
        let mut ev = AuditEvent {
            event_id,
            seq: self.seq,
            ts_utc,
            event_type: event_type.to_string(),
            payload,
            hash_prev: self.last_hash.clone(),
            hash_self: None,
        };
        let hash = compute_event_hash(&ev)?;
        ev.hash_self = Some(hash.clone());

        let line = canonical_json_line(&ev)?;
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open audit log {:?}", self.path))?;
        f.write_all(line.as_bytes()).context("write audit line failed")?;
        f.write_all(b"\n").context("write newline failed")?;

        self.last_hash = Some(hash);
        self.seq += 1;
        Ok(ev)
    }
}

/// Event id from chain position and content; no randomness.
fn derive_event_id(prev: Option<&str>, payload: &Value, seq: u64) -> Result<Uuid> {
    let body = canonical_json_line(payload)?;
    let name = format!("{}|{}|{}", prev.unwrap_or("GENESIS"), seq, body);
    Ok(Uuid::new_v5(&AUDIT_NAMESPACE, name.as_bytes()))
}

fn canonical_json_line<T: Serialize>(v: &T) -> Result<String> {
    let raw = serde_json::to_value(v).context("serialize audit event failed")?;
    serde_json::to_string(&sort_keys(&raw)).context("json stringify failed")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut out = serde_json::Map::new();
            for k in keys {
                out.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(out)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

pub fn compute_event_hash(ev: &AuditEvent) -> Result<String> {
    let mut clone = ev.clone();
    clone.hash_self = None;
    let canonical = canonical_json_line(&clone)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainCheck {
    Valid { lines: usize },
    Broken { line: usize, reason: String },
}

pub fn verify_chain(path: impl AsRef<Path>) -> Result<ChainCheck> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("read audit log {:?}", path.as_ref()))?;
    verify_chain_str(&content)
}

pub fn verify_chain_str(content: &str) -> Result<ChainCheck> {
    let mut prev_hash: Option<String> = None;
    let mut lines = 0usize;

    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let ev: AuditEvent = serde_json::from_str(trimmed)
            .with_context(|| format!("parse audit event at line {}", i + 1))?;
        lines += 1;

        if ev.hash_prev != prev_hash {
            return Ok(ChainCheck::Broken {
                line: i + 1,
                reason: format!("hash_prev mismatch: expected {:?}, got {:?}", prev_hash, ev.hash_prev),
            });
        }
        let recomputed = compute_event_hash(&ev)?;
        if ev.hash_self.as_deref() != Some(recomputed.as_str()) {
            return Ok(ChainCheck::Broken {
                line: i + 1,
                reason: format!("hash_self mismatch: claimed {:?}, recomputed {}", ev.hash_self, recomputed),
            });
        }
        prev_hash = ev.hash_self;
    }

    Ok(ChainCheck::Valid { lines })
}
