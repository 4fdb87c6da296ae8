//! Snapshot persistence.
//!
//! One JSON document per account. The file store writes to a temporary file
//! in the same directory and renames it over the previous snapshot, so a
//! crash mid-write leaves the last good snapshot in place.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use pfg_schemas::{AccountId, AccountSnapshot};

pub trait SnapshotStore: Send + Sync {
    /// `Ok(None)` when the account has never been saved. A snapshot that
    /// exists but cannot be read is an error.
    fn load(&self, account: &AccountId) -> Result<Option<AccountSnapshot>>;
    fn save(&self, snapshot: &AccountSnapshot) -> Result<()>;
}

// ---------------------------------------------------------------------------
// JSON files
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).with_context(|| format!("create_dir_all {:?}", dir))?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, account: &AccountId) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(account.as_str())))
    }
}

/// Account ids are free text; keep file names portable.
fn file_stem(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl SnapshotStore for JsonFileStore {
    fn load(&self, account: &AccountId) -> Result<Option<AccountSnapshot>> {
        let path = self.path_for(account);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path).with_context(|| format!("read snapshot {:?}", path))?;
        let snap: AccountSnapshot =
            serde_json::from_str(&raw).with_context(|| format!("parse snapshot {:?}", path))?;
        Ok(Some(snap))
    }

    fn save(&self, snapshot: &AccountSnapshot) -> Result<()> {
        let path = self.path_for(&snapshot.account_id);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(snapshot).context("serialize snapshot failed")?;
        fs::write(&tmp, body).with_context(|| format!("write snapshot {:?}", tmp))?;
        fs::rename(&tmp, &path).with_context(|| format!("rename {:?} -> {:?}", tmp, path))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In memory
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshots: Mutex<BTreeMap<String, AccountSnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot most recently saved for `account`.
    pub fn latest(&self, account: &AccountId) -> Option<AccountSnapshot> {
        self.snapshots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(account.as_str())
            .cloned()
    }
}

impl SnapshotStore for MemoryStore {
    fn load(&self, account: &AccountId) -> Result<Option<AccountSnapshot>> {
        Ok(self.latest(account))
    }

    fn save(&self, snapshot: &AccountSnapshot) -> Result<()> {
        self.snapshots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(snapshot.account_id.as_str().to_string(), snapshot.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use pfg_schemas::{GuardianState, Phase, RiskState};

    fn snap(id: &str) -> AccountSnapshot {
        AccountSnapshot {
            account_id: AccountId::new(id),
            phase: Phase::Evaluation,
            date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            opened_at: Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).unwrap(),
            initial_balance_micros: 50_000_000_000,
            balance_micros: 50_000_000_000,
            equity_micros: 50_000_000_000,
            high_water_mark_micros: 0,
            daily_start_balance_micros: 50_000_000_000,
            day_count: 0,
            had_fill_today: false,
            risk_state: RiskState::Safe,
            guardian_state: GuardianState::Active,
            lock_cause: None,
            locked_on: None,
            fatal_unacknowledged: false,
            positions: vec![],
            saved_at: Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).unwrap(),
        }
    }

    #[test]
    fn file_store_round_trips_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path()).unwrap();
        let id = AccountId::new("eval/1");
        assert!(store.load(&id).unwrap().is_none());

        let mut s = snap("eval/1");
        store.save(&s).unwrap();
        s.day_count = 3;
        store.save(&s).unwrap();

        assert_eq!(store.load(&id).unwrap(), Some(s));
        assert!(store.path_for(&id).ends_with("eval_1.json"));
        assert!(!store.path_for(&id).with_extension("json.tmp").exists());
    }

    #[test]
    fn unreadable_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path()).unwrap();
        let id = AccountId::new("acc");
        fs::write(store.path_for(&id), "{ not json").unwrap();
        assert!(store.load(&id).is_err());
    }
}
