//! Market-data freshness.
//!
//! Every feed (symbol) that has ever produced a tick must stay fresh
//! relative to the evaluation instant. A feed that has never ticked is not
//! tracked, so a freshly booted account is not stale until data starts
//! flowing and then stops.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Freshness {
    /// Freshness checking disabled, or no feed has ticked yet.
    Untracked,
    Fresh,
    Stale { symbol: String, age_ms: u64 },
}

impl Freshness {
    pub fn is_stale(&self) -> bool {
        matches!(self, Freshness::Stale { .. })
    }
}

#[derive(Clone, Debug, Default)]
pub struct FeedClock {
    stale_after_ms: u64,
    last_seen: BTreeMap<String, DateTime<Utc>>,
}

impl FeedClock {
    /// `stale_after_ms == 0` disables the check.
    pub fn new(stale_after_ms: u64) -> Self {
        Self {
            stale_after_ms,
            last_seen: BTreeMap::new(),
        }
    }

    /// Record a tick. Out-of-order timestamps never move a feed backwards.
    pub fn observe(&mut self, symbol: &str, ts: DateTime<Utc>) {
        match self.last_seen.get_mut(symbol) {
            Some(last) if *last >= ts => {}
            Some(last) => *last = ts,
            None => {
                self.last_seen.insert(symbol.to_string(), ts);
            }
        }
    }

    pub fn last_seen(&self, symbol: &str) -> Option<DateTime<Utc>> {
        self.last_seen.get(symbol).copied()
    }

    /// The oldest feed decides. Ties resolve to the first symbol in order.
    pub fn check(&self, now: DateTime<Utc>) -> Freshness {
        if self.stale_after_ms == 0 || self.last_seen.is_empty() {
            return Freshness::Untracked;
        }
        let mut worst: Option<(&String, u64)> = None;
        for (symbol, last) in &self.last_seen {
            let age_ms = u64::try_from((now - *last).num_milliseconds()).unwrap_or(0);
            if age_ms > self.stale_after_ms && worst.map_or(true, |(_, w)| age_ms > w) {
                worst = Some((symbol, age_ms));
            }
        }
        match worst {
            Some((symbol, age_ms)) => Freshness::Stale {
                symbol: symbol.clone(),
                age_ms,
            },
            None => Freshness::Fresh,
        }
    }
}
