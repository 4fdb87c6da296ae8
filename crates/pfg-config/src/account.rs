use std::collections::BTreeSet;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use pfg_ledger::{Instrument, Micros};
use pfg_schemas::{AccountId, Phase};
use serde::{Deserialize, Serialize};

use crate::{ConfigurationError, PhaseRules, RuleSet};

// ---------------------------------------------------------------------------
// Instruments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentConfig {
    pub symbol: String,
    /// USD per 1.0 price move per contract.
    pub point_value: f64,
}

impl InstrumentConfig {
    pub fn to_instrument(&self) -> Result<Instrument, ConfigurationError> {
        match Micros::from_f64(self.point_value) {
            Some(pv) if pv.is_positive() && !self.symbol.trim().is_empty() => {
                Ok(Instrument::new(self.symbol.clone(), pv))
            }
            _ => Err(ConfigurationError::InvalidInstrument {
                symbol: self.symbol.clone(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Trading day
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloverConfig {
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Local hour at which the next trading day begins.
    #[serde(default = "default_rollover_hour")]
    pub hour: u32,
}

fn default_timezone() -> String {
    "America/New_York".to_string()
}

fn default_rollover_hour() -> u32 {
    17
}

impl Default for RolloverConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            hour: default_rollover_hour(),
        }
    }
}

impl RolloverConfig {
    pub fn calendar(&self) -> Result<TradingCalendar, ConfigurationError> {
        let tz: Tz = self
            .timezone
            .parse()
            .map_err(|_| ConfigurationError::UnknownTimezone {
                value: self.timezone.clone(),
            })?;
        if self.hour > 23 {
            return Err(ConfigurationError::RolloverHourOutOfRange { hour: self.hour });
        }
        Ok(TradingCalendar {
            tz,
            rollover_hour: self.hour,
        })
    }
}

/// Maps a UTC instant to the trading day it belongs to.
///
/// With a 17:00 America/New_York rollover, 16:59 ET on Monday is Monday's
/// session and 17:00 ET on Monday is already Tuesday's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradingCalendar {
    tz: Tz,
    rollover_hour: u32,
}

impl TradingCalendar {
    pub fn new(tz: Tz, rollover_hour: u32) -> Self {
        Self {
            tz,
            rollover_hour: rollover_hour.min(23),
        }
    }

    pub fn utc_midnight() -> Self {
        Self::new(Tz::UTC, 0)
    }

    pub fn trading_day(&self, ts: DateTime<Utc>) -> NaiveDate {
        let local = ts.with_timezone(&self.tz).naive_local();
        let shift = if self.rollover_hour == 0 {
            0
        } else {
            24 - i64::from(self.rollover_hour)
        };
        (local + Duration::hours(shift)).date()
    }
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

/// Everything the guardian needs to know about one account. Passed
/// explicitly into every evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountConfig {
    pub id: String,
    pub phase: Phase,
    pub initial_balance: f64,
    /// Symbols this account trades. Signals for other symbols are not
    /// routed here.
    #[serde(default)]
    pub symbols: Vec<String>,
    /// If non-empty, only signals carrying one of these tags are routed.
    #[serde(default)]
    pub strategy_tags: Vec<String>,
    #[serde(default = "default_max_contracts")]
    pub max_contracts: u32,
    #[serde(default = "default_minimum_confidence")]
    pub minimum_confidence: f64,
    #[serde(default = "default_aggressiveness")]
    pub aggressiveness: f64,
    #[serde(default = "default_win_probability")]
    pub default_win_probability: f64,
    /// Used when neither the signal nor its target/stop give a payoff ratio.
    #[serde(default = "default_payoff_ratio")]
    pub default_payoff_ratio: f64,
    #[serde(default = "default_sizer")]
    pub sizer: String,
    /// Market data older than this escalates to DANGER. 0 disables.
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,
    #[serde(default)]
    pub rollover: RolloverConfig,
    /// Overrides the phase preset for this account.
    #[serde(default)]
    pub rules: Option<RuleSet>,
}

fn default_max_contracts() -> u32 {
    10
}
fn default_minimum_confidence() -> f64 {
    0.6
}
fn default_aggressiveness() -> f64 {
    1.0
}
fn default_win_probability() -> f64 {
    0.5
}
fn default_payoff_ratio() -> f64 {
    1.5
}
fn default_sizer() -> String {
    "kelly".to_string()
}
fn default_stale_after_ms() -> u64 {
    30_000
}

impl AccountConfig {
    /// Config with defaults for everything but identity and balance.
    pub fn new(id: impl Into<String>, phase: Phase, initial_balance: f64) -> Self {
        Self {
            id: id.into(),
            phase,
            initial_balance,
            symbols: Vec::new(),
            strategy_tags: Vec::new(),
            max_contracts: default_max_contracts(),
            minimum_confidence: default_minimum_confidence(),
            aggressiveness: default_aggressiveness(),
            default_win_probability: default_win_probability(),
            default_payoff_ratio: default_payoff_ratio(),
            sizer: default_sizer(),
            stale_after_ms: default_stale_after_ms(),
            rollover: RolloverConfig::default(),
            rules: None,
        }
    }

    pub fn account_id(&self) -> AccountId {
        AccountId::new(self.id.clone())
    }

    pub fn initial_balance_micros(&self) -> Micros {
        Micros::from_f64(self.initial_balance).unwrap_or(Micros::ZERO)
    }

    /// Rule set in force for `phase`: the account override, else the preset.
    pub fn rules_for<'a>(&'a self, phase_rules: &'a PhaseRules, phase: Phase) -> &'a RuleSet {
        self.rules.as_ref().unwrap_or_else(|| phase_rules.for_phase(phase))
    }

    pub fn trades(&self, symbol: &str) -> bool {
        self.symbols.iter().any(|s| s == symbol)
    }

    /// Symbol match, then tag match when the account restricts tags.
    pub fn accepts_signal(&self, symbol: &str, tag: Option<&str>) -> bool {
        if !self.trades(symbol) {
            return false;
        }
        if self.strategy_tags.is_empty() {
            return true;
        }
        match tag {
            Some(t) => self.strategy_tags.iter().any(|x| x == t),
            None => false,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let account = self.id.clone();
        if self.id.trim().is_empty() {
            return Err(ConfigurationError::EmptyAccountId);
        }
        if !(self.initial_balance.is_finite() && self.initial_balance > 0.0) {
            return Err(ConfigurationError::NonPositiveBalance {
                account,
                value: self.initial_balance,
            });
        }
        if !(0.5..=1.5).contains(&self.aggressiveness) {
            return Err(ConfigurationError::MultiplierOutOfRange {
                account,
                value: self.aggressiveness,
            });
        }
        if !(0.0..=1.0).contains(&self.minimum_confidence) {
            return Err(ConfigurationError::ConfidenceOutOfRange {
                account,
                value: self.minimum_confidence,
            });
        }
        if !(self.default_win_probability > 0.0 && self.default_win_probability < 1.0) {
            return Err(ConfigurationError::ProbabilityOutOfRange {
                account,
                value: self.default_win_probability,
            });
        }
        if !(self.default_payoff_ratio.is_finite() && self.default_payoff_ratio > 0.0) {
            return Err(ConfigurationError::NonPositivePayoff {
                account,
                value: self.default_payoff_ratio,
            });
        }
        if self.max_contracts == 0 {
            return Err(ConfigurationError::ZeroMaxContracts { account });
        }
        self.rollover.calendar()?;
        if let Some(r) = &self.rules {
            r.limits()?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Emergency stop / storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyStopPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff before attempt n (n >= 2) is `base_backoff_ms * 2^(n-2)`.
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_backoff_ms() -> u64 {
    200
}

impl Default for EmergencyStopPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
        }
    }
}

impl EmergencyStopPolicy {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if (1..=3).contains(&self.max_attempts) {
            Ok(())
        } else {
            Err(ConfigurationError::RetryAttemptsOutOfRange {
                attempts: self.max_attempts,
            })
        }
    }

    /// Delay before attempt `attempt` (1-based). The first attempt is
    /// immediate.
    pub fn backoff_before(&self, attempt: u32) -> std::time::Duration {
        if attempt <= 1 {
            return std::time::Duration::ZERO;
        }
        let factor = 1u64 << (attempt - 2).min(16);
        std::time::Duration::from_millis(self.base_backoff_ms.saturating_mul(factor))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for per-account JSON snapshots. In-memory when absent.
    #[serde(default)]
    pub snapshot_dir: Option<String>,
    /// Hash-chained transition audit log. Disabled when absent.
    #[serde(default)]
    pub audit_log: Option<String>,
}

// ---------------------------------------------------------------------------
// Whole file
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardianConfig {
    pub instruments: Vec<InstrumentConfig>,
    #[serde(default)]
    pub phase_rules: PhaseRules,
    pub accounts: Vec<AccountConfig>,
    #[serde(default)]
    pub emergency_stop: EmergencyStopPolicy,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl GuardianConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let mut symbols = BTreeSet::new();
        for i in &self.instruments {
            i.to_instrument()?;
            if !symbols.insert(i.symbol.as_str()) {
                return Err(ConfigurationError::DuplicateInstrument {
                    symbol: i.symbol.clone(),
                });
            }
        }
        self.phase_rules.validate()?;
        self.emergency_stop.validate()?;

        if self.accounts.is_empty() {
            return Err(ConfigurationError::NoAccounts);
        }
        let mut ids = BTreeSet::new();
        for a in &self.accounts {
            a.validate()?;
            if !ids.insert(a.id.as_str()) {
                return Err(ConfigurationError::DuplicateAccount {
                    account: a.id.clone(),
                });
            }
            for s in &a.symbols {
                if !symbols.contains(s.as_str()) {
                    return Err(ConfigurationError::UnknownInstrument {
                        account: a.id.clone(),
                        symbol: s.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn account(&self, id: &str) -> Option<&AccountConfig> {
        self.accounts.iter().find(|a| a.id == id)
    }

    /// Instruments an account trades, in the account's symbol order.
    pub fn instruments_for(&self, account: &AccountConfig) -> Result<Vec<Instrument>, ConfigurationError> {
        account
            .symbols
            .iter()
            .map(|s| {
                self.instruments
                    .iter()
                    .find(|i| &i.symbol == s)
                    .ok_or_else(|| ConfigurationError::UnknownInstrument {
                        account: account.id.clone(),
                        symbol: s.clone(),
                    })
                    .and_then(InstrumentConfig::to_instrument)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn cfg() -> GuardianConfig {
        let mut a = AccountConfig::new("ACC-1", Phase::Evaluation, 50_000.0);
        a.symbols = vec!["ES".into()];
        GuardianConfig {
            instruments: vec![InstrumentConfig {
                symbol: "ES".into(),
                point_value: 50.0,
            }],
            phase_rules: PhaseRules::default(),
            accounts: vec![a],
            emergency_stop: EmergencyStopPolicy::default(),
            storage: StorageConfig::default(),
        }
    }

    #[test]
    fn default_config_is_valid() {
        cfg().validate().unwrap();
    }

    #[test]
    fn duplicate_account_is_rejected() {
        let mut c = cfg();
        c.accounts.push(c.accounts[0].clone());
        assert_eq!(
            c.validate(),
            Err(ConfigurationError::DuplicateAccount {
                account: "ACC-1".into()
            })
        );
    }

    #[test]
    fn unknown_symbol_is_rejected() {
        let mut c = cfg();
        c.accounts[0].symbols.push("CL".into());
        assert!(matches!(
            c.validate(),
            Err(ConfigurationError::UnknownInstrument { .. })
        ));
    }

    #[test]
    fn aggressiveness_bounds_are_inclusive() {
        let mut c = cfg();
        c.accounts[0].aggressiveness = 1.5;
        assert!(c.validate().is_ok());
        c.accounts[0].aggressiveness = 1.51;
        assert!(matches!(
            c.validate(),
            Err(ConfigurationError::MultiplierOutOfRange { .. })
        ));
    }

    #[test]
    fn zero_max_contracts_is_rejected() {
        let mut c = cfg();
        c.accounts[0].max_contracts = 0;
        assert!(matches!(
            c.validate(),
            Err(ConfigurationError::ZeroMaxContracts { .. })
        ));
    }

    #[test]
    fn bad_timezone_is_rejected() {
        let mut c = cfg();
        c.accounts[0].rollover.timezone = "Mars/Olympus".into();
        assert!(matches!(
            c.validate(),
            Err(ConfigurationError::UnknownTimezone { .. })
        ));
    }

    #[test]
    fn new_york_rollover_at_five_pm() {
        let cal = RolloverConfig::default().calendar().unwrap();
        // 2026-03-10 is EDT (UTC-4): 16:59 local = 20:59 UTC
        let before = Utc.with_ymd_and_hms(2026, 3, 10, 20, 59, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2026, 3, 10, 21, 0, 0).unwrap();
        assert_eq!(cal.trading_day(before), NaiveDate::from_ymd_opt(2026, 3, 10).unwrap());
        assert_eq!(cal.trading_day(after), NaiveDate::from_ymd_opt(2026, 3, 11).unwrap());
    }

    #[test]
    fn midnight_rollover_is_the_utc_date() {
        let cal = TradingCalendar::utc_midnight();
        let t = Utc.with_ymd_and_hms(2026, 3, 10, 23, 59, 0).unwrap();
        assert_eq!(cal.trading_day(t), NaiveDate::from_ymd_opt(2026, 3, 10).unwrap());
    }

    #[test]
    fn backoff_doubles_from_base() {
        let p = EmergencyStopPolicy::default();
        assert_eq!(p.backoff_before(1), std::time::Duration::ZERO);
        assert_eq!(p.backoff_before(2), std::time::Duration::from_millis(200));
        assert_eq!(p.backoff_before(3), std::time::Duration::from_millis(400));
    }

    #[test]
    fn tag_restricted_account_ignores_untagged_signals() {
        let mut a = AccountConfig::new("A", Phase::Live, 10_000.0);
        a.symbols = vec!["NQ".into()];
        assert!(a.accepts_signal("NQ", None));
        a.strategy_tags = vec!["orb".into()];
        assert!(!a.accepts_signal("NQ", None));
        assert!(a.accepts_signal("NQ", Some("orb")));
        assert!(!a.accepts_signal("ES", Some("orb")));
    }
}
