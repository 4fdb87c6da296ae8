use pfg_guardian::{EventOutcome, FatalAlert};
use pfg_schemas::{AccountId, AccountStatus, GuardianState, Phase, RiskState};
use serde::Serialize;

use crate::CoordinatorError;

/// Everything the coordinator publishes on its broadcast bus.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinatorEvent {
    Status(AccountStatus),
    Alert(FatalAlert),
    OrderRouted {
        account_id: AccountId,
        order_id: String,
        symbol: String,
        qty_signed: i64,
    },
    OrderFailed {
        account_id: AccountId,
        symbol: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopTarget {
    Account(AccountId),
    All,
}

/// Result of delivering one signal to one account.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedSignal {
    pub account_id: AccountId,
    pub result: Result<EventOutcome, CoordinatorError>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StopConfirmation {
    pub account_id: AccountId,
    pub result: Result<AccountStatus, CoordinatorError>,
}

// ---------------------------------------------------------------------------
// Aggregate view
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountReport {
    pub account_id: AccountId,
    /// False when the account's worker is gone; the figures are its last
    /// published status.
    pub available: bool,
    pub phase: Phase,
    pub guardian_state: GuardianState,
    pub risk_state: RiskState,
    pub equity_micros: i64,
    /// Equity minus configured initial balance.
    pub pnl_micros: i64,
    pub usage_ppm: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregateTotals {
    pub accounts: usize,
    pub available: usize,
    pub locked_out: usize,
    pub equity_micros: i64,
    pub pnl_micros: i64,
    pub max_usage_ppm: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateReport {
    pub accounts: Vec<AccountReport>,
    pub totals: AggregateTotals,
}

impl AggregateReport {
    pub fn from_reports(accounts: Vec<AccountReport>) -> Self {
        let mut totals = AggregateTotals {
            accounts: accounts.len(),
            ..AggregateTotals::default()
        };
        for a in &accounts {
            if a.available {
                totals.available += 1;
            }
            if a.guardian_state.is_locked_out() {
                totals.locked_out += 1;
            }
            totals.equity_micros += a.equity_micros;
            totals.pnl_micros += a.pnl_micros;
            totals.max_usage_ppm = totals.max_usage_ppm.max(a.usage_ppm);
        }
        Self { accounts, totals }
    }
}
