//! Request and response types for all pfg-daemon HTTP endpoints.
//!
//! These types are `Serialize + Deserialize` where a test or client needs to
//! decode them. No business logic lives here.

use chrono::{DateTime, Utc};
use pfg_coordinator::{AggregateReport, RoutedSignal, StopConfirmation};
use pfg_guardian::{EventOutcome, OrderRequest};
use pfg_risk::ComplianceOutcome;
use pfg_schemas::{AccountId, AccountStatus, FillEvent, Phase, TickEvent};
use pfg_sizing::SizingDecision;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
    pub config_hash: Option<String>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Body of every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    /// "unknown_account" | "account_unavailable" | "reset_refused" |
    /// "invalid_event" | "cancelled" | "internal"
    pub kind: String,
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct AccountsResponse {
    pub accounts: Vec<AccountStatus>,
    pub aggregate: AggregateReport,
}

/// A fill as reported by the caller. `ts_utc` defaults to receipt time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillRequest {
    pub symbol: String,
    pub qty_delta: i64,
    pub price: f64,
    #[serde(default)]
    pub fee: f64,
    #[serde(default)]
    pub ts_utc: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stop: Option<f64>,
    #[serde(default)]
    pub target: Option<f64>,
}

impl FillRequest {
    pub fn into_event(self, received: DateTime<Utc>) -> FillEvent {
        FillEvent {
            stop: self.stop,
            target: self.target,
            ..FillEvent::new(
                self.symbol,
                self.qty_delta,
                self.price,
                self.ts_utc.unwrap_or(received),
            )
            .with_fee(self.fee)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickRequest {
    pub symbol: String,
    pub price: f64,
    #[serde(default)]
    pub ts_utc: Option<DateTime<Utc>>,
}

impl TickRequest {
    pub fn into_event(self, received: DateTime<Utc>) -> TickEvent {
        TickEvent::new(self.symbol, self.price, self.ts_utc.unwrap_or(received))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResetRequest {
    /// Start a new period in this phase (typically after PASSED).
    #[serde(default)]
    pub next_phase: Option<Phase>,
}

/// What an event did to one account.
#[derive(Debug, Clone, Serialize)]
pub struct OutcomeResponse {
    pub status: AccountStatus,
    pub compliance: ComplianceOutcome,
    pub sizing: Option<SizingDecision>,
    pub order: Option<OrderRequest>,
}

impl From<EventOutcome> for OutcomeResponse {
    fn from(o: EventOutcome) -> Self {
        Self {
            status: o.status,
            compliance: o.compliance,
            sizing: o.sizing,
            order: o.order,
        }
    }
}

// ---------------------------------------------------------------------------
// /v1/signals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct RoutedResult {
    pub account_id: AccountId,
    pub ok: bool,
    pub outcome: Option<OutcomeResponse>,
    pub error: Option<String>,
}

impl From<RoutedSignal> for RoutedResult {
    fn from(r: RoutedSignal) -> Self {
        match r.result {
            Ok(out) => Self {
                account_id: r.account_id,
                ok: true,
                outcome: Some(out.into()),
                error: None,
            },
            Err(e) => Self {
                account_id: r.account_id,
                ok: false,
                outcome: None,
                error: Some(e.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteResponse {
    pub routed: Vec<RoutedResult>,
}

// ---------------------------------------------------------------------------
// /v1/emergency-stop
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmergencyStopRequest {
    /// Absent: stop every account.
    #[serde(default)]
    pub account_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StopResult {
    pub account_id: AccountId,
    pub ok: bool,
    pub status: Option<AccountStatus>,
    pub error: Option<String>,
}

impl From<StopConfirmation> for StopResult {
    fn from(c: StopConfirmation) -> Self {
        match c.result {
            Ok(status) => Self {
                account_id: c.account_id,
                ok: true,
                status: Some(status),
                error: None,
            },
            Err(e) => Self {
                account_id: c.account_id,
                ok: false,
                status: None,
                error: Some(e.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EmergencyStopResponse {
    /// Correlates the log lines of one operator stop.
    pub stop_id: Uuid,
    pub results: Vec<StopResult>,
}

// ---------------------------------------------------------------------------
// /v1/capabilities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizerInfo {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitiesResponse {
    pub sizers: Vec<SizerInfo>,
    pub providers: Vec<String>,
}
