//! Outbound seams: the execution bridge and the operator alert channel.
//!
//! The guardian never talks to a broker directly. Everything it needs from
//! one goes through [`ExecutionBridge`]; a deterministic in-memory
//! implementation lives in `pfg-broker-paper`.

use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use pfg_schemas::{AccountId, FillEvent};
use serde::{Deserialize, Serialize};
use tracing::error;

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// A sized order ready for the bridge. `qty_signed` is positive for buys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub account_id: AccountId,
    pub symbol: String,
    pub qty_signed: i64,
    pub reference_price: f64,
    pub stop: f64,
    pub target: f64,
    pub strategy_tag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    /// Executions reported synchronously with the acknowledgement.
    pub fills: Vec<FillEvent>,
}

/// One position to close during an emergency flatten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlattenLeg {
    pub symbol: String,
    /// Signed quantity that closes the position (opposite sign to it).
    pub qty_to_close: i64,
    /// Last known mark, for bridges that need a price.
    pub reference_price: f64,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionFailure {
    /// The venue refused the request.
    Rejected { reason: String },
    /// The bridge could not be reached or timed out.
    Unavailable { reason: String },
}

impl fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected { reason } => write!(f, "EXECUTION_FAILURE rejected: {reason}"),
            Self::Unavailable { reason } => write!(f, "EXECUTION_FAILURE unavailable: {reason}"),
        }
    }
}

impl std::error::Error for ExecutionFailure {}

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
pub trait ExecutionBridge: Send + Sync {
    async fn submit(&self, order: &OrderRequest) -> Result<OrderAck, ExecutionFailure>;

    /// Cancel every working order of the account. Returns how many were
    /// cancelled.
    async fn cancel_all_orders(&self, account: &AccountId) -> Result<usize, ExecutionFailure>;

    /// Close the given positions at market. Returns the closing executions
    /// the bridge observed.
    async fn flatten_all(
        &self,
        account: &AccountId,
        legs: &[FlattenLeg],
    ) -> Result<Vec<FillEvent>, ExecutionFailure>;

    /// Positions the venue still reports open for the account.
    async fn open_position_count(&self, account: &AccountId) -> Result<usize, ExecutionFailure>;
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FatalAlert {
    pub account_id: AccountId,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

impl fmt::Display for FatalAlert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.account_id, self.message)
    }
}

pub trait AlertSink: Send + Sync {
    fn deliver(&self, alert: &FatalAlert);
}

/// Alerts go to the error log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlerts;

impl AlertSink for LogAlerts {
    fn deliver(&self, alert: &FatalAlert) {
        error!(account_id = %alert.account_id, raised_at = %alert.raised_at, "FATAL: {}", alert.message);
    }
}

/// Keeps every alert in memory; for tests and the daemon's alert feed.
#[derive(Debug, Default)]
pub struct RecordingAlerts {
    alerts: Mutex<Vec<FatalAlert>>,
}

impl RecordingAlerts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<FatalAlert> {
        self.alerts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl AlertSink for RecordingAlerts {
    fn deliver(&self, alert: &FatalAlert) {
        LogAlerts.deliver(alert);
        self.alerts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(alert.clone());
    }
}
