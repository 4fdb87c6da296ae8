//! Shared runtime state for pfg-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The coordinator owns
//! every guardian; this module only holds a handle to it plus the SSE bus.

use std::sync::Arc;
use std::time::Duration;

use pfg_coordinator::{Coordinator, CoordinatorEvent};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::warn;

// ---------------------------------------------------------------------------
// BusMsg: SSE event bus payload
// ---------------------------------------------------------------------------

/// Messages broadcast over the daemon bus and surfaced as SSE events.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    Guardian { event: CoordinatorEvent },
}

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

pub struct AppState {
    /// Broadcast bus for SSE.
    pub bus: broadcast::Sender<BusMsg>,
    pub build: BuildInfo,
    pub coordinator: Arc<Coordinator>,
    /// SHA-256 of the canonical config the coordinator was started with.
    pub config_hash: Option<String>,
}

impl AppState {
    pub fn new(coordinator: Coordinator, config_hash: Option<String>) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);
        Self {
            bus,
            build: BuildInfo {
                service: "pfg-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            coordinator: Arc::new(coordinator),
            config_hash,
        }
    }
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

/// Spawn a background task that emits a heartbeat SSE every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}

/// Forward coordinator events (status changes, fatal alerts, routed orders)
/// onto the SSE bus until the coordinator bus closes.
pub fn spawn_event_forwarder(state: &AppState) {
    let mut rx = state.coordinator.subscribe();
    let bus = state.bus.clone();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let _ = bus.send(BusMsg::Guardian { event });
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "event forwarder lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
