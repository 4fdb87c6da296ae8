//! Axum router and all HTTP handlers for pfg-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Handlers translate HTTP to coordinator calls and back;
//! no compliance or sizing decision is made here.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures_util::{Stream, StreamExt};
use pfg_coordinator::{CoordinatorError, CoordinatorEvent, StopTarget};
use pfg_guardian::GuardianError;
use pfg_schemas::{AccountId, Signal};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    api_types::{
        AccountsResponse, CapabilitiesResponse, EmergencyStopRequest, EmergencyStopResponse,
        ErrorResponse, FillRequest, HealthResponse, OutcomeResponse, ResetRequest, RouteResponse,
        SizerInfo, TickRequest,
    },
    state::{AppState, BusMsg},
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/accounts", get(accounts))
        .route("/v1/accounts/:id/status", get(account_status))
        .route("/v1/accounts/:id/evaluate", get(account_evaluate))
        .route("/v1/accounts/:id/size", post(account_size))
        .route("/v1/accounts/:id/fills", post(account_fill))
        .route("/v1/accounts/:id/ticks", post(account_tick))
        .route("/v1/accounts/:id/reset", post(account_reset))
        .route("/v1/accounts/:id/ack-fatal", post(account_ack_fatal))
        .route("/v1/signals", post(route_signal))
        .route("/v1/emergency-stop", post(emergency_stop))
        .route("/v1/capabilities", get(capabilities))
        .route("/v1/stream", get(stream))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Coordinator error carried to an HTTP response.
pub(crate) struct ApiError(CoordinatorError);

impl From<CoordinatorError> for ApiError {
    fn from(e: CoordinatorError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self.0 {
            CoordinatorError::UnknownAccount { .. } => (StatusCode::NOT_FOUND, "unknown_account"),
            CoordinatorError::AccountUnavailable { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "account_unavailable")
            }
            CoordinatorError::Cancelled { .. } => (StatusCode::CONFLICT, "cancelled"),
            CoordinatorError::Guardian { source, .. } => match source {
                GuardianError::ResetRefused { .. } => (StatusCode::CONFLICT, "reset_refused"),
                GuardianError::Ledger(_) => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_event"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
            },
            CoordinatorError::UnknownProvider { .. } | CoordinatorError::UnknownSizer { .. } => {
                (StatusCode::NOT_FOUND, "unknown_capability")
            }
            CoordinatorError::Config(_) | CoordinatorError::DuplicateProvider { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        };
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                kind: kind.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
            config_hash: st.config_hash.clone(),
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/accounts
// ---------------------------------------------------------------------------

pub(crate) async fn accounts(State(st): State<Arc<AppState>>) -> Json<AccountsResponse> {
    Json(AccountsResponse {
        accounts: st.coordinator.statuses(),
        aggregate: st.coordinator.aggregate(),
    })
}

// ---------------------------------------------------------------------------
// Per-account reads
// ---------------------------------------------------------------------------

pub(crate) async fn account_status(
    State(st): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<pfg_schemas::AccountStatus> {
    Ok(Json(st.coordinator.get_status(&AccountId::new(id))?))
}

pub(crate) async fn account_evaluate(
    State(st): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<pfg_risk::ComplianceOutcome> {
    Ok(Json(st.coordinator.evaluate(&AccountId::new(id)).await?))
}

/// Size without routing: the answer is advisory.
pub(crate) async fn account_size(
    State(st): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(signal): Json<Signal>,
) -> ApiResult<pfg_sizing::SizingDecision> {
    Ok(Json(
        st.coordinator
            .size_position(&AccountId::new(id), signal)
            .await?,
    ))
}

// ---------------------------------------------------------------------------
// Per-account events
// ---------------------------------------------------------------------------

pub(crate) async fn account_fill(
    State(st): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<FillRequest>,
) -> ApiResult<OutcomeResponse> {
    let fill = req.into_event(Utc::now());
    let out = st.coordinator.submit_fill(&AccountId::new(id), fill).await?;
    Ok(Json(out.into()))
}

pub(crate) async fn account_tick(
    State(st): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<TickRequest>,
) -> ApiResult<OutcomeResponse> {
    let tick = req.into_event(Utc::now());
    let out = st.coordinator.submit_tick(&AccountId::new(id), tick).await?;
    Ok(Json(out.into()))
}

pub(crate) async fn account_reset(
    State(st): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<ResetRequest>>,
) -> ApiResult<OutcomeResponse> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let account_id = AccountId::new(id);
    info!(%account_id, next_phase = ?req.next_phase, "operator reset requested");
    let out = st
        .coordinator
        .operator_reset(&account_id, req.next_phase)
        .await?;
    Ok(Json(out.into()))
}

pub(crate) async fn account_ack_fatal(
    State(st): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<OutcomeResponse> {
    let account_id = AccountId::new(id);
    info!(%account_id, "fatal alert acknowledged");
    let out = st.coordinator.acknowledge_fatal(&account_id).await?;
    Ok(Json(out.into()))
}

// ---------------------------------------------------------------------------
// POST /v1/signals
// ---------------------------------------------------------------------------

pub(crate) async fn route_signal(
    State(st): State<Arc<AppState>>,
    Json(signal): Json<Signal>,
) -> Json<RouteResponse> {
    let routed = st.coordinator.route_signal(&signal).await;
    Json(RouteResponse {
        routed: routed.into_iter().map(Into::into).collect(),
    })
}

// ---------------------------------------------------------------------------
// POST /v1/emergency-stop
// ---------------------------------------------------------------------------

pub(crate) async fn emergency_stop(
    State(st): State<Arc<AppState>>,
    body: Option<Json<EmergencyStopRequest>>,
) -> ApiResult<EmergencyStopResponse> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let stop_id = Uuid::new_v4();
    let target = match req.account_id {
        Some(id) => StopTarget::Account(AccountId::new(id)),
        None => StopTarget::All,
    };
    warn!(%stop_id, ?target, "operator emergency stop");
    let results = st.coordinator.emergency_stop(target).await?;
    Ok(Json(EmergencyStopResponse {
        stop_id,
        results: results.into_iter().map(Into::into).collect(),
    }))
}

// ---------------------------------------------------------------------------
// GET /v1/capabilities
// ---------------------------------------------------------------------------

pub(crate) async fn capabilities(State(st): State<Arc<AppState>>) -> Json<CapabilitiesResponse> {
    let caps = st.coordinator.capabilities();
    Json(CapabilitiesResponse {
        sizers: caps
            .sizer_list()
            .into_iter()
            .map(|m| SizerInfo {
                name: m.name,
                description: m.description,
            })
            .collect(),
        providers: caps.provider_names(),
    })
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.bus.subscribe();
    let events = broadcast_to_sse(rx);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(
    rx: broadcast::Receiver<BusMsg>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let event_name = match &m {
                    BusMsg::Heartbeat { .. } => "heartbeat",
                    BusMsg::Guardian { event } => match event {
                        CoordinatorEvent::Status(_) => "status",
                        CoordinatorEvent::Alert(_) => "alert",
                        CoordinatorEvent::OrderRouted { .. } | CoordinatorEvent::OrderFailed { .. } => {
                            "order"
                        }
                    },
                };
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(event_name).data(data)))
            }
            Err(_) => None, // lagged / closed
        }
    })
}
