//! pfg-daemon entry point.
//!
//! This file is intentionally thin: it sets up tracing, loads the guardian
//! config, starts the coordinator, wires middleware, and starts the HTTP
//! server. All route handlers live in `routes.rs`; shared state in
//! `state.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use pfg_broker_paper::PaperBridge;
use pfg_config::{load_guardian_config, GuardianConfig};
use pfg_coordinator::{CapabilityRegistry, Coordinator, CoordinatorDeps};
use pfg_daemon::{routes, state};
use pfg_guardian::{JsonFileStore, LogAlerts, MemoryStore, SnapshotStore, TransitionAudit};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

const DEFAULT_CONFIG: &str = "config/guardian.yaml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience). Silent if the file does
    // not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let paths = config_paths_from_env();
    let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
    let loaded = load_guardian_config(&path_refs)
        .with_context(|| format!("loading guardian config from {paths:?}"))?;
    info!(config_hash = %loaded.config_hash, accounts = loaded.config.accounts.len(), "config loaded");

    let deps = build_deps(&loaded.config)?;
    let coordinator = Coordinator::start(&loaded.config, CapabilityRegistry::new(), deps)
        .context("starting coordinator")?;

    let shared = Arc::new(state::AppState::new(coordinator, Some(loaded.config_hash)));
    state::spawn_heartbeat(shared.bus.clone(), Duration::from_secs(1));
    state::spawn_event_forwarder(&shared);

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8898)));
    info!("pfg-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// `PFG_CONFIG` is a comma-separated list of YAML layers, later layers win.
fn config_paths_from_env() -> Vec<String> {
    match std::env::var("PFG_CONFIG") {
        Ok(v) if !v.trim().is_empty() => v
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => vec![DEFAULT_CONFIG.to_string()],
    }
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("PFG_DAEMON_ADDR").ok()?.parse().ok()
}

/// The daemon routes to the in-process paper venue; a live venue adapter
/// plugs in through the same `ExecutionBridge` port.
fn build_deps(cfg: &GuardianConfig) -> anyhow::Result<CoordinatorDeps> {
    let store: Arc<dyn SnapshotStore> = match &cfg.storage.snapshot_dir {
        Some(dir) => Arc::new(
            JsonFileStore::new(dir).with_context(|| format!("opening snapshot dir {dir}"))?,
        ),
        None => {
            warn!("no storage.snapshot_dir configured; account state will not survive restart");
            Arc::new(MemoryStore::new())
        }
    };
    let mut deps = CoordinatorDeps::new(Arc::new(PaperBridge::new()), Arc::new(LogAlerts), store)
        .with_heartbeat(Duration::from_secs(1));
    if let Some(path) = &cfg.storage.audit_log {
        let audit = TransitionAudit::open(path).with_context(|| format!("opening audit log {path}"))?;
        deps = deps.with_audit(audit);
    }
    Ok(deps)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "ctrl-c handler failed");
    }
    info!("shutdown requested");
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
