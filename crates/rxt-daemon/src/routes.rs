//! Axum router and all HTTP handlers for rxt-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Tests compose the bare router directly.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, SecondsFormat};
use tracing::info;

use rxt_clock::EpochMillis;

use crate::{
    api_types::{
        ConnectivityRequest, ConnectivityResponse, HealthResponse, RecordRequest, RecordResponse,
        SyncResponse, TimeResponse, ValidateRequest, ValidateResponse,
    },
    state::AppState,
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/time", get(time_handler))
        .route("/v1/time/sync", post(time_sync))
        .route("/v1/connectivity", post(connectivity))
        .route("/v1/ledger/validate", post(ledger_validate))
        .route("/v1/ledger/record", post(ledger_record))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service.to_string(),
            version: st.build.version.to_string(),
            durable_state: st.durable,
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/time
// ---------------------------------------------------------------------------

pub(crate) async fn time_handler(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let status = st.reconciler.status();
    (
        StatusCode::OK,
        Json(TimeResponse {
            verified_now_rfc3339: rfc3339_millis(status.verified_now_ms),
            syncing: st.reconciler.is_syncing(),
            status,
        }),
    )
}

fn rfc3339_millis(ms: EpochMillis) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// POST /v1/time/sync
// ---------------------------------------------------------------------------

pub(crate) async fn time_sync(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let synced = st.reconciler.sync_now().await;
    let status = st.reconciler.status();
    info!(synced, trust = ?status.trust, "time/sync");
    (StatusCode::OK, Json(SyncResponse { synced, status }))
}

// ---------------------------------------------------------------------------
// POST /v1/connectivity
// ---------------------------------------------------------------------------

pub(crate) async fn connectivity(
    State(st): State<Arc<AppState>>,
    Json(req): Json<ConnectivityRequest>,
) -> impl IntoResponse {
    let outcome = st.connectivity.observe(req.online, &st.reconciler).await;
    (
        StatusCode::OK,
        Json(ConnectivityResponse {
            online: st.connectivity.is_online(),
            outcome,
            status: st.reconciler.status(),
        }),
    )
}

// ---------------------------------------------------------------------------
// POST /v1/ledger/validate
// ---------------------------------------------------------------------------

pub(crate) async fn ledger_validate(
    State(st): State<Arc<AppState>>,
    Json(req): Json<ValidateRequest>,
) -> impl IntoResponse {
    let proposed_ms = req
        .proposed_ms
        .unwrap_or_else(|| st.reconciler.verified_now());

    let ledger = st.ledger.read().await;
    let validation = ledger.validate(proposed_ms);
    let last_transaction_ms = ledger.last_transaction_ms();
    drop(ledger);

    (
        StatusCode::OK,
        Json(ValidateResponse {
            valid: validation.is_valid(),
            reason: validation.reason(),
            proposed_ms,
            last_transaction_ms,
        }),
    )
}

// ---------------------------------------------------------------------------
// POST /v1/ledger/record
// ---------------------------------------------------------------------------

pub(crate) async fn ledger_record(
    State(st): State<Arc<AppState>>,
    Json(req): Json<RecordRequest>,
) -> impl IntoResponse {
    let mut ledger = st.ledger.write().await;
    let advanced = ledger.record(req.committed_ms);
    let last_transaction_ms = ledger.last_transaction_ms();
    drop(ledger);

    (
        StatusCode::OK,
        Json(RecordResponse {
            advanced,
            last_transaction_ms,
        }),
    )
}
