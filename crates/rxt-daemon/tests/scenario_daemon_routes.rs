//! In-process scenario tests for rxt-daemon HTTP endpoints.
//!
//! The router is driven via `tower::ServiceExt::oneshot` without binding a
//! socket. Time comes from a `FakeClock`, servers from `ScriptedSource`.
//!
//! # Invariants under test
//!
//! 1. `/v1/time` reports the raw local clock and `unverified` before any sync.
//! 2. `/v1/time/sync` applies the learned offset; a failed sync reports
//!    `synced: false` and leaves the offset alone.
//! 3. `/v1/ledger/validate` flags a proposal older than the watermark minus
//!    tolerance and defaults to the verified now.
//! 4. `/v1/ledger/record` only moves the watermark forward.
//! 5. `/v1/connectivity` syncs on the offline -> online edge only.

use std::sync::Arc;

use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use rxt_clock::{ConnectivityMonitor, ReconcilerSettings, TimeReconciler, TimeSource};
use rxt_daemon::{routes, state::AppState};
use rxt_ledger::{IntegrityLedger, DEFAULT_TOLERANCE_MS};
use rxt_store::MemoryStore;
use rxt_testkit::{FakeClock, ScriptedSource};
use tower::ServiceExt; // oneshot

const LOCAL: i64 = 1_700_000_000_000;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Harness {
    clock: FakeClock,
    source: Arc<ScriptedSource>,
    state: Arc<AppState>,
}

fn harness(source: ScriptedSource, online: bool) -> Harness {
    let clock = FakeClock::at(LOCAL);
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(source);
    let reconciler = Arc::new(TimeReconciler::new(
        Arc::new(clock.clone()),
        store.clone(),
        vec![source.clone() as Arc<dyn TimeSource>],
        ReconcilerSettings::default(),
    ));
    let ledger = IntegrityLedger::load(store, DEFAULT_TOLERANCE_MS);
    let state = Arc::new(AppState::new(
        reconciler,
        ledger,
        ConnectivityMonitor::new(online),
    ));
    Harness {
        clock,
        source,
        state,
    }
}

/// Drive the router with a single request and return (status, json).
async fn call(
    st: &Arc<AppState>,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            builder = builder.header("content-type", "application/json");
            axum::body::Body::from(v.to_string())
        }
        None => axum::body::Body::empty(),
    };
    let req = builder.body(body).unwrap();

    let resp = routes::build_router(Arc::clone(st))
        .oneshot(req)
        .await
        .expect("oneshot failed");
    let status = resp.status();
    let bytes: bytes::Bytes = resp
        .into_body()
        .collect()
        .await
        .expect("body collect failed")
        .to_bytes();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, json)
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_returns_200_ok_true() {
    let h = harness(ScriptedSource::always("fixed", Ok(LOCAL)), true);
    let (status, json) = call(&h.state, "GET", "/v1/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ok"], true);
    assert_eq!(json["service"], "rxt-daemon");
    assert_eq!(json["durable_state"], false, "harness state is in memory");
}

#[tokio::test]
async fn health_reports_durable_state() {
    let h = harness(ScriptedSource::always("fixed", Ok(LOCAL)), true);
    let st = Arc::new((*h.state).clone().with_durable(true));
    let (_, json) = call(&st, "GET", "/v1/health", None).await;
    assert_eq!(json["durable_state"], true);
}

// ---------------------------------------------------------------------------
// /v1/time
// ---------------------------------------------------------------------------

#[tokio::test]
async fn time_before_sync_is_unverified_local_time() {
    let h = harness(ScriptedSource::always("fixed", Ok(LOCAL)), true);
    let (status, json) = call(&h.state, "GET", "/v1/time", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["verified_now_ms"], LOCAL);
    assert_eq!(json["offset_ms"], 0);
    assert!(json["last_sync_ms"].is_null());
    assert_eq!(json["trust"], "unverified");
    assert_eq!(json["syncing"], false);
    assert_eq!(json["verified_now_rfc3339"], "2023-11-14T22:13:20.000Z");
    assert_eq!(h.source.calls(), 0, "reading time never touches the network");
}

#[tokio::test]
async fn sync_applies_offset() {
    let h = harness(ScriptedSource::always("fixed", Ok(LOCAL + 30_000)), true);

    let (status, json) = call(&h.state, "POST", "/v1/time/sync", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["synced"], true);
    assert_eq!(json["status"]["offset_ms"], 30_000);
    assert_eq!(json["status"]["trust"], "verified");

    h.clock.advance(1_000);
    let (_, json) = call(&h.state, "GET", "/v1/time", None).await;
    assert_eq!(json["verified_now_ms"], LOCAL + 31_000);
}

#[tokio::test]
async fn failed_sync_reports_false_and_keeps_offset() {
    let h = harness(ScriptedSource::unreachable("down"), true);

    let (status, json) = call(&h.state, "POST", "/v1/time/sync", None).await;
    assert_eq!(status, StatusCode::OK, "a failed sync is a result, not an HTTP error");
    assert_eq!(json["synced"], false);
    assert_eq!(json["status"]["offset_ms"], 0);
    assert_eq!(json["status"]["trust"], "unverified");
}

// ---------------------------------------------------------------------------
// /v1/ledger/*
// ---------------------------------------------------------------------------

#[tokio::test]
async fn validate_and_record_enforce_the_watermark() {
    let h = harness(ScriptedSource::always("fixed", Ok(LOCAL)), true);

    let (_, json) = call(
        &h.state,
        "POST",
        "/v1/ledger/record",
        Some(serde_json::json!({"committed_ms": 100_000})),
    )
    .await;
    assert_eq!(json["advanced"], true);
    assert_eq!(json["last_transaction_ms"], 100_000);

    let (_, json) = call(
        &h.state,
        "POST",
        "/v1/ledger/validate",
        Some(serde_json::json!({"proposed_ms": 95_000})),
    )
    .await;
    assert_eq!(json["valid"], true, "exactly at the tolerance boundary");
    assert!(json["reason"].is_null());

    let (_, json) = call(
        &h.state,
        "POST",
        "/v1/ledger/validate",
        Some(serde_json::json!({"proposed_ms": 94_999})),
    )
    .await;
    assert_eq!(json["valid"], false);
    assert_eq!(json["proposed_ms"], 94_999);
    assert_eq!(json["last_transaction_ms"], 100_000);
    let reason = json["reason"].as_str().expect("flagged carries a reason");
    assert!(reason.contains("tampering"), "{reason}");

    let (_, json) = call(
        &h.state,
        "POST",
        "/v1/ledger/record",
        Some(serde_json::json!({"committed_ms": 50_000})),
    )
    .await;
    assert_eq!(json["advanced"], false);
    assert_eq!(json["last_transaction_ms"], 100_000);
}

#[tokio::test]
async fn validate_defaults_to_verified_now() {
    let h = harness(ScriptedSource::always("fixed", Ok(LOCAL)), true);

    let (_, json) = call(
        &h.state,
        "POST",
        "/v1/ledger/record",
        Some(serde_json::json!({"committed_ms": LOCAL})),
    )
    .await;
    assert_eq!(json["advanced"], true);

    let (_, json) = call(
        &h.state,
        "POST",
        "/v1/ledger/validate",
        Some(serde_json::json!({})),
    )
    .await;
    assert_eq!(json["proposed_ms"], LOCAL);
    assert_eq!(json["valid"], true);

    // Local clock set back a minute.
    h.clock.set(LOCAL - 60_000);
    let (_, json) = call(
        &h.state,
        "POST",
        "/v1/ledger/validate",
        Some(serde_json::json!({})),
    )
    .await;
    assert_eq!(json["proposed_ms"], LOCAL - 60_000);
    assert_eq!(json["valid"], false);
}

#[tokio::test]
async fn malformed_record_body_is_rejected() {
    let h = harness(ScriptedSource::always("fixed", Ok(LOCAL)), true);
    let (status, _) = call(
        &h.state,
        "POST",
        "/v1/ledger/record",
        Some(serde_json::json!({"committed": "soon"})),
    )
    .await;
    assert!(status.is_client_error(), "got {status}");
    assert_eq!(h.state.ledger.read().await.last_transaction_ms(), 0);
}

// ---------------------------------------------------------------------------
// /v1/connectivity
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reconnect_triggers_sync_once() {
    let h = harness(ScriptedSource::always("fixed", Ok(LOCAL + 7_000)), false);

    let (_, json) = call(
        &h.state,
        "POST",
        "/v1/connectivity",
        Some(serde_json::json!({"online": true})),
    )
    .await;
    assert_eq!(json["online"], true);
    assert_eq!(json["outcome"], "online_synced");
    assert_eq!(json["status"]["offset_ms"], 7_000);

    let (_, json) = call(
        &h.state,
        "POST",
        "/v1/connectivity",
        Some(serde_json::json!({"online": true})),
    )
    .await;
    assert_eq!(json["outcome"], "unchanged");

    let (_, json) = call(
        &h.state,
        "POST",
        "/v1/connectivity",
        Some(serde_json::json!({"online": false})),
    )
    .await;
    assert_eq!(json["outcome"], "went_offline");
    assert_eq!(json["online"], false);

    assert_eq!(h.source.calls(), 1);
}
