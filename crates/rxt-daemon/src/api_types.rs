//! Request and response types for all rxt-daemon HTTP endpoints.
//!
//! No business logic lives here.

use rxt_clock::{ConnectivityOutcome, EpochMillis, TimeStatus};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
    /// `false` when state is kept in memory only.
    pub durable_state: bool,
}

// ---------------------------------------------------------------------------
// /v1/time  /v1/time/sync
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeResponse {
    #[serde(flatten)]
    pub status: TimeStatus,
    /// `verified_now_ms` rendered as RFC 3339 UTC, millisecond precision.
    pub verified_now_rfc3339: String,
    /// A reconciliation is running right now.
    pub syncing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResponse {
    /// `false` when every source failed or another sync was already running.
    pub synced: bool,
    pub status: TimeStatus,
}

// ---------------------------------------------------------------------------
// /v1/connectivity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectivityRequest {
    pub online: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectivityResponse {
    pub online: bool,
    pub outcome: ConnectivityOutcome,
    pub status: TimeStatus,
}

// ---------------------------------------------------------------------------
// /v1/ledger/validate  /v1/ledger/record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidateRequest {
    /// Defaults to the daemon's verified now.
    #[serde(default)]
    pub proposed_ms: Option<EpochMillis>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateResponse {
    pub valid: bool,
    /// Diagnostic text when the proposal is flagged.
    pub reason: Option<String>,
    pub proposed_ms: EpochMillis,
    pub last_transaction_ms: EpochMillis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordRequest {
    pub committed_ms: EpochMillis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordResponse {
    /// `false` when `committed_ms` was not later than the watermark.
    pub advanced: bool,
    pub last_transaction_ms: EpochMillis,
}
