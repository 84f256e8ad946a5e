//! rxt-clock
//!
//! Verified time: the local clock corrected by an offset reconciled against
//! external time servers.
//!
//! Architectural decisions:
//! - Every "now" read goes through [`TimeProvider::verified_now`]
//! - Offset and last-sync time are replaced together, never separately
//! - A failed reconciliation leaves state exactly as it was
//! - Only one reconciliation may be in flight; overlapping calls return `false`
//! - Never synced is a degraded mode (raw local clock), not an error
//!
//! The local clock, the time sources, the storage and the retry sleeper are
//! all injected so tests can drive every path deterministically.

mod clock;
mod connectivity;
mod http;
mod reconciler;
pub mod response;
mod retry;
mod source;
mod startup;

pub use clock::{Clock, SystemClock, TimeProvider};
pub use connectivity::{ConnectivityMonitor, ConnectivityOutcome};
pub use http::HttpTimeSource;
pub use reconciler::{
    estimate_offset, ReconcilerSettings, ReconciliationState, TimeReconciler, TimeStatus,
    TrustLevel, DEFAULT_REQUEST_TIMEOUT, SYNC_WINDOW_MS,
};
pub use response::{parse_time_response, TimeParseError};
pub use retry::{sync_with_retry, RetryOutcome, RetryPolicy, Sleeper, TokioSleeper};
pub use source::{SourceError, TimeSource};
pub use startup::{bootstrap, BootstrapOutcome};

/// Milliseconds since the Unix epoch.
pub type EpochMillis = i64;
