//! Time-source boundary.
//!
//! A source reports the server's current time in epoch milliseconds. Timing
//! of the request (t0/t1, latency) is the reconciler's job, not the source's.

use std::fmt;
use std::time::Duration;

use crate::EpochMillis;

/// Errors a [`TimeSource`] may return. All of them are recoverable: the
/// reconciler moves on to the next source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// No answer within the per-source bound.
    Timeout(Duration),
    /// DNS, connect, TLS or read failure.
    Transport(String),
    /// The server answered with a non-2xx status.
    Status(u16),
    /// The body did not carry a usable absolute time.
    Malformed(String),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Timeout(d) => write!(f, "timed out after {}ms", d.as_millis()),
            SourceError::Transport(msg) => write!(f, "transport error: {msg}"),
            SourceError::Status(code) => write!(f, "http status {code}"),
            SourceError::Malformed(msg) => write!(f, "malformed response: {msg}"),
        }
    }
}

impl std::error::Error for SourceError {}

/// An external authority for the current UTC time.
///
/// Object-safe so the reconciler can hold an ordered `Vec<Arc<dyn TimeSource>>`.
#[async_trait::async_trait]
pub trait TimeSource: Send + Sync {
    /// Short identifier used in logs (e.g. `"worldtimeapi"`).
    fn name(&self) -> &str;

    /// Ask the source for its current time, normalised to epoch millis.
    async fn fetch_server_millis(&self) -> Result<EpochMillis, SourceError>;
}
