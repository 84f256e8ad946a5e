use chrono::Utc;

use crate::EpochMillis;

/// Raw local clock. Untrusted: the operator can move it.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> EpochMillis;
}

/// Wall clock of the host, via chrono.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> EpochMillis {
        Utc::now().timestamp_millis()
    }
}

/// The single source of "now" for anything that stamps or compares times.
///
/// Business code takes this as an explicit dependency instead of reading
/// the system clock.
pub trait TimeProvider: Send + Sync {
    fn verified_now(&self) -> EpochMillis;
}
