//! Time reconciliation.
//!
//! # Invariants
//!
//! - **Paired update**: `offset_ms` and `last_sync_ms` are replaced inside one
//!   critical section. Readers copy both under the same lock, so no reader
//!   sees an offset without its matching sync time.
//! - **Failure is a no-op**: if every source fails, state is untouched.
//! - **Single-flight**: the in-flight flag is claimed with a compare-exchange
//!   before the first `.await`; an overlapping `sync_now` returns `false`
//!   without touching the network. The flag is released on drop, so an
//!   early return or a panic cannot wedge it.
//! - **Storage is best effort**: a failed write is logged, the in-memory
//!   state stays authoritative for the process lifetime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use rxt_store::{get_i64, KvStore, KEY_LAST_SYNC, KEY_TIME_OFFSET};

use crate::clock::{Clock, TimeProvider};
use crate::response::MAX_PLAUSIBLE_EPOCH_MS;
use crate::source::{SourceError, TimeSource};
use crate::EpochMillis;

/// A sync older than this no longer counts as verified (24h).
pub const SYNC_WINDOW_MS: EpochMillis = 24 * 60 * 60 * 1_000;

/// Per-source request bound.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Offset between the local clock and trusted time, plus when it was learned.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationState {
    /// `verified = local + offset_ms`.
    pub offset_ms: EpochMillis,
    /// Local-clock time of the last successful sync. `None` = never synced.
    pub last_sync_ms: Option<EpochMillis>,
}

impl ReconciliationState {
    /// Restore from storage. Missing or unreadable keys fall back to defaults.
    ///
    /// An offset without a sync time (or the reverse) is a torn write from
    /// an older store and is discarded as a whole. So is a pair outside the
    /// range a real sync can produce.
    pub fn load(store: &dyn KvStore) -> Self {
        match (get_i64(store, KEY_TIME_OFFSET), get_i64(store, KEY_LAST_SYNC)) {
            (Some(offset_ms), Some(last_sync_ms)) if in_range(offset_ms, last_sync_ms) => Self {
                offset_ms,
                last_sync_ms: Some(last_sync_ms),
            },
            (Some(offset_ms), Some(last_sync_ms)) => {
                warn!(
                    offset_ms,
                    last_sync_ms,
                    "persisted reconciliation is out of range; starting unsynced"
                );
                Self::default()
            }
            (None, None) => Self::default(),
            (offset, last_sync) => {
                warn!(
                    ?offset,
                    ?last_sync,
                    "persisted reconciliation is incomplete; starting unsynced"
                );
                Self::default()
            }
        }
    }

    fn persist(&self, store: &dyn KvStore) {
        let Some(last_sync_ms) = self.last_sync_ms else {
            return;
        };
        let entries = [
            (KEY_TIME_OFFSET, self.offset_ms.to_string()),
            (KEY_LAST_SYNC, last_sync_ms.to_string()),
        ];
        if let Err(err) = store.set_many(&entries) {
            warn!(error = %err, "failed to persist reconciliation; keeping it in memory only");
        }
    }
}

fn in_range(offset_ms: EpochMillis, last_sync_ms: EpochMillis) -> bool {
    (0..=MAX_PLAUSIBLE_EPOCH_MS).contains(&last_sync_ms)
        && offset_ms
            .checked_abs()
            .is_some_and(|abs| abs <= MAX_PLAUSIBLE_EPOCH_MS)
}

/// Offset learned from one round trip.
///
/// `t0`/`t1` are local-clock reads around the request; the server's answer
/// is assumed to describe the midpoint, so it is advanced by half the round
/// trip to estimate server time at `t1`. `None` if the arithmetic overflows.
pub fn estimate_offset(
    t0: EpochMillis,
    t1: EpochMillis,
    server_ms: EpochMillis,
) -> Option<EpochMillis> {
    let latency = t1.checked_sub(t0)? / 2;
    let server_at_t1 = server_ms.checked_add(latency)?;
    server_at_t1.checked_sub(t1)
}

// ---------------------------------------------------------------------------
// Trust level / status
// ---------------------------------------------------------------------------

/// How far "now" can be trusted, for display next to timestamps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    /// Synced within the window.
    Verified,
    /// Synced once, but the window has elapsed; the old offset still applies.
    TrustedOffline,
    /// Never synced; raw local clock.
    Unverified,
}

/// Point-in-time view of the reconciler.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeStatus {
    pub verified_now_ms: EpochMillis,
    pub local_now_ms: EpochMillis,
    pub offset_ms: EpochMillis,
    pub last_sync_ms: Option<EpochMillis>,
    pub trust: TrustLevel,
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconcilerSettings {
    pub request_timeout: Duration,
    pub sync_window_ms: EpochMillis,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            sync_window_ms: SYNC_WINDOW_MS,
        }
    }
}

pub struct TimeReconciler {
    clock: Arc<dyn Clock>,
    store: Arc<dyn KvStore>,
    sources: Vec<Arc<dyn TimeSource>>,
    settings: ReconcilerSettings,
    state: Mutex<ReconciliationState>,
    in_flight: AtomicBool,
}

impl TimeReconciler {
    /// Build a reconciler and restore any persisted reconciliation.
    ///
    /// `sources` are tried in the given order on every sync.
    pub fn new(
        clock: Arc<dyn Clock>,
        store: Arc<dyn KvStore>,
        sources: Vec<Arc<dyn TimeSource>>,
        settings: ReconcilerSettings,
    ) -> Self {
        let state = ReconciliationState::load(store.as_ref());
        debug!(
            offset_ms = state.offset_ms,
            last_sync_ms = ?state.last_sync_ms,
            sources = sources.len(),
            "time reconciler loaded"
        );
        Self {
            clock,
            store,
            sources,
            settings,
            state: Mutex::new(state),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Consistent copy of offset and sync time.
    pub fn state(&self) -> ReconciliationState {
        *self.lock_state()
    }

    pub fn local_now(&self) -> EpochMillis {
        self.clock.now_ms()
    }

    /// Local clock plus offset. Equals the raw local clock until the first sync.
    pub fn verified_now(&self) -> EpochMillis {
        let offset = self.lock_state().offset_ms;
        self.clock.now_ms().saturating_add(offset)
    }

    /// `true` iff a sync happened less than the sync window ago.
    pub fn is_synced(&self) -> bool {
        let state = self.state();
        self.synced_at(&state, self.clock.now_ms())
    }

    pub fn trust(&self) -> TrustLevel {
        let state = self.state();
        self.trust_at(&state, self.clock.now_ms())
    }

    pub fn status(&self) -> TimeStatus {
        let state = self.state();
        let local_now_ms = self.clock.now_ms();
        TimeStatus {
            verified_now_ms: local_now_ms.saturating_add(state.offset_ms),
            local_now_ms,
            offset_ms: state.offset_ms,
            last_sync_ms: state.last_sync_ms,
            trust: self.trust_at(&state, local_now_ms),
        }
    }

    /// `true` while a sync is running.
    pub fn is_syncing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Reconcile against the configured sources, first success wins.
    ///
    /// Returns `false` without side effects when another sync is in flight
    /// or when every source fails.
    pub async fn sync_now(&self) -> bool {
        let Some(_guard) = InFlight::claim(&self.in_flight) else {
            debug!("sync already in flight; not starting another");
            return false;
        };

        for source in &self.sources {
            match self.reconcile_with(source.as_ref()).await {
                Ok(next) => {
                    self.commit(next);
                    info!(
                        source = source.name(),
                        offset_ms = next.offset_ms,
                        "clock reconciled"
                    );
                    return true;
                }
                Err(err) => {
                    warn!(source = source.name(), error = %err, "time source failed");
                }
            }
        }

        warn!(
            sources = self.sources.len(),
            "all time sources failed; keeping previous reconciliation"
        );
        false
    }

    async fn reconcile_with(
        &self,
        source: &dyn TimeSource,
    ) -> Result<ReconciliationState, SourceError> {
        let t0 = self.clock.now_ms();
        let server_ms = match tokio::time::timeout(
            self.settings.request_timeout,
            source.fetch_server_millis(),
        )
        .await
        {
            Ok(answer) => answer?,
            Err(_) => return Err(SourceError::Timeout(self.settings.request_timeout)),
        };
        let t1 = self.clock.now_ms();

        debug!(source = source.name(), t0, t1, server_ms, "round trip complete");
        let offset_ms = estimate_offset(t0, t1, server_ms).ok_or_else(|| {
            SourceError::Malformed(format!("offset from server time {server_ms} overflows"))
        })?;
        Ok(ReconciliationState {
            offset_ms,
            last_sync_ms: Some(t1),
        })
    }

    fn commit(&self, next: ReconciliationState) {
        *self.lock_state() = next;
        next.persist(self.store.as_ref());
    }

    fn synced_at(&self, state: &ReconciliationState, now: EpochMillis) -> bool {
        match state.last_sync_ms {
            Some(last) => now.saturating_sub(last) < self.settings.sync_window_ms,
            None => false,
        }
    }

    fn trust_at(&self, state: &ReconciliationState, now: EpochMillis) -> TrustLevel {
        if self.synced_at(state, now) {
            TrustLevel::Verified
        } else if state.last_sync_ms.is_some() {
            TrustLevel::TrustedOffline
        } else {
            TrustLevel::Unverified
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ReconciliationState> {
        // The state is two plain integers; a poisoned lock still holds a
        // complete value.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl TimeProvider for TimeReconciler {
    fn verified_now(&self) -> EpochMillis {
        TimeReconciler::verified_now(self)
    }
}

/// Held for the duration of one sync; clears the flag on drop.
struct InFlight<'a> {
    flag: &'a AtomicBool,
}

impl<'a> InFlight<'a> {
    fn claim(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
