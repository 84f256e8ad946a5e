//! rxt-testkit
//!
//! Deterministic stand-ins for everything the verified-time layer injects:
//! the local clock, time sources, the retry sleeper and storage.
//!
//! Scenario tests under `tests/` wire these into real `TimeReconciler` /
//! `IntegrityLedger` instances. Nothing here touches the network or the
//! host clock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::sync::Notify;

use rxt_clock::{Clock, EpochMillis, Sleeper, SourceError, TimeSource};
use rxt_store::{KvStore, MemoryStore};

// ---------------------------------------------------------------------------
// FakeClock
// ---------------------------------------------------------------------------

/// Settable local clock. Clones share the same instant.
#[derive(Clone, Debug, Default)]
pub struct FakeClock {
    now_ms: Arc<AtomicI64>,
}

impl FakeClock {
    pub fn at(now_ms: EpochMillis) -> Self {
        Self {
            now_ms: Arc::new(AtomicI64::new(now_ms)),
        }
    }

    /// Jump to an absolute time (forwards or backwards).
    pub fn set(&self, now_ms: EpochMillis) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: EpochMillis) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> EpochMillis {
        self.now_ms.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// ScriptedSource
// ---------------------------------------------------------------------------

/// Time source that plays back a script of answers, then a fallback.
///
/// Optionally advances a [`FakeClock`] by a fixed round trip on every call,
/// so the reconciler sees `t1 - t0 == round_trip_ms`.
pub struct ScriptedSource {
    name: String,
    script: Mutex<VecDeque<Result<EpochMillis, SourceError>>>,
    fallback: Result<EpochMillis, SourceError>,
    round_trip: Option<(FakeClock, EpochMillis)>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    /// Always answers with `answer`.
    pub fn always(name: impl Into<String>, answer: Result<EpochMillis, SourceError>) -> Self {
        Self::scripted(name, Vec::new(), answer)
    }

    /// Always fails with a transport error.
    pub fn unreachable(name: impl Into<String>) -> Self {
        Self::always(name, Err(SourceError::Transport("connection refused".into())))
    }

    /// Plays `answers` in order, then repeats `fallback`.
    pub fn scripted(
        name: impl Into<String>,
        answers: Vec<Result<EpochMillis, SourceError>>,
        fallback: Result<EpochMillis, SourceError>,
    ) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(answers.into()),
            fallback,
            round_trip: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_round_trip(mut self, clock: &FakeClock, round_trip_ms: EpochMillis) -> Self {
        self.round_trip = Some((clock.clone(), round_trip_ms));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl TimeSource for ScriptedSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_server_millis(&self) -> Result<EpochMillis, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some((clock, round_trip_ms)) = &self.round_trip {
            clock.advance(*round_trip_ms);
        }
        let next = match self.script.lock() {
            Ok(mut script) => script.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        };
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

// ---------------------------------------------------------------------------
// GatedSource
// ---------------------------------------------------------------------------

/// Time source that parks inside the request until released.
///
/// Lets a test hold one sync "in flight" while it issues another call, or
/// exercise the per-source timeout by never releasing.
pub struct GatedSource {
    name: String,
    answer: Result<EpochMillis, SourceError>,
    entered: Notify,
    release: Notify,
    calls: AtomicUsize,
}

impl GatedSource {
    pub fn new(name: impl Into<String>, answer: Result<EpochMillis, SourceError>) -> Self {
        Self {
            name: name.into(),
            answer,
            entered: Notify::new(),
            release: Notify::new(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Resolves once a request has reached the gate.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    /// Let one parked request answer.
    pub fn release(&self) {
        self.release.notify_one();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl TimeSource for GatedSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_server_millis(&self) -> Result<EpochMillis, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        self.release.notified().await;
        self.answer.clone()
    }
}

// ---------------------------------------------------------------------------
// RecordingSleeper
// ---------------------------------------------------------------------------

/// Sleeper that returns immediately and remembers every requested delay.
///
/// With [`RecordingSleeper::advancing`], the fake clock moves forward by
/// each delay, as if the time had really passed.
#[derive(Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
    clock: Option<FakeClock>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advancing(clock: &FakeClock) -> Self {
        Self {
            delays: Mutex::new(Vec::new()),
            clock: Some(clock.clone()),
        }
    }

    pub fn delays(&self) -> Vec<Duration> {
        match self.delays.lock() {
            Ok(d) => d.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait::async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, delay: Duration) {
        match self.delays.lock() {
            Ok(mut d) => d.push(delay),
            Err(poisoned) => poisoned.into_inner().push(delay),
        }
        if let Some(clock) = &self.clock {
            clock.advance(delay.as_millis() as EpochMillis);
        }
    }
}

// ---------------------------------------------------------------------------
// ReadOnlyStore
// ---------------------------------------------------------------------------

/// Store whose reads work but every write fails, like a full disk or a
/// revoked storage permission.
#[derive(Debug, Default)]
pub struct ReadOnlyStore {
    inner: MemoryStore,
    rejected_writes: AtomicUsize,
}

impl ReadOnlyStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            rejected_writes: AtomicUsize::new(0),
        }
    }

    pub fn rejected_writes(&self) -> usize {
        self.rejected_writes.load(Ordering::SeqCst)
    }
}

impl KvStore for ReadOnlyStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, _value: &str) -> Result<()> {
        self.rejected_writes.fetch_add(1, Ordering::SeqCst);
        bail!("storage unavailable: refusing write to '{key}'")
    }
}
