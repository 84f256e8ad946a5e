//! Scenario: daemon startup wiring.
//!
//! # Invariants under test
//!
//! 1. The background bootstrap syncs a fresh install when online.
//! 2. Booting offline never touches the network.
//! 3. An unopenable state file degrades to in-memory storage, not a crash.
//! 4. `from_config` restores persisted state from the configured file.
//! 5. A corrupt state file is moved aside and a fresh file takes its place,
//!    so later writes survive a restart.

use std::sync::Arc;
use std::time::Duration;

use rxt_clock::{
    BootstrapOutcome, ConnectivityMonitor, ReconcilerSettings, RetryPolicy, Sleeper,
    TimeReconciler, TimeSource, TrustLevel,
};
use rxt_config::RxtConfig;
use rxt_daemon::state::{open_store, spawn_bootstrap, AppState};
use rxt_ledger::{IntegrityLedger, DEFAULT_TOLERANCE_MS};
use rxt_store::{FileStore, KvStore, MemoryStore, KEY_LAST_SYNC, KEY_LAST_TRANSACTION, KEY_TIME_OFFSET};
use rxt_testkit::{FakeClock, RecordingSleeper, ScriptedSource};

const LOCAL: i64 = 1_700_000_000_000;

fn state_with(source: Arc<ScriptedSource>, online: bool) -> Arc<AppState> {
    let store = Arc::new(MemoryStore::new());
    let reconciler = Arc::new(TimeReconciler::new(
        Arc::new(FakeClock::at(LOCAL)),
        store.clone(),
        vec![source as Arc<dyn TimeSource>],
        ReconcilerSettings::default(),
    ));
    Arc::new(AppState::new(
        reconciler,
        IntegrityLedger::load(store, DEFAULT_TOLERANCE_MS),
        ConnectivityMonitor::new(online),
    ))
}

#[tokio::test]
async fn bootstrap_syncs_when_online() {
    let source = Arc::new(ScriptedSource::scripted(
        "flaky",
        vec![Err(rxt_clock::SourceError::Status(502))],
        Ok(LOCAL + 4_000),
    ));
    let st = state_with(source.clone(), true);
    let sleeper = Arc::new(RecordingSleeper::new());

    let outcome = spawn_bootstrap(
        Arc::clone(&st),
        RetryPolicy::default(),
        sleeper.clone() as Arc<dyn Sleeper>,
    )
    .await
    .expect("bootstrap task panicked");

    assert_eq!(outcome, BootstrapOutcome::Synced { attempt: 2 });
    assert_eq!(sleeper.delays(), vec![Duration::from_secs(1)]);
    assert_eq!(st.reconciler.trust(), TrustLevel::Verified);
    assert_eq!(st.reconciler.state().offset_ms, 4_000);
}

#[tokio::test]
async fn bootstrap_offline_stays_off_the_network() {
    let source = Arc::new(ScriptedSource::always("fixed", Ok(LOCAL)));
    let st = state_with(source.clone(), false);

    let outcome = spawn_bootstrap(
        Arc::clone(&st),
        RetryPolicy::default(),
        Arc::new(RecordingSleeper::new()),
    )
    .await
    .expect("bootstrap task panicked");

    assert_eq!(outcome, BootstrapOutcome::Offline);
    assert_eq!(source.calls(), 0);
}

#[test]
fn unopenable_store_falls_back_to_memory() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"file").unwrap();

    let opened = open_store(&blocker.join("state.json"));
    assert!(!opened.durable);
    opened.store.set("k", "v").unwrap();
    assert_eq!(opened.store.get("k").unwrap().as_deref(), Some("v"));
}

#[test]
fn corrupt_state_file_is_moved_aside_and_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(&path, b"{ not json").unwrap();

    let opened = open_store(&path);
    assert!(opened.durable);
    assert_eq!(opened.store.get(KEY_LAST_TRANSACTION).unwrap(), None);
    opened.store.set(KEY_LAST_TRANSACTION, "42").unwrap();

    let reopened = FileStore::open(&path).unwrap();
    assert_eq!(
        reopened.get(KEY_LAST_TRANSACTION).unwrap().as_deref(),
        Some("42")
    );

    let aside: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("state.json.corrupt-"))
        .collect();
    assert_eq!(aside.len(), 1, "{aside:?}");
    assert_eq!(
        std::fs::read(dir.path().join(&aside[0])).unwrap(),
        b"{ not json"
    );
}

#[tokio::test]
async fn from_config_with_corrupt_file_stays_durable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(&path, b"garbage").unwrap();

    let mut config = RxtConfig::default();
    config.storage.path = path.clone();
    config.network.assume_online_at_boot = false;

    let st = AppState::from_config(&config).unwrap();
    assert!(st.durable);
    assert!(st.ledger.write().await.record(7_000));

    let reopened = FileStore::open(&path).unwrap();
    assert_eq!(
        reopened.get(KEY_LAST_TRANSACTION).unwrap().as_deref(),
        Some("7000")
    );
}

#[tokio::test]
async fn from_config_restores_persisted_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    {
        let store = FileStore::open(&path).unwrap();
        store
            .set_many(&[
                (KEY_TIME_OFFSET, "1500".to_string()),
                (KEY_LAST_SYNC, "1".to_string()),
                (KEY_LAST_TRANSACTION, "42".to_string()),
            ])
            .unwrap();
    }

    let mut config = RxtConfig::default();
    config.storage.path = path;
    config.network.assume_online_at_boot = false;

    let st = AppState::from_config(&config).unwrap();
    assert!(st.durable);
    assert_eq!(st.reconciler.state().offset_ms, 1_500);
    assert_eq!(st.reconciler.trust(), TrustLevel::TrustedOffline);
    assert_eq!(st.ledger.read().await.last_transaction_ms(), 42);
    assert!(!st.connectivity.is_online());
}
