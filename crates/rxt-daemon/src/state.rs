//! Shared runtime state for rxt-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The reconciler and
//! the connectivity monitor synchronise internally; only the ledger needs
//! an outer lock because `record` takes `&mut self`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{error, info};

use rxt_clock::{
    bootstrap, BootstrapOutcome, ConnectivityMonitor, RetryPolicy, Sleeper, SystemClock,
    TimeReconciler,
};
use rxt_config::RxtConfig;
use rxt_ledger::IntegrityLedger;
use rxt_store::{FileStore, KvStore, MemoryStore};

/// Static build metadata included in health responses.
#[derive(Clone, Debug)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

/// Cloneable (Arc) handle shared across all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub build: BuildInfo,
    pub reconciler: Arc<TimeReconciler>,
    pub ledger: Arc<RwLock<IntegrityLedger>>,
    pub connectivity: Arc<ConnectivityMonitor>,
    /// `false` when state lives in memory only and is lost on restart.
    pub durable: bool,
}

impl AppState {
    pub fn new(
        reconciler: Arc<TimeReconciler>,
        ledger: IntegrityLedger,
        connectivity: ConnectivityMonitor,
    ) -> Self {
        Self {
            build: BuildInfo {
                service: "rxt-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            reconciler,
            ledger: Arc::new(RwLock::new(ledger)),
            connectivity: Arc::new(connectivity),
            durable: false,
        }
    }

    /// Mark whether the store behind the reconciler and ledger is on disk.
    pub fn with_durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    /// Production wiring: host clock, configured HTTP sources, file-backed state.
    pub fn from_config(config: &RxtConfig) -> Result<Self> {
        let OpenedStore { store, durable } = open_store(&config.storage.path);
        let sources = config.time.build_sources()?;
        let reconciler = Arc::new(TimeReconciler::new(
            Arc::new(SystemClock),
            Arc::clone(&store),
            sources,
            config.time.reconciler_settings(),
        ));
        let ledger = IntegrityLedger::load(store, config.ledger.tolerance_ms);
        let connectivity = ConnectivityMonitor::new(config.network.assume_online_at_boot);
        Ok(Self::new(reconciler, ledger, connectivity).with_durable(durable))
    }
}

/// Store chosen at startup.
pub struct OpenedStore {
    pub store: Arc<dyn KvStore>,
    pub durable: bool,
}

/// File store at `path`, or an in-memory store if no file can be used.
///
/// A state file that exists but cannot be loaded is renamed to
/// `<name>.corrupt-<epoch ms>` and a fresh file is started in its place,
/// so later writes are still persisted. Only when that also fails does
/// state fall back to memory and start over on the next restart.
pub fn open_store(path: &Path) -> OpenedStore {
    let err = match FileStore::open(path) {
        Ok(store) => {
            info!(path = %path.display(), "state store opened");
            return durable(store);
        }
        Err(err) => err,
    };

    if path.is_file() {
        let aside = corrupt_path(path);
        error!(
            path = %path.display(),
            moved_to = %aside.display(),
            error = format!("{err:#}"),
            "state file unreadable; moving it aside and starting fresh"
        );
        let reopened = std::fs::rename(path, &aside)
            .map_err(anyhow::Error::from)
            .and_then(|()| FileStore::open(path));
        return match reopened {
            Ok(store) => durable(store),
            Err(err) => in_memory(path, &err),
        };
    }
    in_memory(path, &err)
}

fn durable(store: FileStore) -> OpenedStore {
    OpenedStore {
        store: Arc::new(store),
        durable: true,
    }
}

fn in_memory(path: &Path, err: &anyhow::Error) -> OpenedStore {
    error!(
        path = %path.display(),
        error = format!("{err:#}"),
        "state store unavailable; keeping state in memory only"
    );
    OpenedStore {
        store: Arc::new(MemoryStore::new()),
        durable: false,
    }
}

fn corrupt_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".corrupt-{}", chrono::Utc::now().timestamp_millis()));
    path.with_file_name(name)
}

/// Run the startup reconciliation in the background so the server can
/// answer (with the restored offset) while it retries.
pub fn spawn_bootstrap(
    state: Arc<AppState>,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
) -> JoinHandle<BootstrapOutcome> {
    tokio::spawn(async move {
        let online = state.connectivity.is_online();
        let outcome = bootstrap(&state.reconciler, online, &policy, sleeper.as_ref()).await;
        info!(?outcome, trust = ?state.reconciler.trust(), "startup reconciliation finished");
        outcome
    })
}
