use serde::Serialize;
use tracing::info;

use crate::reconciler::TimeReconciler;
use crate::retry::{sync_with_retry, RetryOutcome, RetryPolicy, Sleeper};

/// What happened during the startup reconciliation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BootstrapOutcome {
    /// Persisted reconciliation is still inside the sync window.
    AlreadySynced,
    /// Device is offline; the persisted offset (if any) is used as is.
    Offline,
    Synced { attempt: u32 },
    Exhausted { attempts: u32 },
}

/// Startup path: state has already been restored by [`TimeReconciler::new`];
/// reconcile only when online and the restored state is stale or absent.
pub async fn bootstrap(
    reconciler: &TimeReconciler,
    online: bool,
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
) -> BootstrapOutcome {
    if reconciler.is_synced() {
        info!("persisted reconciliation still fresh; skipping startup sync");
        return BootstrapOutcome::AlreadySynced;
    }
    if !online {
        info!(trust = ?reconciler.trust(), "offline at startup; skipping sync");
        return BootstrapOutcome::Offline;
    }
    match sync_with_retry(reconciler, policy, sleeper).await {
        RetryOutcome::Synced { attempt } => BootstrapOutcome::Synced { attempt },
        RetryOutcome::Exhausted { attempts } => BootstrapOutcome::Exhausted { attempts },
    }
}
