use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tracing::info;

use crate::reconciler::TimeReconciler;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityOutcome {
    /// No edge: same state as before.
    Unchanged,
    WentOffline,
    /// Came back online while the last sync is still fresh.
    OnlineAlreadySynced,
    OnlineSynced,
    OnlineSyncFailed,
}

/// Tracks online/offline and re-syncs on the offline → online edge.
#[derive(Debug)]
pub struct ConnectivityMonitor {
    online: AtomicBool,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        Self {
            online: AtomicBool::new(initially_online),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Record the current connectivity. Only a transition to online with a
    /// stale (or missing) sync triggers a reconciliation.
    pub async fn observe(&self, online: bool, reconciler: &TimeReconciler) -> ConnectivityOutcome {
        let was_online = self.online.swap(online, Ordering::AcqRel);
        match (was_online, online) {
            (true, true) | (false, false) => ConnectivityOutcome::Unchanged,
            (true, false) => {
                info!("connectivity lost");
                ConnectivityOutcome::WentOffline
            }
            (false, true) => {
                if reconciler.is_synced() {
                    return ConnectivityOutcome::OnlineAlreadySynced;
                }
                info!("connectivity restored; reconciling clock");
                if reconciler.sync_now().await {
                    ConnectivityOutcome::OnlineSynced
                } else {
                    ConnectivityOutcome::OnlineSyncFailed
                }
            }
        }
    }
}
