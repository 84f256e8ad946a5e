//! Integrity watermark.
//!
//! # Invariants
//!
//! - **Tolerance window**: `validate(t)` flags only when
//!   `t < last_transaction_ms - tolerance_ms`. A time exactly at the
//!   boundary is valid. The window absorbs transactions started
//!   concurrently on the same device.
//! - **Non-decreasing**: `record(t)` advances only when
//!   `t > last_transaction_ms`; equal or earlier times are silent no-ops.
//! - **Validation is read-only**: it never moves the watermark.
//! - **Storage is best effort**: a failed write is logged; the in-memory
//!   watermark stays authoritative.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use rxt_clock::{EpochMillis, TimeProvider};
use rxt_store::{get_i64, KvStore, KEY_LAST_TRANSACTION};

/// Slack for races between transactions started close together.
pub const DEFAULT_TOLERANCE_MS: EpochMillis = 5_000;

// ---------------------------------------------------------------------------
// Validation result
// ---------------------------------------------------------------------------

/// Outcome of checking a proposed transaction time against the watermark.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Validation {
    Valid,

    /// The proposed time is earlier than the watermark by more than the
    /// tolerance: the local clock was probably set back.
    TamperSuspected {
        proposed_ms: EpochMillis,
        last_transaction_ms: EpochMillis,
        tolerance_ms: EpochMillis,
    },
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid)
    }

    pub fn is_flagged(&self) -> bool {
        !self.is_valid()
    }

    /// Human-readable diagnostic for flagged results; `None` when valid.
    pub fn reason(&self) -> Option<String> {
        match self {
            Validation::Valid => None,
            flagged => Some(flagged.to_string()),
        }
    }
}

impl fmt::Display for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Validation::Valid => write!(f, "valid"),
            Validation::TamperSuspected {
                proposed_ms,
                last_transaction_ms,
                tolerance_ms,
            } => write!(
                f,
                "possible clock tampering: proposed time {proposed_ms} is more than \
                 {tolerance_ms}ms before the last recorded transaction {last_transaction_ms}"
            ),
        }
    }
}

/// A validation bound to the time it was made for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Proposal {
    pub proposed_ms: EpochMillis,
    pub validation: Validation,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

pub struct IntegrityLedger {
    store: Arc<dyn KvStore>,
    tolerance_ms: EpochMillis,
    /// Verified time of the latest recorded transaction; 0 = none yet.
    last_transaction_ms: EpochMillis,
}

impl fmt::Debug for IntegrityLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntegrityLedger")
            .field("tolerance_ms", &self.tolerance_ms)
            .field("last_transaction_ms", &self.last_transaction_ms)
            .finish_non_exhaustive()
    }
}

impl IntegrityLedger {
    /// Restore the watermark from `store`. A missing key starts at 0.
    pub fn load(store: Arc<dyn KvStore>, tolerance_ms: EpochMillis) -> Self {
        let last_transaction_ms = get_i64(store.as_ref(), KEY_LAST_TRANSACTION).unwrap_or(0);
        debug!(last_transaction_ms, tolerance_ms, "integrity ledger loaded");
        Self {
            store,
            tolerance_ms,
            last_transaction_ms,
        }
    }

    pub fn last_transaction_ms(&self) -> EpochMillis {
        self.last_transaction_ms
    }

    pub fn tolerance_ms(&self) -> EpochMillis {
        self.tolerance_ms
    }

    /// Check a proposed transaction time. Does not mutate the ledger.
    pub fn validate(&self, proposed_ms: EpochMillis) -> Validation {
        let floor = self.last_transaction_ms.saturating_sub(self.tolerance_ms);
        if proposed_ms < floor {
            warn!(
                proposed_ms,
                last_transaction_ms = self.last_transaction_ms,
                tolerance_ms = self.tolerance_ms,
                "proposed time is behind the watermark; possible clock tampering"
            );
            return Validation::TamperSuspected {
                proposed_ms,
                last_transaction_ms: self.last_transaction_ms,
                tolerance_ms: self.tolerance_ms,
            };
        }
        Validation::Valid
    }

    /// Validate the provider's current verified time.
    pub fn validate_now(&self, time: &dyn TimeProvider) -> Proposal {
        let proposed_ms = time.verified_now();
        Proposal {
            proposed_ms,
            validation: self.validate(proposed_ms),
        }
    }

    /// Advance the watermark to `committed_ms` if it is later than the
    /// current one. Returns `true` when the watermark moved.
    pub fn record(&mut self, committed_ms: EpochMillis) -> bool {
        if committed_ms <= self.last_transaction_ms {
            debug!(
                committed_ms,
                last_transaction_ms = self.last_transaction_ms,
                "record ignored; watermark does not move backwards"
            );
            return false;
        }

        self.last_transaction_ms = committed_ms;
        if let Err(err) = self
            .store
            .set(KEY_LAST_TRANSACTION, &committed_ms.to_string())
        {
            warn!(error = %err, committed_ms, "failed to persist watermark; keeping it in memory only");
        }
        debug!(last_transaction_ms = committed_ms, "watermark advanced");
        true
    }
}
