//! rxt-ledger
//!
//! Transaction-time integrity watermark.
//!
//! Architectural decisions:
//! - A proposed transaction time far before the last recorded one is flagged
//!   as a suspected clock rollback
//! - Flagging is advisory: the caller decides to block, warn or log
//! - The watermark only moves forward, and only through `record`
//!
//! Per transaction: propose -> `validate` -> (caller commits) -> `record`.
//! The ledger never commits anything itself.

mod ledger;

pub use ledger::{IntegrityLedger, Proposal, Validation, DEFAULT_TOLERANCE_MS};
