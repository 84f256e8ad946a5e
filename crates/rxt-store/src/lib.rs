//! rxt-store
//!
//! Narrow key/value persistence for the verified-time layer.
//!
//! Architectural decisions:
//! - Interface is `get` / `set` over string keys and string values only
//! - A missing key means "never set", never an error
//! - Any durable medium can sit behind [`KvStore`]; this crate ships an
//!   in-memory store and a single-file JSON store
//!
//! Callers treat write failures as non-fatal: in-memory state stays
//! authoritative for the process lifetime.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use anyhow::Result;
use tracing::warn;

/// Storage key for the reconciled clock offset (stringified `i64` millis).
pub const KEY_TIME_OFFSET: &str = "time_offset_millis";
/// Storage key for the local-clock time of the last successful sync.
pub const KEY_LAST_SYNC: &str = "last_sync_millis";
/// Storage key for the integrity watermark.
pub const KEY_LAST_TRANSACTION: &str = "last_transaction_millis";

/// Durable string key/value storage.
///
/// Implementations must be `Send + Sync` so a single store can be shared
/// between the reconciler, the ledger and async request handlers.
pub trait KvStore: Send + Sync {
    /// Read a value. `Ok(None)` when the key has never been written.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a single value.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Write several values together.
    ///
    /// The default writes them one by one. Stores that can commit a batch in
    /// one durable step (e.g. [`FileStore`]) override this.
    fn set_many(&self, entries: &[(&str, String)]) -> Result<()> {
        for (k, v) in entries {
            self.set(k, v)?;
        }
        Ok(())
    }
}

/// Read a stringified integer.
///
/// Read errors and unparseable values are logged and reported as `None`,
/// matching the "absent means never set" rule.
pub fn get_i64(store: &dyn KvStore, key: &str) -> Option<i64> {
    let raw = match store.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(err) => {
            warn!(key, error = %err, "storage read failed; treating key as unset");
            return None;
        }
    };

    match raw.trim().parse::<i64>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "stored value is not an integer; treating key as unset");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_i64_parses_stringified_integers() {
        let store = MemoryStore::new();
        store.set(KEY_TIME_OFFSET, "-1500").unwrap();
        assert_eq!(get_i64(&store, KEY_TIME_OFFSET), Some(-1500));
    }

    #[test]
    fn get_i64_treats_missing_and_garbage_as_unset() {
        let store = MemoryStore::new();
        assert_eq!(get_i64(&store, KEY_LAST_SYNC), None);

        store.set(KEY_LAST_SYNC, "yesterday").unwrap();
        assert_eq!(get_i64(&store, KEY_LAST_SYNC), None);
    }

    #[test]
    fn default_set_many_writes_every_entry() {
        let store = MemoryStore::new();
        store
            .set_many(&[
                (KEY_TIME_OFFSET, "42".to_string()),
                (KEY_LAST_SYNC, "1000".to_string()),
            ])
            .unwrap();
        assert_eq!(store.get(KEY_TIME_OFFSET).unwrap().as_deref(), Some("42"));
        assert_eq!(store.get(KEY_LAST_SYNC).unwrap().as_deref(), Some("1000"));
    }
}
