//! Typed view of the merged config.
//!
//! Every section has defaults, so an empty document is a complete config.
//! Unknown keys are rejected: a typo must not silently fall back to a default.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use rxt_clock::{HttpTimeSource, ReconcilerSettings, RetryPolicy, TimeSource, SYNC_WINDOW_MS};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RxtConfig {
    pub time: TimeConfig,
    pub ledger: LedgerConfig,
    pub storage: StorageConfig,
    pub network: NetworkConfig,
    pub daemon: DaemonConfig,
}

impl RxtConfig {
    pub fn from_json(v: &Value) -> Result<Self> {
        let config: RxtConfig =
            serde_json::from_value(v.clone()).context("config does not match schema")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.time;
        if t.sources.is_empty() {
            bail!("CONFIG_INVALID time.sources: at least one time source is required");
        }
        for (i, s) in t.sources.iter().enumerate() {
            if s.name.trim().is_empty() {
                bail!("CONFIG_INVALID time.sources[{i}].name: must not be empty");
            }
            if !(s.url.starts_with("http://") || s.url.starts_with("https://")) {
                bail!(
                    "CONFIG_INVALID time.sources[{i}].url: expected an http(s) URL, got '{}'",
                    s.url
                );
            }
        }
        if t.request_timeout_ms == 0 {
            bail!("CONFIG_INVALID time.request_timeout_ms: must be > 0");
        }
        if t.sync_window_ms <= 0 {
            bail!("CONFIG_INVALID time.sync_window_ms: must be > 0");
        }
        if t.retry.max_attempts == 0 {
            bail!("CONFIG_INVALID time.retry.max_attempts: must be >= 1");
        }
        if self.ledger.tolerance_ms < 0 {
            bail!("CONFIG_INVALID ledger.tolerance_ms: must be >= 0");
        }
        if self.storage.path.as_os_str().is_empty() {
            bail!("CONFIG_INVALID storage.path: must not be empty");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// time
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeConfig {
    /// Tried in order on every sync.
    pub sources: Vec<SourceConfig>,
    pub request_timeout_ms: u64,
    pub sync_window_ms: i64,
    pub retry: RetryConfig,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            sources: vec![
                SourceConfig {
                    name: "worldtimeapi".to_string(),
                    url: "https://worldtimeapi.org/api/timezone/Etc/UTC".to_string(),
                },
                SourceConfig {
                    name: "timeapi".to_string(),
                    url: "https://timeapi.io/api/Time/current/zone?timeZone=UTC".to_string(),
                },
            ],
            request_timeout_ms: 5_000,
            sync_window_ms: SYNC_WINDOW_MS,
            retry: RetryConfig::default(),
        }
    }
}

impl TimeConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn reconciler_settings(&self) -> ReconcilerSettings {
        ReconcilerSettings {
            request_timeout: self.request_timeout(),
            sync_window_ms: self.sync_window_ms,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            initial_delay: Duration::from_millis(self.retry.initial_delay_ms),
        }
    }

    /// One HTTP source per configured entry, in order.
    pub fn build_sources(&self) -> Result<Vec<Arc<dyn TimeSource>>> {
        let mut out: Vec<Arc<dyn TimeSource>> = Vec::with_capacity(self.sources.len());
        for s in &self.sources {
            let source = HttpTimeSource::new(s.name.clone(), s.url.clone(), self.request_timeout())
                .with_context(|| format!("build time source '{}'", s.name))?;
            out.push(Arc::new(source));
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1_000,
        }
    }
}

// ---------------------------------------------------------------------------
// ledger / storage / network / daemon
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LedgerConfig {
    pub tolerance_ms: i64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            tolerance_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/rxt-state.json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    /// Whether the startup bootstrap may reach the network at all.
    pub assume_online_at_boot: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            assume_online_at_boot: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    pub addr: SocketAddr,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8977)),
        }
    }
}
