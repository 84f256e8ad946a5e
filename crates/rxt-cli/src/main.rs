use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, SecondsFormat};
use clap::{Parser, Subcommand};
use tracing::debug;

use rxt_clock::{
    sync_with_retry, EpochMillis, RetryOutcome, SystemClock, TimeReconciler, TokioSleeper,
};
use rxt_config::RxtConfig;
use rxt_ledger::IntegrityLedger;
use rxt_store::{FileStore, KvStore};

#[derive(Parser)]
#[command(name = "rxt")]
#[command(about = "Verified time and clock-tamper checks", long_about = None)]
struct Cli {
    /// Config layers in merge order. Overrides RXT_CONFIG.
    #[arg(long = "config", global = true)]
    config_paths: Vec<String>,

    /// State file. Overrides `storage.path`.
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print verified now (no network)
    Now,

    /// Print offset, last sync, trust level and the ledger watermark
    Status,

    /// Reconcile against the configured time sources, with backoff
    Sync,

    /// Check a proposed transaction time against the watermark
    Validate {
        /// Epoch millis; defaults to verified now
        #[arg(long = "at")]
        at_ms: Option<EpochMillis>,
    },

    /// Advance the watermark to a committed transaction time
    Record {
        /// Epoch millis; defaults to verified now
        #[arg(long = "at")]
        at_ms: Option<EpochMillis>,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order
        #[arg(required = true)]
        paths: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();

    if let Commands::ConfigHash { paths } = &cli.cmd {
        let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
        let loaded = rxt_config::load_layered_yaml(&path_refs)?;
        println!("config_hash={}", loaded.config_hash);
        println!("{}", loaded.canonical_json);
        return Ok(());
    }

    let config = load_config(&cli)?;
    let store: Arc<dyn KvStore> = Arc::new(
        FileStore::open(&config.storage.path)
            .with_context(|| format!("open state file {}", config.storage.path.display()))?,
    );
    let reconciler = TimeReconciler::new(
        Arc::new(SystemClock),
        Arc::clone(&store),
        config.time.build_sources()?,
        config.time.reconciler_settings(),
    );
    let mut ledger = IntegrityLedger::load(store, config.ledger.tolerance_ms);

    match cli.cmd {
        Commands::Now => {
            let now = reconciler.verified_now();
            println!("verified_now_ms={}", now);
            println!("verified_now={}", rfc3339_millis(now));
            println!("trust={}", trust_label(&reconciler));
        }

        Commands::Status => {
            let status = reconciler.status();
            println!("verified_now_ms={}", status.verified_now_ms);
            println!("local_now_ms={}", status.local_now_ms);
            println!("offset_ms={}", status.offset_ms);
            println!(
                "last_sync_ms={}",
                status
                    .last_sync_ms
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "never".to_string())
            );
            println!("trust={}", trust_label(&reconciler));
            println!("last_transaction_ms={}", ledger.last_transaction_ms());
            println!("tolerance_ms={}", ledger.tolerance_ms());
        }

        Commands::Sync => {
            let outcome =
                sync_with_retry(&reconciler, &config.time.retry_policy(), &TokioSleeper).await;
            match outcome {
                RetryOutcome::Synced { attempt } => {
                    let state = reconciler.state();
                    println!("synced=true attempt={}", attempt);
                    println!("offset_ms={}", state.offset_ms);
                }
                RetryOutcome::Exhausted { attempts } => {
                    println!("synced=false attempts={}", attempts);
                    bail!(
                        "SYNC_FAILED: no time source answered after {} attempt(s); \
                         previous offset ({}ms) kept",
                        attempts,
                        reconciler.state().offset_ms
                    );
                }
            }
        }

        Commands::Validate { at_ms } => {
            let proposed_ms = at_ms.unwrap_or_else(|| reconciler.verified_now());
            let validation = ledger.validate(proposed_ms);
            println!("valid={}", validation.is_valid());
            println!("proposed_ms={}", proposed_ms);
            println!("last_transaction_ms={}", ledger.last_transaction_ms());
            if let Some(reason) = validation.reason() {
                bail!("TAMPER_SUSPECTED: {reason}");
            }
        }

        Commands::Record { at_ms } => {
            let committed_ms = at_ms.unwrap_or_else(|| reconciler.verified_now());
            let advanced = ledger.record(committed_ms);
            println!("advanced={}", advanced);
            println!("last_transaction_ms={}", ledger.last_transaction_ms());
        }

        Commands::ConfigHash { .. } => {}
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<RxtConfig> {
    let paths = if cli.config_paths.is_empty() {
        rxt_config::config_paths_from_env()
    } else {
        cli.config_paths.clone()
    };
    let (mut config, loaded) = rxt_config::load_config(&paths).context("load config")?;
    debug!(config_hash = %loaded.config_hash, layers = paths.len(), "config loaded");
    if let Some(state) = &cli.state {
        config.storage.path = state.clone();
    }
    Ok(config)
}

fn trust_label(reconciler: &TimeReconciler) -> String {
    serde_json::to_value(reconciler.trust())
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("{:?}", reconciler.trust()))
}

fn rfc3339_millis(ms: EpochMillis) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| "out-of-range".to_string())
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();
}
