// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use anyhow::{Context, Result};
use clap::Parser;
use mb_daemon::{build_app, build_state};
use mb_store::Store;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "mb-daemon", version, about = "Capability-URL Markdown workspace daemon")]
struct Args {
    /// Bind address.
    #[arg(long, default_value = "127.0.0.1:8088")]
    bind: String,

    /// Optional TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for workspace snapshots (overrides config / MB_DATA_DIR).
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Run without durability (snapshots disabled).
    #[arg(long)]
    ephemeral: bool,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

/// Soft-deleted files past their window are purged on this cadence.
const GC_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = mb_config::load_config(args.config.as_deref()).context("load config")?;
    if let Some(dir) = &args.data_dir {
        config.data_dir = Some(dir.display().to_string());
    }

    let level = if args.debug {
        Some("debug")
    } else {
        config.log_level.as_deref()
    };
    mb_telemetry::init(level, args.json_logs);

    match mb_config::validate_config(&config) {
        Ok(warnings) => {
            for warning in warnings {
                warn!(%warning, "config warning");
            }
        }
        Err(err) => return Err(err).context("validate config"),
    }

    let store = if args.ephemeral {
        Arc::new(Store::in_memory())
    } else {
        let dir = config
            .data_dir
            .clone()
            .unwrap_or_else(|| ".markbase/data".to_string());
        Arc::new(Store::open(dir).await.context("open store")?)
    };

    let state = build_state(Arc::clone(&store), config);
    spawn_recovery_gc(Arc::clone(&store));

    let app = build_app(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("bind {}", args.bind))?;
    info!(bind = %args.bind, "mb-daemon listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve")?;

    info!("shutting down: flushing audit queue and snapshots");
    state.audit.shutdown().await;
    store.persist_all().await.context("final snapshot")?;
    Ok(())
}

/// Hourly purge of soft-deleted files whose recovery window has passed.
fn spawn_recovery_gc(store: Arc<Store>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(GC_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let purged = store.purge_expired_deleted(chrono::Utc::now()).await;
            if !purged.is_empty() {
                info!(count = purged.len(), "purged expired soft-deleted files");
            }
        }
    });
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        warn!("ctrl-c handler unavailable; running until killed");
        std::future::pending::<()>().await;
    }
}
