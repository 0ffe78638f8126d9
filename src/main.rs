//! Peg Controller Service
//!
//! Keeps a stablecoin on its peg by steering the borrow and savings rates.
//!
//! Usage:
//!   peg-controller --config controller.toml --status-port 9187
//!   peg-controller --dry-run
//!
//! Environment Variables:
//!   PEG_CONTROLLER_CONFIG - Path to TOML config file
//!   PEG_* - Per-field controller overrides (see `ControllerConfig`)
//!   RUST_LOG - Tracing filter (default: peg_rate_controller=info)

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use peg_rate_controller::controller::{
    AppConfig, ControlLoopScheduler, ControllerMetrics, StoreConfig,
};
use peg_rate_controller::status::{self, StatusState};
use peg_rate_controller::store;

#[derive(Parser, Debug)]
#[command(name = "peg-controller")]
#[command(about = "Borrow and savings rate controller for a pegged stablecoin")]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "PEG_CONTROLLER_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides RUST_LOG
    #[arg(short, long)]
    log_level: Option<String>,

    /// Run against the in-memory paper market instead of the configured store
    #[arg(long)]
    dry_run: bool,

    /// Status server port (overrides the configured bind port)
    #[arg(long)]
    status_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    let args = Args::parse();
    init_tracing(args.log_level.as_deref());

    info!("Starting peg controller");

    let mut config = AppConfig::load(args.config.as_deref())?;
    config.controller.validate()?;

    if args.dry_run {
        if let StoreConfig::Http(_) = config.store {
            warn!("--dry-run set; ignoring configured HTTP store");
        }
        config.store = StoreConfig::Paper(Default::default());
    }
    if let Some(port) = args.status_port {
        config.status.bind.set_port(port);
    }

    info!(
        target_price = config.controller.target_price,
        tolerance = config.controller.price_tolerance,
        interval_ms = config.controller.rate_adjustment_interval.as_millis() as u64,
        window = config.controller.price_window,
        "Controller configuration"
    );

    let rate_store = store::from_config(&config.store).context("Failed to build rate store")?;
    let metrics = std::sync::Arc::new(ControllerMetrics::new());

    let (scheduler, handle) =
        ControlLoopScheduler::start(config.controller.clone(), rate_store, metrics.clone())
            .await
            .context("Controller startup failed")?;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let status_task = if config.status.enabled {
        let addr: SocketAddr = config.status.bind;
        let state = StatusState {
            metrics: metrics.clone(),
            handle: handle.clone(),
        };
        let shutdown_rx = shutdown_tx.subscribe();
        Some(tokio::spawn(async move {
            if let Err(e) = status::serve(addr, state, shutdown_rx).await {
                error!("Status server exited: {:#}", e);
            }
        }))
    } else {
        None
    };

    let controller_task = tokio::spawn(scheduler.run(shutdown_tx.subscribe()));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Received Ctrl+C, shutting down");
    let _ = shutdown_tx.send(());

    controller_task.await.context("Controller task panicked")?;
    if let Some(task) = status_task {
        task.await.context("Status task panicked")?;
    }

    if let Some(snapshot) = handle.snapshot() {
        info!(
            mode = %snapshot.mode,
            borrow = snapshot.borrow_rate,
            savings = snapshot.savings_rate,
            "Final controller state"
        );
    }
    Ok(())
}

fn load_env() {
    let _ = dotenv();

    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let candidate = manifest_dir.join(".env");
    if candidate.exists() {
        let _ = dotenv::from_path(&candidate);
    }
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => tracing_subscriber::EnvFilter::new(format!(
            "peg_rate_controller={level},peg_controller={level},tower_http={level}"
        )),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "peg_rate_controller=info,peg_controller=info".into()),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
