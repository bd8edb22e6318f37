//! gateway-apm
//!
//! An API gateway that traces every proxied request into an APM
//! transaction and an upstream span.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ http::server ──▶ correlator::access ──▶ upstream service
//!                    │                 │   (traceparent)        │
//!                    │                 ▼                        │
//!                    │         registry (token → tx, span)      │
//!                    │                 │                        │
//!     Client ◀───────┴──── correlator::response ◀───────────────┘
//!                                      │
//!                                      ▼
//!                               apm::Reporter
//!
//!     log mode:  http::server ──▶ LogRecord ──▶ reconstruct::worker ──▶ apm::Reporter
//! ```

use std::error::Error;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use gateway_apm::apm::LogReporter;
use gateway_apm::config::{load_config, ConfigWatcher, GatewayConfig, TracingMode};
use gateway_apm::observability::{logging, metrics};
use gateway_apm::reconstruct::{Reconstruction, ReconstructionWorker};
use gateway_apm::{HttpServer, Shutdown, TracingPlugin};

#[derive(Parser)]
#[command(name = "gateway-apm")]
#[command(about = "API gateway with APM request tracing", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway
    Serve {
        #[arg(short, long, default_value = "gateway.toml")]
        config: PathBuf,
    },
    /// Rebuild traces from newline-delimited JSON access-log records
    Reconstruct {
        /// Read records from this file instead of stdin
        #[arg(short, long)]
        input: Option<PathBuf>,

        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config } => serve(&config).await,
        Commands::Reconstruct { input, config } => reconstruct(input, config).await,
    }
}

async fn serve(path: &Path) -> Result<(), Box<dyn Error>> {
    let config = load_config(path)?;
    logging::init_logging(&config.observability);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "gateway-apm starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        service = %config.service.resource(),
        apm_active = config.apm.active,
        mode = ?config.apm.mode,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let plugin = Arc::new(TracingPlugin::start(config.apm.clone(), Arc::new(LogReporter))?);
    let shutdown = Arc::new(Shutdown::new());

    tokio::spawn(plugin.sweeper().run(shutdown.subscribe()));

    let log_records = if config.apm.active {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = ReconstructionWorker::new(plugin.reconstructor()?, rx);
        tokio::spawn(worker.run(shutdown.subscribe()));
        Some(tx)
    } else {
        None
    };

    let (watcher, updates) = ConfigWatcher::new(path);
    // dropping the handle stops watching
    let _watcher = match watcher.run() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled");
            None
        }
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let server = HttpServer::new(&config, plugin, log_records).with_config_updates(updates);

    let signal = shutdown.clone();
    tokio::spawn(async move { signal.trigger_on_ctrl_c().await });

    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn reconstruct(
    input: Option<PathBuf>,
    config: Option<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    let config = match config {
        Some(path) => load_config(&path)?,
        None => GatewayConfig::default(),
    };
    logging::init_logging(&config.observability);

    let mut apm = config.apm;
    apm.active = true;
    apm.mode = TracingMode::Log;
    let plugin = TracingPlugin::start(apm, Arc::new(LogReporter))?;
    let reconstructor = plugin.reconstructor()?;

    let reader: Box<dyn AsyncBufRead + Unpin> = match &input {
        Some(path) => Box::new(BufReader::new(tokio::fs::File::open(path).await?)),
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    let (mut reported, mut skipped, mut failed) = (0usize, 0usize, 0usize);
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        match reconstructor.process_line(&line) {
            Some(Reconstruction::Reported { .. }) => reported += 1,
            Some(_) => skipped += 1,
            None if !line.trim().is_empty() => failed += 1,
            None => {}
        }
    }

    tracing::info!(reported, skipped, failed, "Reconstruction finished");
    Ok(())
}
