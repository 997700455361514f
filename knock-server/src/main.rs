//! Single-connection HTTP listener.
//!
//! # Usage
//!
//! ```bash
//! # Run with default config (knock.toml in current directory, if present)
//! cargo run -p knock-server --release
//!
//! # Run with custom config path
//! CONFIG=/path/to/knock.toml cargo run -p knock-server
//!
//! # Configure logging level
//! RUST_LOG=debug cargo run -p knock-server
//! ```
//!
//! Press Ctrl-C to stop; the process exits with code 0 once the accept loop
//! has drained. Startup failures exit with code 1.
//!
//! # Environment Variables
//!
//! - `CONFIG` — Path to TOML configuration file (default: `knock.toml`)
//! - `HOST` — Override bind address (default: `0.0.0.0`)
//! - `PORT` — Override port (default: `8080`)
//! - `RUST_LOG` — Log level filter (default: `info`)

use std::time::Duration;

use knock::{AcceptLoop, LoopSummary, ProbeHandle, ProbeWorker, ShutdownFlag, UnblockProbe};
use tracing_subscriber::EnvFilter;

use knock_server::config::ServerConfig;
use knock_server::error::StartupError;
use knock_server::util::SigDown;

/// Grace period for tasks still parked on the runtime after the root task.
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

fn main() {
    // Initialize tracing with RUST_LOG env filter
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run() {
        tracing::error!("knock-server failed: {e}");
        std::process::exit(1);
    }
    tracing::info!("server exited cleanly");
}

fn run() -> Result<(), StartupError> {
    if let Ok(path) = dotenvy::dotenv() {
        tracing::debug!(path = %path.display(), "loaded .env");
    }

    let config = ServerConfig::load()?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        backlog = config.backlog,
        wake = ?config.wake,
        "loaded configuration"
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(StartupError::Runtime)?;

    // Started before the listener exists so an early interrupt has somewhere to go.
    let probe = UnblockProbe::new(&config.address()).with_connect_timeout(config.probe_timeout());
    let worker = ProbeWorker::spawn(probe).map_err(StartupError::ProbeWorker)?;

    let served = runtime.block_on(serve(&config, worker.handle()));

    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
    worker.shutdown();

    let summary = served?;
    tracing::debug!(?summary, "connection totals");
    Ok(())
}

/// Root task: install the interrupt bridge, bind, and run the accept loop.
async fn serve(config: &ServerConfig, probe: ProbeHandle) -> Result<LoopSummary, StartupError> {
    let shutdown = ShutdownFlag::new();
    let sig_down =
        SigDown::try_new(shutdown.clone(), probe, config.wake).map_err(StartupError::Signal)?;

    tracing::info!(addr = %config.address(), "starting HTTP server");
    let mut accept_loop = AcceptLoop::bind(&config.address(), config.backlog, shutdown)?
        .with_wake_strategy(config.wake);
    tracing::info!(addr = %accept_loop.local_addr()?, "waiting for incoming connections");

    let summary = accept_loop.run().await;
    drop(accept_loop);

    sig_down.close().await;
    Ok(summary)
}
