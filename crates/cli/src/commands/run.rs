//! `run` command implementation.

use anyhow::{Context, Result};
use contracts::{RepeaterConfig, RunState};
use controller::{Repeater, RunStats};
use tracing::{error, info, warn};

use crate::cli::RunArgs;

/// Execute the `run` command
///
/// The runtime is sized from the configuration: `io_threads` for socket I/O,
/// one worker per output loop and one for the ingest loop.
pub fn run_repeater(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let mut config = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if let Some(ref upstream) = args.upstream {
        info!(upstream = %upstream, "Overriding upstream address from CLI");
        config.upstream.address = upstream.clone();
    }

    let worker_threads = config.io_threads + config.outputs.len() + 1;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .thread_name("repstream-worker")
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    info!(
        upstream = %config.upstream.address,
        outputs = config.outputs.len(),
        worker_threads,
        "Configuration loaded"
    );

    runtime.block_on(serve(config, args.metrics_port))
}

#[cfg(feature = "zmq")]
async fn serve(config: RepeaterConfig, metrics_port: u16) -> Result<()> {
    if metrics_port != 0 {
        observability::init_metrics_only(metrics_port)?;
    }

    let repeater = Repeater::new(transport::ZmqTransport::new());

    let state = repeater
        .configure(config)
        .await
        .into_result()
        .context("Configuration rejected")?;
    info!(state = %state, "Repeater configured");

    repeater
        .start()
        .await
        .into_result()
        .context("Failed to start repeater")?;

    let mut states = repeater.subscribe();
    tokio::select! {
        _ = setup_shutdown_signal() => {
            warn!("Received shutdown signal, stopping repeater...");
        }
        _ = states.wait_for(|state| *state == RunState::Error) => {
            error!("Repeater entered error state");
        }
    }

    let outcome = repeater.stop().await;
    let snapshot = repeater.config().await;
    print_stats(&snapshot.stats);

    match outcome.result {
        Ok(()) => {
            info!("repstream finished");
            Ok(())
        }
        Err(e) => {
            let cause = snapshot.last_error.unwrap_or_else(|| e.to_string());
            anyhow::bail!("Repeater failed: {cause}")
        }
    }
}

#[cfg(not(feature = "zmq"))]
async fn serve(_config: RepeaterConfig, _metrics_port: u16) -> Result<()> {
    anyhow::bail!("repstream was built without the `zmq` feature; no network transport available")
}

/// Setup Ctrl+C and SIGTERM signal handlers
async fn setup_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Print per-output statistics of the finished run
fn print_stats(stats: &RunStats) {
    println!("\n=== Run Statistics ===\n");
    if let Some(ingest) = stats.ingest {
        println!("Upstream:");
        println!("  Received: {}", ingest.frames_received);
        println!("  Rejected: {}", ingest.frames_rejected);
        println!("  Receive errors: {}", ingest.recv_errors);
    }

    println!("\nOutputs ({}):", stats.outputs.len());
    for output in &stats.outputs {
        println!(
            "  - {}: sent {}, send failures {}, evicted {}, discarded {}",
            output.output,
            output.sent_count,
            output.failure_count,
            output.evicted_count,
            output.dropped_count
        );
    }
    println!();
}
