//! `simulate` command implementation.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::cli::SimulateArgs;
use crate::simulation::{Simulation, SimulationConfig};

/// Execute the `simulate` command
pub async fn run_simulate(args: &SimulateArgs) -> Result<()> {
    let push = config_loader::ConfigLoader::load_or_default(args.config.as_deref())
        .context("Failed to load push configuration")?;
    config_loader::ConfigLoader::validate(&push).context("Invalid push configuration")?;

    if args.metrics_port != 0 {
        observability::init_metrics_only(args.metrics_port)?;
    }

    info!(
        consumers = args.consumers,
        writes = args.writes,
        blocks_every = args.blocks_every,
        workers = push.worker_count,
        queue_capacity = push.queue_capacity,
        "Starting simulation"
    );

    let simulation = Simulation::new(SimulationConfig {
        push,
        consumers: args.consumers,
        writes: args.writes,
        blocks_every: args.blocks_every,
        write_interval: Duration::from_millis(args.write_interval_ms),
        exec_delay: Duration::from_millis(args.exec_delay_ms),
        topic: args.topic.clone(),
        settle_timeout: Duration::from_secs(args.settle_timeout),
    });

    let stats = tokio::select! {
        result = simulation.run() => result?,
        _ = shutdown_signal() => {
            warn!("Received shutdown signal, abandoning simulation");
            return Ok(());
        }
    };

    info!(
        responses = stats.responses(),
        duration_secs = stats.duration.as_secs_f64(),
        caught_up = stats.caught_up,
        "Simulation finished"
    );

    if args.json {
        let json = serde_json::to_string_pretty(&stats.to_json())
            .context("Failed to serialize simulation stats")?;
        println!("{}", json);
    } else {
        stats.print_summary();
    }

    if !stats.caught_up {
        bail!(
            "consumers did not catch up within {}s after the last write",
            args.settle_timeout
        );
    }
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
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
