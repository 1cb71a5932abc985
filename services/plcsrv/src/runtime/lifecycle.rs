//! Runtime lifecycle management
//!
//! Builds the scheduler and sink from configuration, optionally starts polling at
//! boot, and tears everything down in order on shutdown.

use errors::{PlcsrvError, PlcsrvResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::{PlcClient, SimulatedPlcClient};
use crate::config::{PlcsrvConfig, SinkConfig, SinkKind};
use crate::error::StopError;
use crate::registry::VariableRegistry;
use crate::scheduler::PollingScheduler;
use crate::sink::{LogSink, ResultSink, SqliteSink};

/// How long the HTTP server gets to finish open requests
const SERVER_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Scheduler over the simulated client, one fresh client per run
pub fn build_scheduler(config: &PlcsrvConfig) -> PollingScheduler<SimulatedPlcClient> {
    let simulator = config.simulator.clone();
    debug!(
        "Simulator: latency {}ms, fail every {} reads",
        simulator.read_latency_ms, simulator.fail_every_n_reads
    );
    PollingScheduler::new(
        config.plc.clone(),
        move || SimulatedPlcClient::new(simulator.clone()),
        config.scheduler_config(),
    )
}

/// Open the configured result sink
pub async fn build_sink(config: &SinkConfig) -> PlcsrvResult<Arc<dyn ResultSink>> {
    match config.kind {
        SinkKind::Log => {
            info!("Result sink: log");
            Ok(Arc::new(LogSink))
        },
        SinkKind::Sqlite => {
            let sink = SqliteSink::open(&config.sqlite_path).await.map_err(|e| {
                PlcsrvError::Database(format!(
                    "Failed to open SQLite sink at {}: {:#}",
                    config.sqlite_path, e
                ))
            })?;
            info!("Result sink: sqlite ({})", config.sqlite_path);
            Ok(Arc::new(sink))
        },
    }
}

/// Start polling the registry's variables at boot
///
/// A failed autostart is logged and left for the operator to retry through the
/// API; it never aborts the service. Returns whether polling is running.
pub async fn autostart<C: PlcClient>(
    scheduler: &PollingScheduler<C>,
    registry: &dyn VariableRegistry,
    sink: Arc<dyn ResultSink>,
) -> bool {
    let variables = match registry.variables().await {
        Ok(variables) => variables,
        Err(e) => {
            error!("Autostart skipped, variable registry failed: {}", e);
            return false;
        },
    };

    if variables.is_empty() {
        warn!("Autostart skipped, no variables configured");
        return false;
    }

    match scheduler.start(&variables, sink).await {
        Ok(()) => {
            info!("Autostart: polling {} variables", variables.len());
            true
        },
        Err(e) => {
            error!("Autostart failed: {}", e);
            false
        },
    }
}

/// Stop polling, then the API server
pub async fn shutdown_services<C: PlcClient>(
    scheduler: &PollingScheduler<C>,
    shutdown_token: CancellationToken,
    server_handle: JoinHandle<()>,
) {
    info!("Starting graceful shutdown...");

    match scheduler.stop().await {
        Ok(()) => info!("Polling stopped"),
        Err(StopError::NotRunning) => debug!("Polling was not running"),
        Err(e) => warn!("Polling stop reported: {}", e),
    }

    shutdown_token.cancel();
    match tokio::time::timeout(SERVER_SHUTDOWN_GRACE, server_handle).await {
        Ok(Ok(())) => debug!("API server stopped"),
        Ok(Err(e)) => error!("API server task failed: {}", e),
        Err(_) => warn!(
            "API server did not stop within {:?}",
            SERVER_SHUTDOWN_GRACE
        ),
    }

    info!("Shutdown completed");
}
