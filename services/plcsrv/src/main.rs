//! PLC Acquisition Service (`plcsrv`)
//!
//! Polls one PLC at several sampling rates over a single session and forwards
//! every batch to the configured result sink.

use std::sync::Arc;

use axum::serve;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use common::service_bootstrap::ServiceInfo;
use errors::{PlcsrvError, PlcsrvResult};

use plcsrv::{
    api::{create_routes, AppState},
    bootstrap::{self, Args},
    config::DEFAULT_PORT,
    registry::StaticVariableRegistry,
    runtime::{autostart, build_scheduler, build_sink, shutdown_services},
};

#[tokio::main]
async fn main() -> PlcsrvResult<()> {
    let args = Args::parse();
    common::service_bootstrap::load_development_env();

    let config = bootstrap::load_configuration(&args)?;

    let service_info = ServiceInfo::new(
        config.service.name.clone(),
        "PLC Acquisition Service - Rate-Grouped Polling",
        DEFAULT_PORT,
    );

    bootstrap::initialize_logging(&service_info, &config)?;
    if !args.no_color {
        common::service_bootstrap::print_startup_banner(&service_info);
    }

    // Validation mode: validate and exit
    if args.validate {
        bootstrap::validate_configuration(&config)?;
        info!("Validation completed successfully");
        return Ok(());
    }

    let addr = config.bind_address()?;
    let scheduler = Arc::new(build_scheduler(&config));
    let registry = Arc::new(StaticVariableRegistry::new(config.variables.clone()));
    let sink = build_sink(&config.sink).await?;

    info!("Starting {} service, PLC at {}", config.service.name, config.plc);

    if config.polling.autostart {
        autostart(&scheduler, registry.as_ref(), Arc::clone(&sink)).await;
    }

    let state = Arc::new(AppState::new(
        config.service.name.clone(),
        Arc::clone(&scheduler),
        registry,
        sink,
    ));
    let app = create_routes(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| PlcsrvError::StartupFailed(format!("Failed to bind to {}: {}", addr, e)))?;

    info!("API server listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    let shutdown_token = CancellationToken::new();
    let server_token = shutdown_token.clone();
    let server_handle = tokio::spawn(async move {
        let shutdown = async move { server_token.cancelled().await };
        if let Err(e) = serve(listener, app).with_graceful_shutdown(shutdown).await {
            error!("Server error: {}", e);
        }
    });

    // Wait for shutdown and cleanup
    let signal = common::shutdown::wait_for_shutdown().await;
    info!("Received {}, shutting down", signal);
    shutdown_services(&scheduler, shutdown_token, server_handle).await;

    Ok(())
}
