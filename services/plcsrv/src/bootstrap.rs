//! Service bootstrap and initialization
//!
//! Command-line arguments, logging setup and the `--validate` mode. Uses the
//! common bootstrap utilities for the shared parts.

use clap::Parser;
use std::path::PathBuf;
use tracing::{debug, info};

use common::service_bootstrap::{LoggingOptions, ServiceInfo};
use errors::PlcsrvResult;

use crate::config::{PlcsrvConfig, DEFAULT_CONFIG_PATH};
use crate::scheduler::grouping;

/// Command-line arguments for plcsrv
#[derive(Parser, Debug, Clone)]
#[command(
    name = "plcsrv",
    version = env!("CARGO_PKG_VERSION"),
    about = "PLC Acquisition Service",
    long_about = None
)]
pub struct Args {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short = 'l', long)]
    pub log_level: Option<String>,

    /// Bind address for API server
    #[arg(short = 'b', long)]
    pub bind_address: Option<String>,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Validation mode - only validate configuration without starting service
    #[arg(long)]
    pub validate: bool,

    /// Start polling the configured variables at boot
    #[arg(long)]
    pub autostart: bool,
}

/// Load the configuration and fold the command-line overrides into it
pub fn load_configuration(args: &Args) -> PlcsrvResult<PlcsrvConfig> {
    let mut config = PlcsrvConfig::load(&args.config)?;
    apply_overrides(args, &mut config);
    config.validate()?;
    Ok(config)
}

/// CLI flags win over file and environment
pub fn apply_overrides(args: &Args, config: &mut PlcsrvConfig) {
    if let Some(level) = &args.log_level {
        config.service.logging.level = level.clone();
    }
    if let Some(bind_address) = &args.bind_address {
        config.service.api.bind_address = bind_address.clone();
    }
    if args.autostart {
        config.polling.autostart = true;
    }
}

/// Initialize logging system from the resolved configuration
///
/// Log root directory priority:
/// 1. PLCSRV_LOG_DIR environment variable
/// 2. service.logging.dir from the config file
/// 3. Default "logs"
pub fn initialize_logging(service_info: &ServiceInfo, config: &PlcsrvConfig) -> PlcsrvResult<()> {
    let logging = &config.service.logging;
    let options = LoggingOptions {
        level: logging.level.clone(),
        dir: logging.dir.clone(),
        json: logging.json,
    };
    common::service_bootstrap::init_logging(service_info, &options)
}

/// Check the configuration and report what a start would do
pub fn validate_configuration(config: &PlcsrvConfig) -> PlcsrvResult<()> {
    debug!("Validating configuration");
    config.validate()?;

    info!("Service: {}", config.service.name);
    info!("API: {}", config.bind_address()?);
    info!("PLC: {}", config.plc);
    info!("Sink: {:?}", config.sink.kind);
    info!("Found {} variable(s)", config.variables.len());

    if config.variables.is_empty() {
        info!("  No variables configured; polling can be started once some are applied");
        return Ok(());
    }

    let plan = grouping::plan(&config.variables)?;
    for group in &plan.groups {
        info!(
            "  {}ms group: {} address(es)",
            group.interval_ms,
            group.addresses.len()
        );
    }
    Ok(())
}
