//! Unified service bootstrap utilities
//!
//! Provides common initialization functionality for the service binaries,
//! including startup banners, logging initialization, and environment setup.

use crate::logging::{self, LogConfig};
use errors::{PlcsrvError, PlcsrvResult};
use std::path::PathBuf;
use tracing::{info, Level};

/// Service metadata for startup
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    /// Service name (e.g., "plcsrv")
    pub name: String,
    /// Service version from Cargo.toml
    pub version: String,
    /// Service description
    pub description: String,
    /// Default port
    pub default_port: u16,
}

impl ServiceInfo {
    /// Create new service info
    pub fn new(name: impl Into<String>, description: impl Into<String>, default_port: u16) -> Self {
        Self {
            name: name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: description.into(),
            default_port,
        }
    }
}

/// Logging options resolved from CLI arguments and the service configuration
#[derive(Debug, Clone)]
pub struct LoggingOptions {
    /// Console level (trace, debug, info, warn, error)
    pub level: String,
    /// Log root directory from configuration, if any
    pub dir: Option<String>,
    /// Write the log file as JSON lines
    pub json: bool,
}

/// Print unified startup banner
pub fn print_startup_banner(service: &ServiceInfo) {
    let banner = r#"
 ██████╗ ██╗      ██████╗███████╗██████╗ ██╗   ██╗
 ██╔══██╗██║     ██╔════╝██╔════╝██╔══██╗██║   ██║
 ██████╔╝██║     ██║     ███████╗██████╔╝██║   ██║
 ██╔═══╝ ██║     ██║     ╚════██║██╔══██╗╚██╗ ██╔╝
 ██║     ███████╗╚██████╗███████║██║  ██║ ╚████╔╝
 ╚═╝     ╚══════╝ ╚═════╝╚══════╝╚═╝  ╚═╝  ╚═══╝
            "#;

    info!("{}", banner);
    info!("");
    info!(" {} v{}", service.name.to_uppercase(), service.version);
    info!(" {}", service.description);
    info!(" Default Port: {}", service.default_port);
    info!("");
}

/// Initialize logging for a service
///
/// Log root directory priority:
/// 1. PLCSRV_LOG_DIR environment variable
/// 2. `options.dir` from the service configuration
/// 3. Default "logs"
pub fn init_logging(service: &ServiceInfo, options: &LoggingOptions) -> PlcsrvResult<()> {
    logging::init_log_root(options.dir.as_deref());

    let console_level = options.level.parse::<Level>().unwrap_or(Level::INFO);
    let log_dir: PathBuf = logging::get_log_root().join(&service.name);

    let log_config = LogConfig {
        service_name: service.name.clone(),
        log_dir,
        console_level,
        file_level: Level::DEBUG,
        enable_json: options.json,
    };

    logging::init_with_config(log_config)
        .map_err(|e| PlcsrvError::StartupFailed(format!("Failed to init logging: {}", e)))
}

/// Load environment variables in development mode
///
/// In debug builds, reads a `.env` file and sets variables that are not already set.
/// In release builds this is a no-op.
pub fn load_development_env() {
    #[cfg(debug_assertions)]
    {
        if let Ok(content) = std::fs::read_to_string(".env") {
            for (key, value) in parse_env_lines(&content) {
                if std::env::var(key).is_err() {
                    std::env::set_var(key, value);
                }
            }
        }
    }
}

/// Parse KEY=VALUE lines, skipping comments and blank lines
fn parse_env_lines(content: &str) -> Vec<(&str, &str)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim(), value.trim()))
        .collect()
}
