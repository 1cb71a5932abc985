//! Unified logging module for the acquisition service
//!
//! Console output uses a bracketed level format, file output goes to a daily
//! rolling file named `{YYYYMMDD}_{service}.log` written through a non-blocking
//! appender. The filter is reloadable so the level can change at runtime.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter,
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    reload,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Tracing target used by the HTTP access log middleware
pub const API_ACCESS_TARGET: &str = "api_access";

/// Custom format for log level with brackets: `[INFO]`, `[WARN]`, etc.
fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

/// Event formatter that outputs: `timestamp [LEVEL] message`
///
/// Example output: `2025-12-02T00:50:44.809Z [INFO] Polling started`
struct BracketedLevelFormat;

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(writer, "{} ", now.format("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::TRACE => "\x1b[35m", // magenta
                Level::DEBUG => "\x1b[34m", // blue
                Level::INFO => "\x1b[32m",  // green
                Level::WARN => "\x1b[33m",  // yellow
                Level::ERROR => "\x1b[31m", // red
            };
            write!(writer, "{}{}\x1b[0m ", color, format_level(&level))?;
        } else {
            write!(writer, "{} ", format_level(&level))?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

// Keeps the non-blocking writer threads alive for the process lifetime
static GUARDS: OnceLock<Mutex<Vec<WorkerGuard>>> = OnceLock::new();

// ============================================================================
// Log Root Directory Configuration
// ============================================================================

/// Global log root directory (initialized once from config or env)
static LOG_ROOT: OnceLock<PathBuf> = OnceLock::new();

/// Initialize log root directory
///
/// Priority:
/// 1. `PLCSRV_LOG_DIR` environment variable (highest)
/// 2. `config_dir` parameter (from the service configuration)
/// 3. Default value "logs" (lowest)
pub fn init_log_root(config_dir: Option<&str>) {
    LOG_ROOT.get_or_init(|| {
        std::env::var("PLCSRV_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                config_dir
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("logs"))
            })
    });
}

/// Get log root directory
///
/// Falls back to the environment or "logs" when `init_log_root` was not called.
/// Test binaries default to the system temp directory.
pub fn get_log_root() -> PathBuf {
    LOG_ROOT.get().cloned().unwrap_or_else(|| {
        std::env::var("PLCSRV_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                if is_test_environment() {
                    std::env::temp_dir().join("plcsrv-test-logs")
                } else {
                    PathBuf::from("logs")
                }
            })
    })
}

/// Detect if we're running in a test environment
fn is_test_environment() -> bool {
    if std::env::var("CARGO_TARGET_TMPDIR").is_ok() {
        return true;
    }

    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.to_str().map(str::to_owned))
        .is_some_and(|path| {
            path.contains("target/debug/deps") || path.contains("target/release/deps")
        })
}

// ============================================================================
// Daily rolling file writer
// ============================================================================

/// Daily rolling file writer with naming format: `{YYYYMMDD}_{service}.log`
#[derive(Clone)]
struct DailyRollingWriter {
    service_name: String,
    log_dir: PathBuf,
    current: Arc<Mutex<(String, File)>>,
}

impl DailyRollingWriter {
    fn new(service_name: String, log_dir: PathBuf) -> std::io::Result<Self> {
        let today = chrono::Local::now().format("%Y%m%d").to_string();
        let file = Self::open(&log_dir, &today, &service_name)?;
        Ok(Self {
            service_name,
            log_dir,
            current: Arc::new(Mutex::new((today, file))),
        })
    }

    fn file_path(log_dir: &std::path::Path, date: &str, service_name: &str) -> PathBuf {
        log_dir.join(format!("{}_{}.log", date, service_name))
    }

    fn open(log_dir: &std::path::Path, date: &str, service_name: &str) -> std::io::Result<File> {
        fs::create_dir_all(log_dir)?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(Self::file_path(log_dir, date, service_name))
    }

    /// Run `f` against today's file, rotating first if the date changed or
    /// the file was removed underneath us
    fn with_file<T>(
        &self,
        f: impl FnOnce(&mut File) -> std::io::Result<T>,
    ) -> std::io::Result<T> {
        let mut current = self
            .current
            .lock()
            .map_err(|e| std::io::Error::other(format!("Mutex poisoned: {}", e)))?;

        let today = chrono::Local::now().format("%Y%m%d").to_string();
        let deleted = !Self::file_path(&self.log_dir, &current.0, &self.service_name).exists();
        if current.0 != today || deleted {
            let file = Self::open(&self.log_dir, &today, &self.service_name)?;
            *current = (today, file);
        }

        f(&mut current.1)
    }
}

impl Write for DailyRollingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.with_file(|file| file.write(buf))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.with_file(|file| file.flush())
    }
}

// ============================================================================
// Subscriber initialization
// ============================================================================

// Dynamic log level reload support
type EnvFilterReloadHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;
static LOG_FILTER_HANDLE: OnceLock<EnvFilterReloadHandle> = OnceLock::new();
static CURRENT_LOG_LEVEL: OnceLock<Mutex<String>> = OnceLock::new();

/// Logger configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Service name (e.g., "plcsrv")
    pub service_name: String,
    /// Directory for log files
    pub log_dir: PathBuf,
    /// Console log level
    pub console_level: Level,
    /// File log level
    pub file_level: Level,
    /// Enable JSON format for the file layer
    pub enable_json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "plcsrv".to_string(),
            log_dir: get_log_root(),
            console_level: Level::INFO,
            file_level: Level::DEBUG,
            enable_json: false,
        }
    }
}

/// Build the default filter string when `RUST_LOG` is not set
fn default_filter(config: &LogConfig) -> String {
    let base = config.console_level.as_str().to_lowercase();
    let service = config
        .console_level
        .max(config.file_level)
        .as_str()
        .to_lowercase();
    format!(
        "{},{}={},{}=info",
        base, config.service_name, service, API_ACCESS_TARGET
    )
}

/// Initialize the global subscriber
///
/// `RUST_LOG` takes precedence over the configured levels.
pub fn init_with_config(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let writer = DailyRollingWriter::new(config.service_name.clone(), config.log_dir.clone())?;
    let (non_blocking, guard) = tracing_appender::non_blocking(writer);

    match GUARDS.get_or_init(|| Mutex::new(Vec::new())).lock() {
        Ok(mut guards) => guards.push(guard),
        Err(poisoned) => poisoned.into_inner().push(guard),
    }

    let filter_str = std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter(&config));
    let (reload_filter, reload_handle) = reload::Layer::new(EnvFilter::try_new(&filter_str)?);
    let _ = LOG_FILTER_HANDLE.set(reload_handle);
    let _ = CURRENT_LOG_LEVEL.set(Mutex::new(filter_str));

    let console_layer = fmt::layer()
        .with_ansi(true)
        .event_format(BracketedLevelFormat)
        .boxed();

    let file_level = filter::LevelFilter::from_level(config.file_level);
    let file_layer = if config.enable_json {
        fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_target(true)
            .with_filter(file_level)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .event_format(BracketedLevelFormat)
            .with_filter(file_level)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(reload_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::info!("Logging: {} @ {:?}", config.service_name, config.log_dir);
    Ok(())
}

/// Dynamically set log filter level at runtime
///
/// Accepts a bare level (`"debug"`) or a full filter spec (`"info,plcsrv=debug"`).
pub fn set_log_level(level: &str) -> Result<(), String> {
    let handle = LOG_FILTER_HANDLE
        .get()
        .ok_or("Logging not initialized with reload support")?;

    let new_filter =
        EnvFilter::try_new(level).map_err(|e| format!("Invalid log level '{}': {}", level, e))?;

    handle
        .reload(new_filter)
        .map_err(|e| format!("Failed to reload log filter: {}", e))?;

    if let Some(current) = CURRENT_LOG_LEVEL.get() {
        if let Ok(mut guard) = current.lock() {
            *guard = level.to_string();
        }
    }

    tracing::info!("Log level changed to: {}", level);
    Ok(())
}

/// Get current log filter level
pub fn get_log_level() -> String {
    CURRENT_LOG_LEVEL
        .get()
        .and_then(|m| m.lock().ok())
        .map(|guard| guard.clone())
        .unwrap_or_else(|| "unknown".to_string())
}

// ============================================================================
// HTTP API Request Logging Middleware
// ============================================================================

/// Axum middleware logging every request on the `api_access` target
///
/// Modifying methods are logged at INFO, everything else at DEBUG.
///
/// ```rust,ignore
/// let app = Router::new()
///     // ... routes ...
///     .layer(axum::middleware::from_fn(common::logging::http_request_logger))
///     .with_state(state);
/// ```
#[cfg(feature = "axum")]
pub async fn http_request_logger(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    use std::time::Instant;
    use tracing::{debug, info};

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(req).await;

    let status = response.status().as_u16();
    let duration_ms = start.elapsed().as_millis();

    if matches!(method.as_str(), "POST" | "PUT" | "PATCH" | "DELETE") {
        info!(
            target: "api_access",
            method = %method,
            path = %path,
            status = %status,
            duration_ms = %duration_ms,
            "HTTP request"
        );
    } else {
        debug!(
            target: "api_access",
            method = %method,
            path = %path,
            status = %status,
            duration_ms = %duration_ms,
            "HTTP request"
        );
    }

    response
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_format_level() {
        assert_eq!(format_level(&Level::INFO), "[INFO]");
        assert_eq!(format_level(&Level::ERROR), "[ERROR]");
    }

    #[test]
    fn test_default_filter_uses_more_verbose_level_for_service() {
        let config = LogConfig {
            service_name: "plcsrv".to_string(),
            log_dir: PathBuf::from("logs"),
            console_level: Level::WARN,
            file_level: Level::DEBUG,
            enable_json: false,
        };
        assert_eq!(default_filter(&config), "warn,plcsrv=debug,api_access=info");
    }

    #[test]
    fn test_daily_rolling_writer_creates_dated_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer =
            DailyRollingWriter::new("plcsrv".to_string(), dir.path().to_path_buf()).unwrap();
        writer.write_all(b"hello\n").unwrap();
        writer.flush().unwrap();

        let today = chrono::Local::now().format("%Y%m%d").to_string();
        let path = dir.path().join(format!("{}_plcsrv.log", today));
        assert_eq!(fs::read_to_string(path).unwrap(), "hello\n");
    }

    #[test]
    fn test_daily_rolling_writer_recreates_deleted_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer =
            DailyRollingWriter::new("plcsrv".to_string(), dir.path().to_path_buf()).unwrap();
        let today = chrono::Local::now().format("%Y%m%d").to_string();
        let path = dir.path().join(format!("{}_plcsrv.log", today));

        fs::remove_file(&path).unwrap();
        writer.write_all(b"again\n").unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), "again\n");
    }
}
