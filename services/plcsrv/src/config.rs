//! Service configuration
//!
//! Layered with figment: built-in defaults, then the config file (YAML, TOML or
//! JSON by extension), then `PLCSRV_` environment variables with `__` as the
//! nesting separator (e.g. `PLCSRV_PLC__HOST=10.0.0.5`).

use errors::{PlcsrvError, PlcsrvResult};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::client::SimulatorConfig;
use crate::runtime::reconnect::ReconnectPolicy;
use crate::scheduler::{ReadFailurePolicy, SchedulerConfig};
use crate::types::{ConnectionParams, VariableSet};

/// Default API port
pub const DEFAULT_PORT: u16 = 6010;

/// Config file used when `--config` is not given
pub const DEFAULT_CONFIG_PATH: &str = "config/plcsrv.yaml";

/// Environment prefix for overrides
pub const ENV_PREFIX: &str = "PLCSRV_";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlcsrvConfig {
    pub service: ServiceConfig,
    pub plc: ConnectionParams,
    pub variables: VariableSet,
    pub polling: PollingConfig,
    pub sink: SinkConfig,
    pub simulator: SimulatorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub api: ApiConfig,
    pub logging: LoggingConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "plcsrv".to_string(),
            api: ApiConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind_address: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: format!("{}:{}", common::DEFAULT_API_HOST, DEFAULT_PORT),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub dir: Option<String>,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
            json: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// How long `stop` waits for in-flight reads
    pub drain_timeout_ms: u64,
    /// Start polling the configured variables at boot
    pub autostart: bool,
    pub reconnect: ReconnectConfig,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            drain_timeout_ms: 10_000,
            autostart: false,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Read-failure recovery settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub enabled: bool,
    /// 0 means unlimited
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 0,
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[default]
    Log,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub kind: SinkKind,
    pub sqlite_path: String,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: SinkKind::Log,
            sqlite_path: "data/plcsrv.db".to_string(),
        }
    }
}

impl PlcsrvConfig {
    /// Load from `path` and the `PLCSRV_` environment
    pub fn load(path: impl AsRef<Path>) -> PlcsrvResult<Self> {
        Self::load_with_env(path, ENV_PREFIX)
    }

    /// Load with a custom environment prefix
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_with_env(path: impl AsRef<Path>, env_prefix: &str) -> PlcsrvResult<Self> {
        let path = path.as_ref();
        let mut figment = Figment::from(Serialized::defaults(PlcsrvConfig::default()));

        if path.exists() {
            let extension = path
                .extension()
                .and_then(|s| s.to_str())
                .ok_or_else(|| PlcsrvError::InvalidConfig {
                    field: "config".to_string(),
                    reason: format!("No file extension: {}", path.display()),
                })?;

            figment = match extension {
                "json" => figment.merge(Json::file(path)),
                "toml" => figment.merge(Toml::file(path)),
                "yaml" | "yml" => figment.merge(Yaml::file(path)),
                _ => {
                    return Err(PlcsrvError::InvalidConfig {
                        field: "config".to_string(),
                        reason: format!("Unsupported config format: {}", extension),
                    })
                },
            };
            info!("Loading configuration from {}", path.display());
        } else {
            warn!(
                "Config file {} not found, using defaults and environment",
                path.display()
            );
        }

        figment = figment.merge(Env::prefixed(env_prefix).split("__"));

        let config: PlcsrvConfig = figment.extract()?;
        config.validate()?;
        debug!(
            "Configuration loaded: {} variables, sink {:?}",
            config.variables.len(),
            config.sink.kind
        );
        Ok(config)
    }

    /// Check values that deserialize fine but cannot run
    pub fn validate(&self) -> PlcsrvResult<()> {
        let invalid = |field: &str, reason: String| PlcsrvError::InvalidConfig {
            field: field.to_string(),
            reason,
        };

        self.bind_address()?;

        if self.plc.host.trim().is_empty() {
            return Err(invalid("plc.host", "must not be empty".to_string()));
        }
        if self.polling.drain_timeout_ms == 0 {
            return Err(invalid(
                "polling.drain_timeout_ms",
                "must be greater than 0".to_string(),
            ));
        }

        let reconnect = &self.polling.reconnect;
        if !(reconnect.backoff_multiplier.is_finite() && reconnect.backoff_multiplier >= 1.0) {
            return Err(invalid(
                "polling.reconnect.backoff_multiplier",
                format!("must be >= 1.0, got {}", reconnect.backoff_multiplier),
            ));
        }
        if reconnect.initial_delay_ms > reconnect.max_delay_ms {
            return Err(invalid(
                "polling.reconnect.initial_delay_ms",
                format!(
                    "must not exceed max_delay_ms ({} > {})",
                    reconnect.initial_delay_ms, reconnect.max_delay_ms
                ),
            ));
        }

        if self.sink.kind == SinkKind::Sqlite && self.sink.sqlite_path.trim().is_empty() {
            return Err(invalid(
                "sink.sqlite_path",
                "required for the sqlite sink".to_string(),
            ));
        }

        for (name, spec) in &self.variables {
            if spec.address.trim().is_empty() {
                return Err(invalid(
                    &format!("variables.{}.address", name),
                    "must not be empty".to_string(),
                ));
            }
            if spec.sampling_interval_ms <= 0 {
                return Err(invalid(
                    &format!("variables.{}.sampling_interval_ms", name),
                    format!("must be positive, got {}", spec.sampling_interval_ms),
                ));
            }
        }

        Ok(())
    }

    pub fn bind_address(&self) -> PlcsrvResult<SocketAddr> {
        self.service
            .api
            .bind_address
            .parse()
            .map_err(|e| PlcsrvError::InvalidConfig {
                field: "service.api.bind_address".to_string(),
                reason: format!("'{}': {}", self.service.api.bind_address, e),
            })
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        let reconnect = &self.polling.reconnect;
        SchedulerConfig {
            drain_timeout: Duration::from_millis(self.polling.drain_timeout_ms),
            read_failure: ReadFailurePolicy {
                reconnect_enabled: reconnect.enabled,
                reconnect: ReconnectPolicy::from_config(
                    reconnect.max_attempts,
                    reconnect.initial_delay_ms,
                    reconnect.max_delay_ms,
                    reconnect.backoff_multiplier,
                    reconnect.jitter,
                ),
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_defaults_when_file_missing() {
        let config =
            PlcsrvConfig::load_with_env("/nonexistent/plcsrv.yaml", "PLCSRV_TEST_MISSING_")
                .unwrap();
        assert_eq!(config, PlcsrvConfig::default());
        assert_eq!(config.bind_address().unwrap().port(), DEFAULT_PORT);
        assert_eq!(config.scheduler_config().drain_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_yaml_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            "plcsrv.yaml",
            r#"
plc:
  ip: 192.168.0.10
  port: 102
  rack: 0
  slot: 2
variables:
  temperature:
    address: DB10,REAL10
    sampling_interval_ms: 500
  running:
    address: DB10,X0.0
    sampling_time: 1000
polling:
  drain_timeout_ms: 2500
  reconnect:
    max_attempts: 5
    jitter: false
sink:
  kind: sqlite
  sqlite_path: /tmp/plcsrv.db
"#,
        );

        let config = PlcsrvConfig::load_with_env(&path, "PLCSRV_TEST_YAML_").unwrap();
        assert_eq!(config.plc.host, "192.168.0.10");
        assert_eq!(config.plc.slot, 2);
        assert_eq!(config.variables.len(), 2);
        assert_eq!(config.variables["running"].sampling_interval_ms, 1000);
        assert_eq!(config.sink.kind, SinkKind::Sqlite);

        let scheduler = config.scheduler_config();
        assert_eq!(scheduler.drain_timeout, Duration::from_millis(2500));
        assert_eq!(scheduler.read_failure.reconnect.max_attempts, 5);
        assert!(!scheduler.read_failure.reconnect.jitter);
        assert!(scheduler.read_failure.reconnect_enabled);
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "plcsrv.toml", "[plc]\nhost = \"10.0.0.1\"\nport = 102\n");

        std::env::set_var("PLCSRV_TEST_ENV_PLC__PORT", "1102");
        std::env::set_var("PLCSRV_TEST_ENV_POLLING__AUTOSTART", "true");
        let config = PlcsrvConfig::load_with_env(&path, "PLCSRV_TEST_ENV_").unwrap();
        std::env::remove_var("PLCSRV_TEST_ENV_PLC__PORT");
        std::env::remove_var("PLCSRV_TEST_ENV_POLLING__AUTOSTART");

        assert_eq!(config.plc.host, "10.0.0.1");
        assert_eq!(config.plc.port, 1102);
        assert!(config.polling.autostart);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            "bad.json",
            r#"{"variables": {"speed": {"address": "DB1,REAL0", "sampling_interval_ms": 0}}}"#,
        );
        let err = PlcsrvConfig::load_with_env(&path, "PLCSRV_TEST_BAD_").unwrap_err();
        assert!(matches!(
            err,
            PlcsrvError::InvalidConfig { ref field, .. } if field == "variables.speed.sampling_interval_ms"
        ));

        let mut config = PlcsrvConfig::default();
        config.service.api.bind_address = "not-an-address".to_string();
        assert!(config.validate().is_err());

        let mut config = PlcsrvConfig::default();
        config.polling.reconnect.backoff_multiplier = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "plcsrv.ini", "x=1");
        assert!(PlcsrvConfig::load_with_env(&path, "PLCSRV_TEST_INI_").is_err());
    }
}
