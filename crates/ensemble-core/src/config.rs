//! Configuration loading and typed config structures for the ensemble monitor.
//!
//! The configuration lives in `ensemble-monitor.yaml` next to the binary
//! (override the path with `ENSEMBLE_CONFIG`). Every field has a default,
//! so a missing file simply yields [`MonitorConfig::default`].

use std::path::Path;
use std::time::Duration;

use ensemble_types::ExperimentId;
use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value parsed but is not usable.
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level monitor configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MonitorConfig {
    /// Observer HTTP server settings.
    #[serde(default)]
    pub server: ServerSection,

    /// Upstream event source settings.
    #[serde(default)]
    pub source: SourceConfig,

    /// Ingest queue settings.
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl MonitorConfig {
    /// Load configuration from a YAML file, falling back to defaults when
    /// the file does not exist.
    ///
    /// Environment variables override file values:
    /// - `ENSEMBLE_SERVER_URL` overrides `source.server_url`
    /// - `ENSEMBLE_PORT` overrides `server.port`
    /// - `ENSEMBLE_EXPERIMENT` overrides `source.experiment_id`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file exists but cannot be read,
    /// [`ConfigError::Yaml`] if it is not valid YAML, or
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            serde_yml::from_str(&contents)?
        } else {
            Self::default()
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string. No env overrides are applied.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Override values with environment variables when set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if an override cannot be parsed.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(val) = std::env::var("ENSEMBLE_SERVER_URL") {
            self.source.server_url = val;
        }
        if let Ok(val) = std::env::var("ENSEMBLE_PORT") {
            self.server.port = val
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("ENSEMBLE_PORT: {e}")))?;
        }
        if let Ok(val) = std::env::var("ENSEMBLE_EXPERIMENT") {
            let id = val
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("ENSEMBLE_EXPERIMENT: {e}")))?;
            self.source.experiment_id = Some(id);
        }
        Ok(())
    }

    /// Check that every value is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.experiment_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "source.experiment_poll_interval_ms must be positive".to_owned(),
            ));
        }
        if self.source.event_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "source.event_poll_interval_ms must be positive".to_owned(),
            ));
        }
        if self.ingest.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "ingest.queue_capacity must be positive".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Observer HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerSection {
    /// Address to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Upstream event source settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceConfig {
    /// Base URL of the storage server publishing experiments and events.
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// How often the experiment list is refreshed.
    #[serde(default = "default_experiment_poll_interval_ms")]
    pub experiment_poll_interval_ms: u64,

    /// How often new events are fetched for the selected experiment.
    #[serde(default = "default_event_poll_interval_ms")]
    pub event_poll_interval_ms: u64,

    /// How events are fetched from the server for the selected experiment.
    #[serde(default)]
    pub event_transport: EventTransport,

    /// Observe this experiment instead of auto-selecting the first listed.
    #[serde(default)]
    pub experiment_id: Option<ExperimentId>,
}

impl SourceConfig {
    /// Experiment poll interval as a [`Duration`].
    pub const fn experiment_poll_interval(&self) -> Duration {
        Duration::from_millis(self.experiment_poll_interval_ms)
    }

    /// Event poll interval as a [`Duration`].
    pub const fn event_poll_interval(&self) -> Duration {
        Duration::from_millis(self.event_poll_interval_ms)
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            experiment_poll_interval_ms: default_experiment_poll_interval_ms(),
            event_poll_interval_ms: default_event_poll_interval_ms(),
            event_transport: EventTransport::default(),
            experiment_id: None,
        }
    }
}

/// Transport used to receive events for the selected experiment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventTransport {
    /// One `WebSocket` message per event from
    /// `ws://{server}/experiments/{id}/events`.
    #[default]
    WebSocket,
    /// Periodic `GET {server}/experiments/{id}/events` returning the whole
    /// event list. Fallback for servers without a socket endpoint.
    Poll,
    /// No upstream source; events only arrive through the push endpoint.
    Disabled,
}

/// Ingest queue settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IngestConfig {
    /// Bound of the ingest command queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins when set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions (serde default requires named functions)
// ---------------------------------------------------------------------------

fn default_host() -> String {
    "0.0.0.0".to_owned()
}

const fn default_port() -> u16 {
    8001
}

fn default_server_url() -> String {
    "http://127.0.0.1:8000".to_owned()
}

const fn default_experiment_poll_interval_ms() -> u64 {
    1_000
}

const fn default_event_poll_interval_ms() -> u64 {
    200
}

const fn default_queue_capacity() -> usize {
    1_024
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = MonitorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 8001);
        assert_eq!(config.source.server_url, "http://127.0.0.1:8000");
        assert_eq!(
            config.source.event_poll_interval(),
            Duration::from_millis(200)
        );
        assert_eq!(config.source.event_transport, EventTransport::WebSocket);
        assert_eq!(config.ingest.queue_capacity, 1024);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 9000

source:
  server_url: "http://storage:8000"
  experiment_poll_interval_ms: 5000
  event_poll_interval_ms: 250
  event_transport: poll
  experiment_id: "0190b3a0-7d2c-7c4e-9a51-3f1f0c2d9e11"

ingest:
  queue_capacity: 64

logging:
  level: "debug"
  json: true
"#;
        let config = MonitorConfig::parse(yaml).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.source.server_url, "http://storage:8000");
        assert_eq!(
            config.source.experiment_poll_interval(),
            Duration::from_secs(5)
        );
        assert_eq!(config.source.event_transport, EventTransport::Poll);
        assert_eq!(
            config.source.experiment_id.map(|id| id.to_string()),
            Some("0190b3a0-7d2c-7c4e-9a51-3f1f0c2d9e11".to_owned())
        );
        assert_eq!(config.ingest.queue_capacity, 64);
        assert!(config.logging.json);
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = MonitorConfig::parse("server:\n  port: 8100\n").unwrap();
        assert_eq!(config.server.port, 8100);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.source, SourceConfig::default());
    }

    #[test]
    fn rejects_zero_intervals() {
        let err = MonitorConfig::parse("source:\n  event_poll_interval_ms: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = MonitorConfig::parse("ingest:\n  queue_capacity: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn parses_every_event_transport() {
        for (name, expected) in [
            ("websocket", EventTransport::WebSocket),
            ("poll", EventTransport::Poll),
            ("disabled", EventTransport::Disabled),
        ] {
            let yaml = format!("source:\n  event_transport: {name}\n");
            let config = MonitorConfig::parse(&yaml).unwrap();
            assert_eq!(config.source.event_transport, expected);
        }
        assert!(MonitorConfig::parse("source:\n  event_transport: carrier-pigeon\n").is_err());
    }

    #[test]
    fn rejects_invalid_yaml() {
        assert!(matches!(
            MonitorConfig::parse("server: [unterminated"),
            Err(ConfigError::Yaml { .. })
        ));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = MonitorConfig::load(Path::new("/nonexistent/ensemble-monitor.yaml")).unwrap();
        assert_eq!(config.ingest, IngestConfig::default());
        assert_eq!(config.logging, LoggingConfig::default());
    }
}
