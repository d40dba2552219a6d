use crate::messaging::{ConsumerOptions, MessagingResult, Settings};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Broker backend used by the binary
    #[serde(default)]
    pub backend: Backend,

    /// Raw producer settings (librdkafka key names)
    #[serde(default)]
    pub producer: Settings,

    /// Raw consumer settings (librdkafka key names)
    #[serde(default)]
    pub consumer: Settings,

    /// Consumer loop tuning
    #[serde(default)]
    pub consumer_options: ConsumerOptions,

    /// Redirect failed payloads here when set
    #[serde(default)]
    pub dead_letter_topic: Option<String>,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from the built-in defaults, an optional file and
    /// the environment, in increasing order of precedence.
    pub fn load(path: Option<&Path>) -> MessagingResult<Self> {
        let mut builder = config::Config::builder()
            // Start with default values
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ));

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let app_config: Self = builder
            // Override with environment variables (prefix: MQ_BRIDGE__)
            .add_source(
                config::Environment::with_prefix("MQ_BRIDGE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(app_config)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Kafka,
    #[default]
    InMemory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::MessagingError;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_builtin_defaults() {
        let config = AppConfig::load(None).unwrap();
        assert_eq!(config.backend, Backend::InMemory);
        assert_eq!(config.producer.get("client.id"), Some("mq-bridge-producer"));
        assert_eq!(config.consumer.get("group.id"), Some("mq-bridge"));
        assert_eq!(config.consumer_options.commit_batch_size, 100);
        assert_eq!(config.dead_letter_topic.as_deref(), Some("dead-letters"));
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
backend = "kafka"

[producer]
"client.id" = "orders-producer"

[consumer_options]
commit_batch_size = 10
poll_timeout = 250
commit_interval = 5000

[observability]
json_logs = true
"#
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.backend, Backend::Kafka);
        assert_eq!(config.producer.get("client.id"), Some("orders-producer"));
        assert_eq!(config.producer.get("bootstrap.servers"), Some("localhost:9092"));
        assert_eq!(config.consumer_options.commit_batch_size, 10);
        assert_eq!(config.consumer_options.poll_timeout, Duration::from_millis(250));
        assert_eq!(config.consumer_options.commit_interval, Some(Duration::from_secs(5)));
        assert!(config.observability.json_logs);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        let err = AppConfig::load(Some(missing.as_path())).unwrap_err();
        assert!(matches!(err, MessagingError::Configuration(_)));
    }

    #[test]
    fn test_malformed_value_is_a_configuration_error() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "backend = \"carrier-pigeon\"").unwrap();

        let err = AppConfig::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, MessagingError::Configuration(_)));
    }

    #[test]
    fn test_backend_default() {
        assert_eq!(Backend::default(), Backend::InMemory);
    }
}
