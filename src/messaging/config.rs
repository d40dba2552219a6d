//! Messaging configuration
//!
//! Raw broker settings arrive as a string map using librdkafka key names.
//! They are validated once, when a producer or consumer is built, and turned
//! into [`ProducerSettings`] / [`ConsumerSettings`] records that the rest of
//! the crate consumes without re-checking.

use crate::messaging::allow_list;
use crate::messaging::error::{MessagingError, MessagingResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use validator::{Validate, ValidationError};

/// Broker address list
pub const BOOTSTRAP_SERVERS: &str = "bootstrap.servers";
/// Client identity, mandatory for producers
pub const CLIENT_ID: &str = "client.id";
/// Consumer group identity, mandatory for consumers
pub const GROUP_ID: &str = "group.id";
/// Schema registry address, mandatory for both
pub const SCHEMA_REGISTRY_URL: &str = "schema.registry.url";

/// Immutable string-to-string settings map
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings(BTreeMap<String, String>);

impl Settings {
    /// Create an empty settings map
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a copy with `key` set to `value`
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Look up a key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Iterate over all entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn require(&self, key: &str) -> MessagingResult<String> {
        match self.get(key) {
            Some(value) if !value.trim().is_empty() => Ok(value.to_string()),
            _ => Err(MessagingError::MissingSetting {
                key: key.to_string(),
            }),
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Settings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Validated producer configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerSettings {
    pub bootstrap_servers: String,
    pub client_id: String,
    pub schema_registry_url: String,
    /// Allow-listed settings forwarded verbatim to the broker client
    pub client_settings: Settings,
}

impl ProducerSettings {
    /// Validate the mandatory producer keys
    pub fn from_settings(settings: &Settings) -> MessagingResult<Self> {
        Ok(Self {
            bootstrap_servers: settings.require(BOOTSTRAP_SERVERS)?,
            client_id: settings.require(CLIENT_ID)?,
            schema_registry_url: settings.require(SCHEMA_REGISTRY_URL)?,
            client_settings: allow_list::sanitize(settings),
        })
    }
}

/// Validated consumer configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSettings {
    pub bootstrap_servers: String,
    pub group_id: String,
    pub schema_registry_url: String,
    /// Allow-listed settings forwarded verbatim to the broker client
    pub client_settings: Settings,
}

impl ConsumerSettings {
    /// Validate the mandatory consumer keys
    pub fn from_settings(settings: &Settings) -> MessagingResult<Self> {
        Ok(Self {
            bootstrap_servers: settings.require(BOOTSTRAP_SERVERS)?,
            group_id: settings.require(GROUP_ID)?,
            schema_registry_url: settings.require(SCHEMA_REGISTRY_URL)?,
            client_settings: allow_list::sanitize(settings),
        })
    }
}

/// Tuning of the consumer loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ConsumerOptions {
    /// Commit the checkpoint every this many handled payloads
    #[serde(default = "default_commit_batch_size")]
    #[validate(range(min = 1))]
    pub commit_batch_size: u64,

    /// Upper bound of a single pull
    #[serde(default = "default_poll_timeout", with = "duration_ms")]
    #[validate(custom(function = "validate_non_zero"))]
    pub poll_timeout: Duration,

    /// Commit pending payloads once this much time passed since the last
    /// commit, even if the batch is not full. Off by default.
    #[serde(default, with = "option_duration_ms")]
    pub commit_interval: Option<Duration>,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            commit_batch_size: default_commit_batch_size(),
            poll_timeout: default_poll_timeout(),
            commit_interval: None,
        }
    }
}

fn default_commit_batch_size() -> u64 {
    100
}

fn default_poll_timeout() -> Duration {
    Duration::from_millis(100)
}

fn validate_non_zero(value: &Duration) -> Result<(), ValidationError> {
    if value.is_zero() {
        return Err(ValidationError::new("zero_duration"));
    }
    Ok(())
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod option_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn producer_settings() -> Settings {
        Settings::new()
            .with(BOOTSTRAP_SERVERS, "localhost:9092")
            .with(CLIENT_ID, "test-producer")
            .with(SCHEMA_REGISTRY_URL, "http://localhost:8081")
    }

    #[test]
    fn test_producer_settings_valid() {
        let settings = ProducerSettings::from_settings(&producer_settings()).unwrap();
        assert_eq!(settings.bootstrap_servers, "localhost:9092");
        assert_eq!(settings.client_id, "test-producer");
        assert_eq!(settings.schema_registry_url, "http://localhost:8081");
    }

    #[test]
    fn test_producer_settings_missing_client_id() {
        let settings = Settings::new()
            .with(BOOTSTRAP_SERVERS, "localhost:9092")
            .with(SCHEMA_REGISTRY_URL, "http://localhost:8081");

        let err = ProducerSettings::from_settings(&settings).unwrap_err();
        assert!(matches!(err, MessagingError::MissingSetting { key } if key == CLIENT_ID));
    }

    #[test]
    fn test_blank_setting_is_missing() {
        let settings = producer_settings().with(BOOTSTRAP_SERVERS, "  ");
        let err = ProducerSettings::from_settings(&settings).unwrap_err();
        assert!(matches!(err, MessagingError::MissingSetting { key } if key == BOOTSTRAP_SERVERS));
    }

    #[test]
    fn test_consumer_settings_require_group() {
        let err = ConsumerSettings::from_settings(&producer_settings()).unwrap_err();
        assert!(matches!(err, MessagingError::MissingSetting { key } if key == GROUP_ID));

        let settings = producer_settings().with(GROUP_ID, "test-group");
        let consumer = ConsumerSettings::from_settings(&settings).unwrap();
        assert_eq!(consumer.group_id, "test-group");
    }

    #[test]
    fn test_client_settings_are_sanitized() {
        let settings = producer_settings().with("not.a.kafka.key", "x");
        let producer = ProducerSettings::from_settings(&settings).unwrap();

        assert_eq!(producer.client_settings.get(BOOTSTRAP_SERVERS), Some("localhost:9092"));
        assert_eq!(producer.client_settings.get("not.a.kafka.key"), None);
        assert_eq!(producer.client_settings.get(SCHEMA_REGISTRY_URL), None);
    }

    #[test]
    fn test_consumer_options_defaults() {
        let options = ConsumerOptions::default();
        assert_eq!(options.commit_batch_size, 100);
        assert_eq!(options.poll_timeout, Duration::from_millis(100));
        assert!(options.commit_interval.is_none());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_consumer_options_validation() {
        let options = ConsumerOptions {
            commit_batch_size: 0,
            ..Default::default()
        };
        assert!(options.validate().is_err());

        let options = ConsumerOptions {
            poll_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_consumer_options_deserialize_millis() {
        let options: ConsumerOptions = serde_json::from_str(
            r#"{"commit_batch_size": 10, "poll_timeout": 250, "commit_interval": 5000}"#,
        )
        .unwrap();
        assert_eq!(options.commit_batch_size, 10);
        assert_eq!(options.poll_timeout, Duration::from_millis(250));
        assert_eq!(options.commit_interval, Some(Duration::from_secs(5)));
    }
}
