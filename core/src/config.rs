//! Configuration for the message bus and the synchronization handlers.
//!
//! Loaded from environment variables with defaults. Every variable is
//! optional; values that are present but unparsable are rejected instead of
//! silently replaced by the default.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `KAFKA_ENABLED` | `false` |
//! | `KAFKA_BROKERS` | `localhost:9092` |
//! | `KAFKA_GROUP_ID` | `iam-events` |
//! | `KAFKA_SESSION_TIMEOUT_MS` | `30000` |
//! | `KAFKA_HEARTBEAT_INTERVAL_MS` | `3000` |
//! | `KAFKA_TOPIC_PREFIX` | `iam` |
//! | `KAFKA_PERSON_TOPIC` | `person` |
//! | `KAFKA_USER_TOPIC` | `user` |
//! | `KAFKA_DLQ_SUFFIX` | `-dlq` |
//! | `KAFKA_HANDLER_TIMEOUT_MS` | `30000` |
//! | `KAFKA_SSL_ENABLED` | `false` |
//! | `KAFKA_SSL_CA_PATH` / `KAFKA_SSL_CERT_PATH` / `KAFKA_SSL_KEY_PATH` | unset |
//! | `LEARNING_PLATFORM_ENABLED` | `false` |
//! | `LEARNING_PLATFORM_MAX_BATCH_SIZE` | `100` |
//! | `GROUPWARE_ENABLED` | `false` |
//! | `GROUPWARE_MAX_BATCH_SIZE` | `100` |

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is present but cannot be parsed
    #[error("Invalid value for {var}: {reason}")]
    InvalidValue {
        /// Variable name
        var: String,
        /// Why the value was rejected
        reason: String,
    },

    /// A variable required by another setting is missing
    #[error("Missing configuration: {var}")]
    Missing {
        /// Variable name
        var: String,
    },
}

/// Complete configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Config {
    /// Broker connection and topics
    pub kafka: KafkaConfig,
    /// Learning platform synchronization
    pub learning_platform: IntegrationConfig,
    /// Groupware synchronization
    pub groupware: IntegrationConfig,
}

/// Broker connection and topic configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KafkaConfig {
    /// Administrative switch for the whole message bus
    pub enabled: bool,
    /// Broker addresses (comma-separated)
    pub brokers: String,
    /// Consumer group id
    pub group_id: String,
    /// Consumer session timeout in milliseconds
    pub session_timeout_ms: u32,
    /// Consumer heartbeat interval in milliseconds
    pub heartbeat_interval_ms: u32,
    /// Prefix prepended to every topic name (`<prefix>.<topic>`)
    pub topic_prefix: String,
    /// Topic for person events
    pub person_topic: String,
    /// Topic for user account events (roles, email addresses)
    pub user_topic: String,
    /// Suffix appended to a topic to name its dead-letter topic
    pub dlq_suffix: String,
    /// Per-handler timeout window in milliseconds
    pub handler_timeout_ms: u64,
    /// TLS settings
    pub tls: TlsConfig,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            brokers: "localhost:9092".to_string(),
            group_id: "iam-events".to_string(),
            session_timeout_ms: 30_000,
            heartbeat_interval_ms: 3_000,
            topic_prefix: "iam".to_string(),
            person_topic: "person".to_string(),
            user_topic: "user".to_string(),
            dlq_suffix: "-dlq".to_string(),
            handler_timeout_ms: 30_000,
            tls: TlsConfig::default(),
        }
    }
}

impl KafkaConfig {
    /// Prepend the topic prefix to `topic`.
    #[must_use]
    pub fn prefixed(&self, topic: &str) -> String {
        if self.topic_prefix.is_empty() {
            topic.to_string()
        } else {
            format!("{}.{topic}", self.topic_prefix)
        }
    }

    /// Dead-letter topic name for `topic` (unprefixed).
    #[must_use]
    pub fn dlq_topic(&self, topic: &str) -> String {
        format!("{topic}{}", self.dlq_suffix)
    }

    /// Handler timeout window.
    #[must_use]
    pub const fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }

    /// Primary topics the consumer subscribes to, prefixed.
    #[must_use]
    pub fn subscribed_topics(&self) -> Vec<String> {
        vec![
            self.prefixed(&self.person_topic),
            self.prefixed(&self.user_topic),
        ]
    }
}

/// TLS settings for the broker connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TlsConfig {
    /// Whether to connect over TLS
    pub enabled: bool,
    /// CA certificate path
    pub ca_path: Option<String>,
    /// Client certificate path
    pub cert_path: Option<String>,
    /// Client key path
    pub key_path: Option<String>,
}

/// Settings for one downstream synchronization handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationConfig {
    /// Whether the handler acts on events
    pub enabled: bool,
    /// Maximum number of items sent in one mass action
    pub max_batch_size: usize,
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_batch_size: 100,
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is unparsable or the result fails
    /// [`Config::validate`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Same as [`Config::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };
        let defaults = KafkaConfig::default();

        let config = Self {
            kafka: KafkaConfig {
                enabled: vars.parse("KAFKA_ENABLED", defaults.enabled)?,
                brokers: vars.string("KAFKA_BROKERS", defaults.brokers),
                group_id: vars.string("KAFKA_GROUP_ID", defaults.group_id),
                session_timeout_ms: vars
                    .parse("KAFKA_SESSION_TIMEOUT_MS", defaults.session_timeout_ms)?,
                heartbeat_interval_ms: vars
                    .parse("KAFKA_HEARTBEAT_INTERVAL_MS", defaults.heartbeat_interval_ms)?,
                topic_prefix: vars.string("KAFKA_TOPIC_PREFIX", defaults.topic_prefix),
                person_topic: vars.string("KAFKA_PERSON_TOPIC", defaults.person_topic),
                user_topic: vars.string("KAFKA_USER_TOPIC", defaults.user_topic),
                dlq_suffix: vars.string("KAFKA_DLQ_SUFFIX", defaults.dlq_suffix),
                handler_timeout_ms: vars
                    .parse("KAFKA_HANDLER_TIMEOUT_MS", defaults.handler_timeout_ms)?,
                tls: TlsConfig {
                    enabled: vars.parse("KAFKA_SSL_ENABLED", false)?,
                    ca_path: vars.optional("KAFKA_SSL_CA_PATH"),
                    cert_path: vars.optional("KAFKA_SSL_CERT_PATH"),
                    key_path: vars.optional("KAFKA_SSL_KEY_PATH"),
                },
            },
            learning_platform: IntegrationConfig {
                enabled: vars.parse("LEARNING_PLATFORM_ENABLED", false)?,
                max_batch_size: vars.parse("LEARNING_PLATFORM_MAX_BATCH_SIZE", 100)?,
            },
            groupware: IntegrationConfig {
                enabled: vars.parse("GROUPWARE_ENABLED", false)?,
                max_batch_size: vars.parse("GROUPWARE_MAX_BATCH_SIZE", 100)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] describing the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |var: &str, reason: &str| ConfigError::InvalidValue {
            var: var.to_string(),
            reason: reason.to_string(),
        };

        if self.kafka.enabled && self.kafka.brokers.trim().is_empty() {
            return Err(invalid("KAFKA_BROKERS", "must not be empty when enabled"));
        }
        if self.kafka.handler_timeout_ms == 0 {
            return Err(invalid("KAFKA_HANDLER_TIMEOUT_MS", "must be > 0"));
        }
        if self.kafka.heartbeat_interval_ms >= self.kafka.session_timeout_ms {
            return Err(invalid(
                "KAFKA_HEARTBEAT_INTERVAL_MS",
                "must be lower than KAFKA_SESSION_TIMEOUT_MS",
            ));
        }
        if self.kafka.dlq_suffix.is_empty() {
            return Err(invalid("KAFKA_DLQ_SUFFIX", "must not be empty"));
        }
        if self.kafka.tls.enabled && self.kafka.tls.ca_path.is_none() {
            return Err(ConfigError::Missing {
                var: "KAFKA_SSL_CA_PATH".to_string(),
            });
        }
        if self.learning_platform.max_batch_size == 0 {
            return Err(invalid("LEARNING_PLATFORM_MAX_BATCH_SIZE", "must be > 0"));
        }
        if self.groupware.max_batch_size == 0 {
            return Err(invalid("GROUPWARE_MAX_BATCH_SIZE", "must be > 0"));
        }
        Ok(())
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, var: &str) -> Option<String> {
        (self.lookup)(var).filter(|v| !v.trim().is_empty())
    }

    fn string(&self, var: &str, default: String) -> String {
        self.optional(var).unwrap_or(default)
    }

    fn parse<T>(&self, var: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(var) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                var: var.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}
