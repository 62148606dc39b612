//! Server configuration
//!
//! Settings are read from `ROOMCAST_`-prefixed environment variables, after
//! an optional `.env` file has been loaded with [`load_dotenv`]:
//!
//! | variable | default |
//! |---|---|
//! | `ROOMCAST_USE_APP_MIDDLEWARES` | `false` |
//! | `ROOMCAST_TRANSPORT` (`none`, `memory`, `redis`) | `none` |
//! | `ROOMCAST_REDIS_URL` | required for `redis` |
//! | `ROOMCAST_REDIS_CHANNEL_CAPACITY` | `1024` |
//! | `ROOMCAST_INBOUND_CAPACITY` | `64` |
//! | `ROOMCAST_OUTBOUND_CAPACITY` | `256` |
//! | `ROOMCAST_CLOSE_TIMEOUT_MS` | `5000` |
//! | `ROOMCAST_MAX_MESSAGE_SIZE` | tungstenite default |

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tungstenite::protocol::WebSocketConfig;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "ROOMCAST";

/// Error type for configuration loading failures
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment variable deserialization failed
    #[error("Configuration error: {0}")]
    Env(#[from] envy::Error),

    /// A required setting is missing
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    /// A setting has an unusable value
    #[error("Invalid value for {key}: {reason}")]
    Invalid {
        /// Offending variable
        key: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

/// Which pub/sub transport backs room operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// No transport; room operations report `AdapterUnavailable`
    #[default]
    None,
    /// In-process transport, rooms span a single process
    Memory,
    /// Redis pub/sub, rooms span every process on the same server
    Redis,
}

impl TransportKind {
    /// Lowercase name, as accepted by [`FromStr`]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Memory => "memory",
            Self::Redis => "redis",
        }
    }
}

impl FromStr for TransportKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            other => Err(ConfigError::Invalid {
                key: "ROOMCAST_TRANSPORT",
                reason: format!("unknown transport '{}', expected none, memory or redis", other),
            }),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WsConfig {
    /// Run app-level middlewares in front of every route chain
    #[serde(default)]
    pub use_app_middlewares: bool,

    /// Transport backing room operations
    #[serde(default)]
    pub transport: TransportKind,

    /// Redis connection URL, required when `transport` is `redis`
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Capacity of the Redis incoming message channel
    #[serde(default = "default_redis_channel_capacity")]
    pub redis_channel_capacity: usize,

    /// Inbound frames buffered per connection before new ones are dropped
    #[serde(default = "default_inbound_capacity")]
    pub inbound_capacity: usize,

    /// Outbound messages queued per connection before new ones are rejected
    ///
    /// Close frames are never subject to this limit.
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,

    /// How long a locally initiated close waits for the peer's close frame
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,

    /// Largest accepted message, in bytes
    #[serde(default)]
    pub max_message_size: Option<usize>,
}

fn default_redis_channel_capacity() -> usize {
    1024
}

fn default_inbound_capacity() -> usize {
    64
}

fn default_outbound_capacity() -> usize {
    256
}

fn default_close_timeout_ms() -> u64 {
    5000
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            use_app_middlewares: false,
            transport: TransportKind::None,
            redis_url: None,
            redis_channel_capacity: default_redis_channel_capacity(),
            inbound_capacity: default_inbound_capacity(),
            outbound_capacity: default_outbound_capacity(),
            close_timeout_ms: default_close_timeout_ms(),
            max_message_size: None,
        }
    }
}

impl WsConfig {
    /// Load from `ROOMCAST_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_prefixed(ENV_PREFIX)
    }

    /// Load from environment variables with a custom prefix
    ///
    /// The prefix is joined to field names with an underscore, so
    /// `from_env_prefixed("CHAT")` reads `CHAT_TRANSPORT`.
    pub fn from_env_prefixed(prefix: &str) -> Result<Self, ConfigError> {
        let config: Self = envy::prefixed(format!("{}_", prefix)).from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from explicit `ROOMCAST_*` key/value pairs
    pub fn from_iter<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: Self = envy::prefixed(format!("{}_", ENV_PREFIX)).from_iter(vars)?;
        config.validate()?;
        Ok(config)
    }

    /// Check settings that deserialize fine but cannot work
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transport == TransportKind::Redis
            && self.redis_url.as_deref().map_or(true, str::is_empty)
        {
            return Err(ConfigError::Missing("ROOMCAST_REDIS_URL"));
        }
        if self.inbound_capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "ROOMCAST_INBOUND_CAPACITY",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.outbound_capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "ROOMCAST_OUTBOUND_CAPACITY",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Select the transport
    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    /// Set the Redis URL
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = Some(url.into());
        self
    }

    /// Enable or disable app-level middlewares
    pub fn with_app_middlewares(mut self, enabled: bool) -> Self {
        self.use_app_middlewares = enabled;
        self
    }

    /// Close handshake timeout
    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    /// Protocol settings handed to tungstenite on every upgrade
    pub fn websocket_config(&self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        if let Some(max) = self.max_message_size {
            config.max_message_size = Some(max);
            config.max_frame_size = Some(max);
        }
        config
    }
}

/// Load environment variables from a `.env` file in the current directory
///
/// Missing files are ignored.
pub fn load_dotenv() {
    let _ = dotenvy::dotenv();
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_when_nothing_is_set() {
        let config = WsConfig::from_iter(Vec::new()).unwrap();
        assert_eq!(config, WsConfig::default());
        assert_eq!(config.close_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_reads_prefixed_keys() {
        let config = WsConfig::from_iter(vars(&[
            ("ROOMCAST_USE_APP_MIDDLEWARES", "true"),
            ("ROOMCAST_TRANSPORT", "redis"),
            ("ROOMCAST_REDIS_URL", "redis://localhost:6379"),
            ("ROOMCAST_INBOUND_CAPACITY", "8"),
            ("ROOMCAST_OUTBOUND_CAPACITY", "16"),
            ("ROOMCAST_MAX_MESSAGE_SIZE", "65536"),
            ("OTHER_TRANSPORT", "memory"),
        ]))
        .unwrap();

        assert!(config.use_app_middlewares);
        assert_eq!(config.transport, TransportKind::Redis);
        assert_eq!(config.redis_url.as_deref(), Some("redis://localhost:6379"));
        assert_eq!(config.inbound_capacity, 8);
        assert_eq!(config.outbound_capacity, 16);
        assert_eq!(config.websocket_config().max_message_size, Some(65536));
    }

    #[test]
    fn test_redis_without_url_is_rejected() {
        let err = WsConfig::from_iter(vars(&[("ROOMCAST_TRANSPORT", "redis")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("ROOMCAST_REDIS_URL")));
    }

    #[test]
    fn test_unknown_transport_is_an_env_error() {
        let err = WsConfig::from_iter(vars(&[("ROOMCAST_TRANSPORT", "kafka")])).unwrap_err();
        assert!(matches!(err, ConfigError::Env(_)));
        assert!("kafka".parse::<TransportKind>().is_err());
        assert_eq!("Memory".parse::<TransportKind>().unwrap(), TransportKind::Memory);
    }

    #[test]
    fn test_zero_inbound_capacity_is_rejected() {
        let err = WsConfig::from_iter(vars(&[("ROOMCAST_INBOUND_CAPACITY", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_zero_outbound_capacity_is_rejected() {
        let err = WsConfig::from_iter(vars(&[("ROOMCAST_OUTBOUND_CAPACITY", "0")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { key: "ROOMCAST_OUTBOUND_CAPACITY", .. }
        ));
    }

    proptest! {
        #[test]
        fn test_close_timeout_follows_setting(ms in 0u64..1_000_000) {
            let config = WsConfig::from_iter(vec![(
                "ROOMCAST_CLOSE_TIMEOUT_MS".to_string(),
                ms.to_string(),
            )])
            .unwrap();
            prop_assert_eq!(config.close_timeout(), Duration::from_millis(ms));
        }
    }
}
