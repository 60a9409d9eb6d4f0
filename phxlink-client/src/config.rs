//! Client configuration
//!
//! [`ClientConfig`] holds everything the lifecycle manager needs besides
//! the injected collaborators (connector, credentials, ref generator,
//! reconnection strategy). Build one with [`ClientBuilder`](crate::ClientBuilder)
//! or read it from the environment:
//!
//! | variable                        | field                |
//! |---------------------------------|----------------------|
//! | `PHXLINK_URL`                   | `url` (required)     |
//! | `PHXLINK_TOPIC`                 | `topic`              |
//! | `PHXLINK_JOIN_TIMEOUT_MS`       | `join_timeout`       |
//! | `PHXLINK_HEARTBEAT_INTERVAL_MS` | `heartbeat_interval` |
//! | `PHXLINK_REQUEST_TIMEOUT_MS`    | `request_timeout`    |

use phxlink_core::{Codec, Error, Result};
use serde_json::{Map, Value};
use std::time::Duration;

pub const DEFAULT_TOPIC: &str = "websocket";
pub const DEFAULT_HEARTBEAT_TOPIC: &str = "phoenix";
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server URL, e.g. `ws://localhost:4000/socket/websocket`
    pub url: String,

    /// Topic joined on connect and used for requests
    pub topic: String,

    /// Topic heartbeats are sent on
    pub heartbeat_topic: String,

    /// How long to wait for the join reply
    pub join_timeout: Duration,

    /// Period of the heartbeat timer
    pub heartbeat_interval: Duration,

    /// Timeout for requests that do not pass their own
    pub request_timeout: Duration,

    /// Extra fields merged into the join payload
    pub join_params: Map<String, Value>,

    /// Frame codec
    pub codec: Codec,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            topic: DEFAULT_TOPIC.to_string(),
            heartbeat_topic: DEFAULT_HEARTBEAT_TOPIC.to_string(),
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            join_params: Map::new(),
            codec: Codec::default(),
        }
    }

    /// Read the configuration from `PHXLINK_*` environment variables
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if `PHXLINK_URL` is missing or a timeout is
    /// not a positive integer.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let url = lookup("PHXLINK_URL").ok_or_else(|| Error::Config("PHXLINK_URL is not set".to_string()))?;
        let mut config = Self::new(url);

        if let Some(topic) = lookup("PHXLINK_TOPIC") {
            config.topic = topic;
        }
        if let Some(ms) = lookup("PHXLINK_JOIN_TIMEOUT_MS") {
            config.join_timeout = parse_millis("PHXLINK_JOIN_TIMEOUT_MS", &ms)?;
        }
        if let Some(ms) = lookup("PHXLINK_HEARTBEAT_INTERVAL_MS") {
            config.heartbeat_interval = parse_millis("PHXLINK_HEARTBEAT_INTERVAL_MS", &ms)?;
        }
        if let Some(ms) = lookup("PHXLINK_REQUEST_TIMEOUT_MS") {
            config.request_timeout = parse_millis("PHXLINK_REQUEST_TIMEOUT_MS", &ms)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the settings the client cannot work without
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(Error::Config("url must not be empty".to_string()));
        }
        if self.topic.is_empty() {
            return Err(Error::Config("topic must not be empty".to_string()));
        }
        for (name, value) in [
            ("join_timeout", self.join_timeout),
            ("heartbeat_interval", self.heartbeat_interval),
            ("request_timeout", self.request_timeout),
        ] {
            if value.is_zero() {
                return Err(Error::Config(format!("{name} must be greater than zero")));
            }
        }
        Ok(())
    }
}

fn parse_millis(name: &str, raw: &str) -> Result<Duration> {
    match raw.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(Duration::from_millis(ms)),
        _ => Err(Error::Config(format!("{name} must be a positive number of milliseconds, got {raw:?}"))),
    }
}
