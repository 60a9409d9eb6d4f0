//! Client builder
//!
//! The `ClientBuilder` collects settings and collaborators before the
//! client exists:
//! - connection settings (topic, timeouts, join parameters, codec)
//! - credentials and ref generation
//! - the transport connector
//! - automatic reconnection
//! - observability (OpenTelemetry) and client metrics
//!
//! # Examples
//!
//! ```rust,no_run
//! use phxlink_client::{ClientBuilder, ExponentialBackoff};
//! use std::time::Duration;
//!
//! # async fn example() -> phxlink_core::Result<()> {
//! let client = ClientBuilder::new("ws://localhost:4000/socket/websocket")
//!     .topic("room:lobby")
//!     .auth_token("secret")
//!     .request_timeout(Duration::from_secs(5))
//!     .with_reconnect(Box::new(ExponentialBackoff::default()))
//!     .connect()
//!     .await?;
//!
//! let reply: serde_json::Value = client.request("ping", &serde_json::json!({})).await?;
//! # Ok(())
//! # }
//! ```

use crate::client::{ClientParts, PhxClient};
use crate::config::ClientConfig;
use crate::credentials::{Credentials, NoCredentials, StaticToken};
use crate::metrics::ClientMetrics;
use crate::reconnect::{ExponentialBackoff, ReconnectionStrategy};
use crate::refs::{RefGenerator, SequentialRefs};
use crate::transport::{Connector, WebSocketConnector};
use phxlink_core::{Codec, ObservabilityConfig, Result};
use std::sync::Arc;
use std::time::Duration;

/// Builder for configuring and creating a [`PhxClient`]
pub struct ClientBuilder {
    config: ClientConfig,
    connector: Option<Arc<dyn Connector>>,
    credentials: Arc<dyn Credentials>,
    refs: Arc<dyn RefGenerator>,
    reconnect_strategy: Option<Box<dyn ReconnectionStrategy>>,
    observability_config: Option<ObservabilityConfig>,
    service_name: Option<String>,
    enable_metrics: bool,
}

impl ClientBuilder {
    pub fn new(url: impl Into<String>) -> Self {
        Self::from_config(ClientConfig::new(url))
    }

    /// Start from an existing configuration, e.g. [`ClientConfig::from_env`]
    pub fn from_config(config: ClientConfig) -> Self {
        Self {
            config,
            connector: None,
            credentials: Arc::new(NoCredentials),
            refs: Arc::new(SequentialRefs::new()),
            reconnect_strategy: None,
            observability_config: None,
            service_name: None,
            enable_metrics: false,
        }
    }

    /// Topic joined on connect and used for requests
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.config.topic = topic.into();
        self
    }

    pub fn heartbeat_topic(mut self, topic: impl Into<String>) -> Self {
        self.config.heartbeat_topic = topic.into();
        self
    }

    pub fn join_timeout(mut self, timeout: Duration) -> Self {
        self.config.join_timeout = timeout;
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Add a field to the join payload
    pub fn join_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.config.join_params.insert(key.into(), value.into());
        self
    }

    pub fn codec(mut self, codec: Codec) -> Self {
        self.config.codec = codec;
        self
    }

    /// Use a transport other than WebSocket
    pub fn connector(mut self, connector: impl Connector) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    pub fn credentials(mut self, credentials: impl Credentials + 'static) -> Self {
        self.credentials = Arc::new(credentials);
        self
    }

    /// Shorthand for `credentials(StaticToken::new(token))`
    pub fn auth_token(self, token: impl Into<String>) -> Self {
        self.credentials(StaticToken::new(token))
    }

    pub fn ref_generator(mut self, refs: impl RefGenerator + 'static) -> Self {
        self.refs = Arc::new(refs);
        self
    }

    /// Enable automatic reconnection with the given strategy
    pub fn with_reconnect(mut self, strategy: Box<dyn ReconnectionStrategy>) -> Self {
        self.reconnect_strategy = Some(strategy);
        self
    }

    /// Enable automatic reconnection with [`ExponentialBackoff::default`]
    pub fn with_default_reconnect(self) -> Self {
        self.with_reconnect(Box::new(ExponentialBackoff::default()))
    }

    /// Disable automatic reconnection (default)
    pub fn without_reconnect(mut self) -> Self {
        self.reconnect_strategy = None;
        self
    }

    /// Initialize observability with `config` when the client is built
    ///
    /// Also enables client metrics.
    pub fn with_observability(mut self, config: ObservabilityConfig) -> Self {
        self.observability_config = Some(config);
        self.enable_metrics = true;
        self
    }

    pub fn with_default_observability(self) -> Self {
        self.with_observability(ObservabilityConfig::default())
    }

    /// Record client metrics on the global meter without initializing
    /// observability here
    pub fn with_metrics(mut self) -> Self {
        self.enable_metrics = true;
        self
    }

    /// Service name for observability and the metrics meter
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Create the client without connecting
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an invalid configuration or when
    /// observability cannot be initialized.
    pub fn build(self) -> Result<PhxClient> {
        self.config.validate()?;

        let service_name = self
            .service_name
            .clone()
            .or_else(|| self.observability_config.as_ref().map(|c| c.service_name.clone()))
            .unwrap_or_else(|| "phxlink-client".to_string());

        if let Some(mut config) = self.observability_config {
            config.service_name = service_name.clone();
            phxlink_core::init_observability(config)?;
        }

        let metrics = self.enable_metrics.then(|| ClientMetrics::new(service_name));
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(WebSocketConnector::new()));

        Ok(PhxClient::from_parts(ClientParts {
            config: self.config,
            connector,
            credentials: self.credentials,
            refs: self.refs,
            reconnect: self.reconnect_strategy,
            metrics,
        }))
    }

    /// Build the client and connect it
    pub async fn connect(self) -> Result<PhxClient> {
        let client = self.build()?;
        client.connect().await?;
        Ok(client)
    }
}
