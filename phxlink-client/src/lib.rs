//! Correlated Phoenix channel client over WebSocket
//!
//! This crate connects to a Phoenix channel server, joins a topic and turns
//! the channel into a request/response API: every request carries a unique
//! ref, and the reply echoing that ref is handed back to the caller that
//! sent it, whatever order replies arrive in.
//!
//! # Core Features
//!
//! - **Join handshake**: `phx_join` with ref `"1"` and credentials
//! - **Correlation**: concurrent requests, each with its own timeout
//! - **Heartbeats**: sent only when the connection has been idle
//! - **Server pushes**: fan-out to subscribers, optionally per event
//! - **Auto-Reconnection**: opt-in, with exponential backoff
//! - **Observability**: tracing spans and OpenTelemetry metrics
//! - **Hub operations**: typed user, channel and direct-message calls
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use phxlink_client::PhxClient;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = PhxClient::builder("ws://localhost:4000/socket/websocket")
//!         .auth_token("secret")
//!         .connect()
//!         .await?;
//!
//!     // Correlated request
//!     let reply: serde_json::Value = client.request("ping", &json!({})).await?;
//!     println!("Reply: {}", reply);
//!
//!     // Server pushes
//!     client.subscribe(|envelope| async move {
//!         println!("Push: {} {}", envelope.event, envelope.payload);
//!     }).await;
//!
//!     client.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! # With Reconnection
//!
//! ```rust,no_run
//! use phxlink_client::{ClientBuilder, ExponentialBackoff};
//! use std::time::Duration;
//!
//! # async fn example() -> phxlink_core::Result<()> {
//! let client = ClientBuilder::new("ws://localhost:4000/socket/websocket")
//!     .with_reconnect(Box::new(
//!         ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(30))
//!             .with_max_attempts(5)
//!             .with_jitter(),
//!     ))
//!     .connect()
//!     .await?;
//!
//! client.on_connection_state(|ready| println!("ready: {ready}"));
//! # Ok(())
//! # }
//! ```

mod client;
mod client_builder;
mod config;
mod connection_state;
mod credentials;
mod events;
pub mod hub;
pub mod memory;
mod metrics;
mod reconnect;
mod refs;
mod registry;
mod transport;

pub use client::PhxClient;
pub use client_builder::ClientBuilder;
pub use config::{
    ClientConfig, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_HEARTBEAT_TOPIC, DEFAULT_JOIN_TIMEOUT,
    DEFAULT_REQUEST_TIMEOUT, DEFAULT_TOPIC,
};
pub use connection_state::ConnectionState;
pub use credentials::{Credentials, NoCredentials, StaticToken};
pub use events::{EventFn, StateFn, SubscriptionId};
pub use hub::{
    AuthSession, AuthTokens, Channel, DirectMessage, HubClient, JoinType, MessageReceipt, NewProfile, NewUser,
    PasswordReset, Profile, User,
};
pub use metrics::ClientMetrics;
pub use reconnect::{ExponentialBackoff, FixedDelay, NoReconnect, ReconnectionStrategy};
pub use refs::{RandomRefs, RefGenerator, SequentialRefs};
pub use registry::{CorrelationRegistry, Fulfilled, PendingHandle, PendingKind};
pub use transport::{Connection, Connector, FrameSink, FrameSource, WebSocketConnector};

// Re-export core types for convenience
pub use phxlink_core::{Envelope, Error, Event, Ref, Reply, ReplyStatus, Result};
