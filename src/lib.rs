//! phxlink - correlated Phoenix channel client
//!
//! This is the convenience crate that re-exports the phxlink sub-crates.
//! Use it if you want a single dependency for the client and its types.
//!
//! # Architecture
//!
//! phxlink is organized into two crates:
//!
//! - **phxlink-core**: envelope types, codec, error handling, observability
//! - **phxlink-client**: transport, correlation registry, connection
//!   lifecycle (join, heartbeat, reconnection) and the hub operations
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use phxlink::{HubClient, NewUser, PhxClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = PhxClient::builder("ws://localhost:4000/socket/websocket")
//!         .auth_token("secret")
//!         .with_default_reconnect()
//!         .connect()
//!         .await?;
//!
//!     let hub = HubClient::new(client.clone());
//!     let user = hub.create_user(&NewUser::new("ana", "ana@example.com", "s3cret")).await?;
//!     println!("Created user {}", user.id);
//!
//!     client.disconnect().await?;
//!     Ok(())
//! }
//! ```

// Re-export the sub-crates under short names
pub use phxlink_client as client;
pub use phxlink_core as core;

// Convenience re-exports of the most commonly used types
pub use phxlink_client::{ClientBuilder, ClientConfig, ConnectionState, HubClient, NewUser, PhxClient};
pub use phxlink_core::{Envelope, Error, Event, ObservabilityConfig, Ref, Result};
