//! Core Phoenix channel types and codec for phxlink
//!
//! This crate holds everything about a Phoenix channel connection that does
//! not need a network:
//!
//! - **Types**: the [`Envelope`] exchanged over the wire, its [`Event`]
//!   vocabulary, [`Ref`] correlation identifiers and the [`Reply`] view
//! - **Codec**: text frame encoding, including per-event double encoding of
//!   payloads
//! - **Error handling**: the [`Error`] taxonomy shared by every phxlink crate
//! - **Observability**: logging, tracing and metrics bootstrap
//!
//! The `phxlink-client` crate builds the connection, correlation and
//! heartbeat machinery on top of it.
//!
//! # Example
//!
//! ```rust
//! use phxlink_core::{codec, Envelope, Event};
//! use serde_json::json;
//!
//! let join = Envelope::join("websocket", json!({"auth_token": "secret"}));
//! let text = codec::encode(&join).unwrap();
//! assert!(text.contains(r#""ref":"1""#));
//!
//! let reply = codec::decode(
//!     r#"{"topic":"websocket","event":"phx_reply","payload":{"status":"ok","response":{}},"ref":"1"}"#,
//! )
//! .unwrap();
//! assert_eq!(reply.event, Event::Reply);
//! ```

pub mod codec;
pub mod error;
pub mod observability;
pub mod types;

pub use codec::{Codec, PayloadEncoding};
pub use error::{Error, Result, ServerError};
pub use observability::{init_observability, shutdown_observability, ObservabilityConfig};
pub use types::{Envelope, Event, Ref, Reply, ReplyStatus, JOIN_REF};
