//! Error types for phxlink
//!
//! Every failure the client can observe is represented as a value of
//! [`Error`]. Nothing in the library panics or aborts the process on a
//! protocol or transport fault; callers receive one of these variants
//! instead.
//!
//! # Where Errors Surface
//!
//! - **`connect()`**: `Connect`, `Authentication`, `JoinTimeout`,
//!   `ConnectInProgress`
//! - **Per request**: `NotConnected`, `Timeout`, `Server`, `DuplicateRef`,
//!   `ReservedRef`, `Encoding`, `Transport`, `UnexpectedReply`
//! - **Connection wide**: `ConnectionLost`, delivered to every pending
//!   request at once
//! - **Recovered locally**: `Decode` (malformed inbound frames are logged
//!   and dropped by the reader, never propagated)
//!
//! # Examples
//!
//! ```rust
//! use phxlink_core::{Error, ServerError};
//! use serde_json::json;
//!
//! let err = Error::Server(ServerError::from_response(&json!({"reason": "unauthorized"})));
//! assert_eq!(err.kind(), "server");
//! assert!(err.to_string().contains("unauthorized"));
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type for phxlink operations
pub type Result<T> = std::result::Result<T, Error>;

/// Application-level error type for phxlink operations
///
/// The enum is `Clone` so that a single connection-wide failure can be
/// handed to every pending request when the registry is drained.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The transport could not establish a connection
    #[error("Connect error: {0}")]
    Connect(String),

    /// The server rejected the join handshake
    #[error("Authentication rejected: {0}")]
    Authentication(ServerError),

    /// No join reply arrived within the join timeout
    #[error("Join timed out after {0:?}")]
    JoinTimeout(Duration),

    /// An operation was attempted while the connection is not ready
    #[error("Not connected")]
    NotConnected,

    /// `connect()` was called while another attempt is still running
    #[error("Connect already in progress")]
    ConnectInProgress,

    /// A request did not receive its reply in time
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The connection dropped while the request was outstanding
    #[error("Connection lost")]
    ConnectionLost,

    /// An inbound frame could not be decoded into an envelope
    #[error("Decode error: {0}")]
    Decode(String),

    /// A payload could not be represented on the wire
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// A ref was registered while an identical ref was still outstanding
    ///
    /// This indicates a broken ref generator.
    #[error("Duplicate ref: {0}")]
    DuplicateRef(String),

    /// A caller tried to use the ref reserved for the join handshake
    #[error("Ref {0} is reserved for the join handshake")]
    ReservedRef(String),

    /// Writing to the transport failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// The server answered with an error status
    #[error("Server error: {0}")]
    Server(ServerError),

    /// The reply did not have the shape the operation expects
    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),

    /// Invalid client or observability configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Stable short label, used as a metric attribute and log field
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Connect(_) => "connect",
            Error::Authentication(_) => "authentication",
            Error::JoinTimeout(_) => "join_timeout",
            Error::NotConnected => "not_connected",
            Error::ConnectInProgress => "connect_in_progress",
            Error::Timeout(_) => "timeout",
            Error::ConnectionLost => "connection_lost",
            Error::Decode(_) => "decode",
            Error::Encoding(_) => "encoding",
            Error::DuplicateRef(_) => "duplicate_ref",
            Error::ReservedRef(_) => "reserved_ref",
            Error::Transport(_) => "transport",
            Error::Server(_) => "server",
            Error::UnexpectedReply(_) => "unexpected_reply",
            Error::Config(_) => "config",
        }
    }

    /// Whether the failure means the connection itself is gone
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            Error::ConnectionLost | Error::NotConnected | Error::Transport(_)
        )
    }
}

/// Failure reported by the server inside a reply
///
/// Servers are not consistent about where they put the reason: Phoenix
/// channels use `reason`, the database handlers use `error`, other handlers
/// use `message`. [`ServerError::from_response`] looks at all of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    /// Human-readable reason reported by the server
    pub reason: String,

    /// The full response document, kept for callers that need more detail
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

impl ServerError {
    /// Create a server error with a reason and no details
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            details: serde_json::Value::Null,
        }
    }

    /// Extract a server error from a reply's response document
    pub fn from_response(response: &serde_json::Value) -> Self {
        let reason = ["reason", "error", "message"]
            .iter()
            .find_map(|key| match response.get(*key) {
                Some(serde_json::Value::String(s)) => Some(s.clone()),
                Some(serde_json::Value::Object(inner)) => inner
                    .get("message")
                    .and_then(|m| m.as_str())
                    .map(str::to_string),
                _ => None,
            })
            .or_else(|| response.as_str().map(str::to_string))
            .unwrap_or_else(|| "unknown error".to_string());

        Self {
            reason,
            details: response.clone(),
        }
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.reason)
    }
}

impl std::error::Error for ServerError {}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Encoding(err.to_string())
    }
}
