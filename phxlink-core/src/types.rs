//! Phoenix channel envelope types
//!
//! Everything exchanged with the server is an [`Envelope`]: a JSON object
//! with four fields.
//!
//! ```text
//! {"topic": "websocket", "event": "phx_join", "payload": {...}, "ref": "1"}
//! ```
//!
//! # Refs
//!
//! The `ref` correlates a request with its reply. The client stamps a fresh
//! ref on every request and the server echoes it on the `phx_reply`. Pushes
//! initiated by the server, and fire-and-forget messages from the client,
//! carry no ref. The ref `"1"` is reserved for the join handshake.
//!
//! # Events
//!
//! The Phoenix vocabulary is modelled as [`Event`] variants. Any other event
//! name decodes to [`Event::Custom`] so unexpected server pushes never fail
//! decoding.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Ref reserved for the join handshake
pub const JOIN_REF: &str = "1";

/// Correlation identifier linking a request with its reply
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ref(String);

impl Ref {
    /// Create a ref from any string
    pub fn new(value: impl Into<String>) -> Self {
        Ref(value.into())
    }

    /// The ref used by the join handshake
    pub fn join() -> Self {
        Ref(JOIN_REF.to_string())
    }

    /// Whether this is the reserved join ref
    pub fn is_join(&self) -> bool {
        self.0 == JOIN_REF
    }

    /// Borrow the ref as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::borrow::Borrow<str> for Ref {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<String> for Ref {
    fn from(s: String) -> Self {
        Ref(s)
    }
}

impl From<&str> for Ref {
    fn from(s: &str) -> Self {
        Ref(s.to_string())
    }
}

impl From<u64> for Ref {
    fn from(n: u64) -> Self {
        Ref(n.to_string())
    }
}

/// Event name carried by an envelope
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Event {
    /// `phx_join`: join a topic, carries credentials
    Join,
    /// `phx_leave`: leave a topic
    Leave,
    /// `phx_reply`: server reply to a request, `{status, response}`
    Reply,
    /// `phx_close`: the server closed the channel
    Close,
    /// `phx_error`: the channel crashed on the server
    Error,
    /// `heartbeat`: keep-alive
    Heartbeat,
    /// `message`: generic carrier for business operations
    Message,
    /// Any other event name
    Custom(String),
}

impl Event {
    /// The wire name of the event
    pub fn as_str(&self) -> &str {
        match self {
            Event::Join => "phx_join",
            Event::Leave => "phx_leave",
            Event::Reply => "phx_reply",
            Event::Close => "phx_close",
            Event::Error => "phx_error",
            Event::Heartbeat => "heartbeat",
            Event::Message => "message",
            Event::Custom(name) => name,
        }
    }

    /// Whether the event is outside the Phoenix vocabulary
    pub fn is_custom(&self) -> bool {
        matches!(self, Event::Custom(_))
    }
}

impl From<&str> for Event {
    fn from(name: &str) -> Self {
        match name {
            "phx_join" => Event::Join,
            "phx_leave" => Event::Leave,
            "phx_reply" => Event::Reply,
            "phx_close" => Event::Close,
            "phx_error" => Event::Error,
            "heartbeat" => Event::Heartbeat,
            "message" => Event::Message,
            other => Event::Custom(other.to_string()),
        }
    }
}

impl From<String> for Event {
    fn from(name: String) -> Self {
        match Event::from(name.as_str()) {
            Event::Custom(_) => Event::Custom(name),
            known => known,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Event {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Event {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(Event::from)
    }
}

/// The unit exchanged over the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Logical channel name
    pub topic: String,

    /// Event name
    pub event: Event,

    /// Event-specific document
    #[serde(default)]
    pub payload: serde_json::Value,

    /// Correlation ref, `None` for pushes
    #[serde(rename = "ref", default, deserialize_with = "deserialize_ref")]
    pub reference: Option<Ref>,
}

impl Envelope {
    /// Create an envelope without a ref
    pub fn new(topic: impl Into<String>, event: impl Into<Event>, payload: serde_json::Value) -> Self {
        Self {
            topic: topic.into(),
            event: event.into(),
            payload,
            reference: None,
        }
    }

    /// Create an envelope from any serializable payload
    ///
    /// # Errors
    ///
    /// Returns `Error::Encoding` if the payload cannot be represented as a
    /// JSON document (for example a map keyed by non-string values).
    pub fn try_new<P: Serialize>(
        topic: impl Into<String>,
        event: impl Into<Event>,
        payload: &P,
    ) -> Result<Self> {
        let payload = serde_json::to_value(payload).map_err(|e| Error::Encoding(e.to_string()))?;
        Ok(Self::new(topic, event, payload))
    }

    /// Attach a ref
    pub fn with_ref(mut self, reference: impl Into<Ref>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    /// Join envelope with the reserved ref
    pub fn join(topic: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::new(topic, Event::Join, payload).with_ref(Ref::join())
    }

    /// Heartbeat envelope with an empty payload
    pub fn heartbeat(topic: impl Into<String>, reference: Ref) -> Self {
        Self::new(topic, Event::Heartbeat, serde_json::json!({})).with_ref(reference)
    }

    /// Reply envelope, as sent by the server
    pub fn reply(
        topic: impl Into<String>,
        reference: Ref,
        status: ReplyStatus,
        response: serde_json::Value,
    ) -> Self {
        Self::new(
            topic,
            Event::Reply,
            serde_json::json!({"status": status.as_str(), "response": response}),
        )
        .with_ref(reference)
    }

    /// Borrow the ref as a string, if any
    pub fn ref_str(&self) -> Option<&str> {
        self.reference.as_ref().map(Ref::as_str)
    }

    /// Interpret the payload as a `phx_reply` body
    ///
    /// Returns `None` unless this is a reply with a `status` field.
    pub fn as_reply(&self) -> Option<Reply> {
        if self.event != Event::Reply {
            return None;
        }
        Reply::from_payload(&self.payload)
    }
}

/// Accept string, number or null refs; empty strings mean no ref
fn deserialize_ref<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<Ref>, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) if !s.is_empty() => Some(Ref(s)),
        Some(serde_json::Value::Number(n)) => Some(Ref(n.to_string())),
        _ => None,
    })
}

/// Status field of a `phx_reply`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyStatus {
    /// `"ok"`
    Ok,
    /// `"error"`
    Error,
    /// Anything else the server sent
    Other(String),
}

impl ReplyStatus {
    /// The wire value
    pub fn as_str(&self) -> &str {
        match self {
            ReplyStatus::Ok => "ok",
            ReplyStatus::Error => "error",
            ReplyStatus::Other(s) => s,
        }
    }
}

impl From<&str> for ReplyStatus {
    fn from(s: &str) -> Self {
        match s {
            "ok" => ReplyStatus::Ok,
            "error" => ReplyStatus::Error,
            other => ReplyStatus::Other(other.to_string()),
        }
    }
}

/// Decoded `phx_reply` payload
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Reply status
    pub status: ReplyStatus,
    /// Response document, `Null` when the server sent none
    pub response: serde_json::Value,
}

impl Reply {
    /// Read `{status, response}` out of a payload
    pub fn from_payload(payload: &serde_json::Value) -> Option<Self> {
        let status = payload.get("status")?.as_str()?;
        Some(Self {
            status: ReplyStatus::from(status),
            response: payload
                .get("response")
                .cloned()
                .unwrap_or(serde_json::Value::Null),
        })
    }

    /// Whether the server reported success
    pub fn is_ok(&self) -> bool {
        self.status == ReplyStatus::Ok
    }

    /// Convert into the response on success or a server error otherwise
    pub fn into_result(self) -> Result<serde_json::Value> {
        match self.status {
            ReplyStatus::Ok => Ok(self.response),
            _ => Err(Error::Server(crate::error::ServerError::from_response(
                &self.response,
            ))),
        }
    }
}
