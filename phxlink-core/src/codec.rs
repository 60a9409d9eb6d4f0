//! Envelope serialization and deserialization
//!
//! Frames are JSON text. [`encode`] and [`decode`] handle the plain Phoenix
//! format; [`Codec`] adds per-kind control over how the payload itself is
//! placed on the wire. A message kind is either the event name or the
//! top-level key of the payload object (`database_operation` for database
//! requests, say), so two kinds sharing the `message` event can still be
//! encoded differently.
//!
//! # Double Encoding
//!
//! Some servers expect the payload, or sub-documents inside it, to be a JSON
//! *string* holding a serialized document rather than a nested object:
//!
//! ```text
//! nested:      {"payload": {"data": {"name": "ada"}}}
//! stringified: {"payload": "{\"data\":\"{\\\"name\\\":\\\"ada\\\"}\"}"}
//! ```
//!
//! [`PayloadEncoding::Stringified`] selects the second form for a whole
//! payload, as does [`stringify`] for a single value. [`stringify_fields`] does the same for individual fields such as
//! `data` or `conditions`. Inbound, the codec is lenient: any payload that
//! arrives as a string containing a JSON object or array is unwrapped before
//! the envelope is handed out, and [`unwrap_nested`] does the same for
//! nested fields of a reply.
//!
//! # Examples
//!
//! ```rust
//! use phxlink_core::{codec, Envelope, Event};
//! use serde_json::json;
//!
//! let env = Envelope::new("websocket", Event::Message, json!({"a": 1})).with_ref("2");
//! let text = codec::encode(&env).unwrap();
//! let back = codec::decode(&text).unwrap();
//! assert_eq!(back, env);
//! ```

use crate::error::{Error, Result};
use crate::types::Envelope;
use serde_json::Value;
use std::collections::HashMap;

/// How a payload is placed inside the envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadEncoding {
    /// The payload is embedded as a JSON value
    #[default]
    Nested,
    /// The payload is serialized to a string first
    Stringified,
}

/// Envelope codec with per-kind payload encoding
///
/// Rules keyed on a payload's top-level key win over rules keyed on the
/// event name, which win over the default.
#[derive(Debug, Clone, Default)]
pub struct Codec {
    default: PayloadEncoding,
    overrides: HashMap<String, PayloadEncoding>,
    payload_keys: Vec<(String, PayloadEncoding)>,
}

impl Codec {
    /// Codec that nests every payload
    pub fn new() -> Self {
        Self::default()
    }

    /// Change the encoding used for events without an override
    pub fn with_default_encoding(mut self, encoding: PayloadEncoding) -> Self {
        self.default = encoding;
        self
    }

    /// Use `encoding` for envelopes whose event is `event`
    pub fn with_encoding(mut self, event: impl Into<String>, encoding: PayloadEncoding) -> Self {
        self.overrides.insert(event.into(), encoding);
        self
    }

    /// Use `encoding` for payloads whose object carries the top-level `key`
    pub fn with_payload_key_encoding(mut self, key: impl Into<String>, encoding: PayloadEncoding) -> Self {
        let key = key.into();
        self.payload_keys.retain(|(existing, _)| *existing != key);
        self.payload_keys.push((key, encoding));
        self
    }

    /// Encoding that applies to `event`, ignoring payload key rules
    pub fn encoding_for(&self, event: &str) -> PayloadEncoding {
        self.overrides.get(event).copied().unwrap_or(self.default)
    }

    /// Encoding that applies to `envelope`
    pub fn encoding_of(&self, envelope: &Envelope) -> PayloadEncoding {
        if let Some(object) = envelope.payload.as_object() {
            if let Some((_, encoding)) = self.payload_keys.iter().find(|(key, _)| object.contains_key(key)) {
                return *encoding;
            }
        }
        self.encoding_for(envelope.event.as_str())
    }

    /// Serialize an envelope to a text frame
    pub fn encode(&self, envelope: &Envelope) -> Result<String> {
        match self.encoding_of(envelope) {
            PayloadEncoding::Nested => encode(envelope),
            PayloadEncoding::Stringified => {
                if envelope.payload.is_string() {
                    return encode(envelope);
                }
                let mut stringified = envelope.clone();
                stringified.payload = stringify(&envelope.payload)?;
                encode(&stringified)
            }
        }
    }

    /// Parse a frame into an envelope
    ///
    /// Decoding does not depend on the configured encodings; stringified
    /// payloads are always accepted.
    pub fn decode(&self, frame: impl AsRef<[u8]>) -> Result<Envelope> {
        decode(frame)
    }
}

/// Serialize an envelope with a nested payload
pub fn encode(envelope: &Envelope) -> Result<String> {
    serde_json::to_string(envelope).map_err(|e| Error::Encoding(e.to_string()))
}

/// Parse a text or binary frame into an envelope
///
/// # Errors
///
/// Returns `Error::Decode` for invalid UTF-8, invalid JSON, frames that are
/// not objects, and objects missing a string `topic` or `event`.
pub fn decode(frame: impl AsRef<[u8]>) -> Result<Envelope> {
    let value: Value =
        serde_json::from_slice(frame.as_ref()).map_err(|e| Error::Decode(e.to_string()))?;

    if !value.is_object() {
        return Err(Error::Decode(format!(
            "expected a JSON object, found {}",
            json_kind(&value)
        )));
    }

    let mut envelope: Envelope =
        serde_json::from_value(value).map_err(|e| Error::Decode(e.to_string()))?;

    if let Value::String(text) = &envelope.payload {
        if let Some(inner) = parse_document(text) {
            envelope.payload = inner;
        }
    }

    Ok(envelope)
}

/// Serialize `value` into a JSON string value
pub fn stringify(value: &Value) -> Result<Value> {
    serde_json::to_string(value)
        .map(Value::String)
        .map_err(|e| Error::Encoding(e.to_string()))
}

/// Replace each named field of `value` with its serialized string form
///
/// Fields that are missing, null, or already strings are left alone.
pub fn stringify_fields(value: &mut Value, fields: &[&str]) -> Result<()> {
    let Some(object) = value.as_object_mut() else {
        return Ok(());
    };

    for field in fields {
        if let Some(slot) = object.get_mut(*field) {
            if slot.is_null() || slot.is_string() {
                continue;
            }
            *slot = stringify(slot)?;
        }
    }

    Ok(())
}

/// Recursively expand strings that hold JSON objects or arrays
///
/// Plain strings, including ones that happen to parse as numbers or
/// booleans, are kept as they are.
pub fn unwrap_nested(value: Value) -> Value {
    match value {
        Value::String(text) => match parse_document(&text) {
            Some(inner) => unwrap_nested(inner),
            None => Value::String(text),
        },
        Value::Array(items) => Value::Array(items.into_iter().map(unwrap_nested).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, field)| (key, unwrap_nested(field)))
                .collect(),
        ),
        other => other,
    }
}

fn parse_document(text: &str) -> Option<Value> {
    let trimmed = text.trim_start();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return None;
    }
    serde_json::from_str::<Value>(text)
        .ok()
        .filter(|v| v.is_object() || v.is_array())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
