//! Business operations over a [`PhxClient`]
//!
//! [`HubClient`] turns user, profile, auth, channel and direct-message
//! operations into `message` envelopes, sends them through the client's
//! correlated request path and maps the reply into typed results.
//!
//! Two payload families are in use on the server side:
//!
//! - database operations, `{"database_operation": {operation, schema, ...}}`.
//!   The whole payload travels as a JSON string, and so do its `data`,
//!   `conditions` and `on` sub-documents.
//! - handler messages, `{"type": "auth", "payload": {"action": ...}}`, sent
//!   as nested objects
//!
//! Replies come back in several shapes (`phx_reply` with a `response`, a
//! bare `{status, data}` document, `{type, payload}`), possibly with nested
//! documents encoded as strings. [`HubClient`] peels those layers and turns
//! every error form into [`Error::Server`].
//!
//! # Examples
//!
//! ```rust,no_run
//! use phxlink_client::{HubClient, NewUser, PhxClient};
//!
//! # async fn example() -> phxlink_core::Result<()> {
//! let client = PhxClient::builder("ws://localhost:4000/socket/websocket")
//!     .auth_token("secret")
//!     .connect()
//!     .await?;
//! let hub = HubClient::new(client);
//!
//! let user = hub.create_user(&NewUser::new("ana", "ana@example.com", "s3cret")).await?;
//! let channel = hub.create_channel("general", serde_json::json!({})).await?;
//! hub.publish(&channel.name, "hello", serde_json::json!({})).await?;
//! # let _ = user;
//! # Ok(())
//! # }
//! ```

use crate::client::PhxClient;
use phxlink_core::{codec, Envelope, Error, Event, Ref, Result, ServerError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Keys whose value is the actual result of a reply document
const WRAPPER_KEYS: [&str; 3] = ["response", "data", "payload"];

/// Sent with `logout` so the server can record the session's client
const USER_AGENT: &str = concat!("phxlink/", env!("CARGO_PKG_VERSION"));

/// Keys that may sit next to a wrapper key without carrying the result
const ENVELOPE_KEYS: [&str; 6] = ["status", "type", "request_id", "timestamp", "success", "message"];

/// A user account as returned by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    /// Fields this client does not model
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Fields for [`HubClient::create_user`]
#[derive(Debug, Clone, Serialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    pub is_active: bool,
}

impl NewUser {
    pub fn new(username: impl Into<String>, email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            password: password.into(),
            is_active: true,
        }
    }
}

/// A user profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, deserialize_with = "optional_string_or_number")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Fields for [`HubClient::create_profile`]
#[derive(Debug, Clone, Serialize)]
pub struct NewProfile {
    pub user_id: String,
    pub display_name: String,
    pub bio: String,
    pub avatar_url: String,
}

/// How users and profiles are combined by [`HubClient::join_users_profiles`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
}

impl JoinType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinType::Inner => "inner",
            JoinType::Left => "left",
            JoinType::Right => "right",
        }
    }
}

/// Tokens handed out by a successful login
#[derive(Clone, PartialEq, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(deserialize_with = "string_or_number")]
    pub user_id: String,
    pub username: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("user_id", &self.user_id)
            .field("username", &self.username)
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

/// Result of [`HubClient::refresh_tokens`]
#[derive(Clone, PartialEq, Deserialize)]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

impl std::fmt::Debug for AuthTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthTokens")
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

/// Acknowledgement of a password reset request
///
/// Development servers return the reset token directly.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PasswordReset {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<Value>,
}

/// A pub/sub channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    #[serde(default, alias = "channel_id", deserialize_with = "optional_string_or_number")]
    pub id: Option<String>,
    #[serde(alias = "channel_name")]
    pub name: String,
    #[serde(default)]
    pub metadata: Value,
}

/// Server acknowledgement of a published or sent message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageReceipt {
    #[serde(deserialize_with = "string_or_number")]
    pub message_id: String,
    #[serde(default)]
    pub timestamp: Option<Value>,
}

/// One message of a direct conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectMessage {
    #[serde(alias = "message_id", deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, deserialize_with = "optional_string_or_number")]
    pub sender_id: Option<String>,
    #[serde(default, deserialize_with = "optional_string_or_number")]
    pub recipient_id: Option<String>,
    pub content: String,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub metadata: Value,
}

/// Typed business operations on top of a connected [`PhxClient`]
#[derive(Clone)]
pub struct HubClient {
    client: PhxClient,
    timeout: Option<Duration>,
}

impl HubClient {
    pub fn new(client: PhxClient) -> Self {
        Self { client, timeout: None }
    }

    /// Override the client's request timeout for hub operations
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn client(&self) -> &PhxClient {
        &self.client
    }

    pub async fn create_user(&self, user: &NewUser) -> Result<User> {
        let data = serde_json::to_value(user)?;
        let value = self.database("create", "user", None, Some(("data", data))).await?;
        decode(value)
    }

    pub async fn get_user(&self, id: &str) -> Result<User> {
        let value = self.database("read", "user", Some(id), None).await?;
        decode(value)
    }

    /// Apply `changes` to a user and return the updated record
    pub async fn update_user<P: Serialize + ?Sized>(&self, id: &str, changes: &P) -> Result<User> {
        let data = serde_json::to_value(changes)?;
        let value = self.database("update", "user", Some(id), Some(("data", data))).await?;
        decode(value)
    }

    pub async fn delete_user(&self, id: &str) -> Result<()> {
        self.database("delete", "user", Some(id), None).await?;
        Ok(())
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        let value = self.database("list", "user", None, None).await?;
        decode(list_field(value, "users"))
    }

    /// Users matching every field of `conditions`
    pub async fn find_users<P: Serialize + ?Sized>(&self, conditions: &P) -> Result<Vec<User>> {
        let conditions = serde_json::to_value(conditions)?;
        let value = self
            .database("find", "user", None, Some(("conditions", conditions)))
            .await?;
        decode(list_field(value, "users"))
    }

    /// Change a user's password through the user handler
    pub async fn change_password(&self, username: &str, new_password: &str) -> Result<()> {
        self.handler_expecting(
            "user",
            json!({"action": "change_password", "username": username, "password": new_password}),
            "user.change_password.success",
        )
        .await?;
        Ok(())
    }

    pub async fn create_profile(&self, profile: &NewProfile) -> Result<Profile> {
        let data = serde_json::to_value(profile)?;
        let value = self.database("create", "profile", None, Some(("data", data))).await?;
        decode(value)
    }

    pub async fn update_profile<P: Serialize + ?Sized>(&self, id: &str, changes: &P) -> Result<()> {
        let data = serde_json::to_value(changes)?;
        self.database("update", "profile", Some(id), Some(("data", data))).await?;
        Ok(())
    }

    /// Rows of users joined with their profiles on `user.id = profile.user_id`
    ///
    /// `conditions` filters the joined rows; an empty object or null sends
    /// no filter.
    pub async fn join_users_profiles<P: Serialize + ?Sized>(
        &self,
        join_type: JoinType,
        conditions: &P,
    ) -> Result<Vec<Value>> {
        let conditions = serde_json::to_value(conditions)?;
        self.ensure_ready()?;
        let reference = self.client.next_ref();

        let mut op = operation_header("join", &reference);
        op.insert("join_type".to_string(), Value::String(join_type.as_str().to_string()));
        op.insert("schemas".to_string(), json!(["user", "profile"]));
        op.insert("on".to_string(), json!({"user.id": "profile.user_id"}));
        if !is_empty_document(&conditions) {
            op.insert("conditions".to_string(), conditions);
        }

        let value = self.send_database(reference, op).await?;
        decode(list_field(value, "rows"))
    }

    pub async fn inner_join_users_profiles<P: Serialize + ?Sized>(&self, conditions: &P) -> Result<Vec<Value>> {
        self.join_users_profiles(JoinType::Inner, conditions).await
    }

    pub async fn left_join_users_profiles<P: Serialize + ?Sized>(&self, conditions: &P) -> Result<Vec<Value>> {
        self.join_users_profiles(JoinType::Left, conditions).await
    }

    pub async fn right_join_users_profiles<P: Serialize + ?Sized>(&self, conditions: &P) -> Result<Vec<Value>> {
        self.join_users_profiles(JoinType::Right, conditions).await
    }

    #[tracing::instrument(skip(self, password))]
    pub async fn login(&self, username: &str, password: &str, remember_me: bool) -> Result<AuthSession> {
        let value = self
            .handler_expecting(
                "auth",
                json!({
                    "action": "login",
                    "username": username,
                    "password": password,
                    "remember_me": remember_me,
                }),
                "auth.login.success",
            )
            .await?;
        decode(value)
    }

    pub async fn logout(&self, session: &AuthSession) -> Result<()> {
        self.handler_expecting(
            "auth",
            json!({
                "action": "logout",
                "access_token": session.access_token,
                "refresh_token": session.refresh_token,
                "user_agent": USER_AGENT,
            }),
            "auth.logout.success",
        )
        .await?;
        Ok(())
    }

    /// Trade a refresh token for a new token pair
    pub async fn refresh_tokens(&self, refresh_token: &str) -> Result<AuthTokens> {
        let value = self
            .handler_expecting(
                "auth",
                json!({"action": "refresh", "refresh_token": refresh_token}),
                "auth.refresh.success",
            )
            .await?;
        decode(value)
    }

    pub async fn request_password_reset(&self, email: &str) -> Result<PasswordReset> {
        let value = self
            .handler_expecting(
                "auth",
                json!({"action": "request_password_reset", "email": email}),
                "auth.password_reset.requested",
            )
            .await?;
        decode(value)
    }

    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<()> {
        self.handler_expecting(
            "auth",
            json!({"action": "reset_password", "token": token, "password": new_password}),
            "auth.password_reset.success",
        )
        .await?;
        Ok(())
    }

    pub async fn create_channel(&self, name: &str, metadata: Value) -> Result<Channel> {
        let value = self
            .handler("channel", json!({"action": "create", "name": name, "metadata": metadata}))
            .await?;
        decode(value)
    }

    pub async fn subscribe_channel(&self, name: &str) -> Result<Channel> {
        let value = self
            .handler("channel", json!({"action": "subscribe", "name": name}))
            .await?;
        decode(with_default_name(value, name))
    }

    pub async fn get_channel(&self, channel_id: &str) -> Result<Channel> {
        let value = self
            .handler("channel", json!({"action": "get", "channel_id": channel_id}))
            .await?;
        decode(value)
    }

    pub async fn list_channels(&self) -> Result<Vec<Channel>> {
        let value = self.handler("channel", json!({"action": "list"})).await?;
        decode(list_field(value, "channels"))
    }

    /// Publish `content` on a channel
    pub async fn publish(&self, channel: &str, content: &str, metadata: Value) -> Result<MessageReceipt> {
        let value = self
            .handler(
                "channel",
                json!({
                    "action": "publish",
                    "channel_name": channel,
                    "content": content,
                    "metadata": metadata,
                }),
            )
            .await?;
        decode(value)
    }

    pub async fn send_direct_message(&self, recipient_id: &str, content: &str) -> Result<MessageReceipt> {
        let value = self
            .handler(
                "message",
                json!({
                    "action": "send",
                    "recipient_id": recipient_id,
                    "content": content,
                    "metadata": {"sent_at": now_millis()},
                }),
            )
            .await?;
        decode(value)
    }

    /// Conversation with `user_id`, newest page first as ordered by the server
    pub async fn message_history(&self, user_id: &str, limit: u32, offset: u32) -> Result<Vec<DirectMessage>> {
        let value = self
            .handler(
                "message",
                json!({"action": "history", "user_id": user_id, "limit": limit, "offset": offset}),
            )
            .await?;
        decode(list_field(value, "messages"))
    }

    pub async fn mark_read(&self, message_id: &str) -> Result<MessageReceipt> {
        let value = self
            .handler("message", json!({"action": "mark_read", "message_id": message_id}))
            .await?;
        decode(value)
    }

    async fn database(
        &self,
        operation: &str,
        schema: &str,
        id: Option<&str>,
        document: Option<(&str, Value)>,
    ) -> Result<Value> {
        self.ensure_ready()?;
        let reference = self.client.next_ref();

        let mut op = operation_header(operation, &reference);
        op.insert("schema".to_string(), Value::String(schema.to_string()));
        if let Some(id) = id {
            op.insert("id".to_string(), Value::String(id.to_string()));
        }
        if let Some((field, document)) = document {
            op.insert(field.to_string(), document);
        }

        self.send_database(reference, op).await
    }

    async fn send_database(&self, reference: Ref, op: Map<String, Value>) -> Result<Value> {
        let mut op = Value::Object(op);
        codec::stringify_fields(&mut op, &["data", "conditions", "on"])?;
        let payload = codec::stringify(&json!({ "database_operation": op }))?;
        self.call(reference, payload, None).await
    }

    async fn handler(&self, kind: &str, payload: Value) -> Result<Value> {
        self.ensure_ready()?;
        let reference = self.client.next_ref();
        self.call(reference, json!({"type": kind, "payload": payload}), None)
            .await
    }

    /// Like `handler`, but any reply `type` other than `success` is a failure
    async fn handler_expecting(&self, kind: &str, payload: Value, success: &str) -> Result<Value> {
        self.ensure_ready()?;
        let reference = self.client.next_ref();
        self.call(reference, json!({"type": kind, "payload": payload}), Some(success))
            .await
    }

    async fn call(&self, reference: Ref, payload: Value, success: Option<&str>) -> Result<Value> {
        let envelope = Envelope::new(self.client.config().topic.clone(), Event::Message, payload)
            .with_ref(reference);
        let reply = self.client.send_request(envelope, self.timeout).await?;
        interpret(reply, success)
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.client.is_ready() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }
}

/// Map a reply envelope to the value it carries
///
/// With `success` set, a reply document whose `type` is anything else is
/// reported as a server error.
fn interpret(reply: Envelope, success: Option<&str>) -> Result<Value> {
    let body = match reply.as_reply() {
        Some(reply) => reply.into_result()?,
        None => reply.payload,
    };

    let mut body = codec::unwrap_nested(body);
    loop {
        check_body(&body)?;
        if let (Some(expected), Some(kind)) = (success, body.get("type").and_then(Value::as_str)) {
            if kind != expected {
                return Err(rejected(&body));
            }
        }
        match peel(&mut body) {
            Some(inner) => body = inner,
            None => return Ok(body),
        }
    }
}

fn check_body(body: &Value) -> Result<()> {
    let status_error = body.get("status").and_then(Value::as_str) == Some("error");
    let type_error = body
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(|t| t.ends_with(".error"));

    if status_error || type_error {
        Err(Error::Server(ServerError::from_response(body)))
    } else {
        Ok(())
    }
}

fn rejected(body: &Value) -> Error {
    let source = match body.get("payload") {
        Some(payload) if payload.is_object() => payload,
        _ => body,
    };
    Error::Server(ServerError::from_response(source))
}

/// Take the result out of a wrapper document, if `body` is one
fn peel(body: &mut Value) -> Option<Value> {
    let object = body.as_object_mut()?;
    let key = WRAPPER_KEYS.into_iter().find(|key| object.contains_key(*key))?;
    if !object
        .keys()
        .all(|k| k == key || ENVELOPE_KEYS.contains(&k.as_str()))
    {
        return None;
    }
    object.remove(key)
}

fn operation_header(operation: &str, reference: &Ref) -> Map<String, Value> {
    let mut op = Map::new();
    op.insert("operation".to_string(), Value::String(operation.to_string()));
    op.insert("request_id".to_string(), Value::String(reference.as_str().to_string()));
    op.insert("timestamp".to_string(), Value::from(now_millis()));
    op
}

fn is_empty_document(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn list_field(value: Value, field: &str) -> Value {
    match value {
        Value::Object(mut map) if map.get(field).is_some_and(Value::is_array) => {
            map.remove(field).unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn with_default_name(value: Value, name: &str) -> Value {
    match value {
        Value::Object(mut map) => {
            if !map.contains_key("name") && !map.contains_key("channel_name") {
                map.insert("name".to_string(), Value::String(name.to_string()));
            }
            Value::Object(map)
        }
        _ => json!({ "name": name }),
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::UnexpectedReply(e.to_string()))
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("expected a string or number id, got {other}"))),
    }
}

fn optional_string_or_number<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(serde::de::Error::custom(format!("expected a string or number id, got {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{memory_transport, MemoryPeer};
    use phxlink_core::ReplyStatus;

    fn reply(status: ReplyStatus, response: Value) -> Envelope {
        Envelope::reply("websocket", Ref::new("7"), status, response)
    }

    async fn connected_hub() -> (HubClient, MemoryPeer) {
        let (connector, mut server) = memory_transport();
        let client = PhxClient::builder("memory://hub").connector(connector).build().unwrap();

        let accept = tokio::spawn(async move {
            let mut peer = server.accept().await.unwrap();
            let join = peer.recv_envelope().await.unwrap();
            peer.reply(&join, ReplyStatus::Ok, json!({})).unwrap();
            peer
        });

        client.connect().await.unwrap();
        (HubClient::new(client), accept.await.unwrap())
    }

    #[test]
    fn test_interpret_unwraps_response_layers() {
        let value = interpret(
            reply(ReplyStatus::Ok, json!({"status": "success", "data": {"id": 3, "username": "ana"}})),
            None,
        )
        .unwrap();
        assert_eq!(value, json!({"id": 3, "username": "ana"}));

        let value = interpret(
            reply(
                ReplyStatus::Ok,
                json!({"type": "user.get.response", "payload": "{\"id\":\"u1\",\"username\":\"bo\"}"}),
            ),
            None,
        )
        .unwrap();
        assert_eq!(value["username"], "bo");
    }

    #[test]
    fn test_interpret_keeps_records_with_data_fields() {
        let record = json!({"id": 1, "username": "ana", "data": {"theme": "dark"}});
        let value = interpret(reply(ReplyStatus::Ok, record.clone()), None).unwrap();
        assert_eq!(value, record);
    }

    #[test]
    fn test_interpret_error_forms() {
        let err = interpret(reply(ReplyStatus::Error, json!({"reason": "unauthorized"})), None).unwrap_err();
        assert!(matches!(err, Error::Server(ref e) if e.reason == "unauthorized"));

        let err = interpret(reply(ReplyStatus::Ok, json!({"status": "error", "error": "not found"})), None).unwrap_err();
        assert!(matches!(err, Error::Server(ref e) if e.reason == "not found"));

        let err = interpret(
            reply(
                ReplyStatus::Ok,
                json!({"response": {"type": "channel.error", "message": "already exists"}}),
            ),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Server(ref e) if e.reason == "already exists"));
    }

    #[test]
    fn test_interpret_expected_success_type() {
        let session = interpret(
            reply(
                ReplyStatus::Ok,
                json!({"type": "auth.login.success", "payload": {"access_token": "a", "user_id": 4}}),
            ),
            Some("auth.login.success"),
        )
        .unwrap();
        assert_eq!(session["access_token"], "a");

        let err = interpret(
            reply(
                ReplyStatus::Ok,
                json!({"type": "auth.login.failure", "payload": {"message": "invalid credentials"}}),
            ),
            Some("auth.login.success"),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Server(ref e) if e.reason == "invalid credentials"));
    }

    #[test]
    fn test_interpret_plain_push_reply() {
        let envelope = Envelope::new("websocket", "user.create.response", json!({"payload": {"id": 9}}))
            .with_ref("5");
        assert_eq!(interpret(envelope, None).unwrap(), json!({"id": 9}));
    }

    #[test]
    fn test_typed_results() {
        let user: User = decode(json!({"id": 42, "username": "ana", "role": "admin"})).unwrap();
        assert_eq!(user.id, "42");
        assert_eq!(user.extra["role"], "admin");
        assert_eq!(user.email, None);

        let channel: Channel = decode(json!({"channel_id": "c1", "channel_name": "general"})).unwrap();
        assert_eq!(channel.id.as_deref(), Some("c1"));
        assert_eq!(channel.name, "general");

        let messages: Vec<DirectMessage> = decode(list_field(
            json!({"messages": [{"message_id": 1, "sender_id": 2, "content": "hi"}]}),
            "messages",
        ))
        .unwrap();
        assert_eq!(messages[0].id, "1");
        assert_eq!(messages[0].sender_id.as_deref(), Some("2"));
        assert!(!messages[0].read);

        assert!(matches!(
            decode::<MessageReceipt>(json!({"content": "no id"})),
            Err(Error::UnexpectedReply(_))
        ));
    }

    #[tokio::test]
    async fn test_operations_require_ready() {
        let (connector, _server) = memory_transport();
        let client = PhxClient::builder("memory://hub").connector(connector).build().unwrap();
        let hub = HubClient::new(client);

        assert!(matches!(hub.get_user("1").await, Err(Error::NotConnected)));
        assert!(matches!(hub.list_channels().await, Err(Error::NotConnected)));
        assert!(matches!(
            hub.send_direct_message("2", "hi").await,
            Err(Error::NotConnected)
        ));
    }

    /// Read one raw frame and return it with its payload parsed out of the
    /// string it travels in
    async fn recv_database_frame(peer: &mut MemoryPeer) -> (Envelope, Value) {
        let text = peer.recv().await.unwrap();
        let raw: Value = serde_json::from_str(&text).unwrap();
        let payload = raw["payload"].as_str().expect("payload is a JSON string");
        let op: Value = serde_json::from_str(payload).unwrap();
        (codec::decode(&text).unwrap(), op["database_operation"].clone())
    }

    #[tokio::test]
    async fn test_create_user_sends_database_operation() {
        let (hub, mut peer) = connected_hub().await;

        let server = tokio::spawn(async move {
            let (request, op) = recv_database_frame(&mut peer).await;
            peer.reply(
                &request,
                ReplyStatus::Ok,
                json!({"status": "success", "data": "{\"id\":7,\"username\":\"ana\",\"email\":\"ana@example.com\"}"}),
            )
            .unwrap();
            (request, op, peer)
        });

        let user = hub
            .create_user(&NewUser::new("ana", "ana@example.com", "pw"))
            .await
            .unwrap();
        let (request, op, _peer) = server.await.unwrap();

        assert_eq!(user.id, "7");
        assert_eq!(user.email.as_deref(), Some("ana@example.com"));

        assert_eq!(request.event, Event::Message);
        assert_eq!(request.topic, "websocket");
        assert_eq!(op["operation"], "create");
        assert_eq!(op["schema"], "user");
        assert_eq!(op["request_id"].as_str(), request.ref_str());
        let data: Value = serde_json::from_str(op["data"].as_str().unwrap()).unwrap();
        assert_eq!(data["username"], "ana");
        assert_eq!(data["is_active"], true);
    }

    #[tokio::test]
    async fn test_find_users_stringifies_conditions() {
        let (hub, mut peer) = connected_hub().await;

        let server = tokio::spawn(async move {
            let request = peer.recv_envelope().await.unwrap();
            peer.reply(
                &request,
                ReplyStatus::Ok,
                json!({"users": [{"id": "1", "username": "ana"}, {"id": "2", "username": "bo"}]}),
            )
            .unwrap();
            (request, peer)
        });

        let users = hub.find_users(&json!({"is_active": true})).await.unwrap();
        let (request, _peer) = server.await.unwrap();

        assert_eq!(users.len(), 2);
        assert_eq!(users[1].username, "bo");
        // decoding unwraps the stringified payload
        let op = &request.payload["database_operation"];
        assert_eq!(op["operation"], "find");
        assert_eq!(op["conditions"], "{\"is_active\":true}");
    }

    #[tokio::test]
    async fn test_handler_payloads_stay_nested() {
        let (hub, mut peer) = connected_hub().await;

        let server = tokio::spawn(async move {
            let text = peer.recv().await.unwrap();
            let request = codec::decode(&text).unwrap();
            peer.reply(&request, ReplyStatus::Ok, json!({"channels": []})).unwrap();
            (text, peer)
        });

        let channels = hub.list_channels().await.unwrap();
        let (text, _peer) = server.await.unwrap();

        assert!(channels.is_empty());
        let raw: Value = serde_json::from_str(&text).unwrap();
        assert!(raw["payload"].is_object());
        assert_eq!(raw["payload"]["payload"]["action"], "list");
    }

    #[tokio::test]
    async fn test_join_users_profiles_stringifies_on_and_conditions() {
        let (hub, mut peer) = connected_hub().await;

        let server = tokio::spawn(async move {
            let (request, op) = recv_database_frame(&mut peer).await;
            peer.reply(
                &request,
                ReplyStatus::Ok,
                json!({"status": "success", "data": "[{\"username\":\"ana\",\"display_name\":\"Ana\"}]"}),
            )
            .unwrap();
            (op, peer)
        });

        let rows = hub
            .left_join_users_profiles(&json!({"user.is_active": true}))
            .await
            .unwrap();
        let (op, _peer) = server.await.unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["display_name"], "Ana");
        assert_eq!(op["operation"], "join");
        assert_eq!(op["join_type"], "left");
        assert_eq!(op["schemas"], json!(["user", "profile"]));
        assert_eq!(op["on"], "{\"user.id\":\"profile.user_id\"}");
        assert_eq!(op["conditions"], "{\"user.is_active\":true}");
        assert!(op.get("schema").is_none());
    }

    #[tokio::test]
    async fn test_join_without_conditions_omits_them() {
        let (hub, mut peer) = connected_hub().await;

        let server = tokio::spawn(async move {
            let (request, op) = recv_database_frame(&mut peer).await;
            peer.reply(&request, ReplyStatus::Ok, json!({"status": "success", "data": []}))
                .unwrap();
            (op, peer)
        });

        let rows = hub.inner_join_users_profiles(&json!({})).await.unwrap();
        let (op, _peer) = server.await.unwrap();

        assert!(rows.is_empty());
        assert_eq!(op["join_type"], "inner");
        assert!(op.get("conditions").is_none());
    }

    #[tokio::test]
    async fn test_profile_operations() {
        let (hub, mut peer) = connected_hub().await;

        let server = tokio::spawn(async move {
            let (create, create_op) = recv_database_frame(&mut peer).await;
            peer.reply(&create, ReplyStatus::Ok, json!({"status": "success", "data": {"id": 11}}))
                .unwrap();
            let (update, update_op) = recv_database_frame(&mut peer).await;
            peer.reply(&update, ReplyStatus::Ok, json!({"status": "success"})).unwrap();
            (create_op, update_op, peer)
        });

        let profile = hub
            .create_profile(&NewProfile {
                user_id: "7".into(),
                display_name: "Ana".into(),
                bio: "hello".into(),
                avatar_url: "https://example.com/a.png".into(),
            })
            .await
            .unwrap();
        hub.update_profile(&profile.id, &json!({"bio": "updated"})).await.unwrap();
        let (create_op, update_op, _peer) = server.await.unwrap();

        assert_eq!(profile.id, "11");
        assert_eq!(profile.display_name, None);
        assert_eq!(create_op["schema"], "profile");
        let data: Value = serde_json::from_str(create_op["data"].as_str().unwrap()).unwrap();
        assert_eq!(data["user_id"], "7");
        assert_eq!(update_op["operation"], "update");
        assert_eq!(update_op["id"], "11");
        assert_eq!(update_op["data"], "{\"bio\":\"updated\"}");
    }

    #[tokio::test]
    async fn test_auth_operations() {
        let (hub, mut peer) = connected_hub().await;

        let server = tokio::spawn(async move {
            let mut actions = Vec::new();
            for response in [
                json!({"type": "auth.login.success", "payload": {
                    "access_token": "at-1", "refresh_token": "rt-1",
                    "user_id": 7, "username": "ana", "expires_in": 3600,
                }}),
                json!({"type": "auth.refresh.success", "payload": {
                    "access_token": "at-2", "refresh_token": "rt-2",
                }}),
                json!({"type": "auth.logout.success", "payload": {}}),
            ] {
                let request = peer.recv_envelope().await.unwrap();
                actions.push(request.payload["payload"].clone());
                peer.reply(&request, ReplyStatus::Ok, response).unwrap();
            }
            (actions, peer)
        });

        let session = hub.login("ana", "pw", true).await.unwrap();
        let tokens = hub.refresh_tokens(&session.refresh_token).await.unwrap();
        hub.logout(&session).await.unwrap();
        let (actions, _peer) = server.await.unwrap();

        assert_eq!(session.user_id, "7");
        assert_eq!(session.expires_in, Some(3600));
        assert!(!format!("{session:?}").contains("at-1"));
        assert_eq!(tokens.access_token, "at-2");

        assert_eq!(actions[0]["action"], "login");
        assert_eq!(actions[0]["remember_me"], true);
        assert_eq!(actions[1]["action"], "refresh");
        assert_eq!(actions[1]["refresh_token"], "rt-1");
        assert_eq!(actions[2]["action"], "logout");
        assert_eq!(actions[2]["access_token"], "at-1");
    }

    #[tokio::test]
    async fn test_password_operations() {
        let (hub, mut peer) = connected_hub().await;

        let server = tokio::spawn(async move {
            let mut requests = Vec::new();
            for response in [
                json!({"type": "auth.password_reset.requested", "payload": {
                    "token": "reset-1", "expires_at": "2026-01-01T00:00:00Z",
                }}),
                json!({"type": "auth.password_reset.success", "payload": {"username": "ana"}}),
                json!({"type": "user.change_password.failure", "payload": {"message": "weak password"}}),
            ] {
                let request = peer.recv_envelope().await.unwrap();
                requests.push(request.payload.clone());
                peer.reply(&request, ReplyStatus::Ok, response).unwrap();
            }
            (requests, peer)
        });

        let reset = hub.request_password_reset("ana@example.com").await.unwrap();
        hub.reset_password(reset.token.as_deref().unwrap(), "new-pw").await.unwrap();
        let weak = hub.change_password("ana", "1").await;
        let (requests, _peer) = server.await.unwrap();

        assert_eq!(reset.token.as_deref(), Some("reset-1"));
        assert!(matches!(weak, Err(Error::Server(ref e)) if e.reason == "weak password"));

        assert_eq!(requests[0]["type"], "auth");
        assert_eq!(requests[0]["payload"]["action"], "request_password_reset");
        assert_eq!(requests[1]["payload"]["token"], "reset-1");
        assert_eq!(requests[2]["type"], "user");
        assert_eq!(requests[2]["payload"]["action"], "change_password");
    }

    #[tokio::test]
    async fn test_get_channel() {
        let (hub, mut peer) = connected_hub().await;

        let server = tokio::spawn(async move {
            let request = peer.recv_envelope().await.unwrap();
            peer.reply(
                &request,
                ReplyStatus::Ok,
                json!({"type": "channel.get.success", "payload": {"id": 3, "name": "general", "members": []}}),
            )
            .unwrap();
            (request, peer)
        });

        let channel = hub.get_channel("3").await.unwrap();
        let (request, _peer) = server.await.unwrap();

        assert_eq!(channel.id.as_deref(), Some("3"));
        assert_eq!(channel.name, "general");
        assert_eq!(request.payload["payload"]["action"], "get");
        assert_eq!(request.payload["payload"]["channel_id"], "3");
    }

    #[tokio::test]
    async fn test_publish_maps_server_error() {
        let (hub, mut peer) = connected_hub().await;

        let server = tokio::spawn(async move {
            let request = peer.recv_envelope().await.unwrap();
            peer.reply(&request, ReplyStatus::Error, json!({"reason": "not subscribed"}))
                .unwrap();
            (request, peer)
        });

        let result = hub.publish("general", "hello", json!({})).await;
        let (request, _peer) = server.await.unwrap();

        assert!(matches!(result, Err(Error::Server(ref e)) if e.reason == "not subscribed"));
        assert_eq!(request.payload["type"], "channel");
        assert_eq!(request.payload["payload"]["action"], "publish");
        assert_eq!(request.payload["payload"]["channel_name"], "general");
    }

    #[tokio::test]
    async fn test_subscribe_channel_fills_in_name() {
        let (hub, mut peer) = connected_hub().await;

        let server = tokio::spawn(async move {
            let request = peer.recv_envelope().await.unwrap();
            peer.reply(&request, ReplyStatus::Ok, json!({"status": "ok"})).unwrap();
            peer
        });

        let channel = hub.subscribe_channel("general").await.unwrap();
        let _peer = server.await.unwrap();
        assert_eq!(channel.name, "general");
        assert_eq!(channel.id, None);
    }
}
