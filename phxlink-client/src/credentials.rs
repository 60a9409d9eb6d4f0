//! Credentials sent with the join handshake

use serde_json::{Map, Value};

/// Supplies the authentication part of the join payload
///
/// The token is read on every connect, so an implementation can rotate it
/// between reconnects.
pub trait Credentials: Send + Sync {
    /// Token to send as `auth_token`, if any
    fn auth_token(&self) -> Option<String>;

    /// Fields contributed to the join payload
    fn join_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        if let Some(token) = self.auth_token() {
            fields.insert("auth_token".to_string(), Value::String(token));
        }
        fields
    }
}

/// A fixed bearer token
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticToken(***)")
    }
}

impl Credentials for StaticToken {
    fn auth_token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Join without authentication
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCredentials;

impl Credentials for NoCredentials {
    fn auth_token(&self) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_token_fields() {
        let fields = StaticToken::new("s3cret").join_fields();
        assert_eq!(fields.get("auth_token"), Some(&Value::String("s3cret".into())));
    }

    #[test]
    fn test_no_credentials_fields() {
        assert!(NoCredentials.join_fields().is_empty());
    }

    #[test]
    fn test_debug_hides_token() {
        let rendered = format!("{:?}", StaticToken::new("s3cret"));
        assert!(!rendered.contains("s3cret"));
    }
}
