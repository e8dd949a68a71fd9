//! Typed async client for the memo-vault HTTP API.
//!
//! The client remembers the session token issued by `sign_in` and sends it
//! with every later call. When the server answers `Unauthorized` the token is
//! dropped, so the caller knows to sign in again.

use memo_core::{ConfigField, Note};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::RwLock;

/// Header the server reads the session token from.
pub const TOKEN_HEADER: &str = "token";

const UNAUTHORIZED_MESSAGE: &str = "Unauthorized";

#[derive(Debug, Error)]
pub enum ClientError {
    /// Session token missing, invalid or expired, or wrong password
    #[error("Unauthorized")]
    Unauthorized,

    /// The server reported an error
    #[error("Server error: {0}")]
    Server(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ClientError {
    pub fn code(&self) -> Option<u16> {
        match self {
            ClientError::Unauthorized => Some(401),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Fields for creating or updating a note.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NoteInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Unwrap a `{data}` / `{errors}` response envelope.
///
/// An error whose message is `Unauthorized` becomes
/// [`ClientError::Unauthorized`]; other errors report the first message.
/// A body without either key is returned as is.
pub fn parse_envelope(body: Value) -> Result<Value> {
    if let Some(errors) = body.get("errors").and_then(Value::as_array) {
        let messages: Vec<&str> = errors
            .iter()
            .filter_map(|error| error.get("message").and_then(Value::as_str))
            .collect();

        if messages.contains(&UNAUTHORIZED_MESSAGE) {
            return Err(ClientError::Unauthorized);
        }
        let message = messages.first().copied().unwrap_or("Internal");
        return Err(ClientError::Server(message.to_string()));
    }

    match body {
        Value::Object(mut map) if map.contains_key("data") => {
            Ok(map.remove("data").unwrap_or(Value::Null))
        }
        other => Ok(other),
    }
}

pub struct MemoClient {
    http: reqwest::Client,
    endpoint: String,
    token: RwLock<Option<String>>,
}

impl MemoClient {
    /// Create a client for a server base URL such as `http://localhost:3002`.
    pub fn new(base_url: impl AsRef<str>) -> Self {
        Self::with_http_client(reqwest::Client::new(), base_url)
    }

    pub fn with_http_client(http: reqwest::Client, base_url: impl AsRef<str>) -> Self {
        Self {
            http,
            endpoint: format!("{}/api", base_url.as_ref().trim_end_matches('/')),
            token: RwLock::new(None),
        }
    }

    pub async fn token(&self) -> Option<String> {
        self.token.read().await.clone()
    }

    /// Restore a token from an earlier session.
    pub async fn set_token(&self, token: Option<String>) {
        *self.token.write().await = token;
    }

    pub async fn is_signed_in(&self) -> bool {
        self.token.read().await.is_some()
    }

    async fn call<T: DeserializeOwned>(&self, action: &str, data: Value) -> Result<T> {
        let mut request = self
            .http
            .post(&self.endpoint)
            .json(&json!({ "action": action, "data": data }));
        if let Some(token) = self.token.read().await.as_deref() {
            request = request.header(TOKEN_HEADER, token);
        }

        let body: Value = request.send().await?.json().await?;

        match parse_envelope(body) {
            Ok(data) => Ok(serde_json::from_value(data)?),
            Err(ClientError::Unauthorized) => {
                tracing::debug!("'{}' rejected as unauthorized, dropping session token", action);
                self.set_token(None).await;
                Err(ClientError::Unauthorized)
            }
            Err(e) => Err(e),
        }
    }

    /// Exchange the password for a session token and keep it.
    pub async fn sign_in(&self, passwd: &str) -> Result<()> {
        let token: String = self.call("signIn", json!({ "passwd": passwd })).await?;
        self.set_token(Some(token)).await;
        Ok(())
    }

    pub async fn sign_out(&self) {
        self.set_token(None).await;
    }

    pub async fn list_files(&self) -> Result<Vec<Note>> {
        self.call("listFiles", json!({})).await
    }

    pub async fn create_file(&self, input: NoteInput) -> Result<Note> {
        self.call("createFile", serde_json::to_value(input)?).await
    }

    pub async fn update_file(&self, id: &str, title: Option<&str>, content: Option<&str>) -> Result<Note> {
        let input = NoteInput {
            id: Some(id.to_string()),
            title: title.map(str::to_string),
            content: content.map(str::to_string),
        };
        self.call("updateFile", serde_json::to_value(input)?).await
    }

    pub async fn delete_file(&self, id: &str) -> Result<Note> {
        self.call("deleteFile", json!({ "id": id })).await
    }

    pub async fn get_content(&self, id: &str) -> Result<Note> {
        self.call("getContent", json!({ "id": id })).await
    }

    pub async fn get_config(&self) -> Result<Vec<ConfigField>> {
        self.call("getConfig", json!({})).await
    }

    pub async fn set_config(&self, fields: Vec<ConfigField>) -> Result<Vec<ConfigField>> {
        self.call("setConfig", json!({ "fields": fields })).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_envelope() {
        let data = parse_envelope(json!({"data": [1, 2]})).unwrap();
        assert_eq!(data, json!([1, 2]));

        let data = parse_envelope(json!({"data": null})).unwrap();
        assert_eq!(data, Value::Null);
    }

    #[test]
    fn test_unauthorized_envelope() {
        let err = parse_envelope(json!({"errors": [{"message": "Unauthorized"}]})).unwrap_err();
        assert!(matches!(err, ClientError::Unauthorized));
        assert_eq!(err.code(), Some(401));
    }

    #[test]
    fn test_other_error_envelope() {
        let err = parse_envelope(json!({
            "errors": [{"message": "Missing action handler"}, {"message": "second"}]
        }))
        .unwrap_err();
        assert!(matches!(err, ClientError::Server(ref m) if m == "Missing action handler"));

        let err = parse_envelope(json!({"errors": []})).unwrap_err();
        assert!(matches!(err, ClientError::Server(ref m) if m == "Internal"));
    }

    #[test]
    fn test_bare_body_passes_through() {
        assert_eq!(parse_envelope(json!("ok")).unwrap(), json!("ok"));
    }

    #[test]
    fn test_endpoint_normalisation() {
        let client = MemoClient::new("http://localhost:3002/");
        assert_eq!(client.endpoint, "http://localhost:3002/api");
    }

    #[test]
    fn test_note_input_skips_absent_fields() {
        let input = NoteInput {
            title: Some("T".to_string()),
            ..NoteInput::default()
        };
        assert_eq!(serde_json::to_value(input).unwrap(), json!({"title": "T"}));
    }

    #[tokio::test]
    async fn test_token_storage() {
        let client = MemoClient::new("http://localhost:3002");
        assert!(!client.is_signed_in().await);

        client.set_token(Some("abc".to_string())).await;
        assert_eq!(client.token().await.as_deref(), Some("abc"));

        client.sign_out().await;
        assert!(client.token().await.is_none());
    }
}
