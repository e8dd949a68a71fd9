//! Action routing with the session token gate.
//!
//! An invocation names an action and carries its data plus request headers.
//! Every action except `signIn` requires a live session token in
//! `headers.token`; the gate runs before the action's data is even decoded,
//! so an unauthenticated call never reaches the blob store.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::app_config::AppConfigStore;
use crate::config::ServerConfig;
use crate::error::{MemoError, Result};
use crate::files::{CreateFile, FileRef, FileStore, UpdateFile};
use crate::model::ConfigField;
use crate::storage::BlobStore;
use crate::token::{self, KeyMaterial, TokenClaims, TokenError};

/// Request headers relevant to the handler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Headers {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Everything else the caller sent, kept for audit logging
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Headers {
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            extra: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub action: String,
    #[serde(default)]
    pub data: Value,
}

/// A single call into the handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub payload: Payload,
    #[serde(default)]
    pub headers: Headers,
}

impl Invocation {
    pub fn new(action: impl Into<String>, data: Value, headers: Headers) -> Self {
        Self {
            payload: Payload {
                action: action.into(),
                data,
            },
            headers,
        }
    }
}

/// Names of the supported actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    SignIn,
    GetConfig,
    SetConfig,
    ListFiles,
    CreateFile,
    DeleteFile,
    UpdateFile,
    GetContent,
}

impl ActionKind {
    pub const ALL: [ActionKind; 8] = [
        ActionKind::SignIn,
        ActionKind::GetConfig,
        ActionKind::SetConfig,
        ActionKind::ListFiles,
        ActionKind::CreateFile,
        ActionKind::DeleteFile,
        ActionKind::UpdateFile,
        ActionKind::GetContent,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::SignIn => "signIn",
            ActionKind::GetConfig => "getConfig",
            ActionKind::SetConfig => "setConfig",
            ActionKind::ListFiles => "listFiles",
            ActionKind::CreateFile => "createFile",
            ActionKind::DeleteFile => "deleteFile",
            ActionKind::UpdateFile => "updateFile",
            ActionKind::GetContent => "getContent",
        }
    }

    /// Whether the action needs a live session token.
    pub fn requires_auth(self) -> bool {
        match self {
            ActionKind::SignIn => false,
            ActionKind::GetConfig
            | ActionKind::SetConfig
            | ActionKind::ListFiles
            | ActionKind::CreateFile
            | ActionKind::DeleteFile
            | ActionKind::UpdateFile
            | ActionKind::GetContent => true,
        }
    }
}

impl FromStr for ActionKind {
    type Err = MemoError;

    fn from_str(name: &str) -> Result<Self> {
        ActionKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == name)
            .ok_or_else(|| MemoError::UnknownAction {
                action: name.to_string(),
            })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SignIn {
    #[serde(default)]
    pub passwd: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SetConfig {
    #[serde(default)]
    pub fields: Vec<ConfigField>,
}

/// An action with its decoded data.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    SignIn(SignIn),
    GetConfig,
    SetConfig(SetConfig),
    ListFiles,
    CreateFile(CreateFile),
    DeleteFile(FileRef),
    UpdateFile(UpdateFile),
    GetContent(FileRef),
}

impl Action {
    /// Decode `data` for `kind`. `null` data counts as an empty object.
    pub fn decode(kind: ActionKind, data: Value) -> Result<Self> {
        let data = match data {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };

        Ok(match kind {
            ActionKind::SignIn => Action::SignIn(decode_data(kind, data)?),
            ActionKind::GetConfig => Action::GetConfig,
            ActionKind::SetConfig => Action::SetConfig(decode_data(kind, data)?),
            ActionKind::ListFiles => Action::ListFiles,
            ActionKind::CreateFile => Action::CreateFile(decode_data(kind, data)?),
            ActionKind::DeleteFile => Action::DeleteFile(decode_data(kind, data)?),
            ActionKind::UpdateFile => Action::UpdateFile(decode_data(kind, data)?),
            ActionKind::GetContent => Action::GetContent(decode_data(kind, data)?),
        })
    }
}

fn decode_data<T: DeserializeOwned>(kind: ActionKind, data: Value) -> Result<T> {
    serde_json::from_value(data).map_err(|e| MemoError::InvalidPayload {
        action: kind.as_str().to_string(),
        reason: e.to_string(),
    })
}

/// Source of the current time in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        crate::now_ms()
    }
}

/// Entry point for invocations.
///
/// Holds no per-request state: the server config is passed into every call.
#[derive(Clone)]
pub struct Router {
    store: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
}

impl Router {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Run one invocation and return its JSON result.
    ///
    /// Errors are logged and returned unchanged. Auth failures are logged at
    /// error level with the full request context for auditing.
    pub async fn handle(&self, config: &ServerConfig, invocation: Invocation) -> Result<Value> {
        let Invocation { payload, headers } = invocation;
        let action = payload.action;
        tracing::debug!("Handle action '{}'", action);

        let audit_data = payload.data.clone();
        let result = self.dispatch(config, &action, payload.data, &headers).await;

        if let Err(error) = &result {
            match error {
                MemoError::Unauthorized => {
                    tracing::error!(
                        action = %action,
                        headers = %serde_json::to_string(&headers).unwrap_or_default(),
                        data = %audit_data,
                        "Unauthorized access"
                    );
                }
                other => {
                    tracing::warn!(action = %action, error = %other, "Action failed");
                }
            }
        }

        result
    }

    async fn dispatch(
        &self,
        config: &ServerConfig,
        name: &str,
        data: Value,
        headers: &Headers,
    ) -> Result<Value> {
        let kind: ActionKind = name.parse()?;
        if kind.requires_auth() {
            self.authorize(config, headers)?;
        }

        let store = self.store.as_ref();
        let files = FileStore::new(store, config);
        let app_config = AppConfigStore::new(store, config);

        match Action::decode(kind, data)? {
            Action::SignIn(request) => Ok(Value::String(self.sign_in(config, request)?)),
            Action::GetConfig => Ok(serde_json::to_value(app_config.get().await)?),
            Action::SetConfig(request) => {
                Ok(serde_json::to_value(app_config.set(request.fields).await?)?)
            }
            Action::ListFiles => Ok(serde_json::to_value(files.list().await?)?),
            Action::CreateFile(request) => Ok(serde_json::to_value(files.create(request).await?)?),
            Action::DeleteFile(request) => Ok(serde_json::to_value(files.delete(request).await?)?),
            Action::UpdateFile(request) => Ok(serde_json::to_value(files.update(request).await?)?),
            Action::GetContent(request) => {
                Ok(serde_json::to_value(files.get_content(request).await?)?)
            }
        }
    }

    /// Check the session token; every failure collapses into `Unauthorized`.
    fn authorize(&self, config: &ServerConfig, headers: &Headers) -> Result<()> {
        let Some(token) = headers.token.as_deref().filter(|t| !t.is_empty()) else {
            tracing::debug!("No session token present");
            return Err(MemoError::Unauthorized);
        };

        let material = KeyMaterial::derive(&config.passwd, &config.salt).map_err(|e| {
            tracing::debug!("Cannot derive token key: {}", e);
            MemoError::Unauthorized
        })?;

        let claims: TokenClaims = token::verify(token, &material).map_err(|e| {
            tracing::debug!("Session token rejected: {}", e);
            MemoError::Unauthorized
        })?;

        if !claims.is_live(self.clock.now_ms()) {
            tracing::debug!("Session token expired at {}", claims.expires_at());
            return Err(MemoError::Unauthorized);
        }

        Ok(())
    }

    fn sign_in(&self, config: &ServerConfig, request: SignIn) -> Result<String> {
        if config.passwd.is_empty() {
            tracing::warn!("Sign-in attempted but no password is configured");
            return Err(MemoError::Unauthorized);
        }

        let passwd = request.passwd.ok_or(MemoError::Unauthorized)?;
        if passwd != config.passwd {
            return Err(MemoError::Unauthorized);
        }

        let material = KeyMaterial::derive(&config.passwd, &config.salt).map_err(|e| match e {
            TokenError::EmptySalt => {
                MemoError::Config("SALT must be set to issue session tokens".to_string())
            }
            other => MemoError::Token(other),
        })?;

        let claims = TokenClaims::issue(&passwd, self.clock.now_ms());
        Ok(token::sign(&claims, &material)?)
    }
}
