//! Error types returned by the action handler.

use thiserror::Error;

use crate::storage::BlobError;
use crate::token::TokenError;

#[derive(Debug, Error)]
pub enum MemoError {
    /// Missing, invalid or expired session token, or a wrong sign-in password.
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Missing action handler")]
    UnknownAction { action: String },

    #[error("Invalid payload for action '{action}': {reason}")]
    InvalidPayload { action: String, reason: String },

    #[error("Missing required field: `{field}`")]
    MissingField { field: &'static str },

    #[error("Missing required field '{field}' in blob store call")]
    MissingParam { field: &'static str },

    #[error("Missing properties to set")]
    EmptyConfigUpdate,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Blob(#[from] BlobError),

    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("Compression error: {0}")]
    Compression(#[source] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MemoError {
    /// HTTP-style status code for errors that carry one.
    pub fn code(&self) -> Option<u16> {
        match self {
            MemoError::Unauthorized => Some(401),
            _ => None,
        }
    }

    /// True for errors raised by input checks before any side effect.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            MemoError::UnknownAction { .. }
                | MemoError::InvalidPayload { .. }
                | MemoError::MissingField { .. }
                | MemoError::MissingParam { .. }
                | MemoError::EmptyConfigUpdate
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, MemoError::Blob(BlobError::NoSuchKey { .. }))
    }
}

pub type Result<T> = std::result::Result<T, MemoError>;

/// Fail with the name of the first blob store parameter that is empty.
pub(crate) fn validate_params(params: &[(&'static str, &str)]) -> Result<()> {
    for &(field, value) in params {
        if value.is_empty() {
            return Err(MemoError::MissingParam { field });
        }
    }
    Ok(())
}
