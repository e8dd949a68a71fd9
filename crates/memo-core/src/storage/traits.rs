//! Blob store trait definition and error types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// User metadata attached to an object. Values are plain strings.
pub type Metadata = BTreeMap<String, String>;

/// Errors reported by a blob store backend.
#[derive(Debug, Error)]
pub enum BlobError {
    /// The requested object does not exist
    #[error("The specified key does not exist: {key}")]
    NoSuchKey { key: String },

    /// Key cannot be stored by this backend
    #[error("Invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    /// Stored object or metadata could not be decoded
    #[error("Corrupt object {key}: {reason}")]
    Corrupt { key: String, reason: String },

    /// I/O error in the backend
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of a HEAD request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHead {
    /// Body length in bytes
    pub size: u64,
    /// Time of the last write
    pub last_modified: DateTime<Utc>,
    pub metadata: Metadata,
}

/// Result of a GET request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
    pub body: Vec<u8>,
    pub head: ObjectHead,
}

/// Abstract object storage with per-object string metadata.
///
/// Mirrors the subset of the S3 API the note store needs. Implementations
/// overwrite on put (last write wins) and bump `last_modified` on every write.
///
/// Current implementations: `MemoryBlobStore`, `FsBlobStore`
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch size, modification time and metadata without the body.
    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectHead, BlobError>;

    /// Fetch body and metadata.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Object, BlobError>;

    /// Create or overwrite an object.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        metadata: Metadata,
    ) -> Result<(), BlobError>;

    /// Remove an object.
    ///
    /// Removing a missing object is not an error, as with S3.
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), BlobError>;

    /// List keys starting with `prefix`, in ascending key order.
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, BlobError>;
}
