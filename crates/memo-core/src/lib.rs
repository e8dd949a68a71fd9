//! Core of the memo-vault backend.
//!
//! Provides:
//! - Stateless session tokens (`token`)
//! - The action router and its auth gate (`router`)
//! - Note storage on top of a blob store (`files`, `storage`)
//! - Client app settings (`app_config`)
//! - Environment-driven server configuration (`config`)

pub mod app_config;
pub mod compression;
pub mod config;
pub mod error;
pub mod files;
pub mod model;
pub mod router;
pub mod storage;
pub mod token;

pub use config::ServerConfig;
pub use error::{MemoError, Result};
pub use model::{ConfigField, Note};
pub use router::{Action, ActionKind, Clock, Headers, Invocation, Payload, Router, SystemClock};
pub use storage::{BlobError, BlobStore, FsBlobStore, MemoryBlobStore};

/// Current time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}
