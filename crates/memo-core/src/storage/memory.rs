//! In-memory blob store.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use super::traits::{BlobError, BlobStore, Metadata, Object, ObjectHead};

#[derive(Debug, Clone)]
struct StoredObject {
    body: Vec<u8>,
    metadata: Metadata,
    last_modified: DateTime<Utc>,
}

impl StoredObject {
    fn head(&self) -> ObjectHead {
        ObjectHead {
            size: self.body.len() as u64,
            last_modified: self.last_modified,
            metadata: self.metadata.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct Buckets {
    objects: BTreeMap<(String, String), StoredObject>,
    last_write: Option<DateTime<Utc>>,
}

/// Blob store that keeps every object in process memory.
///
/// Modification times never repeat: each write is stamped at least one
/// millisecond after the previous one, so ordering by `last_modified`
/// follows write order.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    inner: RwLock<Buckets>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the modification time of an existing object.
    pub async fn set_last_modified(
        &self,
        bucket: &str,
        key: &str,
        at: DateTime<Utc>,
    ) -> Result<(), BlobError> {
        let mut inner = self.inner.write().await;
        let object = inner
            .objects
            .get_mut(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| BlobError::NoSuchKey {
                key: key.to_string(),
            })?;
        object.last_modified = at;
        Ok(())
    }

    /// Number of stored objects across all buckets.
    pub async fn len(&self) -> usize {
        self.inner.read().await.objects.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait::async_trait]
impl BlobStore for MemoryBlobStore {
    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectHead, BlobError> {
        let inner = self.inner.read().await;
        inner
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(StoredObject::head)
            .ok_or_else(|| BlobError::NoSuchKey {
                key: key.to_string(),
            })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Object, BlobError> {
        let inner = self.inner.read().await;
        inner
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|object| Object {
                body: object.body.clone(),
                head: object.head(),
            })
            .ok_or_else(|| BlobError::NoSuchKey {
                key: key.to_string(),
            })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        metadata: Metadata,
    ) -> Result<(), BlobError> {
        let mut inner = self.inner.write().await;

        let now = Utc::now();
        let stamp = match inner.last_write {
            Some(last) if now <= last => last + Duration::milliseconds(1),
            _ => now,
        };
        inner.last_write = Some(stamp);

        inner.objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                body,
                metadata,
                last_modified: stamp,
            },
        );
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), BlobError> {
        let mut inner = self.inner.write().await;
        inner.objects.remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, BlobError> {
        let inner = self.inner.read().await;
        Ok(inner
            .objects
            .keys()
            .filter(|(b, k)| b == bucket && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect())
    }
}
