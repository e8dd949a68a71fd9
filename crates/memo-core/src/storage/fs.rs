//! Filesystem blob store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::traits::{BlobError, BlobStore, Metadata, Object, ObjectHead};

/// Directory (inside each bucket) holding metadata sidecars.
const META_DIR: &str = ".meta";

/// Blob store backed by a directory tree.
///
/// Layout: `<root>/<bucket>/<key>` holds the body and
/// `<root>/<bucket>/.meta/<key>.json` the metadata. Writes go through a
/// hidden temp file and a rename so readers never see a partial body.
///
/// Body and metadata are two files, so every operation on a key holds that
/// key's lock; a reader never pairs one write's body with another write's
/// metadata. The locks are per process: two stores on the same root do not
/// coordinate.
pub struct FsBlobStore {
    root: PathBuf,
    locks: StdMutex<HashMap<(String, String), Arc<Mutex<()>>>>,
}

/// Held while a key's body and metadata are read or replaced.
struct KeyGuard<'a> {
    store: &'a FsBlobStore,
    id: (String, String),
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        let lock = self.guard.take().map(|guard| OwnedMutexGuard::mutex(&guard).clone());
        let mut locks = self.store.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Map entry plus our clone: nobody else is waiting on this key
        if let Some(lock) = lock {
            if Arc::strong_count(&lock) == 2 {
                locks.remove(&self.id);
            }
        }
    }
}

impl FsBlobStore {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            locks: StdMutex::new(HashMap::new()),
        }
    }

    async fn lock_key(&self, bucket: &str, key: &str) -> KeyGuard<'_> {
        let id = (bucket.to_string(), key.to_string());
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(id.clone()).or_default().clone()
        };
        let guard = lock.lock_owned().await;
        KeyGuard {
            store: self,
            id,
            guard: Some(guard),
        }
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf, BlobError> {
        validate_segment(bucket, bucket)?;
        Ok(self.root.join(bucket))
    }

    /// Resolve body and metadata paths for a key.
    ///
    /// The raw key is checked segment by segment: empty, `.`, `..` and
    /// hidden segments are rejected rather than normalised, so every stored
    /// object has exactly one key.
    fn object_paths(&self, bucket: &str, key: &str) -> Result<(PathBuf, PathBuf), BlobError> {
        let bucket_dir = self.bucket_dir(bucket)?;

        if key.is_empty() {
            return Err(BlobError::InvalidKey {
                key: key.to_string(),
                reason: "key must name an object".to_string(),
            });
        }
        for segment in key.split('/') {
            validate_segment(key, segment)?;
        }

        let body = bucket_dir.join(key);
        let meta = bucket_dir.join(META_DIR).join(format!("{key}.json"));
        Ok((body, meta))
    }

    async fn read_metadata(key: &str, meta_path: &Path) -> Result<Metadata, BlobError> {
        match fs::read(meta_path).await {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|e| BlobError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Metadata::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn head_at(key: &str, body_path: &Path, meta_path: &Path) -> Result<ObjectHead, BlobError> {
        let stat = fs::metadata(body_path).await.map_err(|e| not_found_or(e, key))?;
        if !stat.is_file() {
            return Err(BlobError::NoSuchKey {
                key: key.to_string(),
            });
        }

        let last_modified: DateTime<Utc> = stat.modified()?.into();
        let metadata = Self::read_metadata(key, meta_path).await?;

        Ok(ObjectHead {
            size: stat.len(),
            last_modified,
            metadata,
        })
    }

    /// Atomic write using a hidden temp file + rename.
    async fn atomic_write(path: &Path, content: &[u8]) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_path = path.with_file_name(format!(
            ".{}.{}.tmp",
            file_name,
            uuid::Uuid::new_v4().simple()
        ));

        if let Err(e) = fs::write(&temp_path, content).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }

        if let Err(e) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }

        Ok(())
    }

    /// Collect object keys below `base`, skipping hidden entries.
    async fn walk_keys(base: &Path) -> Result<Vec<String>, BlobError> {
        let mut keys = Vec::new();
        let mut pending = vec![base.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                if entry.file_name().to_string_lossy().starts_with('.') {
                    continue;
                }

                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    if let Ok(relative) = path.strip_prefix(base) {
                        let key = relative
                            .components()
                            .map(|c| c.as_os_str().to_string_lossy())
                            .collect::<Vec<_>>()
                            .join("/");
                        keys.push(key);
                    }
                }
            }
        }

        Ok(keys)
    }
}

fn validate_segment(key: &str, segment: &str) -> Result<(), BlobError> {
    if segment.is_empty() || segment.starts_with('.') || segment.contains('\\') {
        return Err(BlobError::InvalidKey {
            key: key.to_string(),
            reason: format!("unsupported path segment '{segment}'"),
        });
    }
    Ok(())
}

fn not_found_or(e: std::io::Error, key: &str) -> BlobError {
    if e.kind() == std::io::ErrorKind::NotFound {
        BlobError::NoSuchKey {
            key: key.to_string(),
        }
    } else {
        BlobError::Io(e)
    }
}

#[async_trait::async_trait]
impl BlobStore for FsBlobStore {
    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectHead, BlobError> {
        let (body_path, meta_path) = self.object_paths(bucket, key)?;
        let _guard = self.lock_key(bucket, key).await;
        Self::head_at(key, &body_path, &meta_path).await
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Object, BlobError> {
        let (body_path, meta_path) = self.object_paths(bucket, key)?;
        let _guard = self.lock_key(bucket, key).await;
        let body = fs::read(&body_path).await.map_err(|e| not_found_or(e, key))?;
        let head = Self::head_at(key, &body_path, &meta_path).await?;
        Ok(Object { body, head })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        metadata: Metadata,
    ) -> Result<(), BlobError> {
        let (body_path, meta_path) = self.object_paths(bucket, key)?;

        let raw_meta = serde_json::to_vec(&metadata).map_err(|e| BlobError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        let _guard = self.lock_key(bucket, key).await;
        Self::atomic_write(&meta_path, &raw_meta).await?;
        Self::atomic_write(&body_path, &body).await?;

        tracing::debug!("Stored {}/{} ({} bytes)", bucket, key, body.len());
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), BlobError> {
        let (body_path, meta_path) = self.object_paths(bucket, key)?;
        let _guard = self.lock_key(bucket, key).await;

        for path in [&body_path, &meta_path] {
            match fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, BlobError> {
        let bucket_dir = self.bucket_dir(bucket)?;

        let mut keys = Self::walk_keys(&bucket_dir).await?;

        keys.retain(|key| key.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }
}
