//! Note operations on top of a blob store.
//!
//! Notes live at `<key_prefix>/<id>`. The body holds the note content
//! (zlib-deflated when compression is enabled) and the object metadata holds
//! the percent-encoded `title` plus a `compressed` flag, so listing only needs
//! HEAD requests.

use std::sync::LazyLock;

use futures::future::try_join_all;
use regex::{Captures, Regex};
use serde::Deserialize;

use crate::compression::{compress, decompress};
use crate::config::ServerConfig;
use crate::error::{validate_params, MemoError, Result};
use crate::model::Note;
use crate::storage::{BlobStore, Metadata, ObjectHead};

/// Number of HEAD requests issued concurrently while listing.
pub const LIST_BATCH_SIZE: usize = 5;

const TITLE_META: &str = "title";
const COMPRESSED_META: &str = "compressed";

static TEMPLATE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$([A-Z0-9-]+)\$").expect("valid template regex"));

/// Input for `createFile`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CreateFile {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

/// Input for `updateFile`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UpdateFile {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

/// Input for `deleteFile` and `getContent`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FileRef {
    #[serde(default)]
    pub id: Option<String>,
}

/// Expand `$NAME$` tokens in an id template.
///
/// `$TIMESTAMP$` becomes the current time in milliseconds and `$UNIQUE$` a
/// random collision-resistant token. Unknown tokens expand to nothing.
pub fn generate_id(template: &str, now_ms: u64) -> String {
    TEMPLATE_TOKEN
        .replace_all(template, |caps: &Captures| match &caps[1] {
            "TIMESTAMP" => now_ms.to_string(),
            "UNIQUE" => uuid::Uuid::new_v4().simple().to_string(),
            _ => String::new(),
        })
        .into_owned()
}

fn required_id(id: Option<String>) -> Result<String> {
    id.filter(|id| !id.is_empty())
        .ok_or(MemoError::MissingField { field: "id" })
}

fn decode_title(metadata: &Metadata) -> String {
    let raw = metadata.get(TITLE_META).map(String::as_str).unwrap_or("");
    urlencoding::decode(raw)
        .map(|title| title.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

/// The `compressed` flag counts as set when it parses to a non-zero number.
fn is_compressed(metadata: &Metadata) -> bool {
    metadata
        .get(COMPRESSED_META)
        .and_then(|flag| flag.trim().parse::<f64>().ok())
        .is_some_and(|flag| flag != 0.0)
}

/// Note operations for one invocation.
pub struct FileStore<'a> {
    store: &'a dyn BlobStore,
    config: &'a ServerConfig,
}

impl<'a> FileStore<'a> {
    pub fn new(store: &'a dyn BlobStore, config: &'a ServerConfig) -> Self {
        Self { store, config }
    }

    pub fn id_to_key(&self, id: &str) -> String {
        format!("{}/{}", self.config.key_prefix, id)
    }

    pub fn key_to_id(&self, key: &str) -> String {
        let prefix = format!("{}/", self.config.key_prefix);
        key.strip_prefix(&prefix).unwrap_or(key).to_string()
    }

    fn note_from_head(&self, key: &str, head: ObjectHead) -> Note {
        Note {
            id: self.key_to_id(key),
            title: decode_title(&head.metadata),
            size: head.size,
            last_modified: head.last_modified,
            content: None,
        }
    }

    async fn head_note(&self, key: &str) -> Result<Note> {
        validate_params(&[("Bucket", self.config.bucket.as_str()), ("Key", key)])?;
        let head = self.store.head_object(&self.config.bucket, key).await?;
        Ok(self.note_from_head(key, head))
    }

    async fn read_note(&self, key: &str) -> Result<Note> {
        validate_params(&[("Bucket", self.config.bucket.as_str()), ("Key", key)])?;
        let object = self.store.get_object(&self.config.bucket, key).await?;

        let content = if is_compressed(&object.head.metadata) {
            decompress(&object.body).map_err(MemoError::Compression)?
        } else {
            String::from_utf8_lossy(&object.body).into_owned()
        };

        let mut note = self.note_from_head(key, object.head);
        note.content = Some(content);
        Ok(note)
    }

    /// List every note, most recently modified first.
    ///
    /// The listing carries no metadata, so each key is HEADed. HEADs run
    /// concurrently within a batch of [`LIST_BATCH_SIZE`]; batches run one
    /// after another.
    pub async fn list(&self) -> Result<Vec<Note>> {
        let prefix = format!("{}/", self.config.key_prefix);
        validate_params(&[("Bucket", self.config.bucket.as_str()), ("Prefix", prefix.as_str())])?;

        let keys = self.store.list_objects(&self.config.bucket, &prefix).await?;
        tracing::debug!("Listing {} notes under {}", keys.len(), prefix);

        let mut notes = Vec::with_capacity(keys.len());
        for batch in keys.chunks(LIST_BATCH_SIZE) {
            let heads = try_join_all(batch.iter().map(|key| self.head_note(key))).await?;
            notes.extend(heads);
        }

        notes.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        Ok(notes)
    }

    /// Write a note and return its stored record (without content).
    pub async fn create(&self, request: CreateFile) -> Result<Note> {
        let id = match request.id {
            Some(id) => id,
            None => generate_id(&self.config.name_template, crate::now_ms()),
        };
        if id.is_empty() {
            return Err(MemoError::MissingField { field: "id" });
        }

        let title = request
            .title
            .filter(|title| !title.is_empty())
            .unwrap_or_else(|| self.config.default_title.clone());
        let content = request.content.unwrap_or_default();

        let body = if self.config.use_compression {
            compress(&content).map_err(MemoError::Compression)?
        } else {
            content.into_bytes()
        };

        let mut metadata = Metadata::new();
        metadata.insert(TITLE_META.to_string(), urlencoding::encode(&title).into_owned());
        metadata.insert(
            COMPRESSED_META.to_string(),
            if self.config.use_compression { "1" } else { "0" }.to_string(),
        );

        let key = self.id_to_key(&id);
        validate_params(&[("Bucket", self.config.bucket.as_str()), ("Key", key.as_str())])?;
        self.store
            .put_object(&self.config.bucket, &key, body, metadata)
            .await?;
        tracing::debug!("Wrote note {}", id);

        self.head_note(&key).await
    }

    /// Overwrite a note, then read back what was persisted.
    ///
    /// Without a title the stored title is kept; a note that does not exist
    /// yet gets the default title. Content is not carried over: an update
    /// without `content` stores an empty body.
    pub async fn update(&self, request: UpdateFile) -> Result<Note> {
        let id = required_id(request.id)?;

        let title = match request.title {
            Some(title) => Some(title),
            None => match self.head_note(&self.id_to_key(&id)).await {
                Ok(existing) => Some(existing.title),
                Err(e) if e.is_not_found() => None,
                Err(e) => return Err(e),
            },
        };

        let created = self
            .create(CreateFile {
                id: Some(id),
                title,
                content: request.content,
            })
            .await?;

        self.read_note(&self.id_to_key(&created.id)).await
    }

    /// Read a note including its content.
    pub async fn get_content(&self, request: FileRef) -> Result<Note> {
        let id = required_id(request.id)?;
        self.read_note(&self.id_to_key(&id)).await
    }

    /// Delete a note and return the record as it was before deletion.
    ///
    /// Fails when the note does not exist.
    pub async fn delete(&self, request: FileRef) -> Result<Note> {
        let id = required_id(request.id)?;
        let key = self.id_to_key(&id);

        let note = self.head_note(&key).await?;

        validate_params(&[("Bucket", self.config.bucket.as_str()), ("Key", key.as_str())])?;
        self.store.delete_object(&self.config.bucket, &key).await?;
        tracing::debug!("Deleted note {}", id);

        Ok(note)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{BlobError, MemoryBlobStore};
    use chrono::DateTime;

    fn test_config() -> ServerConfig {
        ServerConfig {
            bucket: "memos".to_string(),
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_generate_id_substitutes_tokens() {
        let id = generate_id("note-$TIMESTAMP$", 1234);
        assert_eq!(id, "note-1234");

        let unique = generate_id("$UNIQUE$", 0);
        assert_eq!(unique.len(), 32);
        assert_ne!(unique, generate_id("$UNIQUE$", 0));

        assert_eq!(generate_id("a$NOPE$b", 0), "ab");
        assert_eq!(generate_id("plain", 0), "plain");
    }

    #[test]
    fn test_key_mapping_round_trip() {
        let store = MemoryBlobStore::new();
        let config = test_config();
        let files = FileStore::new(&store, &config);

        for id in ["abc", "2024-01-01", "with space", "data", "nested/id"] {
            let key = files.id_to_key(id);
            assert_eq!(key, format!("data/{id}"));
            assert_eq!(files.key_to_id(&key), id);
        }
    }

    #[test]
    fn test_compressed_flag_parsing() {
        let flag = |value: &str| {
            let mut metadata = Metadata::new();
            metadata.insert(COMPRESSED_META.to_string(), value.to_string());
            is_compressed(&metadata)
        };
        assert!(flag("1"));
        assert!(flag("2"));
        assert!(!flag("0"));
        assert!(!flag(""));
        assert!(!flag("yes"));
        assert!(!is_compressed(&Metadata::new()));
    }

    #[tokio::test]
    async fn test_create_defaults() {
        let store = MemoryBlobStore::new();
        let config = test_config();
        let files = FileStore::new(&store, &config);

        let note = files.create(CreateFile::default()).await.unwrap();
        assert_eq!(note.title, "New entry");
        assert_eq!(note.size, 0);
        assert!(note.content.is_none());
        assert!(!note.id.is_empty());

        let head = store
            .head_object("memos", &files.id_to_key(&note.id))
            .await
            .unwrap();
        assert_eq!(head.metadata.get("compressed").map(String::as_str), Some("0"));
        assert_eq!(head.metadata.get("title").map(String::as_str), Some("New%20entry"));
    }

    #[tokio::test]
    async fn test_create_with_empty_id_fails() {
        let store = MemoryBlobStore::new();
        let config = test_config();
        let files = FileStore::new(&store, &config);

        let result = files
            .create(CreateFile {
                id: Some(String::new()),
                ..CreateFile::default()
            })
            .await;
        assert!(matches!(result, Err(MemoError::MissingField { field: "id" })));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_title_encoding_round_trip() {
        let store = MemoryBlobStore::new();
        let config = test_config();
        let files = FileStore::new(&store, &config);

        let title = "Groceries & chores / ünïcode ✓";
        let note = files
            .create(CreateFile {
                id: Some("t".to_string()),
                title: Some(title.to_string()),
                content: Some("x".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(note.title, title);

        let head = store.head_object("memos", "data/t").await.unwrap();
        assert!(head.metadata["title"].is_ascii());
    }

    #[tokio::test]
    async fn test_compressed_storage_round_trip() {
        let store = MemoryBlobStore::new();
        let config = ServerConfig {
            use_compression: true,
            ..test_config()
        };
        let files = FileStore::new(&store, &config);

        let content = "{\"ops\":[{\"insert\":\"hello\\n\"}]}".repeat(50);
        files
            .create(CreateFile {
                id: Some("z".to_string()),
                title: None,
                content: Some(content.clone()),
            })
            .await
            .unwrap();

        let raw = store.get_object("memos", "data/z").await.unwrap();
        assert_eq!(raw.head.metadata["compressed"], "1");
        assert_ne!(raw.body, content.as_bytes());

        let note = files
            .get_content(FileRef {
                id: Some("z".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(note.content.as_deref(), Some(content.as_str()));
    }

    #[tokio::test]
    async fn test_uncompressed_note_readable_after_enabling_compression() {
        let store = MemoryBlobStore::new();
        let plain = test_config();
        FileStore::new(&store, &plain)
            .create(CreateFile {
                id: Some("old".to_string()),
                title: None,
                content: Some("plain body".to_string()),
            })
            .await
            .unwrap();

        let compressed = ServerConfig {
            use_compression: true,
            ..test_config()
        };
        let note = FileStore::new(&store, &compressed)
            .get_content(FileRef {
                id: Some("old".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(note.content.as_deref(), Some("plain body"));
    }

    #[tokio::test]
    async fn test_update_keeps_title_when_omitted() {
        let store = MemoryBlobStore::new();
        let config = test_config();
        let files = FileStore::new(&store, &config);

        let created = files
            .create(CreateFile {
                id: None,
                title: Some("Shopping".to_string()),
                content: None,
            })
            .await
            .unwrap();

        let updated = files
            .update(UpdateFile {
                id: Some(created.id.clone()),
                title: None,
                content: Some("milk".to_string()),
            })
            .await
            .unwrap();

        assert_eq!(updated.id, created.id);
        assert_eq!(updated.title, "Shopping");
        assert_eq!(updated.content.as_deref(), Some("milk"));
        assert_eq!(updated.size, 4);
        assert!(updated.last_modified > created.last_modified);
    }

    #[tokio::test]
    async fn test_title_only_update_clears_content() {
        let store = MemoryBlobStore::new();
        let config = test_config();
        let files = FileStore::new(&store, &config);

        files
            .create(CreateFile {
                id: Some("draft".to_string()),
                title: Some("Draft".to_string()),
                content: Some("keep me?".to_string()),
            })
            .await
            .unwrap();

        let updated = files
            .update(UpdateFile {
                id: Some("draft".to_string()),
                title: Some("Renamed".to_string()),
                content: None,
            })
            .await
            .unwrap();

        assert_eq!(updated.title, "Renamed");
        assert_eq!(updated.content.as_deref(), Some(""));
        assert_eq!(updated.size, 0);
    }

    #[tokio::test]
    async fn test_update_requires_id() {
        let store = MemoryBlobStore::new();
        let config = test_config();
        let files = FileStore::new(&store, &config);

        let result = files.update(UpdateFile::default()).await;
        assert!(matches!(result, Err(MemoError::MissingField { field: "id" })));
    }

    #[tokio::test]
    async fn test_update_of_missing_note_creates_it() {
        let store = MemoryBlobStore::new();
        let config = test_config();
        let files = FileStore::new(&store, &config);

        let note = files
            .update(UpdateFile {
                id: Some("fresh".to_string()),
                title: None,
                content: Some("body".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(note.title, "New entry");
        assert_eq!(note.content.as_deref(), Some("body"));
    }

    #[tokio::test]
    async fn test_delete_returns_previous_record() {
        let store = MemoryBlobStore::new();
        let config = test_config();
        let files = FileStore::new(&store, &config);

        let created = files
            .create(CreateFile {
                id: Some("gone".to_string()),
                title: Some("Bye".to_string()),
                content: Some("abc".to_string()),
            })
            .await
            .unwrap();

        let deleted = files
            .delete(FileRef {
                id: Some("gone".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(deleted, created);

        let again = files
            .get_content(FileRef {
                id: Some("gone".to_string()),
            })
            .await;
        assert!(matches!(
            again,
            Err(MemoError::Blob(BlobError::NoSuchKey { .. }))
        ));
    }

    #[tokio::test]
    async fn test_delete_missing_note_fails() {
        let store = MemoryBlobStore::new();
        let config = test_config();
        let files = FileStore::new(&store, &config);

        let result = files
            .delete(FileRef {
                id: Some("never-existed".to_string()),
            })
            .await;
        assert!(result.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_list_sorted_by_last_modified_desc() {
        let store = MemoryBlobStore::new();
        let config = test_config();
        let files = FileStore::new(&store, &config);

        for (id, seconds) in [("a", 5), ("b", 1), ("c", 9), ("d", 3)] {
            files
                .create(CreateFile {
                    id: Some(id.to_string()),
                    title: Some(id.to_uppercase()),
                    content: None,
                })
                .await
                .unwrap();
            store
                .set_last_modified(
                    "memos",
                    &files.id_to_key(id),
                    DateTime::from_timestamp(seconds, 0).unwrap(),
                )
                .await
                .unwrap();
        }

        let notes = files.list().await.unwrap();
        let stamps: Vec<i64> = notes.iter().map(|n| n.last_modified.timestamp()).collect();
        assert_eq!(stamps, vec![9, 5, 3, 1]);

        let ids: Vec<&str> = notes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "d", "b"]);
        assert!(notes.iter().all(|n| n.content.is_none()));
    }

    #[tokio::test]
    async fn test_list_spans_multiple_batches_and_skips_config() {
        let store = MemoryBlobStore::new();
        let config = test_config();
        let files = FileStore::new(&store, &config);

        // Equal timestamps: the stable sort keeps ascending key order
        let at = DateTime::from_timestamp(100, 0).unwrap();
        for index in 0..13 {
            let id = format!("n{index:02}");
            files
                .create(CreateFile {
                    id: Some(id.clone()),
                    ..CreateFile::default()
                })
                .await
                .unwrap();
            store
                .set_last_modified("memos", &files.id_to_key(&id), at)
                .await
                .unwrap();
        }
        store
            .put_object("memos", "config.json", b"{}".to_vec(), Metadata::new())
            .await
            .unwrap();

        let notes = files.list().await.unwrap();
        let ids: Vec<String> = notes.into_iter().map(|n| n.id).collect();
        let expected: Vec<String> = (0..13).map(|i| format!("n{i:02}")).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_missing_bucket_fails_before_dispatch() {
        let store = MemoryBlobStore::new();
        let config = ServerConfig::default();
        let files = FileStore::new(&store, &config);

        let result = files.list().await;
        assert!(matches!(
            result,
            Err(MemoError::MissingParam { field: "Bucket" })
        ));

        let result = files.create(CreateFile::default()).await;
        assert!(matches!(
            result,
            Err(MemoError::MissingParam { field: "Bucket" })
        ));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_empty_key_prefix_still_lists() {
        let store = MemoryBlobStore::new();
        let config = ServerConfig {
            key_prefix: String::new(),
            ..test_config()
        };
        let files = FileStore::new(&store, &config);

        // "/" is still a non-empty prefix; listing dispatches normally
        assert!(files.list().await.unwrap().is_empty());
    }
}
