//! Resource persistence: where composites and original images go when the
//! caller asks for `file` or `both` output.
//!
//! The pipeline only knows the [`ResourceStore`] trait and treats every error
//! from it as non-fatal. [`FileResourceStore`] is the bundled implementation:
//! files under one directory, an in-memory registry of what was written, and
//! a broadcast channel that tells subscribers about each new entry.
//!
//! Writes go to a hidden temp file first and are renamed into place, so a
//! reader never observes a half-written artifact.

use crate::error::FetchError;
use crate::output::StorageLocator;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

/// What a stored resource is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    /// The stacked JPEG.
    Composite,
    /// One accepted image, byte-for-byte as served.
    Original,
}

impl ResourceKind {
    fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Composite => "composite",
            ResourceKind::Original => "original",
        }
    }
}

/// A resource about to be saved.
#[derive(Debug, Clone)]
pub struct ResourceDraft<'a> {
    pub bytes: &'a [u8],
    pub mime_type: &'a str,
    pub source_url: &'a str,
    /// Reference index for originals; 0 for the composite.
    pub index: usize,
    pub kind: ResourceKind,
    /// Per-fetch UTC timestamp, shared by everything one fetch saves.
    pub batch: &'a str,
    pub metadata: serde_json::Value,
}

/// A saved resource as recorded in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceEntry {
    pub locator: StorageLocator,
    pub source_url: String,
    pub index: usize,
    pub kind: ResourceKind,
    pub created_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

/// Persistence collaborator.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn save(&self, draft: ResourceDraft<'_>) -> Result<StorageLocator, FetchError>;
}

/// Timestamp used to name one fetch's resources.
pub fn batch_stamp() -> String {
    Utc::now().format("%Y%m%dT%H%M%S%3fZ").to_string()
}

/// File extension for a MIME type (parameters ignored).
pub fn extension_for(mime_type: &str) -> &'static str {
    let essence = mime_type.split(';').next().unwrap_or("").trim();
    match essence.to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/avif" => "avif",
        "image/svg+xml" => "svg",
        "image/bmp" => "bmp",
        _ => "bin",
    }
}

// ── FileResourceStore ────────────────────────────────────────────────────

/// Directory-backed [`ResourceStore`].
#[derive(Debug)]
pub struct FileResourceStore {
    root: PathBuf,
    registry: RwLock<Vec<ResourceEntry>>,
    events: broadcast::Sender<ResourceEntry>,
    temp_seq: AtomicU64,
}

impl FileResourceStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, FetchError> {
        let root = root.as_ref();
        let persist_err = |source| FetchError::PersistenceFailed {
            path: root.to_path_buf(),
            source,
        };
        tokio::fs::create_dir_all(root).await.map_err(persist_err)?;
        let root = tokio::fs::canonicalize(root).await.map_err(persist_err)?;
        let (events, _) = broadcast::channel(64);
        info!("Resource store at {}", root.display());
        Ok(Self {
            root,
            registry: RwLock::new(Vec::new()),
            events,
            temp_seq: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Receive every entry saved after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ResourceEntry> {
        self.events.subscribe()
    }

    /// Snapshot of the registry in save order.
    pub async fn entries(&self) -> Vec<ResourceEntry> {
        self.registry.read().await.clone()
    }

    /// Look up an entry by its `file://` URI.
    pub async fn get(&self, uri: &str) -> Option<ResourceEntry> {
        self.registry
            .read()
            .await
            .iter()
            .find(|e| e.locator.uri == uri)
            .cloned()
    }

    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        let seq = self.temp_seq.fetch_add(1, Ordering::Relaxed);
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = path.with_file_name(format!(".{file_name}.{seq}.tmp"));

        let result = write_then_rename(&temp, path, bytes).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(&temp).await;
        }
        result
    }
}

async fn write_then_rename(temp: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(temp)
        .await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(temp, path).await
}

#[async_trait]
impl ResourceStore for FileResourceStore {
    async fn save(&self, draft: ResourceDraft<'_>) -> Result<StorageLocator, FetchError> {
        let name = format!(
            "{}-{}-{}.{}",
            draft.batch,
            draft.kind.as_str(),
            draft.index,
            extension_for(draft.mime_type)
        );
        let path = self.root.join(&name);

        self.write_atomic(&path, draft.bytes)
            .await
            .map_err(|source| FetchError::PersistenceFailed {
                path: path.clone(),
                source,
            })?;

        let uri = Url::from_file_path(&path)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| format!("file://{}", path.display()));
        let locator = StorageLocator {
            uri,
            path,
            name,
            mime_type: draft.mime_type.to_string(),
            size: draft.bytes.len(),
        };
        let entry = ResourceEntry {
            locator: locator.clone(),
            source_url: draft.source_url.to_string(),
            index: draft.index,
            kind: draft.kind,
            created_at: Utc::now(),
            metadata: draft.metadata,
        };

        self.registry.write().await.push(entry.clone());
        // No subscribers is fine.
        let _ = self.events.send(entry);
        debug!("Saved {} ({} bytes)", locator.uri, locator.size);
        Ok(locator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn draft<'a>(bytes: &'a [u8], kind: ResourceKind, index: usize) -> ResourceDraft<'a> {
        ResourceDraft {
            bytes,
            mime_type: "image/jpeg",
            source_url: "https://example.com/page",
            index,
            kind,
            batch: "20240102T030405006Z",
            metadata: json!({ "width": 1 }),
        }
    }

    #[tokio::test]
    async fn save_writes_file_and_registers_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileResourceStore::open(dir.path().join("res")).await.unwrap();
        let mut events = store.subscribe();

        let locator = store
            .save(draft(b"jpeg-bytes", ResourceKind::Composite, 0))
            .await
            .unwrap();

        assert_eq!(locator.name, "20240102T030405006Z-composite-0.jpg");
        assert!(locator.uri.starts_with("file://"));
        assert_eq!(std::fs::read(&locator.path).unwrap(), b"jpeg-bytes");
        assert_eq!(locator.size, 10);

        let entry = events.recv().await.unwrap();
        assert_eq!(entry.locator, locator);
        assert_eq!(entry.kind, ResourceKind::Composite);
        assert_eq!(entry.metadata["width"], 1);

        assert_eq!(store.entries().await.len(), 1);
        assert!(store.get(&locator.uri).await.is_some());
    }

    #[tokio::test]
    async fn no_temp_files_are_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileResourceStore::open(dir.path()).await.unwrap();
        store.save(draft(b"a", ResourceKind::Original, 1)).await.unwrap();
        store.save(draft(b"b", ResourceKind::Original, 2)).await.unwrap();

        let mut names: Vec<String> = std::fs::read_dir(store.root())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(
            names,
            [
                "20240102T030405006Z-original-1.jpg",
                "20240102T030405006Z-original-2.jpg"
            ]
        );
    }

    #[tokio::test]
    async fn unwritable_root_reports_persistence_failure() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("gone");
        let store = FileResourceStore::open(&root).await.unwrap();
        std::fs::remove_dir(&root).unwrap();
        std::fs::write(&root, b"now a file").unwrap();

        let err = store
            .save(draft(b"x", ResourceKind::Composite, 0))
            .await
            .unwrap_err();
        assert_eq!(err.reason_code(), "persistence-failed");
        assert!(store.entries().await.is_empty());
    }

    #[test]
    fn extensions() {
        assert_eq!(extension_for("image/png"), "png");
        assert_eq!(extension_for("IMAGE/JPEG; charset=binary"), "jpg");
        assert_eq!(extension_for(""), "bin");
    }

    #[test]
    fn batch_stamp_is_sortable_utc() {
        let stamp = batch_stamp();
        assert_eq!(stamp.len(), "20240102T030405006Z".len());
        assert!(stamp.ends_with('Z'));
    }
}
