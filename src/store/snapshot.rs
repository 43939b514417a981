use std::path::{Path, PathBuf};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::app::{PortalError, Result};
use crate::domain::ContentItem;
use crate::store::cache::{uncategorized_count, CORRUPTION_THRESHOLD};

pub const SNAPSHOT_FILE: &str = "content_index.json";

/// Message type for the snapshot writer
#[derive(Debug)]
pub enum SnapshotMessage {
    /// Write these items, optionally reporting the outcome
    Save {
        items: Vec<ContentItem>,
        reply: Option<oneshot::Sender<Result<()>>>,
    },
    /// Stop the writer
    Shutdown,
}

/// Handle to the single task allowed to write the snapshot file
#[derive(Debug, Clone)]
pub struct SnapshotHandle {
    tx: mpsc::Sender<SnapshotMessage>,
    path: PathBuf,
}

impl SnapshotHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue a write without waiting for it.
    pub async fn queue(&self, items: Vec<ContentItem>) {
        if let Err(e) = self.tx.send(SnapshotMessage::Save { items, reply: None }).await {
            warn!("Failed to queue snapshot: {}", e);
        }
    }

    /// Queue a write and wait until it is on disk.
    pub async fn save(&self, items: Vec<ContentItem>) -> Result<()> {
        let (reply, done) = oneshot::channel();
        self.tx
            .send(SnapshotMessage::Save {
                items,
                reply: Some(reply),
            })
            .await
            .map_err(|_| PortalError::Other("snapshot writer stopped".to_string()))?;
        done.await
            .map_err(|_| PortalError::Other("snapshot writer dropped the request".to_string()))?
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(SnapshotMessage::Shutdown).await;
    }
}

/// Background writer that serializes all snapshot writes
pub struct SnapshotWriter {
    path: PathBuf,
    rx: mpsc::Receiver<SnapshotMessage>,
}

impl SnapshotWriter {
    pub fn new(path: PathBuf) -> (Self, SnapshotHandle) {
        let (tx, rx) = mpsc::channel(16);
        let handle = SnapshotHandle {
            tx,
            path: path.clone(),
        };
        (Self { path, rx }, handle)
    }

    /// Create a writer and run it on its own task.
    pub fn spawn(path: PathBuf) -> SnapshotHandle {
        let (writer, handle) = Self::new(path);
        tokio::spawn(writer.run());
        handle
    }

    pub async fn run(mut self) {
        debug!(path = %self.path.display(), "Snapshot writer started");

        while let Some(msg) = self.rx.recv().await {
            match msg {
                SnapshotMessage::Save { items, reply } => {
                    let count = items.len();
                    let result = write_snapshot(&self.path, &items).await;
                    match &result {
                        Ok(()) => info!(count, path = %self.path.display(), "Saved snapshot"),
                        Err(e) => warn!("Snapshot save failed: {}", e),
                    }
                    if let Some(reply) = reply {
                        let _ = reply.send(result);
                    }
                }
                SnapshotMessage::Shutdown => {
                    debug!("Snapshot writer shutting down");
                    break;
                }
            }
        }
    }
}

/// Writes the items as a JSON array, creating parent directories. The file
/// is replaced atomically via a temporary sibling.
pub async fn write_snapshot(path: &Path, items: &[ContentItem]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let body = serde_json::to_vec(items)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[derive(Debug)]
pub enum SnapshotLoad {
    Missing,
    Loaded(Vec<ContentItem>),
    /// The file exists but can't be trusted; a full reindex is needed.
    Corrupt(String),
}

/// Reads the snapshot at startup, before the writer is active.
pub fn load_snapshot(path: &Path) -> SnapshotLoad {
    let body = match std::fs::read(path) {
        Ok(body) => body,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return SnapshotLoad::Missing,
        Err(e) => return SnapshotLoad::Corrupt(e.to_string()),
    };

    let items: Vec<ContentItem> = match serde_json::from_slice(&body) {
        Ok(items) => items,
        Err(e) => return SnapshotLoad::Corrupt(format!("undecodable snapshot: {e}")),
    };

    let uncategorized = uncategorized_count(&items);
    if uncategorized > CORRUPTION_THRESHOLD {
        error!(uncategorized, "Snapshot has too many uncategorized items");
        return SnapshotLoad::Corrupt(format!("{uncategorized} items missing a category"));
    }
    SnapshotLoad::Loaded(items)
}

pub fn remove_snapshot(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

pub fn snapshot_size(path: &Path) -> Option<u64> {
    std::fs::metadata(path).ok().map(|m| m.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, category: Option<&str>) -> ContentItem {
        let mut item = ContentItem::new(id, format!("Movie {id}"));
        item.category_id = category.map(str::to_string);
        item
    }

    #[tokio::test]
    async fn test_writer_creates_dirs_and_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(SNAPSHOT_FILE);
        let handle = SnapshotWriter::spawn(path.clone());

        handle
            .save(vec![item("1", Some("5")), item("2", Some("5,6"))])
            .await
            .unwrap();

        match load_snapshot(&path) {
            SnapshotLoad::Loaded(items) => {
                assert_eq!(items.len(), 2);
                assert_eq!(items[1].category_id.as_deref(), Some("5,6"));
            }
            other => panic!("unexpected load result: {other:?}"),
        }
        assert!(snapshot_size(&path).unwrap() > 0);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_queued_writes_apply_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SNAPSHOT_FILE);
        let handle = SnapshotWriter::spawn(path.clone());

        handle.queue(vec![item("1", Some("5"))]).await;
        handle.queue(vec![item("1", Some("5")), item("2", Some("5"))]).await;
        handle.save(vec![item("3", Some("5"))]).await.unwrap();

        match load_snapshot(&path) {
            SnapshotLoad::Loaded(items) => assert_eq!(items[0].id, "3"),
            other => panic!("unexpected load result: {other:?}"),
        }
    }

    #[test]
    fn test_missing_and_garbage_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SNAPSHOT_FILE);
        assert!(matches!(load_snapshot(&path), SnapshotLoad::Missing));

        std::fs::write(&path, b"[{\"id\": ").unwrap();
        assert!(matches!(load_snapshot(&path), SnapshotLoad::Corrupt(_)));

        remove_snapshot(&path).unwrap();
        remove_snapshot(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_uncategorized_snapshot_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SNAPSHOT_FILE);
        let items: Vec<ContentItem> = (0..=CORRUPTION_THRESHOLD)
            .map(|n| item(&n.to_string(), None))
            .collect();
        std::fs::write(&path, serde_json::to_vec(&items).unwrap()).unwrap();

        assert!(matches!(load_snapshot(&path), SnapshotLoad::Corrupt(_)));
    }
}
