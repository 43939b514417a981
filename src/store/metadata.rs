use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const METADATA_FILE: &str = "index_state.json";

/// Out-of-band facts about indexing runs, persisted next to the snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexMetadata {
    pub last_success: Option<DateTime<Utc>>,
    pub last_duration_ms: Option<u64>,
    pub completed_successfully: bool,
    /// Categories indexed end to end at least once since they were last
    /// started.
    pub completed_categories: BTreeSet<String>,
}

impl IndexMetadata {
    pub fn last_duration(&self) -> Option<Duration> {
        self.last_duration_ms.map(Duration::from_millis)
    }

    /// Whether the last successful run is younger than `staleness`.
    pub fn is_fresh(&self, staleness: chrono::Duration, now: DateTime<Utc>) -> bool {
        self.last_success.is_some_and(|at| now - at < staleness)
    }
}

pub struct MetadataStore {
    path: Option<PathBuf>,
    state: Mutex<IndexMetadata>,
}

impl MetadataStore {
    /// Loads metadata from `path`; unreadable files start from defaults.
    pub fn open(path: PathBuf) -> Self {
        let state = match std::fs::read(&path) {
            Ok(body) => serde_json::from_slice(&body).unwrap_or_else(|e| {
                warn!(path = %path.display(), "Ignoring unreadable index metadata: {}", e);
                IndexMetadata::default()
            }),
            Err(_) => IndexMetadata::default(),
        };
        Self {
            path: Some(path),
            state: Mutex::new(state),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(IndexMetadata::default()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self) -> IndexMetadata {
        self.lock().clone()
    }

    pub fn is_category_complete(&self, category: &str) -> bool {
        self.lock().completed_categories.contains(category)
    }

    pub fn mark_run_started(&self) {
        self.update(|m| m.completed_successfully = false);
    }

    pub fn mark_run_succeeded(&self, at: DateTime<Utc>, duration: Duration) {
        self.update(|m| {
            m.last_success = Some(at);
            m.last_duration_ms = Some(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX));
            m.completed_successfully = true;
        });
    }

    pub fn mark_category_complete(&self, category: &str) {
        self.update(|m| {
            m.completed_categories.insert(category.to_string());
        });
    }

    pub fn mark_category_incomplete(&self, category: &str) {
        self.update(|m| {
            m.completed_categories.remove(category);
        });
    }

    /// Forgets every run; the next start indexes from scratch.
    pub fn clear(&self) {
        self.update(|m| *m = IndexMetadata::default());
    }

    fn update(&self, f: impl FnOnce(&mut IndexMetadata)) {
        let mut state = self.lock();
        f(&mut state);
        let Some(path) = &self.path else {
            return;
        };
        let result = serde_json::to_vec_pretty(&*state)
            .map_err(std::io::Error::other)
            .and_then(|body| {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, body)
            });
        if let Err(e) = result {
            warn!(path = %path.display(), "Failed to persist index metadata: {}", e);
        }
    }

    fn lock(&self) -> MutexGuard<'_, IndexMetadata> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
