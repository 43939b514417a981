use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::app::error::{PortalError, Result};
use crate::config::{CategorySelection, Config};
use crate::domain::{ConnectionStatus, ContentItem, IndexerState};
use crate::fetcher::{Catalog, ConcurrencyLimiter, PortalSession};
use crate::hybrid::HybridFetcher;
use crate::images::{DecodedImage, ImageCache};
use crate::indexer::{ActivityMonitor, ContentIndexer, IndexerSettings};
use crate::store::metadata::METADATA_FILE;
use crate::store::snapshot::{load_snapshot, remove_snapshot, snapshot_size, SNAPSHOT_FILE};
use crate::store::{ContentCache, MetadataStore, SnapshotHandle, SnapshotLoad, SnapshotWriter};

/// Bounding box for poster thumbnails.
pub const POSTER_SIZE: (u32, u32) = (300, 450);

/// Owns every long-lived component: session, caches, indexer.
///
/// Must be opened inside a tokio runtime; the snapshot writer runs as a
/// background task.
pub struct AppContext {
    pub config: Config,
    pub session: PortalSession,
    pub catalog: Catalog,
    pub cache: ContentCache,
    pub metadata: Arc<MetadataStore>,
    pub snapshots: SnapshotHandle,
    pub indexer: Arc<ContentIndexer>,
    pub hybrid: HybridFetcher,
    pub images: ImageCache,
    cancel: CancellationToken,
}

/// Snapshot of what is cached and how the last run went.
#[derive(Debug, Clone)]
pub struct CacheStatus {
    pub items: usize,
    pub categories: BTreeMap<String, usize>,
    pub snapshot_bytes: Option<u64>,
    pub last_index: Option<DateTime<Utc>>,
    pub last_duration: Option<Duration>,
    pub completed_successfully: bool,
    pub indexer: IndexerState,
    pub connection: ConnectionStatus,
}

impl AppContext {
    pub fn open(config: Config) -> Result<Self> {
        let dir = config
            .cache
            .resolve_dir()
            .map_err(|e| PortalError::Config(e.to_string()))?;
        Self::with_cache_dir(config, dir)
    }

    pub fn with_cache_dir(config: Config, dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        let cancel = CancellationToken::new();

        let network = ConcurrencyLimiter::new("network", config.limits.network.max(1));
        let session = PortalSession::new(&config.portal, network, cancel.clone())?;
        let cache = ContentCache::new();
        let catalog = Catalog::new(Arc::new(session.clone()), cache.clone(), config.index.per_page);
        let metadata = Arc::new(MetadataStore::open(dir.join(METADATA_FILE)));
        let snapshots = SnapshotWriter::spawn(dir.join(SNAPSHOT_FILE));
        let activity = Arc::new(ActivityMonitor::new());
        let selection: Arc<dyn CategorySelection> = Arc::new(config.index.clone());

        let indexer = Arc::new(ContentIndexer::new(
            catalog.clone(),
            metadata.clone(),
            snapshots.clone(),
            selection,
            activity.clone(),
            IndexerSettings::from(&config.index),
            cancel.clone(),
        ));
        let hybrid = HybridFetcher::new(
            catalog.clone(),
            metadata.clone(),
            indexer.clone(),
            activity,
            config.index.staleness(),
            config.index.hybrid_pages.max(1),
        );
        let images = ImageCache::with_limits(Arc::new(session.clone()), &config.limits);

        let ctx = Self {
            config,
            session,
            catalog,
            cache,
            metadata,
            snapshots,
            indexer,
            hybrid,
            images,
            cancel,
        };
        ctx.restore()?;
        Ok(ctx)
    }

    pub fn snapshot_path(&self) -> &Path {
        self.snapshots.path()
    }

    /// Loads the on-disk snapshot. A corrupt snapshot is discarded and a
    /// full reindex is forced.
    fn restore(&self) -> Result<()> {
        match load_snapshot(self.snapshot_path()) {
            SnapshotLoad::Missing => debug!("No content snapshot on disk"),
            SnapshotLoad::Loaded(items) => {
                let count = self.cache.replace_all(items);
                info!(items = count, "Restored content snapshot");
            }
            SnapshotLoad::Corrupt(reason) => {
                warn!("Discarding content snapshot: {}", reason);
                remove_snapshot(self.snapshot_path())?;
                self.metadata.clear();
                self.indexer.start(true);
            }
        }
        Ok(())
    }

    /// Drops every cached item, the snapshot file, run metadata and the
    /// category listings.
    pub fn clear_cache(&self) -> Result<()> {
        self.cache.clear();
        remove_snapshot(self.snapshot_path())?;
        self.metadata.clear();
        self.catalog.clear_categories();
        self.images.clear();
        info!("Cache cleared");
        Ok(())
    }

    pub fn status(&self) -> CacheStatus {
        let meta = self.metadata.get();
        CacheStatus {
            items: self.cache.len(),
            categories: self.cache.category_counts(),
            snapshot_bytes: snapshot_size(self.snapshot_path()),
            last_index: meta.last_success,
            last_duration: meta.last_duration(),
            completed_successfully: meta.completed_successfully,
            indexer: self.indexer.state(),
            connection: self.session.status(),
        }
    }

    /// Poster thumbnail for `item`. Relative poster paths resolve against
    /// the portal URL.
    pub async fn poster(&self, item: &ContentItem) -> Result<Option<Arc<DecodedImage>>> {
        let Some(url) = item.poster_url(&self.session.base_url()) else {
            return Ok(None);
        };
        self.images.image(url.as_str(), Some(POSTER_SIZE)).await.map(Some)
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancels in-flight work and drains the snapshot queue.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.snapshots.shutdown().await;
    }
}

pub fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    let b = bytes as f64;
    if b < KB {
        format!("{} B", bytes)
    } else if b < MB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{:.1} MB", b / MB)
    }
}

/// `1.5s`, `3m 5s`, `2h 10m`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}
