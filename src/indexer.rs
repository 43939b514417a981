//! Background full-catalog indexing.
//!
//! One run walks every target category serially, page by page, merging
//! into the [`ContentCache`] as it goes. A failing page aborts the run
//! without undoing what was merged; categories that didn't finish keep
//! their "fully indexed" flag cleared so the next run covers them again.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::app::{PortalError, Result};
use crate::config::{CategorySelection, IndexConfig};
use crate::domain::IndexerState;
use crate::fetcher::Catalog;
use crate::store::{ContentCache, MetadataStore, SnapshotHandle};

/// Category wildcard that must never be indexed.
pub const WILDCARD_CATEGORY: &str = "*";

/// Consecutive fully-known pages that end a previously completed category.
const SMART_SYNC_PAGES: usize = 2;

/// Time of the last foreground read, used to yield bandwidth to the user.
#[derive(Debug, Default)]
pub struct ActivityMonitor {
    last: Mutex<Option<Instant>>,
}

impl ActivityMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn touch(&self) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }

    pub fn recently_active(&self, window: Duration) -> bool {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some_and(|at| at.elapsed() < window)
    }
}

#[derive(Debug, Clone)]
pub struct IndexerSettings {
    pub page_delay: Duration,
    pub activity_window: Duration,
    pub activity_backoff: Duration,
    pub staleness: chrono::Duration,
}

impl From<&IndexConfig> for IndexerSettings {
    fn from(config: &IndexConfig) -> Self {
        Self {
            page_delay: config.page_delay(),
            activity_window: config.activity_window(),
            activity_backoff: config.activity_backoff(),
            staleness: config.staleness(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub categories: usize,
    pub pages: usize,
    pub items: usize,
    pub duration: Duration,
    /// Whether the final snapshot reached disk and the run was stamped
    /// successful.
    pub persisted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The last run is recent and complete.
    Fresh,
    AlreadyRunning,
    Completed(RunReport),
}

#[derive(Debug, Default)]
struct CategoryStats {
    pages: usize,
    items: usize,
}

pub struct ContentIndexer {
    catalog: Catalog,
    cache: ContentCache,
    metadata: Arc<MetadataStore>,
    snapshots: SnapshotHandle,
    selection: Arc<dyn CategorySelection>,
    activity: Arc<ActivityMonitor>,
    settings: IndexerSettings,
    state: Mutex<IndexerState>,
    cancel: CancellationToken,
}

impl ContentIndexer {
    pub fn new(
        catalog: Catalog,
        metadata: Arc<MetadataStore>,
        snapshots: SnapshotHandle,
        selection: Arc<dyn CategorySelection>,
        activity: Arc<ActivityMonitor>,
        settings: IndexerSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            cache: catalog.cache().clone(),
            catalog,
            metadata,
            snapshots,
            selection,
            activity,
            settings,
            state: Mutex::new(IndexerState::Idle),
            cancel,
        }
    }

    pub fn state(&self) -> IndexerState {
        *self.lock_state()
    }

    /// Default plus user-selected categories, wildcard excluded.
    pub fn target_categories(&self) -> BTreeSet<String> {
        let mut targets = self.selection.default_categories();
        targets.extend(self.selection.additional_categories());
        targets.remove(WILDCARD_CATEGORY);
        targets
    }

    /// A run is due unless the last one succeeded within the staleness
    /// window and the cache actually holds items.
    pub fn needs_run(&self) -> bool {
        let meta = self.metadata.get();
        if self.cache.is_empty() {
            return true;
        }
        if !meta.completed_successfully {
            if meta.last_success.is_some() {
                info!("Previous run did not complete, reindexing");
            }
            return true;
        }
        !meta.is_fresh(self.settings.staleness, Utc::now())
    }

    /// Starts a run on a background task. Returns `false` when the index is
    /// fresh (and `force` is unset) or a run is already active.
    pub fn start(self: &Arc<Self>, force: bool) -> bool {
        if !force && !self.needs_run() {
            debug!("Index is fresh, not starting");
            return false;
        }
        if !self.try_begin() {
            debug!("Indexer already running");
            return false;
        }
        let indexer = Arc::clone(self);
        tokio::spawn(async move {
            let _ = indexer.execute().await;
        });
        true
    }

    /// Runs inline and reports what happened.
    pub async fn run(&self, force: bool) -> Result<RunOutcome> {
        if !force && !self.needs_run() {
            return Ok(RunOutcome::Fresh);
        }
        if !self.try_begin() {
            return Ok(RunOutcome::AlreadyRunning);
        }
        self.execute().await.map(RunOutcome::Completed)
    }

    fn try_begin(&self) -> bool {
        let mut state = self.lock_state();
        if state.is_running() {
            return false;
        }
        *state = IndexerState::Running;
        true
    }

    async fn execute(&self) -> Result<RunReport> {
        let result = self.index_all().await;
        let next = match &result {
            Ok(report) if report.persisted => IndexerState::Succeeded,
            Ok(_) => IndexerState::Aborted,
            Err(e) if e.is_cancelled() => {
                debug!("Index run cancelled");
                IndexerState::Aborted
            }
            Err(e) => {
                error!("Index run aborted: {}", e);
                IndexerState::Aborted
            }
        };
        *self.lock_state() = next;
        result
    }

    async fn index_all(&self) -> Result<RunReport> {
        let started = Instant::now();
        self.metadata.mark_run_started();

        let targets = self.target_categories();
        info!(categories = targets.len(), "Starting index run");

        let mut report = RunReport::default();
        for category in &targets {
            if self.cancel.is_cancelled() {
                return Err(PortalError::Cancelled);
            }
            let stats = self.index_category(category).await.inspect_err(|e| {
                if !e.is_cancelled() {
                    error!(category = %category, "Category failed: {}", e);
                }
            })?;

            self.metadata.mark_category_complete(category);
            self.snapshots.queue(self.cache.snapshot()).await;
            info!(category = %category, pages = stats.pages, items = stats.items, "Category indexed");

            report.categories += 1;
            report.pages += stats.pages;
            report.items += stats.items;
        }

        report.duration = started.elapsed();
        match self.snapshots.save(self.cache.snapshot()).await {
            Ok(()) => {
                self.metadata.mark_run_succeeded(Utc::now(), report.duration);
                report.persisted = true;
                info!(
                    items = self.cache.len(),
                    duration = ?report.duration,
                    "Index run complete"
                );
            }
            Err(e) => warn!("Index complete but snapshot failed, run not marked successful: {}", e),
        }
        Ok(report)
    }

    async fn index_category(&self, category: &str) -> Result<CategoryStats> {
        let previously_complete = self.metadata.is_category_complete(category);
        self.metadata.mark_category_incomplete(category);

        let first = self.catalog.fetch_page(category, 0).await?;
        let mut stats = CategoryStats {
            pages: 1,
            items: first.items.len(),
        };
        if first.items.is_empty() {
            return Ok(stats);
        }

        let total_pages = first.total_pages();
        let mut collected: HashSet<String> = first.items.iter().map(|i| i.id.clone()).collect();
        self.cache.merge_items(first.items);
        debug!(category, total_pages, previously_complete, "Paginating category");

        let mut known_streak = 0;
        for number in 1..total_pages {
            self.throttle().await?;

            let page = self.catalog.fetch_page(category, number).await?;
            stats.pages += 1;

            let Some(first_id) = page.first_id() else {
                debug!(category, page = number, "Empty page, skipping");
                continue;
            };
            if collected.contains(first_id) {
                warn!(category, page = number, first_id, "Server repeated a page, discarding it");
                continue;
            }

            let all_known = self
                .cache
                .all_linked(page.items.iter().map(|i| i.id.as_str()), category);
            known_streak = if all_known { known_streak + 1 } else { 0 };

            collected.extend(page.items.iter().map(|i| i.id.clone()));
            stats.items += page.items.len();
            self.cache.merge_items(page.items);

            if previously_complete && known_streak >= SMART_SYNC_PAGES {
                info!(category, page = number, "Pages already cached, stopping early");
                break;
            }
        }

        Ok(stats)
    }

    /// Inter-page delay, plus a longer pause while the user is active.
    async fn throttle(&self) -> Result<()> {
        if self.activity.recently_active(self.settings.activity_window) {
            debug!("Foreground activity, backing off");
            self.sleep(self.settings.activity_backoff).await?;
        }
        self.sleep(self.settings.page_delay).await
    }

    async fn sleep(&self, duration: Duration) -> Result<()> {
        if duration.is_zero() {
            return if self.cancel.is_cancelled() {
                Err(PortalError::Cancelled)
            } else {
                Ok(())
            };
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(PortalError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, IndexerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
