//! Read path that trades freshness for latency.
//!
//! A category read is served straight from the [`ContentCache`] while the
//! last full index is fresh. Otherwise the first pages are fetched live,
//! merged, and backfilled from the cache, and a background index run is
//! requested.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::app::Result;
use crate::domain::ContentItem;
use crate::fetcher::{Catalog, SingleFlight};
use crate::indexer::{ActivityMonitor, ContentIndexer};
use crate::store::{ContentCache, MetadataStore};

#[derive(Clone)]
pub struct HybridFetcher {
    catalog: Catalog,
    cache: ContentCache,
    metadata: Arc<MetadataStore>,
    indexer: Arc<ContentIndexer>,
    activity: Arc<ActivityMonitor>,
    flights: SingleFlight<String, Arc<Vec<ContentItem>>>,
    staleness: chrono::Duration,
    fresh_pages: u32,
}

impl HybridFetcher {
    pub fn new(
        catalog: Catalog,
        metadata: Arc<MetadataStore>,
        indexer: Arc<ContentIndexer>,
        activity: Arc<ActivityMonitor>,
        staleness: chrono::Duration,
        fresh_pages: u32,
    ) -> Self {
        Self {
            cache: catalog.cache().clone(),
            catalog,
            metadata,
            indexer,
            activity,
            flights: SingleFlight::new(),
            staleness,
            fresh_pages,
        }
    }

    /// Items for `category`. Concurrent calls for the same category share
    /// one fetch.
    pub async fn items(&self, category: &str) -> Result<Vec<ContentItem>> {
        self.activity.touch();
        let this = self.clone();
        let key = category.to_string();
        let items = self
            .flights
            .run(key.clone(), move || async move { this.load(&key).await.map(Arc::new) })
            .await?;
        Ok(items.as_ref().clone())
    }

    pub async fn search(&self, query: &str) -> Vec<ContentItem> {
        self.activity.touch();
        self.catalog.search(query).await
    }

    async fn load(&self, category: &str) -> Result<Vec<ContentItem>> {
        if self.metadata.get().is_fresh(self.staleness, Utc::now()) {
            debug!(category, "Index fresh, serving from cache");
            return Ok(self.cache.cached_items(category));
        }

        let fresh = match self.catalog.get_items(category, 0, self.fresh_pages).await {
            Ok(fresh) => fresh,
            Err(e) if !e.is_cancelled() && self.cache.category_len(category) > 0 => {
                warn!(category, "Live fetch failed, serving cached items: {}", e);
                self.request_index();
                return Ok(self.cache.cached_items(category));
            }
            Err(e) => return Err(e),
        };
        let cached = self.cache.cached_items(category);
        debug!(category, fresh = fresh.len(), cached = cached.len(), "Blending live head with cache");

        let mut seen = HashSet::new();
        let blended = fresh
            .into_iter()
            .chain(cached)
            .filter(|item| seen.insert(item.id.clone()))
            .collect();

        self.request_index();
        Ok(blended)
    }

    fn request_index(&self) {
        if self.indexer.start(false) {
            info!("Started background indexing");
        }
    }
}
