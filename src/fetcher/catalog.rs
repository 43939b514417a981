use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tracing::{debug, warn};

use crate::app::{PortalError, Result};
use crate::domain::decode::lenient_u64;
use crate::domain::wire::{RawCategory, RawItem};
use crate::domain::{Category, ContentItem, ContentKind};
use crate::fetcher::Portal;
use crate::store::ContentCache;

pub const DEFAULT_PER_PAGE: u32 = 14;
pub const SEARCH_LIMIT: usize = 100;
const REMOTE_SEARCH_PER_PAGE: u32 = 50;
const EPISODES_PER_PAGE: usize = 50;
const MAX_EPISODE_PAGES: u32 = 10;

/// One page of a `get_ordered_list` listing.
#[derive(Debug, Clone)]
pub struct Page {
    pub number: u32,
    pub items: Vec<ContentItem>,
    pub total_items: usize,
    pub per_page: usize,
}

impl Page {
    pub fn total_pages(&self) -> u32 {
        if self.per_page == 0 {
            return 0;
        }
        u32::try_from(self.total_items.div_ceil(self.per_page)).unwrap_or(u32::MAX)
    }

    pub fn first_id(&self) -> Option<&str> {
        self.items.first().map(|item| item.id.as_str())
    }
}

/// VOD catalogue operations on top of a [`Portal`].
///
/// Listing reads go through [`ContentCache::merge_items`] so anything a
/// caller sees is also retrievable from the cache afterwards.
#[derive(Clone)]
pub struct Catalog {
    portal: Arc<dyn Portal>,
    cache: ContentCache,
    per_page: u32,
    categories: Arc<RwLock<HashMap<ContentKind, Vec<Category>>>>,
    details: Arc<RwLock<HashMap<String, ContentItem>>>,
}

impl Catalog {
    pub fn new(portal: Arc<dyn Portal>, cache: ContentCache, per_page: u32) -> Self {
        Self {
            portal,
            cache,
            per_page: if per_page == 0 { DEFAULT_PER_PAGE } else { per_page },
            categories: Arc::default(),
            details: Arc::default(),
        }
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    /// Fetches one page of `category`. Items are tagged with the category
    /// but not merged.
    pub async fn fetch_page(&self, category: &str, page: u32) -> Result<Page> {
        let value = self
            .portal
            .fetch_json(
                "vod",
                "get_ordered_list",
                &[
                    ("category", category.to_string()),
                    ("p", page.to_string()),
                    ("sortby", "added".to_string()),
                    ("per_page", self.per_page.to_string()),
                ],
            )
            .await?;
        let mut page = parse_page(&value, page, self.per_page as usize)?;
        for item in &mut page.items {
            item.add_category(category);
        }
        debug!(category, page = page.number, items = page.items.len(), total = page.total_items, "Fetched page");
        Ok(page)
    }

    /// Fetches up to `pages` pages from `start`, merging each into the
    /// cache. Stops early on an empty page or past the last page.
    pub async fn get_items(&self, category: &str, start: u32, pages: u32) -> Result<Vec<ContentItem>> {
        let mut collected = Vec::new();
        for number in start..start.saturating_add(pages) {
            let page = self.fetch_page(category, number).await?;
            if page.items.is_empty() {
                break;
            }
            let last_page = page.total_pages();
            self.cache.merge_items(page.items.iter().cloned());
            collected.extend(page.items);
            if number + 1 >= last_page {
                break;
            }
        }
        Ok(collected)
    }

    /// Categories for `kind`, fetched once per process.
    pub async fn categories(&self, kind: ContentKind) -> Result<Vec<Category>> {
        if let Some(cached) = self.read_categories().get(&kind) {
            return Ok(cached.clone());
        }

        let value = self
            .portal
            .fetch_json(kind.as_type(), kind.categories_action(), &[])
            .await?;
        let raw = match value.get("js") {
            Some(Value::Array(list)) => list.clone(),
            Some(Value::Object(obj)) => obj
                .get("data")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
            _ => return Err(PortalError::decoding("categories response has no list", value.to_string().as_bytes())),
        };
        let categories: Vec<Category> = raw
            .into_iter()
            .filter_map(|v| serde_json::from_value::<RawCategory>(v).ok())
            .filter_map(RawCategory::into_category)
            .collect();

        self.categories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind, categories.clone());
        Ok(categories)
    }

    pub fn clear_categories(&self) {
        self.categories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.details
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Remote name search blended with a local scan of name, actors and
    /// director. Remote results come first; a failing remote search leaves
    /// only the local matches.
    pub async fn search(&self, query: &str) -> Vec<ContentItem> {
        let remote = match self
            .portal
            .fetch_json(
                "vod",
                "get_ordered_list",
                &[
                    ("search", query.to_string()),
                    ("sortby", "added".to_string()),
                    ("per_page", REMOTE_SEARCH_PER_PAGE.to_string()),
                ],
            )
            .await
            .and_then(|value| parse_page(&value, 0, REMOTE_SEARCH_PER_PAGE as usize))
        {
            Ok(page) => page.items,
            Err(e) if e.is_cancelled() => {
                debug!("Remote search cancelled");
                Vec::new()
            }
            Err(e) => {
                warn!(query, "Remote search failed, using local cache only: {}", e);
                Vec::new()
            }
        };

        let mut seen = HashSet::new();
        remote
            .into_iter()
            .chain(self.cache.search(query))
            .filter(|item| seen.insert(item.id.clone()))
            .take(SEARCH_LIMIT)
            .collect()
    }

    /// Detailed record for one movie, cached per process and written
    /// through the cache merge.
    pub async fn vod_info(&self, movie_id: &str) -> Result<Option<ContentItem>> {
        if let Some(cached) = self
            .details
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(movie_id)
        {
            return Ok(Some(cached.clone()));
        }

        let value = self
            .portal
            .fetch_json("vod", "get_vod_info", &[("movie_id", movie_id.to_string())])
            .await?;
        let record = match value.pointer("/js/data") {
            Some(Value::Array(list)) => list.first().cloned(),
            Some(obj @ Value::Object(_)) => Some(obj.clone()),
            _ => None,
        };
        let Some(record) = record else {
            return Ok(None);
        };
        let item = ContentItem::from(serde_json::from_value::<RawItem>(record)?);

        let id = item.id.clone();
        self.cache.merge_items([item]);
        let merged = self.cache.get(&id);
        if let Some(merged) = &merged {
            self.details
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(movie_id.to_string(), merged.clone());
        }
        Ok(merged)
    }

    pub async fn seasons(&self, series_id: &str) -> Result<Vec<ContentItem>> {
        let value = self
            .portal
            .fetch_json(
                "vod",
                "get_ordered_list",
                &[
                    ("movie_id", series_id.to_string()),
                    ("season_id", "0".to_string()),
                    ("episode_id", "0".to_string()),
                    ("p", "1".to_string()),
                    ("per_page", EPISODES_PER_PAGE.to_string()),
                ],
            )
            .await?;
        Ok(parse_page(&value, 1, EPISODES_PER_PAGE)?.items)
    }

    /// Episodes of one season; pages until a short page, at most
    /// [`MAX_EPISODE_PAGES`].
    pub async fn episodes(&self, series_id: &str, season_id: &str) -> Result<Vec<ContentItem>> {
        let mut episodes = Vec::new();
        for number in 1..=MAX_EPISODE_PAGES {
            let value = self
                .portal
                .fetch_json(
                    "vod",
                    "get_ordered_list",
                    &[
                        ("movie_id", series_id.to_string()),
                        ("season_id", season_id.to_string()),
                        ("episode_id", "0".to_string()),
                        ("p", number.to_string()),
                        ("per_page", EPISODES_PER_PAGE.to_string()),
                    ],
                )
                .await?;
            let page = parse_page(&value, number, EPISODES_PER_PAGE)?;
            let short = page.items.len() < EPISODES_PER_PAGE;
            episodes.extend(page.items.into_iter().map(|mut episode| {
                episode.series_id = Some(series_id.to_string());
                episode.season_id = Some(season_id.to_string());
                episode
            }));
            if short {
                break;
            }
        }
        Ok(episodes)
    }

    /// Playable files of one episode (qualities, languages).
    pub async fn episode_files(
        &self,
        series_id: &str,
        season_id: &str,
        episode_id: &str,
    ) -> Result<Vec<ContentItem>> {
        let value = self
            .portal
            .fetch_json(
                "vod",
                "get_ordered_list",
                &[
                    ("movie_id", series_id.to_string()),
                    ("season_id", season_id.to_string()),
                    ("episode_id", episode_id.to_string()),
                    ("p", "1".to_string()),
                    ("not_ended", "0".to_string()),
                ],
            )
            .await?;
        Ok(parse_page(&value, 1, EPISODES_PER_PAGE)?.items)
    }

    /// Turns a stream command into a playable URL.
    pub async fn create_link(&self, kind: ContentKind, cmd: &str) -> Result<String> {
        if cmd.starts_with("http") {
            return Ok(cmd.to_string());
        }

        let value = self
            .portal
            .fetch_json(
                kind.as_type(),
                "create_link",
                &[
                    ("cmd", cmd.to_string()),
                    ("forced_storage", "0".to_string()),
                    ("disable_ad", "0".to_string()),
                    ("js_authenticate", "1".to_string()),
                ],
            )
            .await?;
        let returned = value
            .pointer("/js/cmd")
            .and_then(Value::as_str)
            .ok_or_else(|| PortalError::decoding("create_link returned no cmd", value.to_string().as_bytes()))?;

        Ok(returned
            .split_whitespace()
            .find(|part| part.starts_with("http") || part.starts_with("rtsp"))
            .unwrap_or(returned)
            .to_string())
    }

    fn read_categories(&self) -> std::sync::RwLockReadGuard<'_, HashMap<ContentKind, Vec<Category>>> {
        self.categories.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Decodes a listing envelope: `{"js": {"data": [...], "total_items": n}}`
/// or `{"js": [...]}`. Records that fail to decode are skipped.
pub fn parse_page(value: &Value, number: u32, requested_per_page: usize) -> Result<Page> {
    let js = value
        .get("js")
        .ok_or_else(|| PortalError::decoding("response has no js envelope", value.to_string().as_bytes()))?;

    let (records, total, per_page) = match js {
        Value::Array(list) => (list.as_slice(), list.len(), requested_per_page),
        Value::Object(obj) => {
            let records = obj
                .get("data")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let total = obj
                .get("total_items")
                .and_then(lenient_u64)
                .map_or(records.len(), |n| n as usize);
            let per_page = obj
                .get("max_page_items")
                .and_then(lenient_u64)
                .filter(|n| *n > 0)
                .map_or(requested_per_page, |n| n as usize);
            (records, total, per_page)
        }
        _ => {
            return Err(PortalError::decoding(
                "unexpected js payload",
                value.to_string().as_bytes(),
            ))
        }
    };

    let items = records
        .iter()
        .filter_map(|record| match serde_json::from_value::<RawItem>(record.clone()) {
            Ok(raw) => Some(ContentItem::from(raw)),
            Err(e) => {
                debug!("Skipping undecodable record: {}", e);
                None
            }
        })
        .collect();

    Ok(Page {
        number,
        items,
        total_items: total,
        per_page,
    })
}
