use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use crate::domain::item::split_categories;
use crate::domain::ContentItem;

/// More items than this without any category marks a snapshot as corrupt.
pub const CORRUPTION_THRESHOLD: usize = 100;

#[derive(Debug, Default)]
struct CacheState {
    items: HashMap<String, ContentItem>,
    by_category: HashMap<String, HashSet<String>>,
}

impl CacheState {
    fn merge(&mut self, incoming: ContentItem) -> bool {
        let merged = match self.items.get(&incoming.id) {
            Some(existing) => ContentItem::merge(existing, incoming),
            None => incoming,
        };
        for category in merged.categories() {
            self.by_category
                .entry(category.to_string())
                .or_default()
                .insert(merged.id.clone());
        }
        self.items.insert(merged.id.clone(), merged).is_none()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeSummary {
    pub inserted: usize,
    pub updated: usize,
}

/// In-memory content index: items by ID plus a category → IDs index.
///
/// [`merge_items`](Self::merge_items) is the only way items enter or
/// change; it runs under the write lock so readers always observe the map
/// and the index in agreement.
#[derive(Debug, Clone, Default)]
pub struct ContentCache {
    state: Arc<RwLock<CacheState>>,
}

impl ContentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge_items<I>(&self, incoming: I) -> MergeSummary
    where
        I: IntoIterator<Item = ContentItem>,
    {
        let mut state = self.write();
        let mut summary = MergeSummary::default();
        for item in incoming {
            if state.merge(item) {
                summary.inserted += 1;
            } else {
                summary.updated += 1;
            }
        }
        if summary.inserted + summary.updated > 0 {
            debug!(
                inserted = summary.inserted,
                updated = summary.updated,
                total = state.items.len(),
                "Merged items into cache"
            );
        }
        summary
    }

    /// Empties the cache and loads `items` in one step.
    pub fn replace_all(&self, items: Vec<ContentItem>) -> usize {
        let mut state = self.write();
        *state = CacheState::default();
        for item in items {
            state.merge(item);
        }
        state.items.len()
    }

    pub fn clear(&self) {
        *self.write() = CacheState::default();
    }

    pub fn len(&self) -> usize {
        self.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().items.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<ContentItem> {
        self.read().items.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().items.contains_key(id)
    }

    /// True when every ID is cached and already linked to `category`.
    pub fn all_linked<'a, I>(&self, ids: I, category: &str) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        let state = self.read();
        let Some(members) = state.by_category.get(category) else {
            return false;
        };
        ids.into_iter().all(|id| members.contains(id))
    }

    /// Items of `category`, newest `added_date` first, ties by ID descending.
    pub fn cached_items(&self, category: &str) -> Vec<ContentItem> {
        let state = self.read();
        let mut items: Vec<ContentItem> = state
            .by_category
            .get(category)
            .map(|ids| ids.iter().filter_map(|id| state.items.get(id)).cloned().collect())
            .unwrap_or_default();
        drop(state);
        items.sort_by(newest_first);
        items
    }

    pub fn category_len(&self, category: &str) -> usize {
        self.read().by_category.get(category).map_or(0, HashSet::len)
    }

    /// Every cached item, ordered by ID.
    pub fn snapshot(&self) -> Vec<ContentItem> {
        let mut items: Vec<ContentItem> = self.read().items.values().cloned().collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        items
    }

    /// Case-insensitive match on name, actors or director.
    pub fn search(&self, query: &str) -> Vec<ContentItem> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        let matches = |field: Option<&str>| field.is_some_and(|f| f.to_lowercase().contains(&needle));

        let mut found: Vec<ContentItem> = self
            .read()
            .items
            .values()
            .filter(|item| {
                matches(Some(&item.name))
                    || matches(item.actors.as_deref())
                    || matches(item.director.as_deref())
            })
            .cloned()
            .collect();
        found.sort_by(newest_first);
        found
    }

    pub fn category_counts(&self) -> BTreeMap<String, usize> {
        self.read()
            .by_category
            .iter()
            .map(|(category, ids)| (category.clone(), ids.len()))
            .collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn newest_first(a: &ContentItem, b: &ContentItem) -> Ordering {
    let added_a = a.added_date.as_deref().unwrap_or_default();
    let added_b = b.added_date.as_deref().unwrap_or_default();
    added_b.cmp(added_a).then_with(|| b.id.cmp(&a.id))
}

/// Count of items that belong to no category. Above
/// [`CORRUPTION_THRESHOLD`] a loaded snapshot is not trusted.
pub fn uncategorized_count(items: &[ContentItem]) -> usize {
    items
        .iter()
        .filter(|item| split_categories(item.category_id.as_deref()).is_empty())
        .count()
}

#[cfg(test)]
impl ContentCache {
    fn index(&self) -> HashMap<String, HashSet<String>> {
        self.read().by_category.clone()
    }

    fn derived_index(&self) -> HashMap<String, HashSet<String>> {
        let mut index: HashMap<String, HashSet<String>> = HashMap::new();
        for item in self.read().items.values() {
            for category in item.categories() {
                index
                    .entry(category.to_string())
                    .or_default()
                    .insert(item.id.clone());
            }
        }
        index
    }
}
