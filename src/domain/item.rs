use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// A movie, series, season or episode as known to the local index.
///
/// `category_id` is a comma-joined membership list; use [`ContentItem::categories`]
/// rather than reading it directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poster: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    #[serde(default)]
    pub is_series: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub director: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actors: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genres: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_date: Option<String>,
    /// Minutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
}

const MAX_NAME_CHARS: usize = 100;
const MAX_DESCRIPTION_CHARS: usize = 600;

impl ContentItem {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            stream_command: None,
            poster: None,
            year: None,
            rating: None,
            category_id: None,
            is_series: false,
            season_id: None,
            series_id: None,
            director: None,
            actors: None,
            genres: None,
            added_date: None,
            duration: None,
        }
    }

    /// Deterministic ID for records the portal sent without one.
    pub fn generate_id(name: &str, command: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        hasher.update(command.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Category memberships, trimmed, in first-seen order, without duplicates.
    pub fn categories(&self) -> Vec<&str> {
        split_categories(self.category_id.as_deref())
    }

    pub fn belongs_to(&self, category: &str) -> bool {
        self.categories().contains(&category)
    }

    pub fn add_category(&mut self, category: &str) {
        self.category_id = join_categories(self.category_id.as_deref(), Some(category));
    }

    /// Combines a freshly fetched record with the one already cached under the
    /// same ID.
    ///
    /// Scalar fields come from `incoming`. Soft fields (description, actors,
    /// director, poster, genres, duration) keep the existing value when the
    /// incoming one is empty. Category membership is the union of both.
    pub fn merge(existing: &ContentItem, mut incoming: ContentItem) -> ContentItem {
        keep_if_empty(&mut incoming.description, &existing.description);
        keep_if_empty(&mut incoming.actors, &existing.actors);
        keep_if_empty(&mut incoming.director, &existing.director);
        keep_if_empty(&mut incoming.poster, &existing.poster);
        keep_if_empty(&mut incoming.genres, &existing.genres);
        if incoming.duration.is_none() {
            incoming.duration = existing.duration;
        }
        incoming.category_id = join_categories(
            existing.category_id.as_deref(),
            incoming.category_id.as_deref(),
        );
        incoming
    }

    pub fn display_name(&self) -> String {
        if self.name.chars().count() > MAX_NAME_CHARS {
            let head: String = self.name.chars().take(MAX_NAME_CHARS).collect();
            format!("{head}...")
        } else {
            self.name.clone()
        }
    }

    /// Description with trailing link noise cut off and length capped.
    pub fn sanitized_description(&self) -> String {
        let Some(desc) = self.description.as_deref() else {
            return String::new();
        };
        let cut = desc
            .to_ascii_lowercase()
            .find("http")
            .map(|idx| &desc[..idx])
            .unwrap_or(desc);
        let clean = if cut.chars().count() > MAX_DESCRIPTION_CHARS {
            let head: String = cut.chars().take(MAX_DESCRIPTION_CHARS).collect();
            format!("{head}...")
        } else {
            cut.to_string()
        };
        clean.trim().to_string()
    }

    /// Absolute poster URL; relative paths resolve against the portal base.
    pub fn poster_url(&self, base: &Url) -> Option<Url> {
        let poster = self.poster.as_deref().filter(|p| !p.is_empty())?;
        if poster.starts_with("http") {
            Url::parse(poster).ok()
        } else {
            base.join(poster.trim_start_matches('/')).ok()
        }
    }
}

fn keep_if_empty(incoming: &mut Option<String>, existing: &Option<String>) {
    if incoming.as_deref().is_none_or(|v| v.trim().is_empty()) {
        *incoming = existing.clone();
    }
}

pub fn split_categories(raw: Option<&str>) -> Vec<&str> {
    let mut out: Vec<&str> = Vec::new();
    for part in raw.unwrap_or_default().split(',') {
        let part = part.trim();
        if !part.is_empty() && !out.contains(&part) {
            out.push(part);
        }
    }
    out
}

/// Set union of two comma-joined membership lists, `a`'s order first.
pub fn join_categories(a: Option<&str>, b: Option<&str>) -> Option<String> {
    let mut cats = split_categories(a);
    for cat in split_categories(b) {
        if !cats.contains(&cat) {
            cats.push(cat);
        }
    }
    if cats.is_empty() {
        None
    } else {
        Some(cats.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rich_item() -> ContentItem {
        let mut item = ContentItem::new("7", "Old Name");
        item.description = Some("A long plot".into());
        item.actors = Some("Jane Doe".into());
        item.director = Some("John Roe".into());
        item.poster = Some("/posters/7.jpg".into());
        item.genres = Some("Drama".into());
        item.duration = Some(120);
        item.category_id = Some("5".into());
        item
    }

    #[test]
    fn test_merge_preserves_soft_fields() {
        let existing = rich_item();
        let mut incoming = ContentItem::new("7", "New Name");
        incoming.description = Some("   ".into());
        incoming.category_id = Some("6".into());

        let merged = ContentItem::merge(&existing, incoming);
        assert_eq!(merged.name, "New Name");
        assert_eq!(merged.description.as_deref(), Some("A long plot"));
        assert_eq!(merged.actors.as_deref(), Some("Jane Doe"));
        assert_eq!(merged.director.as_deref(), Some("John Roe"));
        assert_eq!(merged.poster.as_deref(), Some("/posters/7.jpg"));
        assert_eq!(merged.genres.as_deref(), Some("Drama"));
        assert_eq!(merged.duration, Some(120));
        assert_eq!(merged.category_id.as_deref(), Some("5,6"));
    }

    #[test]
    fn test_merge_prefers_non_empty_incoming() {
        let existing = rich_item();
        let mut incoming = ContentItem::new("7", "Old Name");
        incoming.description = Some("Updated plot".into());
        incoming.duration = Some(95);

        let merged = ContentItem::merge(&existing, incoming);
        assert_eq!(merged.description.as_deref(), Some("Updated plot"));
        assert_eq!(merged.duration, Some(95));
        assert_eq!(merged.category_id.as_deref(), Some("5"));
    }

    #[test]
    fn test_join_categories_dedups_and_trims() {
        assert_eq!(
            join_categories(Some("5, 6,5"), Some(" 6 ,7")).as_deref(),
            Some("5,6,7")
        );
        assert_eq!(join_categories(None, Some("")), None);
    }

    #[test]
    fn test_belongs_to() {
        let mut item = ContentItem::new("1", "x");
        item.add_category("12");
        item.add_category("3");
        assert!(item.belongs_to("3"));
        assert!(!item.belongs_to("1"));
    }

    #[test]
    fn test_id_generation_deterministic() {
        let a = ContentItem::generate_id("Movie", "ffmpeg http://x/1");
        let b = ContentItem::generate_id("Movie", "ffmpeg http://x/1");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, ContentItem::generate_id("Movie", "ffmpeg http://x/2"));
    }

    #[test]
    fn test_sanitized_description_cuts_links() {
        let mut item = ContentItem::new("1", "x");
        item.description = Some("Great film. More at https://example.com".into());
        assert_eq!(item.sanitized_description(), "Great film. More at");
    }

    #[test]
    fn test_display_name_caps_length() {
        let item = ContentItem::new("1", "n".repeat(150));
        assert_eq!(item.display_name().chars().count(), MAX_NAME_CHARS + 3);
    }

    #[test]
    fn test_poster_url_resolves_relative() {
        let base = Url::parse("http://portal.example/").unwrap();
        let item = rich_item();
        assert_eq!(
            item.poster_url(&base).unwrap().as_str(),
            "http://portal.example/posters/7.jpg"
        );
    }
}
