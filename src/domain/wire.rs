//! Raw portal records as they appear inside the `js` envelope.

use html_escape::decode_html_entities;
use serde::Deserialize;

use super::decode::{bool_or_int, int_or_string, string_or_int};
use super::{Category, ContentItem};

#[derive(Debug, Default, Deserialize)]
pub struct RawItem {
    #[serde(default, deserialize_with = "string_or_int")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "string_or_int")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "string_or_int")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "string_or_int")]
    pub descr: Option<String>,
    #[serde(default, deserialize_with = "string_or_int")]
    pub cmd: Option<String>,
    #[serde(default, deserialize_with = "string_or_int")]
    pub screenshot_uri: Option<String>,
    #[serde(default, deserialize_with = "string_or_int")]
    pub year: Option<String>,
    #[serde(default, deserialize_with = "string_or_int")]
    pub rating_imdb: Option<String>,
    #[serde(default, deserialize_with = "string_or_int")]
    pub rating: Option<String>,
    #[serde(default, deserialize_with = "string_or_int")]
    pub category_id: Option<String>,
    #[serde(default, deserialize_with = "bool_or_int")]
    pub is_series: bool,
    #[serde(default, deserialize_with = "string_or_int")]
    pub season_id: Option<String>,
    #[serde(default, deserialize_with = "string_or_int")]
    pub series_id: Option<String>,
    #[serde(default, deserialize_with = "string_or_int")]
    pub director: Option<String>,
    #[serde(default, deserialize_with = "string_or_int")]
    pub actors: Option<String>,
    #[serde(default, deserialize_with = "string_or_int")]
    pub genres_str: Option<String>,
    #[serde(default, deserialize_with = "string_or_int")]
    pub added: Option<String>,
    #[serde(default, deserialize_with = "int_or_string")]
    pub time: Option<u64>,
    #[serde(default, deserialize_with = "int_or_string")]
    pub length: Option<u64>,
    #[serde(default, deserialize_with = "int_or_string")]
    pub duration: Option<u64>,
}

impl From<RawItem> for ContentItem {
    fn from(raw: RawItem) -> Self {
        let name = raw
            .name
            .map(|n| decode_html_entities(&n).to_string())
            .unwrap_or_default();
        let id = raw.id.unwrap_or_else(|| {
            ContentItem::generate_id(&name, raw.cmd.as_deref().unwrap_or_default())
        });

        let mut item = ContentItem::new(id, name);
        item.description = raw
            .description
            .or(raw.descr)
            .map(|d| decode_html_entities(&d).to_string());
        item.stream_command = raw.cmd;
        item.poster = raw.screenshot_uri;
        item.year = raw.year;
        item.rating = raw.rating.or(raw.rating_imdb);
        item.category_id = raw.category_id;
        item.is_series = raw.is_series;
        item.season_id = raw.season_id;
        item.series_id = raw.series_id;
        item.director = raw.director;
        item.actors = raw.actors;
        item.genres = raw.genres_str;
        item.added_date = raw.added;
        item.duration = raw
            .time
            .or(raw.length)
            .or(raw.duration)
            .and_then(|m| u32::try_from(m).ok());
        item
    }
}

#[derive(Debug, Deserialize)]
pub struct RawCategory {
    #[serde(default, deserialize_with = "string_or_int")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "string_or_int")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "string_or_int")]
    pub alias: Option<String>,
}

impl RawCategory {
    /// Categories without an ID cannot be addressed and are dropped.
    pub fn into_category(self) -> Option<Category> {
        Some(Category {
            id: self.id?,
            title: self
                .title
                .map(|t| decode_html_entities(&t).to_string())
                .unwrap_or_else(|| "Unknown".to_string()),
            alias: self.alias.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_raw_item_tolerant_fields() {
        let raw: RawItem = serde_json::from_value(json!({
            "id": 1001,
            "name": "Tom &amp; Jerry",
            "descr": "Cat and mouse",
            "cmd": "ffmpeg http://cdn/1001.mkv",
            "screenshot_uri": false,
            "category_id": 5,
            "is_series": "1",
            "time": "95",
            "added": "2024-05-01 10:00:00"
        }))
        .unwrap();
        let item = ContentItem::from(raw);

        assert_eq!(item.id, "1001");
        assert_eq!(item.name, "Tom & Jerry");
        assert_eq!(item.description.as_deref(), Some("Cat and mouse"));
        assert_eq!(item.poster, None);
        assert_eq!(item.category_id.as_deref(), Some("5"));
        assert!(item.is_series);
        assert_eq!(item.duration, Some(95));
        assert_eq!(item.added_date.as_deref(), Some("2024-05-01 10:00:00"));
    }

    #[test]
    fn test_description_wins_over_descr() {
        let raw: RawItem = serde_json::from_value(json!({
            "id": "1", "name": "x", "description": "long", "descr": "short"
        }))
        .unwrap();
        assert_eq!(ContentItem::from(raw).description.as_deref(), Some("long"));
    }

    #[test]
    fn test_missing_id_is_generated() {
        let raw: RawItem =
            serde_json::from_value(json!({"name": "x", "cmd": "http://a"})).unwrap();
        let item = ContentItem::from(raw);
        assert_eq!(item.id, ContentItem::generate_id("x", "http://a"));
    }

    #[test]
    fn test_raw_category() {
        let raw: RawCategory = serde_json::from_value(json!({"id": 12, "alias": "kids"})).unwrap();
        let cat = raw.into_category().unwrap();
        assert_eq!(cat.id, "12");
        assert_eq!(cat.title, "Unknown");
        assert_eq!(cat.alias, "kids");

        let raw: RawCategory = serde_json::from_value(json!({"title": "No id"})).unwrap();
        assert!(raw.into_category().is_none());
    }
}
