use serde::{Deserialize, Serialize};

/// A grouping bucket (genre/folder) on the portal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub title: String,
    pub alias: String,
}

/// Content type a category listing belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Vod,
    Live,
}

impl ContentKind {
    /// Value of the `type` query parameter.
    pub fn as_type(&self) -> &'static str {
        match self {
            ContentKind::Vod => "vod",
            ContentKind::Live => "itv",
        }
    }

    pub fn categories_action(&self) -> &'static str {
        match self {
            ContentKind::Vod => "get_categories",
            ContentKind::Live => "get_genres",
        }
    }
}
