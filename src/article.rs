use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored article. The URL is its identity within a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub url: String,
    pub title: String,
    /// Opaque body payload; the store never looks inside.
    pub content: String,
    pub fetched_at: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

impl Article {
    pub fn new(url: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            content: content.into(),
            fetched_at: Utc::now(),
            read: false,
        }
    }
}

/// A candidate item produced by a refresh, before it becomes an [`Article`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedItem {
    pub url: String,
    pub title: String,
    pub content: String,
}

impl FetchedItem {
    pub fn new(url: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            content: content.into(),
        }
    }

    pub fn into_article(self, fetched_at: DateTime<Utc>) -> Article {
        Article {
            url: self.url,
            title: self.title,
            content: self.content,
            fetched_at,
            read: false,
        }
    }
}
