use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata key under which a post records the PCC document it mirrors.
pub const PCC_CONTENT_META_KEY: &str = "pcc_id";

/// Query value marking a preview link for a Google-document-backed article.
pub const PREVIEW_MARKER: &str = "google_document";

/// Which version of a document the content API should return.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublishingLevel {
    Production,
    Realtime,
}

impl PublishingLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishingLevel::Production => "PRODUCTION",
            PublishingLevel::Realtime => "REALTIME",
        }
    }

    pub fn parse_level(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PRODUCTION" => Some(PublishingLevel::Production),
            "REALTIME" => Some(PublishingLevel::Realtime),
            _ => None,
        }
    }
}

/// Format of the article body requested from the content API.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ContentType {
    #[serde(rename = "TREE_PANTHEON_V2")]
    TreePantheonV2,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::TreePantheonV2 => "TREE_PANTHEON_V2",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Draft,
    Publish,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Publish => "publish",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(PostStatus::Draft),
            "publish" => Some(PostStatus::Publish),
            _ => None,
        }
    }

    pub fn from_draft_flag(is_draft: bool) -> Self {
        if is_draft {
            PostStatus::Draft
        } else {
            PostStatus::Publish
        }
    }
}

/// An article as served by the content API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Article {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub slug: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArticlesResponse {
    pub articles: Vec<Article>,
}

/// Field set written to a post on every create or update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostFields {
    pub title: String,
    pub content: String,
    pub status: PostStatus,
    pub slug: String,
    pub post_type: String,
}

impl PostFields {
    pub fn from_article(article: &Article, is_draft: bool, post_type: &str) -> Self {
        Self {
            title: article.title.clone(),
            content: article.content.clone(),
            status: PostStatus::from_draft_flag(is_draft),
            slug: article.slug.clone(),
            post_type: post_type.to_string(),
        }
    }
}

/// A local post that mirrors a PCC article.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectedPost {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub slug: String,
    pub status: PostStatus,
    pub post_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
