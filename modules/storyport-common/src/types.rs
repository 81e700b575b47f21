use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- CMS export records ---

/// One story from the CMS export, exactly as it appears on a line of the
/// export file. Never mutated by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryRecord {
    pub id: String,
    pub headline: String,
    pub subheadline: Option<String>,
    pub slug: Option<String>,
    #[serde(default)]
    pub body: Vec<ContentBlock>,
    #[serde(default)]
    pub sections: Vec<SectionRef>,
    #[serde(default)]
    pub tags: Vec<TagRef>,
    pub hero_image: Option<ImageRef>,
    pub seo: Option<SeoMeta>,
    pub subtype: Option<String>,
    /// Unix milliseconds.
    pub created_at: i64,
    pub updated_at: i64,
    pub published_at: Option<i64>,
}

impl StoryRecord {
    /// The primary section decides the article's category.
    pub fn primary_section(&self) -> Option<&SectionRef> {
        self.sections.first()
    }
}

/// A typed fragment of a story body. Order inside `StoryRecord::body` is
/// significant. Block types the export uses that we don't render decode to
/// `Unsupported` so the transformer can match exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        #[serde(default)]
        content: String,
    },
    Image {
        key: Option<String>,
        alt_text: Option<String>,
        title: Option<String>,
        caption: Option<String>,
    },
    #[serde(alias = "video_embed")]
    Video { url: String },
    #[serde(alias = "social_embed")]
    Social {
        url: String,
        provider: Option<String>,
    },
    #[serde(alias = "header")]
    SectionTitle { text: String, level: Option<u8> },
    #[serde(alias = "related_content")]
    RelatedReading,
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionRef {
    /// Path-like section id, e.g. `/news/local`.
    pub id: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagRef {
    pub slug: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    pub key: String,
    pub alt_text: Option<String>,
    pub caption: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeoMeta {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

// --- Persisted entities ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryEntity {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagEntity {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleKind {
    Standard,
    Video,
    Gallery,
    Opinion,
}

impl ArticleKind {
    pub fn from_subtype(subtype: Option<&str>) -> Self {
        match subtype.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("video") => ArticleKind::Video,
            Some("gallery") | Some("photo_gallery") => ArticleKind::Gallery,
            Some("opinion") | Some("column") | Some("editorial") => ArticleKind::Opinion,
            _ => ArticleKind::Standard,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArticleKind::Standard => "standard",
            ArticleKind::Video => "video",
            ArticleKind::Gallery => "gallery",
            ArticleKind::Opinion => "opinion",
        }
    }
}

impl std::fmt::Display for ArticleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleStatus {
    Draft,
    Published,
}

impl ArticleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArticleStatus::Draft => "draft",
            ArticleStatus::Published => "published",
        }
    }
}

impl std::fmt::Display for ArticleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An imported article. `id` is the upstream story id, so re-importing the
/// same story always targets the same row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleEntity {
    pub id: String,
    pub title: String,
    pub slug: String,
    pub content: String,
    pub excerpt: Option<String>,
    pub hero_image_url: Option<String>,
    pub category_id: Option<Uuid>,
    pub author_id: Uuid,
    pub kind: ArticleKind,
    pub status: ArticleStatus,
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
    pub meta_keywords: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    /// Provenance marker: which import produced this row.
    pub source: String,
    pub source_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArticleTagLink {
    pub article_id: String,
    pub tag_id: Uuid,
}

// --- Run progress ---

/// Snapshot of an import run. Persisted whole, never patched, so every
/// counter always describes the same point as `last_line`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunProgress {
    pub input: String,
    pub dry_run: bool,
    pub total_lines: Option<u64>,
    /// Non-blank lines handled after the resume cursor.
    pub seen: u64,
    pub imported: u64,
    pub skipped: u64,
    pub errors: u64,
    pub categories_created: u64,
    pub tags_created: u64,
    /// 1-based number of the last line fully processed. 0 = nothing yet.
    pub last_line: u64,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resumed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Wall time spent across all sessions of this run.
    pub elapsed_ms: u64,
}

impl RunProgress {
    pub fn new(input: impl Into<String>, dry_run: bool, now: DateTime<Utc>) -> Self {
        Self {
            input: input.into(),
            dry_run,
            total_lines: None,
            seen: 0,
            imported: 0,
            skipped: 0,
            errors: 0,
            categories_created: 0,
            tags_created: 0,
            last_line: 0,
            started_at: now,
            updated_at: now,
            resumed_at: None,
            finished_at: None,
            elapsed_ms: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_block_types_decode_as_unsupported() {
        let blocks: Vec<ContentBlock> = serde_json::from_value(json!([
            {"type": "text", "content": "<b>hi</b>"},
            {"type": "gallery", "items": [1, 2, 3]},
            {"type": "related_reading", "stories": ["a", "b"]},
            {"type": "header", "text": "Intro"},
        ]))
        .unwrap();

        assert_eq!(
            blocks,
            vec![
                ContentBlock::Text {
                    content: "<b>hi</b>".into()
                },
                ContentBlock::Unsupported,
                ContentBlock::RelatedReading,
                ContentBlock::SectionTitle {
                    text: "Intro".into(),
                    level: None
                },
            ]
        );
    }

    #[test]
    fn story_optional_fields_default() {
        let story: StoryRecord = serde_json::from_value(json!({
            "id": "ABC123",
            "headline": "Hello",
            "created_at": 1_700_000_000_000i64,
            "updated_at": 1_700_000_000_000i64,
            "extra_field": {"ignored": true}
        }))
        .unwrap();

        assert!(story.body.is_empty());
        assert!(story.sections.is_empty());
        assert!(story.primary_section().is_none());
        assert_eq!(story.published_at, None);
    }

    #[test]
    fn story_without_headline_is_rejected() {
        let result: Result<StoryRecord, _> = serde_json::from_value(json!({
            "id": "ABC123",
            "created_at": 0,
            "updated_at": 0
        }));
        assert!(result.is_err());
    }

    #[test]
    fn article_kind_from_subtype() {
        assert_eq!(ArticleKind::from_subtype(Some("Video")), ArticleKind::Video);
        assert_eq!(ArticleKind::from_subtype(Some("column")), ArticleKind::Opinion);
        assert_eq!(ArticleKind::from_subtype(Some("feature")), ArticleKind::Standard);
        assert_eq!(ArticleKind::from_subtype(None), ArticleKind::Standard);
    }
}
