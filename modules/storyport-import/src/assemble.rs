use chrono::{DateTime, TimeZone, Utc};
use storyport_common::slug::{slugify, truncate_chars};
use storyport_common::{ArticleEntity, ArticleKind, ArticleStatus, StoryRecord};
use uuid::Uuid;

use crate::error::TransformError;
use crate::transform::ContentTransformer;

const EXCERPT_MAX_CHARS: usize = 300;

/// Builds an `ArticleEntity` from a story. Pure; the category id is filled
/// in by the writer once the section has been resolved.
#[derive(Debug, Clone)]
pub struct ArticleAssembler {
    transformer: ContentTransformer,
    author_id: Uuid,
    source: String,
}

impl ArticleAssembler {
    pub fn new(transformer: ContentTransformer, author_id: Uuid, source: impl Into<String>) -> Self {
        Self {
            transformer,
            author_id,
            source: source.into(),
        }
    }

    pub fn transformer(&self) -> &ContentTransformer {
        &self.transformer
    }

    pub fn assemble(&self, story: &StoryRecord) -> Result<ArticleEntity, TransformError> {
        let id = story.id.trim();
        if id.is_empty() {
            return Err(TransformError::MissingId);
        }
        let title = story.headline.trim();
        if title.is_empty() {
            return Err(TransformError::MissingHeadline);
        }

        let created_at = timestamp("created_at", story.created_at)?;
        let updated_at = timestamp("updated_at", story.updated_at)?;
        let published_at = story
            .published_at
            .map(|ms| timestamp("published_at", ms))
            .transpose()?;

        let slug = story
            .slug
            .as_deref()
            .map(slugify)
            .filter(|s| !s.is_empty())
            .or_else(|| Some(slugify(title)).filter(|s| !s.is_empty()))
            .unwrap_or_else(|| id.to_string());

        let seo = story.seo.clone().unwrap_or_default();
        let excerpt = non_blank(story.subheadline.as_deref())
            .or_else(|| non_blank(seo.description.as_deref()))
            .map(|text| truncate_chars(text, EXCERPT_MAX_CHARS).to_string());

        let hero_image_url = story
            .hero_image
            .as_ref()
            .map(|image| image.key.trim())
            .filter(|key| !key.is_empty())
            .map(|key| self.transformer.image_url(key));

        Ok(ArticleEntity {
            id: id.to_string(),
            title: title.to_string(),
            slug,
            content: self.transformer.render(&story.body),
            excerpt,
            hero_image_url,
            category_id: None,
            author_id: self.author_id,
            kind: ArticleKind::from_subtype(story.subtype.as_deref()),
            status: if published_at.is_some() {
                ArticleStatus::Published
            } else {
                ArticleStatus::Draft
            },
            meta_title: non_blank(seo.title.as_deref()).map(str::to_string),
            meta_description: non_blank(seo.description.as_deref()).map(str::to_string),
            meta_keywords: seo
                .keywords
                .iter()
                .map(|k| k.trim())
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect(),
            created_at,
            updated_at,
            published_at,
            source: self.source.clone(),
            source_id: story.id.clone(),
        })
    }
}

fn timestamp(field: &'static str, millis: i64) -> Result<DateTime<Utc>, TransformError> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or(TransformError::InvalidTimestamp {
            field,
            value: millis,
        })
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
