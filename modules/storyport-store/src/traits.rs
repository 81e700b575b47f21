use std::sync::Arc;

use async_trait::async_trait;
use storyport_common::{ArticleEntity, ArticleTagLink, AuthorSource, CategoryEntity, TagEntity};
use uuid::Uuid;

use crate::error::Result;

/// Everything the import pipeline needs from the relational store.
///
/// Every write is conflict-tolerant: writing a row that already exists is a
/// no-op, never an error. That is what makes repeated or resumed runs safe.
///
/// Implemented by `PgImportStore` (postgres) and `MemoryImportStore` (tests).
/// Also implemented for `Arc<S>` so a test can keep a handle for assertions.
#[async_trait]
pub trait ImportStore: Send + Sync {
    /// Resolve the fallback author. `None` if no such user exists.
    async fn find_author(&self, author: &AuthorSource) -> Result<Option<Uuid>>;

    async fn load_categories(&self) -> Result<Vec<CategoryEntity>>;

    async fn load_tags(&self) -> Result<Vec<TagEntity>>;

    /// External ids of articles previously written by the import tagged with
    /// `source`. Articles authored natively are never scanned.
    async fn load_imported_ids(&self, source: &str) -> Result<Vec<String>>;

    /// Create `candidate` unless a category with its slug exists. Returns the
    /// stored row, which carries a different id when the slug was taken.
    async fn create_category(&self, candidate: &CategoryEntity) -> Result<CategoryEntity>;

    /// Multi-row tag insert. Rows whose slug already exists are skipped and
    /// absent from the returned list.
    async fn insert_tags(&self, tags: &[TagEntity]) -> Result<Vec<TagEntity>>;

    async fn find_tags(&self, slugs: &[String]) -> Result<Vec<TagEntity>>;

    /// Multi-row article insert. Returns the ids of the rows actually
    /// inserted; rows conflicting on id or slug are left untouched.
    async fn insert_articles(&self, articles: &[ArticleEntity]) -> Result<Vec<String>>;

    /// The subset of `ids` that already have an article row.
    async fn find_article_ids(&self, ids: &[String]) -> Result<Vec<String>>;

    /// Multi-row link insert. Duplicate pairs and links to articles that were
    /// never stored are skipped.
    async fn insert_article_tags(&self, links: &[ArticleTagLink]) -> Result<u64>;
}

#[async_trait]
impl<S: ImportStore + ?Sized> ImportStore for Arc<S> {
    async fn find_author(&self, author: &AuthorSource) -> Result<Option<Uuid>> {
        (**self).find_author(author).await
    }

    async fn load_categories(&self) -> Result<Vec<CategoryEntity>> {
        (**self).load_categories().await
    }

    async fn load_tags(&self) -> Result<Vec<TagEntity>> {
        (**self).load_tags().await
    }

    async fn load_imported_ids(&self, source: &str) -> Result<Vec<String>> {
        (**self).load_imported_ids(source).await
    }

    async fn create_category(&self, candidate: &CategoryEntity) -> Result<CategoryEntity> {
        (**self).create_category(candidate).await
    }

    async fn insert_tags(&self, tags: &[TagEntity]) -> Result<Vec<TagEntity>> {
        (**self).insert_tags(tags).await
    }

    async fn find_tags(&self, slugs: &[String]) -> Result<Vec<TagEntity>> {
        (**self).find_tags(slugs).await
    }

    async fn insert_articles(&self, articles: &[ArticleEntity]) -> Result<Vec<String>> {
        (**self).insert_articles(articles).await
    }

    async fn find_article_ids(&self, ids: &[String]) -> Result<Vec<String>> {
        (**self).find_article_ids(ids).await
    }

    async fn insert_article_tags(&self, links: &[ArticleTagLink]) -> Result<u64> {
        (**self).insert_article_tags(links).await
    }
}
