//! In-memory ImportStore for tests. Mirrors the conflict semantics of the
//! Postgres schema: unique category/tag slugs, unique article ids and slugs,
//! unique (article, tag) pairs.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use storyport_common::{ArticleEntity, ArticleTagLink, AuthorSource, CategoryEntity, TagEntity};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::traits::ImportStore;

#[derive(Default)]
struct MemoryState {
    users: HashMap<Uuid, String>,
    categories: BTreeMap<String, CategoryEntity>,
    tags: BTreeMap<String, TagEntity>,
    articles: BTreeMap<String, ArticleEntity>,
    article_tags: BTreeSet<ArticleTagLink>,
    failing_article_writes: usize,
    category_creates: usize,
}

/// In-memory store. Thread-safe; clone out snapshots for assertions.
#[derive(Default)]
pub struct MemoryImportStore {
    state: Mutex<MemoryState>,
}

impl MemoryImportStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user and return its id.
    pub fn add_user(&self, email: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.state.lock().unwrap().users.insert(id, email.to_string());
        id
    }

    /// Make the next `times` article writes fail as if the database dropped
    /// the connection.
    pub fn fail_article_writes(&self, times: usize) {
        self.state.lock().unwrap().failing_article_writes = times;
    }

    pub fn articles(&self) -> Vec<ArticleEntity> {
        self.state.lock().unwrap().articles.values().cloned().collect()
    }

    pub fn article(&self, id: &str) -> Option<ArticleEntity> {
        self.state.lock().unwrap().articles.get(id).cloned()
    }

    pub fn categories(&self) -> Vec<CategoryEntity> {
        self.state.lock().unwrap().categories.values().cloned().collect()
    }

    pub fn tags(&self) -> Vec<TagEntity> {
        self.state.lock().unwrap().tags.values().cloned().collect()
    }

    pub fn article_tags(&self) -> Vec<ArticleTagLink> {
        self.state.lock().unwrap().article_tags.iter().cloned().collect()
    }

    /// Number of `create_category` calls received, including ones that hit an
    /// existing slug.
    pub fn category_creates(&self) -> usize {
        self.state.lock().unwrap().category_creates
    }

    /// Seed a category directly (e.g. one created outside the import).
    pub fn insert_category(&self, category: CategoryEntity) {
        self.state
            .lock()
            .unwrap()
            .categories
            .insert(category.slug.clone(), category);
    }

    /// Seed a tag directly.
    pub fn insert_tag(&self, tag: TagEntity) {
        self.state.lock().unwrap().tags.insert(tag.slug.clone(), tag);
    }
}

#[async_trait]
impl ImportStore for MemoryImportStore {
    async fn find_author(&self, author: &AuthorSource) -> Result<Option<Uuid>> {
        let state = self.state.lock().unwrap();
        let found = match author {
            AuthorSource::Id(id) => state.users.contains_key(id).then_some(*id),
            AuthorSource::Email(email) => state
                .users
                .iter()
                .find(|(_, e)| e.eq_ignore_ascii_case(email))
                .map(|(id, _)| *id),
        };
        Ok(found)
    }

    async fn load_categories(&self) -> Result<Vec<CategoryEntity>> {
        Ok(self.categories())
    }

    async fn load_tags(&self) -> Result<Vec<TagEntity>> {
        Ok(self.tags())
    }

    async fn load_imported_ids(&self, source: &str) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .articles
            .values()
            .filter(|a| a.source == source)
            .map(|a| a.source_id.clone())
            .collect())
    }

    async fn create_category(&self, candidate: &CategoryEntity) -> Result<CategoryEntity> {
        let mut state = self.state.lock().unwrap();
        state.category_creates += 1;
        let stored = state
            .categories
            .entry(candidate.slug.clone())
            .or_insert_with(|| candidate.clone());
        Ok(stored.clone())
    }

    async fn insert_tags(&self, tags: &[TagEntity]) -> Result<Vec<TagEntity>> {
        let mut state = self.state.lock().unwrap();
        let mut inserted = Vec::new();
        for tag in tags {
            if !state.tags.contains_key(&tag.slug) {
                state.tags.insert(tag.slug.clone(), tag.clone());
                inserted.push(tag.clone());
            }
        }
        Ok(inserted)
    }

    async fn find_tags(&self, slugs: &[String]) -> Result<Vec<TagEntity>> {
        let state = self.state.lock().unwrap();
        Ok(slugs
            .iter()
            .filter_map(|slug| state.tags.get(slug).cloned())
            .collect())
    }

    async fn insert_articles(&self, articles: &[ArticleEntity]) -> Result<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        if state.failing_article_writes > 0 {
            state.failing_article_writes -= 1;
            return Err(StoreError::Unavailable(
                "connection reset by peer".to_string(),
            ));
        }

        let mut inserted = Vec::new();
        for article in articles {
            let slug_taken = state.articles.values().any(|a| a.slug == article.slug);
            if state.articles.contains_key(&article.id) || slug_taken {
                continue;
            }
            state.articles.insert(article.id.clone(), article.clone());
            inserted.push(article.id.clone());
        }
        Ok(inserted)
    }

    async fn find_article_ids(&self, ids: &[String]) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        Ok(ids
            .iter()
            .filter(|id| state.articles.contains_key(*id))
            .cloned()
            .collect())
    }

    async fn insert_article_tags(&self, links: &[ArticleTagLink]) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let mut inserted = 0;
        for link in links {
            let tag_exists = state.tags.values().any(|t| t.id == link.tag_id);
            if !state.articles.contains_key(&link.article_id) || !tag_exists {
                continue;
            }
            if state.article_tags.insert(link.clone()) {
                inserted += 1;
            }
        }
        Ok(inserted)
    }
}
