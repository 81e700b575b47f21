//! Category and tag resolution against an in-memory cache.
//!
//! The cache is loaded once from the store and is the single source of truth
//! for external key → internal id afterwards. Misses create the entity once
//! and populate the cache, so no key is ever created twice within a run.

use std::collections::{HashMap, HashSet};

use storyport_common::slug::slugify;
use storyport_common::{CategoryEntity, CategoryMapping, TagEntity, TagRef};
use storyport_store::{ImportStore, StoreError};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// External key → internal id. Categories are reachable by slug and by
/// (case-folded) display name.
#[derive(Debug, Default)]
pub struct EntityCache {
    categories_by_slug: HashMap<String, Uuid>,
    categories_by_name: HashMap<String, Uuid>,
    tags: HashMap<String, Uuid>,
}

impl EntityCache {
    pub fn from_entities(categories: Vec<CategoryEntity>, tags: Vec<TagEntity>) -> Self {
        let mut cache = Self::default();
        for category in &categories {
            cache.cache_category(category);
        }
        for tag in &tags {
            cache.cache_tag(tag);
        }
        cache
    }

    pub fn cache_category(&mut self, category: &CategoryEntity) {
        self.categories_by_slug
            .insert(category.slug.clone(), category.id);
        self.categories_by_name
            .entry(category.name.to_lowercase())
            .or_insert(category.id);
    }

    pub fn cache_tag(&mut self, tag: &TagEntity) {
        self.tags.insert(tag.slug.clone(), tag.id);
    }

    pub fn category_by_slug(&self, slug: &str) -> Option<Uuid> {
        self.categories_by_slug.get(slug).copied()
    }

    pub fn category_by_name(&self, name: &str) -> Option<Uuid> {
        self.categories_by_name.get(&name.to_lowercase()).copied()
    }

    pub fn tag(&self, slug: &str) -> Option<Uuid> {
        self.tags.get(slug).copied()
    }

    pub fn category_count(&self) -> usize {
        self.categories_by_slug.len()
    }

    pub fn tag_count(&self) -> usize {
        self.tags.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryResolution {
    pub id: Uuid,
    pub created: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TagResolution {
    /// Tag slug → id for every reference that could be resolved.
    pub ids: HashMap<String, Uuid>,
    pub created: u64,
    /// References with neither a slug nor any text.
    pub ignored: u64,
}

/// Key a tag reference is cached under: its own slug, else its slugified
/// text, else (text made only of symbols) the text's UTF-8 bytes in hex.
/// Empty only when the reference carries no text at all.
pub fn tag_slug(tag: &TagRef) -> String {
    let text = tag.text.trim();
    tag.slug
        .as_deref()
        .map(slugify)
        .filter(|s| !s.is_empty())
        .or_else(|| Some(slugify(text)).filter(|s| !s.is_empty()))
        .unwrap_or_else(|| {
            if text.is_empty() {
                String::new()
            } else {
                let hex: String = text.bytes().map(|b| format!("{b:02x}")).collect();
                format!("tag-{hex}")
            }
        })
}

pub struct EntityResolver {
    cache: EntityCache,
    mapping: CategoryMapping,
    dry_run: bool,
}

impl EntityResolver {
    pub fn new(cache: EntityCache, mapping: CategoryMapping, dry_run: bool) -> Self {
        Self {
            cache,
            mapping,
            dry_run,
        }
    }

    /// Load every category and tag from the store into a fresh cache.
    pub async fn preload<S: ImportStore + ?Sized>(
        store: &S,
        mapping: CategoryMapping,
        dry_run: bool,
    ) -> Result<Self, StoreError> {
        let categories = store.load_categories().await?;
        let tags = store.load_tags().await?;
        let cache = EntityCache::from_entities(categories, tags);
        info!(
            categories = cache.category_count(),
            tags = cache.tag_count(),
            "Entity cache loaded"
        );
        Ok(Self::new(cache, mapping, dry_run))
    }

    pub fn cache(&self) -> &EntityCache {
        &self.cache
    }

    /// Resolve a normalized section slug to a category id, creating the
    /// category on a miss.
    pub async fn resolve_category<S: ImportStore + ?Sized>(
        &mut self,
        store: &S,
        slug: &str,
        external_name: Option<&str>,
    ) -> Result<CategoryResolution, StoreError> {
        if let Some(id) = self.cache.category_by_slug(slug) {
            return Ok(CategoryResolution { id, created: false });
        }

        let (name, color) = self.mapping.style_for(slug, external_name);
        if let Some(id) = self.cache.category_by_name(&name) {
            // Same category under a different slug (e.g. created by hand).
            self.cache.categories_by_slug.insert(slug.to_string(), id);
            return Ok(CategoryResolution { id, created: false });
        }

        let candidate = CategoryEntity {
            id: Uuid::new_v4(),
            slug: slug.to_string(),
            name,
            color,
        };

        let stored = if self.dry_run {
            candidate.clone()
        } else {
            store.create_category(&candidate).await?
        };

        let created = stored.id == candidate.id;
        self.cache.cache_category(&stored);
        debug!(slug, id = %stored.id, created, "Category cache miss resolved");

        Ok(CategoryResolution {
            id: stored.id,
            created,
        })
    }

    /// Resolve every tag referenced by one batch with at most one insert and
    /// one follow-up lookup.
    ///
    /// References are de-duplicated by slug before the insert; the first
    /// occurrence's text becomes the display name. Slugs that conflict with a
    /// row the cache never saw are re-read; anything still unresolved is
    /// omitted from the result.
    pub async fn resolve_tags<'t, S: ImportStore + ?Sized>(
        &mut self,
        store: &S,
        refs: impl IntoIterator<Item = &'t TagRef>,
    ) -> Result<TagResolution, StoreError> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut requested: Vec<String> = Vec::new();
        let mut missing: Vec<TagEntity> = Vec::new();
        let mut ignored = 0;

        for tag in refs {
            let slug = tag_slug(tag);
            if slug.is_empty() {
                ignored += 1;
                continue;
            }
            if !seen.insert(slug.clone()) {
                continue;
            }
            requested.push(slug.clone());
            if self.cache.tag(&slug).is_none() {
                missing.push(TagEntity {
                    id: Uuid::new_v4(),
                    slug,
                    name: tag.text.trim().to_string(),
                });
            }
        }

        if ignored > 0 {
            warn!(ignored, "Tag references without a slug or text ignored");
        }

        let mut created = 0;
        if !missing.is_empty() {
            let inserted = if self.dry_run {
                missing.clone()
            } else {
                store.insert_tags(&missing).await?
            };
            for tag in &inserted {
                self.cache.cache_tag(tag);
            }
            created = inserted.len() as u64;

            let unresolved: Vec<String> = missing
                .iter()
                .filter(|t| self.cache.tag(&t.slug).is_none())
                .map(|t| t.slug.clone())
                .collect();
            if !unresolved.is_empty() {
                for tag in store.find_tags(&unresolved).await? {
                    self.cache.cache_tag(&tag);
                }
            }
        }

        let mut ids = HashMap::with_capacity(requested.len());
        for slug in requested {
            match self.cache.tag(&slug) {
                Some(id) => {
                    ids.insert(slug, id);
                }
                None => warn!(slug = slug.as_str(), "Tag could not be resolved; link omitted"),
            }
        }

        Ok(TagResolution {
            ids,
            created,
            ignored,
        })
    }
}
