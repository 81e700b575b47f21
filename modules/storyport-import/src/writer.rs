//! Turns a batch of decoded stories into stored articles and tag links.
//!
//! Per batch: one tag resolution pass, per-record assembly and category
//! resolution, then one multi-row article insert and one multi-row link
//! insert. Nothing here returns an error; every failure ends up counted in
//! the `BatchOutcome`.
//!
//! Article slugs are unique in the store while derived slugs (from headlines)
//! are not. A slug already used earlier in the batch, or rejected by the store
//! for a row whose id is new, gets the story id appended and is retried once.
//! Only rows whose id already exists count as skipped.

use std::collections::{BTreeSet, HashSet};

use storyport_common::slug::slugify;
use storyport_common::{ArticleEntity, ArticleTagLink, StoryRecord};
use storyport_store::{ImportStore, StoreError};
use thiserror::Error;
use tracing::{debug, warn};

use crate::assemble::ArticleAssembler;
use crate::error::TransformError;
use crate::error_log::ErrorRef;
use crate::resolver::{tag_slug, EntityResolver, TagResolution};

/// A decoded story waiting in the accumulator, with the line it came from.
#[derive(Debug, Clone)]
pub struct PendingStory {
    pub line: u64,
    pub story: StoryRecord,
}

impl PendingStory {
    pub fn reference(&self) -> ErrorRef {
        if self.story.id.trim().is_empty() {
            ErrorRef::Line(self.line)
        } else {
            ErrorRef::Story(self.story.id.clone())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    pub reference: ErrorRef,
    pub message: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub imported: u64,
    pub skipped: u64,
    pub errors: u64,
    pub categories_created: u64,
    pub tags_created: u64,
    /// One entry per errored record, for the error log.
    pub failures: Vec<RecordFailure>,
}

impl BatchOutcome {
    fn fail(&mut self, reference: ErrorRef, message: impl Into<String>) {
        self.errors += 1;
        self.failures.push(RecordFailure {
            reference,
            message: message.into(),
        });
    }
}

#[derive(Error, Debug)]
enum RecordError {
    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("category resolution failed: {0}")]
    Category(#[from] StoreError),
}

pub struct BatchWriter {
    assembler: ArticleAssembler,
    dry_run: bool,
}

impl BatchWriter {
    pub fn new(assembler: ArticleAssembler, dry_run: bool) -> Self {
        Self { assembler, dry_run }
    }

    pub async fn write<S: ImportStore + ?Sized>(
        &self,
        store: &S,
        resolver: &mut EntityResolver,
        batch: &[PendingStory],
    ) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        if batch.is_empty() {
            return outcome;
        }

        let tags = match resolver
            .resolve_tags(store, batch.iter().flat_map(|p| p.story.tags.iter()))
            .await
        {
            Ok(tags) => tags,
            Err(e) => {
                warn!(records = batch.len(), error = %e, "Tag resolution failed; batch dropped");
                for pending in batch {
                    outcome.fail(pending.reference(), format!("batch failed: tag resolution: {e}"));
                }
                return outcome;
            }
        };
        outcome.tags_created = tags.created;

        let mut articles: Vec<ArticleEntity> = Vec::with_capacity(batch.len());
        let mut assembled: Vec<&PendingStory> = Vec::with_capacity(batch.len());
        let mut links: BTreeSet<ArticleTagLink> = BTreeSet::new();
        let mut slugs: HashSet<String> = HashSet::with_capacity(batch.len());

        for pending in batch {
            match self.prepare(store, resolver, &pending.story).await {
                Ok((mut article, category_created)) => {
                    if category_created {
                        outcome.categories_created += 1;
                    }
                    if !slugs.insert(article.slug.clone()) {
                        article.slug = unique_slug(&article.slug, &article.id);
                        slugs.insert(article.slug.clone());
                    }
                    links.extend(tag_links(&article.id, &pending.story, &tags));
                    articles.push(article);
                    assembled.push(pending);
                }
                Err(e) => {
                    warn!(story_id = pending.story.id.as_str(), line = pending.line, error = %e, "Record excluded from batch");
                    outcome.fail(pending.reference(), e.to_string());
                }
            }
        }

        if articles.is_empty() {
            return outcome;
        }

        if self.dry_run {
            outcome.imported += articles.len() as u64;
            debug!(articles = articles.len(), links = links.len(), "Dry run: batch not written");
            return outcome;
        }

        let links: Vec<ArticleTagLink> = links.into_iter().collect();
        let mut inserted: HashSet<String> = match store.insert_articles(&articles).await {
            Ok(ids) => ids.into_iter().collect(),
            Err(e) => {
                fail_written(&mut outcome, &assembled, "article insert", &e);
                return outcome;
            }
        };

        let leftover: Vec<usize> = (0..articles.len())
            .filter(|&i| !inserted.contains(&articles[i].id))
            .collect();
        let mut existing = 0u64;
        let mut rejected: Vec<(usize, String)> = Vec::new();
        if !leftover.is_empty() {
            let settled = settle_leftovers(store, &articles, &leftover).await;
            existing = settled.existing;
            inserted.extend(settled.inserted);
            rejected = settled.rejected;
        }

        if let Err(e) = store.insert_article_tags(&links).await {
            fail_written(&mut outcome, &assembled, "tag link insert", &e);
            return outcome;
        }

        outcome.imported += inserted.len() as u64;
        outcome.skipped += existing;
        for (i, message) in rejected {
            let pending = assembled[i];
            warn!(story_id = pending.story.id.as_str(), line = pending.line, error = message.as_str(), "Article not stored");
            outcome.fail(pending.reference(), message);
        }
        debug!(
            assembled = articles.len(),
            inserted = inserted.len(),
            existing,
            links = links.len(),
            "Batch written"
        );
        outcome
    }

    async fn prepare<S: ImportStore + ?Sized>(
        &self,
        store: &S,
        resolver: &mut EntityResolver,
        story: &StoryRecord,
    ) -> Result<(ArticleEntity, bool), RecordError> {
        let mut article = self.assembler.assemble(story)?;

        let mut category_created = false;
        if let Some(section) = story.primary_section() {
            let slug = slugify(&section.id);
            if slug.is_empty() {
                return Err(TransformError::EmptySection(section.id.clone()).into());
            }
            let resolved = resolver
                .resolve_category(store, &slug, section.name.as_deref())
                .await?;
            article.category_id = Some(resolved.id);
            category_created = resolved.created;
        }

        Ok((article, category_created))
    }
}

/// Where the articles the first insert left out ended up.
#[derive(Debug, Default)]
struct Settled {
    /// Ids stored by the retry under a disambiguated slug.
    inserted: Vec<String>,
    /// Rows whose id was already stored.
    existing: u64,
    /// Index into the batch's articles, with the reason.
    rejected: Vec<(usize, String)>,
}

/// Sort rows the first insert skipped into "id already stored" and "slug
/// taken". The latter are retried once with a disambiguated slug.
async fn settle_leftovers<S: ImportStore + ?Sized>(
    store: &S,
    articles: &[ArticleEntity],
    leftover: &[usize],
) -> Settled {
    let mut settled = Settled::default();

    let ids: Vec<String> = leftover.iter().map(|&i| articles[i].id.clone()).collect();
    let found: HashSet<String> = match store.find_article_ids(&ids).await {
        Ok(found) => found.into_iter().collect(),
        Err(e) => {
            settled.rejected = leftover
                .iter()
                .map(|&i| (i, format!("article lookup failed: {e}")))
                .collect();
            return settled;
        }
    };

    let mut retry: Vec<ArticleEntity> = Vec::new();
    let mut retry_from: Vec<usize> = Vec::new();
    for &i in leftover {
        if found.contains(&articles[i].id) {
            settled.existing += 1;
        } else {
            let mut article = articles[i].clone();
            article.slug = unique_slug(&article.slug, &article.id);
            debug!(story_id = article.id.as_str(), slug = article.slug.as_str(), "Slug taken; retrying");
            retry.push(article);
            retry_from.push(i);
        }
    }
    if retry.is_empty() {
        return settled;
    }

    match store.insert_articles(&retry).await {
        Ok(ids) => {
            let stored: HashSet<String> = ids.into_iter().collect();
            for (article, i) in retry.into_iter().zip(retry_from) {
                if stored.contains(&article.id) {
                    settled.inserted.push(article.id);
                } else {
                    settled
                        .rejected
                        .push((i, format!("slug {:?} is already taken", article.slug)));
                }
            }
        }
        Err(e) => {
            settled.rejected = retry_from
                .into_iter()
                .map(|i| (i, format!("article insert failed: {e}")))
                .collect();
        }
    }
    settled
}

/// `live-updates` for story `S2` -> `live-updates-s2`.
fn unique_slug(slug: &str, id: &str) -> String {
    let suffix = slugify(id);
    let suffix = if suffix.is_empty() { id.trim() } else { suffix.as_str() };
    format!("{slug}-{suffix}")
}

fn fail_written(
    outcome: &mut BatchOutcome,
    assembled: &[&PendingStory],
    stage: &str,
    error: &StoreError,
) {
    warn!(records = assembled.len(), stage, error = %error, "Batch write failed; records counted as errors");
    for pending in assembled {
        outcome.fail(pending.reference(), format!("batch failed: {stage}: {error}"));
    }
}

fn tag_links(article_id: &str, story: &StoryRecord, tags: &TagResolution) -> Vec<ArticleTagLink> {
    story
        .tags
        .iter()
        .filter_map(|tag| tags.ids.get(&tag_slug(tag)))
        .map(|tag_id| ArticleTagLink {
            article_id: article_id.to_string(),
            tag_id: *tag_id,
        })
        .collect()
}
