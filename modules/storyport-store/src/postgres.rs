//! ImportStore backed by Postgres.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};
use storyport_common::{ArticleEntity, ArticleTagLink, AuthorSource, CategoryEntity, TagEntity};
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::traits::ImportStore;

/// Postgres caps a statement at 65535 bind parameters.
const MAX_BIND_PARAMS: usize = 65_535;
const ARTICLE_COLUMNS: usize = 18;

#[derive(Clone)]
pub struct PgImportStore {
    pool: PgPool,
}

impl PgImportStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with a small pool. The import is single-pass; a handful of
    /// connections covers the cache loads and the batch writes.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

type CategoryRow = (Uuid, String, String, String);
type TagRow = (Uuid, String, String);

fn category_from_row((id, slug, name, color): CategoryRow) -> CategoryEntity {
    CategoryEntity {
        id,
        slug,
        name,
        color,
    }
}

fn tag_from_row((id, slug, name): TagRow) -> TagEntity {
    TagEntity { id, slug, name }
}

#[async_trait]
impl ImportStore for PgImportStore {
    async fn find_author(&self, author: &AuthorSource) -> Result<Option<Uuid>> {
        let row = match author {
            AuthorSource::Id(id) => {
                sqlx::query_as::<_, (Uuid,)>("SELECT id FROM users WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?
            }
            AuthorSource::Email(email) => {
                sqlx::query_as::<_, (Uuid,)>(
                    "SELECT id FROM users WHERE lower(email) = lower($1) LIMIT 1",
                )
                .bind(email)
                .fetch_optional(&self.pool)
                .await?
            }
        };
        Ok(row.map(|(id,)| id))
    }

    async fn load_categories(&self) -> Result<Vec<CategoryEntity>> {
        let rows = sqlx::query_as::<_, CategoryRow>(
            "SELECT id, slug, name, color FROM categories ORDER BY slug",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(category_from_row).collect())
    }

    async fn load_tags(&self) -> Result<Vec<TagEntity>> {
        let rows = sqlx::query_as::<_, TagRow>("SELECT id, slug, name FROM tags ORDER BY slug")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(tag_from_row).collect())
    }

    async fn load_imported_ids(&self, source: &str) -> Result<Vec<String>> {
        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT source_id FROM articles WHERE source = $1 AND source_id IS NOT NULL",
        )
        .bind(source)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn create_category(&self, candidate: &CategoryEntity) -> Result<CategoryEntity> {
        // Insert, on conflict return the existing row
        let row = sqlx::query_as::<_, CategoryRow>(
            r#"
            INSERT INTO categories (id, slug, name, color)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (slug) DO UPDATE SET slug = EXCLUDED.slug
            RETURNING id, slug, name, color
            "#,
        )
        .bind(candidate.id)
        .bind(&candidate.slug)
        .bind(&candidate.name)
        .bind(&candidate.color)
        .fetch_one(&self.pool)
        .await?;
        Ok(category_from_row(row))
    }

    async fn insert_tags(&self, tags: &[TagEntity]) -> Result<Vec<TagEntity>> {
        if tags.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = tags.iter().map(|t| t.id).collect();
        let slugs: Vec<String> = tags.iter().map(|t| t.slug.clone()).collect();
        let names: Vec<String> = tags.iter().map(|t| t.name.clone()).collect();

        let rows = sqlx::query_as::<_, TagRow>(
            r#"
            INSERT INTO tags (id, slug, name)
            SELECT * FROM UNNEST($1::uuid[], $2::text[], $3::text[])
            ON CONFLICT (slug) DO NOTHING
            RETURNING id, slug, name
            "#,
        )
        .bind(&ids)
        .bind(&slugs)
        .bind(&names)
        .fetch_all(&self.pool)
        .await?;

        debug!(requested = tags.len(), inserted = rows.len(), "Inserted tags");
        Ok(rows.into_iter().map(tag_from_row).collect())
    }

    async fn find_tags(&self, slugs: &[String]) -> Result<Vec<TagEntity>> {
        if slugs.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, TagRow>(
            "SELECT id, slug, name FROM tags WHERE slug = ANY($1)",
        )
        .bind(slugs)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(tag_from_row).collect())
    }

    async fn insert_articles(&self, articles: &[ArticleEntity]) -> Result<Vec<String>> {
        if articles.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = Vec::with_capacity(articles.len());

        for chunk in articles.chunks(MAX_BIND_PARAMS / ARTICLE_COLUMNS) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                r#"
                INSERT INTO articles (
                    id, title, slug, content, excerpt, hero_image_url, category_id,
                    author_id, kind, status, meta_title, meta_description, meta_keywords,
                    created_at, updated_at, published_at, source, source_id
                )
                "#,
            );
            qb.push_values(chunk, |mut row, article| {
                row.push_bind(&article.id)
                    .push_bind(&article.title)
                    .push_bind(&article.slug)
                    .push_bind(&article.content)
                    .push_bind(&article.excerpt)
                    .push_bind(&article.hero_image_url)
                    .push_bind(article.category_id)
                    .push_bind(article.author_id)
                    .push_bind(article.kind.as_str())
                    .push_bind(article.status.as_str())
                    .push_bind(&article.meta_title)
                    .push_bind(&article.meta_description)
                    .push_bind(&article.meta_keywords)
                    .push_bind(article.created_at)
                    .push_bind(article.updated_at)
                    .push_bind(article.published_at)
                    .push_bind(&article.source)
                    .push_bind(&article.source_id);
            });
            // No conflict target: id and slug collisions both leave the row out
            // of RETURNING, and the caller tells them apart.
            qb.push(" ON CONFLICT DO NOTHING RETURNING id");

            let rows: Vec<(String,)> = qb.build_query_as().fetch_all(&mut *tx).await?;
            inserted.extend(rows.into_iter().map(|(id,)| id));
        }

        tx.commit().await?;
        debug!(requested = articles.len(), inserted = inserted.len(), "Inserted articles");
        Ok(inserted)
    }

    async fn find_article_ids(&self, ids: &[String]) -> Result<Vec<String>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, (String,)>("SELECT id FROM articles WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn insert_article_tags(&self, links: &[ArticleTagLink]) -> Result<u64> {
        if links.is_empty() {
            return Ok(0);
        }

        let article_ids: Vec<String> = links.iter().map(|l| l.article_id.clone()).collect();
        let tag_ids: Vec<Uuid> = links.iter().map(|l| l.tag_id).collect();

        let result = sqlx::query(
            r#"
            INSERT INTO article_tags (article_id, tag_id)
            SELECT l.article_id, l.tag_id
            FROM UNNEST($1::text[], $2::uuid[]) AS l(article_id, tag_id)
            WHERE EXISTS (SELECT 1 FROM articles a WHERE a.id = l.article_id)
              AND EXISTS (SELECT 1 FROM tags t WHERE t.id = l.tag_id)
            ON CONFLICT (article_id, tag_id) DO NOTHING
            "#,
        )
        .bind(&article_ids)
        .bind(&tag_ids)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
