use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use uuid::Uuid;

use crate::error::ConfigError;
use crate::slug::title_case;

pub const DEFAULT_IMPORT_SOURCE: &str = "cms-import";
pub const DEFAULT_CATEGORY_COLOR: &str = "#6b7280";

/// Who imported articles are attributed to when the export carries no usable
/// author.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorSource {
    Id(Uuid),
    Email(String),
}

impl std::fmt::Display for AuthorSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthorSource::Id(id) => write!(f, "id {id}"),
            AuthorSource::Email(email) => write!(f, "email {email}"),
        }
    }
}

/// Settings that come from the environment (secrets and per-deployment values).
/// Section mapping and other tuning lives in the optional TOML `FileConfig`.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub author: AuthorSource,
    /// Prefix joined onto image storage keys.
    pub image_base_url: String,
    /// Provenance marker written to `articles.source`.
    pub import_source: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config = Self::from_vars(|key| std::env::var(key).ok())?;
        config.log_redacted();
        Ok(config)
    }

    /// Build from an arbitrary variable lookup. `from_env` is this over the
    /// process environment.
    pub fn from_vars(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        let database_url = non_empty("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let author = match (non_empty("IMPORT_AUTHOR_ID"), non_empty("IMPORT_AUTHOR_EMAIL")) {
            (Some(id), _) => {
                let id = Uuid::parse_str(id.trim()).map_err(|e| ConfigError::Invalid {
                    key: "IMPORT_AUTHOR_ID",
                    message: e.to_string(),
                })?;
                AuthorSource::Id(id)
            }
            (None, Some(email)) => AuthorSource::Email(email.trim().to_string()),
            (None, None) => return Err(ConfigError::Missing("IMPORT_AUTHOR_EMAIL")),
        };

        Ok(Self {
            database_url,
            author,
            image_base_url: non_empty("IMAGE_BASE_URL").unwrap_or_default(),
            import_source: non_empty("IMPORT_SOURCE")
                .unwrap_or_else(|| DEFAULT_IMPORT_SOURCE.to_string()),
        })
    }

    fn log_redacted(&self) {
        // Keep scheme and host only; credentials never reach the logs.
        let db = self
            .database_url
            .split('@')
            .nth(1)
            .map(|host| format!("postgres://***@{host}"))
            .unwrap_or_else(|| "<set>".to_string());

        tracing::info!(
            database = db.as_str(),
            author = ?self.author,
            image_base_url = self.image_base_url.as_str(),
            import_source = self.import_source.as_str(),
            "Import config loaded"
        );
        if self.image_base_url.is_empty() {
            tracing::warn!("IMAGE_BASE_URL not set; image keys will be stored unprefixed");
        }
    }
}

// --- TOML file config ---

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Extra or overriding entries for the section mapping table, keyed by
    /// section slug.
    #[serde(default)]
    pub categories: HashMap<String, CategoryStyle>,
    pub default_color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CategoryStyle {
    pub name: String,
    pub color: Option<String>,
}

pub fn load_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

// --- Section mapping ---

const BUILTIN_SECTIONS: &[(&str, &str, &str)] = &[
    ("news", "News", "#ef4444"),
    ("politics", "Politics", "#b91c1c"),
    ("business", "Business", "#0ea5e9"),
    ("technology", "Technology", "#3b82f6"),
    ("sports", "Sports", "#22c55e"),
    ("entertainment", "Entertainment", "#a855f7"),
    ("opinion", "Opinion", "#f59e0b"),
    ("lifestyle", "Lifestyle", "#ec4899"),
    ("health", "Health", "#14b8a6"),
    ("science", "Science", "#6366f1"),
    ("world", "World", "#64748b"),
    ("local", "Local", "#84cc16"),
];

/// Translates well-known CMS section slugs to category display names and
/// colors. Unknown slugs fall back to the section's own name and the default
/// color.
#[derive(Debug, Clone)]
pub struct CategoryMapping {
    entries: HashMap<String, CategoryStyle>,
    default_color: String,
}

impl Default for CategoryMapping {
    fn default() -> Self {
        Self::builtin()
    }
}

impl CategoryMapping {
    pub fn builtin() -> Self {
        let entries = BUILTIN_SECTIONS
            .iter()
            .map(|(slug, name, color)| {
                (
                    slug.to_string(),
                    CategoryStyle {
                        name: name.to_string(),
                        color: Some(color.to_string()),
                    },
                )
            })
            .collect();
        Self {
            entries,
            default_color: DEFAULT_CATEGORY_COLOR.to_string(),
        }
    }

    pub fn with_file_config(file: &FileConfig) -> Self {
        let mut mapping = Self::builtin();
        for (slug, style) in &file.categories {
            mapping.entries.insert(slug.clone(), style.clone());
        }
        if let Some(color) = &file.default_color {
            mapping.default_color = color.clone();
        }
        mapping
    }

    pub fn default_color(&self) -> &str {
        &self.default_color
    }

    /// Display name and color for a section slug.
    pub fn style_for(&self, slug: &str, external_name: Option<&str>) -> (String, String) {
        match self.entries.get(slug) {
            Some(style) => (
                style.name.clone(),
                style
                    .color
                    .clone()
                    .unwrap_or_else(|| self.default_color.clone()),
            ),
            None => {
                let name = external_name
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| title_case(slug));
                (name, self.default_color.clone())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn config_requires_database_url() {
        let err = AppConfig::from_vars(vars(&[("IMPORT_AUTHOR_EMAIL", "a@b.c")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("DATABASE_URL")));
    }

    #[test]
    fn config_requires_some_author() {
        let err = AppConfig::from_vars(vars(&[("DATABASE_URL", "postgres://x")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("IMPORT_AUTHOR_EMAIL")));
    }

    #[test]
    fn author_id_wins_over_email() {
        let id = Uuid::new_v4();
        let id_str = id.to_string();
        let config = AppConfig::from_vars(vars(&[
            ("DATABASE_URL", "postgres://x"),
            ("IMPORT_AUTHOR_ID", id_str.as_str()),
            ("IMPORT_AUTHOR_EMAIL", "a@b.c"),
        ]))
        .unwrap();
        assert_eq!(config.author, AuthorSource::Id(id));
        assert_eq!(config.import_source, DEFAULT_IMPORT_SOURCE);
    }

    #[test]
    fn bad_author_id_is_invalid() {
        let err = AppConfig::from_vars(vars(&[
            ("DATABASE_URL", "postgres://x"),
            ("IMPORT_AUTHOR_ID", "not-a-uuid"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "IMPORT_AUTHOR_ID", .. }));
    }

    #[test]
    fn mapping_known_and_unknown_slugs() {
        let mapping = CategoryMapping::builtin();
        assert_eq!(
            mapping.style_for("technology", Some("Tech")),
            ("Technology".to_string(), "#3b82f6".to_string())
        );
        assert_eq!(
            mapping.style_for("news-local", Some("Local News")),
            ("Local News".to_string(), DEFAULT_CATEGORY_COLOR.to_string())
        );
        assert_eq!(
            mapping.style_for("real-estate", None),
            ("Real Estate".to_string(), DEFAULT_CATEGORY_COLOR.to_string())
        );
    }

    #[test]
    fn file_config_overrides_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storyport.toml");
        std::fs::write(
            &path,
            r##"
default_color = "#000000"

[categories.technology]
name = "Tech"

[categories.real-estate]
name = "Homes"
color = "#ffffff"
"##,
        )
        .unwrap();

        let file = load_config(&path).unwrap();
        let mapping = CategoryMapping::with_file_config(&file);
        assert_eq!(
            mapping.style_for("technology", None),
            ("Tech".to_string(), "#000000".to_string())
        );
        assert_eq!(
            mapping.style_for("real-estate", None),
            ("Homes".to_string(), "#ffffff".to_string())
        );
        assert_eq!(mapping.default_color(), "#000000");
    }

    #[test]
    fn file_config_rejects_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storyport.toml");
        std::fs::write(&path, "batch = 5\n").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Parse { .. })));
    }
}
