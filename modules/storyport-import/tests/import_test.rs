//! End-to-end import runs against the in-memory store. No database needed.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::write::GzEncoder;
use serde_json::json;
use storyport_common::{AuthorSource, CategoryMapping};
use storyport_import::{
    ErrorLog, FileCheckpointStore, ImportError, ImportOptions, ImportRun, ImportSettings,
    ImportSummary, MemoryCheckpointStore, RunPhase,
};
use storyport_store::MemoryImportStore;
use tempfile::TempDir;

const AUTHOR_EMAIL: &str = "desk@example.com";

fn story(id: &str, section: &str, tags: &[&str]) -> String {
    json!({
        "id": id,
        "headline": format!("Story {id}"),
        "subheadline": "A short dek",
        "body": [
            {"type": "text", "content": "Opening paragraph."},
            {"type": "image", "key": "2024/photo.jpg", "alt_text": "Photo"},
            {"type": "related_reading", "stories": ["x"]}
        ],
        "sections": [{"id": format!("/{section}"), "name": section}],
        "tags": tags.iter().map(|t| json!({"text": t})).collect::<Vec<_>>(),
        "created_at": 1_700_000_000_000i64,
        "updated_at": 1_700_000_000_000i64,
        "published_at": 1_700_000_000_000i64
    })
    .to_string()
}

fn write_input(dir: &TempDir, name: &str, lines: &[String]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, lines.join("\n") + "\n").unwrap();
    path
}

fn settings() -> ImportSettings {
    ImportSettings {
        author: AuthorSource::Email(AUTHOR_EMAIL.to_string()),
        image_base_url: "https://cdn.example.com".to_string(),
        import_source: "cms-import".to_string(),
        mapping: CategoryMapping::builtin(),
    }
}

fn seeded_store() -> Arc<MemoryImportStore> {
    let store = Arc::new(MemoryImportStore::new());
    store.add_user(AUTHOR_EMAIL);
    store
}

fn options(input: &Path) -> ImportOptions {
    ImportOptions::builder().input(input).build()
}

async fn run_import(
    store: &Arc<MemoryImportStore>,
    checkpoints: &Arc<MemoryCheckpointStore>,
    log_path: &Path,
    options: ImportOptions,
) -> Result<ImportSummary, ImportError> {
    let error_log = ErrorLog::new(log_path, options.resume);
    let mut run = ImportRun::new(
        store.clone(),
        checkpoints.clone(),
        error_log,
        settings(),
        options,
    );
    run.run().await
}

/// Comparable view of everything the import persisted, independent of the
/// randomly generated category/tag ids.
fn persisted(store: &MemoryImportStore) -> Vec<(String, String, String, Option<String>, Vec<String>)> {
    let categories: BTreeMap<_, _> = store
        .categories()
        .into_iter()
        .map(|c| (c.id, c.slug))
        .collect();
    let tags: BTreeMap<_, _> = store.tags().into_iter().map(|t| (t.id, t.slug)).collect();
    let links = store.article_tags();

    store
        .articles()
        .into_iter()
        .map(|a| {
            let mut tag_slugs: Vec<String> = links
                .iter()
                .filter(|l| l.article_id == a.id)
                .map(|l| tags[&l.tag_id].clone())
                .collect();
            tag_slugs.sort();
            (
                a.id.clone(),
                a.slug.clone(),
                a.content.clone(),
                a.category_id.map(|id| categories[&id].clone()),
                tag_slugs,
            )
        })
        .collect()
}

#[tokio::test]
async fn basic_import() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(
        &dir,
        "export.jsonl",
        &[
            story("A1", "technology", &[]),
            story("A2", "technology", &[]),
            story("A3", "technology", &[]),
        ],
    );
    let store = seeded_store();
    let checkpoints = Arc::new(MemoryCheckpointStore::new());
    let log = dir.path().join("errors.log");

    let summary = run_import(&store, &checkpoints, &log, options(&input)).await.unwrap();

    assert_eq!(summary.imported, 3);
    assert_eq!(summary.errors, 0);
    assert_eq!(summary.categories_created, 1);
    assert_eq!(summary.total_lines, Some(3));
    assert_eq!(store.articles().len(), 3);

    let categories = store.categories();
    assert_eq!(categories.len(), 1);
    assert_eq!(categories[0].slug, "technology");
    assert_eq!(categories[0].name, "Technology");

    let article = store.article("A1").unwrap();
    assert_eq!(article.source, "cms-import");
    assert_eq!(article.source_id, "A1");
    assert_eq!(article.category_id, Some(categories[0].id));
    assert_eq!(
        article.content,
        "<p>Opening paragraph.</p>\n<figure><img src=\"https://cdn.example.com/2024/photo.jpg\" alt=\"Photo\"></figure>"
    );

    // Final snapshot always written, error log only on failure.
    assert_eq!(checkpoints.latest().unwrap().last_line, 3);
    assert!(!log.exists());
    assert!(summary.error_log.is_none());
}

#[tokio::test]
async fn rerun_skips_already_imported_stories() {
    let dir = tempfile::tempdir().unwrap();
    let lines = vec![
        story("A1", "news", &["Budget"]),
        story("A2", "news", &["Budget", "Council"]),
        story("A3", "politics", &[]),
    ];
    let input = write_input(&dir, "export.jsonl", &lines);
    let store = seeded_store();
    let log = dir.path().join("errors.log");

    let first = run_import(
        &store,
        &Arc::new(MemoryCheckpointStore::new()),
        &log,
        options(&input),
    )
    .await
    .unwrap();
    let after_first = persisted(&store);

    let second = run_import(
        &store,
        &Arc::new(MemoryCheckpointStore::new()),
        &log,
        options(&input),
    )
    .await
    .unwrap();

    assert_eq!(first.imported, 3);
    assert_eq!(second.imported, 0);
    assert_eq!(second.skipped, 3);
    assert_eq!(second.categories_created, 0);
    assert_eq!(second.tags_created, 0);
    assert_eq!(persisted(&store), after_first);
}

#[tokio::test]
async fn malformed_line_is_counted_and_logged() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(
        &dir,
        "export.jsonl",
        &[
            story("A1", "world", &[]),
            "{\"id\": \"A2\", \"headline\": ".to_string(),
            String::new(),
            story("A3", "world", &[]),
        ],
    );
    let store = seeded_store();
    let log = dir.path().join("errors.log");

    let summary = run_import(
        &store,
        &Arc::new(MemoryCheckpointStore::new()),
        &log,
        options(&input),
    )
    .await
    .unwrap();

    assert_eq!(summary.imported, 2);
    assert_eq!(summary.errors, 1);
    // Blank line is neither processed nor an error.
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.error_log.as_deref(), Some(log.as_path()));

    let content = std::fs::read_to_string(&log).unwrap();
    assert_eq!(content.lines().count(), 1);
    assert!(content.contains("\tline 2\t"));
}

#[tokio::test]
async fn dry_run_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let lines: Vec<String> = (1..=5)
        .map(|i| story(&format!("D{i}"), "sports", &["Final"]))
        .collect();
    let input = write_input(&dir, "export.jsonl", &lines);
    let store = seeded_store();

    let summary = run_import(
        &store,
        &Arc::new(MemoryCheckpointStore::new()),
        &dir.path().join("errors.log"),
        ImportOptions::builder().input(&input).dry_run(true).build(),
    )
    .await
    .unwrap();

    assert!(summary.dry_run);
    assert_eq!(summary.imported, 5);
    assert_eq!(summary.categories_created, 1);
    assert_eq!(summary.tags_created, 1);
    assert!(store.articles().is_empty());
    assert!(store.categories().is_empty());
    assert!(store.tags().is_empty());
    assert!(store.article_tags().is_empty());
}

#[tokio::test]
async fn bad_record_does_not_sink_its_batch() {
    let dir = tempfile::tempdir().unwrap();
    let mut broken: serde_json::Value = serde_json::from_str(&story("B", "health", &[])).unwrap();
    broken["created_at"] = json!(i64::MAX);
    let input = write_input(
        &dir,
        "export.jsonl",
        &[
            story("A", "health", &[]),
            broken.to_string(),
            story("C", "health", &[]),
            story("D", "health", &[]),
        ],
    );
    let store = seeded_store();
    let log = dir.path().join("errors.log");

    let summary = run_import(
        &store,
        &Arc::new(MemoryCheckpointStore::new()),
        &log,
        ImportOptions::builder().input(&input).batch_size(10).build(),
    )
    .await
    .unwrap();

    assert_eq!(summary.imported, 3);
    assert_eq!(summary.errors, 1);
    assert!(store.article("B").is_none());
    assert!(std::fs::read_to_string(&log).unwrap().contains("\tstory B\t"));
}

#[tokio::test]
async fn one_category_per_section_across_batches() {
    let dir = tempfile::tempdir().unwrap();
    let lines: Vec<String> = (1..=7)
        .map(|i| story(&format!("S{i}"), "sports", &["Cup"]))
        .collect();
    let input = write_input(&dir, "export.jsonl", &lines);
    let store = seeded_store();

    let summary = run_import(
        &store,
        &Arc::new(MemoryCheckpointStore::new()),
        &dir.path().join("errors.log"),
        ImportOptions::builder().input(&input).batch_size(2).build(),
    )
    .await
    .unwrap();

    assert_eq!(summary.imported, 7);
    assert_eq!(summary.categories_created, 1);
    assert_eq!(summary.tags_created, 1);
    assert_eq!(store.categories().len(), 1);
    assert_eq!(store.category_creates(), 1);
    assert_eq!(store.tags().len(), 1);
    assert_eq!(store.article_tags().len(), 7);
}

#[tokio::test]
async fn resumed_run_matches_uninterrupted_run() {
    let dir = tempfile::tempdir().unwrap();
    let lines = vec![
        story("R1", "business", &["Markets"]),
        story("R2", "business", &["Markets", "Banks"]),
        story("R3", "science", &[]),
        story("R4", "science", &["Space"]),
        story("R5", "business", &["Banks"]),
        story("R6", "local", &[]),
    ];
    let input = write_input(&dir, "export.jsonl", &lines);

    // Uninterrupted reference run.
    let reference = seeded_store();
    run_import(
        &reference,
        &Arc::new(MemoryCheckpointStore::new()),
        &dir.path().join("reference.log"),
        ImportOptions::builder().input(&input).batch_size(3).build(),
    )
    .await
    .unwrap();

    // Stop after four lines, then resume.
    let store = seeded_store();
    let checkpoints = Arc::new(MemoryCheckpointStore::new());
    let log = dir.path().join("errors.log");
    let partial = run_import(
        &store,
        &checkpoints,
        &log,
        ImportOptions::builder()
            .input(&input)
            .batch_size(3)
            .limit(Some(4))
            .build(),
    )
    .await
    .unwrap();
    assert_eq!(partial.imported, 4);
    assert_eq!(checkpoints.latest().unwrap().last_line, 4);

    let resumed = run_import(
        &store,
        &checkpoints,
        &log,
        ImportOptions::builder()
            .input(&input)
            .batch_size(3)
            .resume(true)
            .build(),
    )
    .await
    .unwrap();

    assert_eq!(resumed.resumed_from, Some(4));
    assert_eq!(resumed.imported, 6);
    assert_eq!(resumed.processed, 6);
    assert_eq!(resumed.skipped, 0);
    assert_eq!(checkpoints.latest().unwrap().last_line, 6);
    assert_eq!(persisted(&store), persisted(&reference));
}

#[tokio::test]
async fn failed_batch_write_is_absorbed() {
    let dir = tempfile::tempdir().unwrap();
    let lines: Vec<String> = (1..=4)
        .map(|i| story(&format!("W{i}"), "opinion", &[]))
        .collect();
    let input = write_input(&dir, "export.jsonl", &lines);
    let store = seeded_store();
    store.fail_article_writes(1);
    let log = dir.path().join("errors.log");

    let summary = run_import(
        &store,
        &Arc::new(MemoryCheckpointStore::new()),
        &log,
        ImportOptions::builder().input(&input).batch_size(2).build(),
    )
    .await
    .unwrap();

    assert_eq!(summary.errors, 2);
    assert_eq!(summary.imported, 2);
    assert!(store.article("W1").is_none());
    assert!(store.article("W3").is_some());

    let content = std::fs::read_to_string(&log).unwrap();
    assert_eq!(content.lines().count(), 2);
    assert!(content.contains("batch failed"));
}

#[tokio::test]
async fn gzip_export_is_decompressed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("export.jsonl.gz");
    let mut encoder = GzEncoder::new(
        std::fs::File::create(&path).unwrap(),
        flate2::Compression::default(),
    );
    for id in ["G1", "G2"] {
        writeln!(encoder, "{}", story(id, "entertainment", &[])).unwrap();
    }
    encoder.finish().unwrap();
    let store = seeded_store();

    let summary = run_import(
        &store,
        &Arc::new(MemoryCheckpointStore::new()),
        &dir.path().join("errors.log"),
        options(&path),
    )
    .await
    .unwrap();

    assert_eq!(summary.imported, 2);
    assert_eq!(summary.total_lines, Some(2));
}

#[tokio::test]
async fn duplicate_within_file_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(
        &dir,
        "export.jsonl",
        &[story("X", "news", &[]), story("X", "news", &[])],
    );
    let store = seeded_store();

    let summary = run_import(
        &store,
        &Arc::new(MemoryCheckpointStore::new()),
        &dir.path().join("errors.log"),
        options(&input),
    )
    .await
    .unwrap();

    assert_eq!(summary.imported, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(store.articles().len(), 1);
}

#[tokio::test]
async fn stories_sharing_a_headline_are_all_imported() {
    let dir = tempfile::tempdir().unwrap();
    let lines: Vec<String> = ["S1", "S2", "S3"]
        .iter()
        .map(|id| {
            let mut value: serde_json::Value = serde_json::from_str(&story(id, "news", &["Gaza"])).unwrap();
            value["headline"] = json!("Live updates");
            value.to_string()
        })
        .collect();
    let input = write_input(&dir, "export.jsonl", &lines);
    let store = seeded_store();
    let log = dir.path().join("errors.log");
    let batched = || ImportOptions::builder().input(&input).batch_size(2).build();

    let summary = run_import(&store, &Arc::new(MemoryCheckpointStore::new()), &log, batched())
        .await
        .unwrap();

    assert_eq!(summary.imported, 3);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.errors, 0);
    let mut slugs: Vec<String> = store.articles().into_iter().map(|a| a.slug).collect();
    slugs.sort();
    assert_eq!(slugs, vec!["live-updates", "live-updates-s2", "live-updates-s3"]);
    assert_eq!(store.article_tags().len(), 3);

    let again = run_import(&store, &Arc::new(MemoryCheckpointStore::new()), &log, batched())
        .await
        .unwrap();
    assert_eq!(again.imported, 0);
    assert_eq!(again.skipped, 3);
    assert_eq!(store.articles().len(), 3);
}

#[tokio::test]
async fn non_latin_and_symbol_keys_stay_distinct() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(
        &dir,
        "export.jsonl",
        &[
            story("N1", "اقتصاد", &["اقتصاد", "C++", "C#"]),
            story("N2", "رياضة", &["C"]),
        ],
    );
    let store = seeded_store();

    let summary = run_import(
        &store,
        &Arc::new(MemoryCheckpointStore::new()),
        &dir.path().join("errors.log"),
        options(&input),
    )
    .await
    .unwrap();

    assert_eq!(summary.imported, 2);
    assert_eq!(summary.errors, 0);
    assert_eq!(summary.tags_created, 4);
    assert_eq!(summary.categories_created, 2);

    let mut categories: Vec<String> = store.categories().into_iter().map(|c| c.slug).collect();
    categories.sort();
    assert_eq!(categories, vec!["اقتصاد", "رياضة"]);

    let persisted = persisted(&store);
    assert_eq!(persisted[0].0, "N1");
    assert_eq!(persisted[0].3.as_deref(), Some("اقتصاد"));
    assert_eq!(persisted[0].4, vec!["c-plus-plus", "c-sharp", "اقتصاد"]);
    assert_eq!(persisted[1].4, vec!["c"]);
}

#[tokio::test]
async fn unopenable_input_fails_before_any_state_is_written() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store();
    let checkpoints = Arc::new(MemoryCheckpointStore::new());
    let log = dir.path().join("errors.log");

    let mut run = ImportRun::new(
        store.clone(),
        checkpoints.clone(),
        ErrorLog::new(&log, false),
        settings(),
        options(&dir.path().join("missing.jsonl.gz")),
    );
    let err = run.run().await.unwrap_err();

    assert!(matches!(err, ImportError::InputOpen { .. }));
    assert_eq!(run.phase(), RunPhase::Failed);
    assert!(checkpoints.saves().is_empty());
    assert!(!log.exists());
}

#[tokio::test]
async fn unknown_fallback_author_fails_setup() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(&dir, "export.jsonl", &[story("A1", "news", &[])]);
    let store = Arc::new(MemoryImportStore::new());
    let checkpoints = Arc::new(MemoryCheckpointStore::new());

    let err = run_import(
        &store,
        &checkpoints,
        &dir.path().join("errors.log"),
        options(&input),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ImportError::AuthorUnresolved(_)));
    assert!(store.articles().is_empty());
    assert!(checkpoints.saves().is_empty());
}

#[tokio::test]
async fn successful_run_completes() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(&dir, "export.jsonl", &[story("A1", "news", &[])]);
    let store = seeded_store();

    let mut run = ImportRun::new(
        store.clone(),
        Arc::new(MemoryCheckpointStore::new()),
        ErrorLog::new(dir.path().join("errors.log"), false),
        settings(),
        ImportOptions::builder().input(&input).count_lines(false).build(),
    );
    let summary = run.run().await.unwrap();

    assert_eq!(run.phase(), RunPhase::Completed);
    assert_eq!(summary.total_lines, None);
    assert_eq!(summary.imported, 1);
}

#[tokio::test]
async fn snapshots_land_on_disk_at_the_configured_interval() {
    let dir = tempfile::tempdir().unwrap();
    let lines: Vec<String> = (1..=5)
        .map(|i| story(&format!("F{i}"), "lifestyle", &[]))
        .collect();
    let input = write_input(&dir, "export.jsonl", &lines);
    let store = seeded_store();
    let state = dir.path().join("state");
    let snapshot_path = state.join("progress.json");

    let mut run = ImportRun::new(
        store.clone(),
        FileCheckpointStore::new(&snapshot_path),
        ErrorLog::new(state.join("errors.log"), false),
        settings(),
        ImportOptions::builder()
            .input(&input)
            .batch_size(2)
            .checkpoint_every(2)
            .build(),
    );
    run.run().await.unwrap();

    let raw = std::fs::read_to_string(&snapshot_path).unwrap();
    let snapshot: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(snapshot["last_line"], 5);
    assert_eq!(snapshot["imported"], 5);
    assert_eq!(snapshot["seen"], 5);
    assert!(snapshot["finished_at"].is_string());
}
