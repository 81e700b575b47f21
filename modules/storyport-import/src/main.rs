use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use storyport_common::{load_config, AppConfig, CategoryMapping};
use storyport_import::{ErrorLog, FileCheckpointStore, ImportOptions, ImportRun, ImportSettings};
use storyport_store::PgImportStore;

/// Import a CMS story export (JSON lines, optionally gzipped) into the
/// article store.
#[derive(Parser, Debug)]
#[command(name = "storyport-import", version)]
struct Cli {
    /// Export file. `.gz` / `.gzip` files are decompressed on the fly.
    #[arg(long, env = "IMPORT_INPUT", default_value = "/tmp/cms-export.jsonl.gz")]
    input: PathBuf,

    /// Records per write batch.
    #[arg(long, default_value_t = 100)]
    batch_size: usize,

    /// Continue from the last saved progress snapshot.
    #[arg(long)]
    resume: bool,

    /// Transform and resolve everything but write nothing.
    #[arg(long)]
    dry_run: bool,

    /// Skip the up-front line count (no percentage or ETA).
    #[arg(long)]
    skip_count: bool,

    /// Stop after this many input lines.
    #[arg(long)]
    limit: Option<u64>,

    /// Save a progress snapshot every N processed records.
    #[arg(long, default_value_t = 1000)]
    checkpoint_every: u64,

    /// Holds progress.json and errors.log.
    #[arg(long, default_value = ".storyport")]
    state_dir: PathBuf,

    /// TOML file extending the section → category mapping.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run database migrations before importing.
    #[arg(long)]
    migrate: bool,

    /// Emit logs as JSON lines.
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::from_default_env().add_directive("storyport=info".parse()?);
    if cli.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("Storyport import starting...");

    let config = AppConfig::from_env().context("Invalid import configuration")?;
    let mapping = match &cli.config {
        Some(path) => {
            let file = load_config(path)
                .with_context(|| format!("Failed to load {}", path.display()))?;
            info!(path = %path.display(), overrides = file.categories.len(), "Category mapping loaded");
            CategoryMapping::with_file_config(&file)
        }
        None => CategoryMapping::builtin(),
    };

    let store = PgImportStore::connect(&config.database_url)
        .await
        .context("Failed to connect to Postgres")?;
    if cli.migrate {
        store.migrate().await.context("Migrations failed")?;
        info!("Migrations applied");
    }

    std::fs::create_dir_all(&cli.state_dir)
        .with_context(|| format!("Failed to create state dir {}", cli.state_dir.display()))?;
    let checkpoints = FileCheckpointStore::new(cli.state_dir.join("progress.json"));
    let error_log = ErrorLog::new(cli.state_dir.join("errors.log"), cli.resume);

    let options = ImportOptions::builder()
        .input(cli.input)
        .batch_size(cli.batch_size)
        .resume(cli.resume)
        .dry_run(cli.dry_run)
        .count_lines(!cli.skip_count)
        .limit(cli.limit)
        .checkpoint_every(cli.checkpoint_every)
        .show_progress(true)
        .build();

    let mut run = ImportRun::new(
        store,
        checkpoints,
        error_log,
        ImportSettings::from_config(&config, mapping),
        options,
    );
    let summary = run.run().await.context("Import aborted")?;

    println!("{summary}");
    Ok(())
}
