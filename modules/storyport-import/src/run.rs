//! Single-pass import run.
//!
//! `Initializing → Counting → Streaming → Draining → Finalizing → Completed`.
//! Only setup problems (unopenable input, unknown fallback author, store or
//! snapshot unreachable before the first line) end in `Failed`; everything
//! after that is counted and logged. File reads and gzip inflation happen on
//! the blocking pool (`LineSource::spawn_reader`), never on this task.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use storyport_common::{AppConfig, AuthorSource, CategoryMapping};
use storyport_store::ImportStore;
use tracing::{debug, error, info, warn};
use typed_builder::TypedBuilder;

use crate::assemble::ArticleAssembler;
use crate::decode::decode_line;
use crate::dedup::DedupGuard;
use crate::error::ImportError;
use crate::error_log::{ErrorLog, ErrorRef};
use crate::progress::{CheckpointStore, ProgressTracker};
use crate::resolver::EntityResolver;
use crate::source::LineSource;
use crate::summary::ImportSummary;
use crate::transform::ContentTransformer;
use crate::writer::{BatchWriter, PendingStory};

/// Per-invocation knobs, usually straight from the CLI.
#[derive(Debug, Clone, TypedBuilder)]
pub struct ImportOptions {
    #[builder(setter(into))]
    pub input: PathBuf,
    #[builder(default = 100)]
    pub batch_size: usize,
    #[builder(default)]
    pub resume: bool,
    #[builder(default)]
    pub dry_run: bool,
    /// Full counting pass up front for percentage/ETA display.
    #[builder(default = true)]
    pub count_lines: bool,
    /// Stop after this many input lines past the resume cursor.
    #[builder(default)]
    pub limit: Option<u64>,
    #[builder(default = 1000)]
    pub checkpoint_every: u64,
    #[builder(default)]
    pub show_progress: bool,
}

/// Deployment settings shared by every run.
#[derive(Debug, Clone)]
pub struct ImportSettings {
    pub author: AuthorSource,
    pub image_base_url: String,
    pub import_source: String,
    pub mapping: CategoryMapping,
}

impl ImportSettings {
    pub fn from_config(config: &AppConfig, mapping: CategoryMapping) -> Self {
        Self {
            author: config.author.clone(),
            image_base_url: config.image_base_url.clone(),
            import_source: config.import_source.clone(),
            mapping,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Initializing,
    Counting,
    Streaming,
    Draining,
    Finalizing,
    Completed,
    Failed,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Initializing => "initializing",
            RunPhase::Counting => "counting",
            RunPhase::Streaming => "streaming",
            RunPhase::Draining => "draining",
            RunPhase::Finalizing => "finalizing",
            RunPhase::Completed => "completed",
            RunPhase::Failed => "failed",
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn enter(phase: &mut RunPhase, next: RunPhase) {
    debug!(from = %phase, to = %next, "Run phase");
    *phase = next;
}

pub struct ImportRun<S, C> {
    store: S,
    checkpoints: C,
    error_log: ErrorLog,
    settings: ImportSettings,
    options: ImportOptions,
    phase: RunPhase,
}

impl<S: ImportStore, C: CheckpointStore> ImportRun<S, C> {
    pub fn new(
        store: S,
        checkpoints: C,
        error_log: ErrorLog,
        settings: ImportSettings,
        options: ImportOptions,
    ) -> Self {
        Self {
            store,
            checkpoints,
            error_log,
            settings,
            options,
            phase: RunPhase::Initializing,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub async fn run(&mut self) -> Result<ImportSummary, ImportError> {
        match self.execute().await {
            Ok(summary) => {
                enter(&mut self.phase, RunPhase::Completed);
                Ok(summary)
            }
            Err(e) => {
                error!(phase = %self.phase, error = %e, "Import failed during setup");
                enter(&mut self.phase, RunPhase::Failed);
                Err(e)
            }
        }
    }

    async fn execute(&mut self) -> Result<ImportSummary, ImportError> {
        let dry_run = self.options.dry_run;
        enter(&mut self.phase, RunPhase::Initializing);

        let source = LineSource::open(&self.options.input)?;
        let input = source.path().display().to_string();

        let author_id = self
            .store
            .find_author(&self.settings.author)
            .await?
            .ok_or_else(|| ImportError::AuthorUnresolved(self.settings.author.to_string()))?;

        let mut resolver =
            EntityResolver::preload(&self.store, self.settings.mapping.clone(), dry_run).await?;
        let mut dedup = DedupGuard::from_ids(
            self.store
                .load_imported_ids(&self.settings.import_source)
                .await?,
        );
        info!(
            author = %author_id,
            known_articles = dedup.len(),
            source = self.settings.import_source.as_str(),
            dry_run,
            "Caches loaded"
        );

        let mut tracker = ProgressTracker::start(
            &self.checkpoints,
            &input,
            dry_run,
            self.options.resume,
            self.options.checkpoint_every,
        )
        .await?;
        let resume_line = tracker.resume_line();

        if self.options.count_lines {
            enter(&mut self.phase, RunPhase::Counting);
            let counter = source.clone();
            match tokio::task::spawn_blocking(move || counter.count_lines()).await {
                Ok(Ok(total)) => {
                    info!(lines = total, "Counted input lines");
                    tracker.set_total(total);
                }
                Ok(Err(e)) => warn!(error = %e, "Line count failed; continuing without a total"),
                Err(e) => warn!(error = %e, "Line count task failed; continuing without a total"),
            }
        }

        let bar = progress_bar(self.options.show_progress, tracker.progress().total_lines);
        bar.set_position(resume_line);

        enter(&mut self.phase, RunPhase::Streaming);
        if resume_line > 0 {
            info!(line = resume_line, "Skipping lines handled by the previous session");
        }

        let writer = BatchWriter::new(
            ArticleAssembler::new(
                ContentTransformer::new(self.settings.image_base_url.clone()),
                author_id,
                self.settings.import_source.clone(),
            ),
            dry_run,
        );
        let batch_size = self.options.batch_size.max(1);
        let stop_after = self.options.limit.map(|n| resume_line.saturating_add(n));
        let mut pending: Vec<PendingStory> = Vec::with_capacity(batch_size);
        let mut last_read = resume_line;
        let mut batches = 0u64;

        let mut lines = source.spawn_reader(batch_size.saturating_mul(4))?;
        while let Some(item) = lines.recv().await {
            let (line_no, line) = match item {
                Ok(item) => item,
                Err(e) => {
                    let line_no = last_read + 1;
                    warn!(line = line_no, error = %e, "Input read failed; stopping early");
                    tracker.mark_error();
                    self.error_log
                        .record(&ErrorRef::Line(line_no), &format!("read failed: {e}"));
                    break;
                }
            };
            if line_no <= resume_line {
                continue;
            }
            if stop_after.is_some_and(|stop| line_no > stop) {
                info!(line = line_no - 1, "Line limit reached");
                break;
            }
            last_read = line_no;
            bar.set_position(line_no);

            match decode_line(line_no, &line) {
                Ok(None) => {}
                Ok(Some(story)) => {
                    tracker.mark_seen();
                    if dedup.contains(&story.id) {
                        debug!(story_id = story.id.as_str(), line = line_no, "Already imported");
                        tracker.mark_skipped();
                    } else {
                        dedup.record(&story.id);
                        pending.push(PendingStory {
                            line: line_no,
                            story,
                        });
                    }
                }
                Err(e) => {
                    tracker.mark_seen();
                    tracker.mark_error();
                    warn!(line = line_no, error = e.message.as_str(), "Malformed line skipped");
                    self.error_log.record(&ErrorRef::Line(line_no), &e.message);
                }
            }

            if pending.len() >= batch_size {
                batches += 1;
                let outcome = writer.write(&self.store, &mut resolver, &pending).await;
                for failure in &outcome.failures {
                    self.error_log.record(&failure.reference, &failure.message);
                }
                tracker.apply_batch(&outcome);
                pending.clear();
                debug!(
                    batch = batches,
                    imported = outcome.imported,
                    skipped = outcome.skipped,
                    errors = outcome.errors,
                    "Batch flushed"
                );
                bar.set_message(rate_message(tracker.progress().seen, bar.elapsed()));
            }

            // Never move the cursor past a record that is still waiting.
            if pending.is_empty() {
                tracker.advance_to(line_no);
                tracker.checkpoint_if_due().await;
            }
        }

        drop(lines);

        enter(&mut self.phase, RunPhase::Draining);
        if !pending.is_empty() {
            batches += 1;
            let outcome = writer.write(&self.store, &mut resolver, &pending).await;
            for failure in &outcome.failures {
                self.error_log.record(&failure.reference, &failure.message);
            }
            tracker.apply_batch(&outcome);
            pending.clear();
        }
        tracker.advance_to(last_read);

        enter(&mut self.phase, RunPhase::Finalizing);
        let progress = tracker.finish().await;
        bar.finish_and_clear();

        let summary = ImportSummary::from_progress(
            &progress,
            (resume_line > 0).then_some(resume_line),
            Some(self.error_log.path().to_path_buf()),
        );
        info!(
            batches,
            processed = summary.processed,
            imported = summary.imported,
            skipped = summary.skipped,
            errors = summary.errors,
            categories_created = summary.categories_created,
            tags_created = summary.tags_created,
            "Import finished"
        );
        if summary.errors > 0 {
            warn!(
                errors = summary.errors,
                path = %self.error_log.path().display(),
                "Failures were written to the error log"
            );
        }

        Ok(summary)
    }
}

fn progress_bar(visible: bool, total: Option<u64>) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let bar = match total {
        Some(total) => {
            let bar = ProgressBar::new(total);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%, eta {eta}) {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            bar
        }
        None => {
            let bar = ProgressBar::new_spinner();
            bar.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} [{elapsed_precise}] line {pos} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            bar
        }
    };
    bar.enable_steady_tick(Duration::from_millis(200));
    bar
}

fn rate_message(processed: u64, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    let rate = if secs > 0.0 { processed as f64 / secs } else { 0.0 };
    format!("{rate:.1} records/s")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_defaults() {
        let options = ImportOptions::builder().input("/tmp/x.jsonl").build();
        assert_eq!(options.batch_size, 100);
        assert_eq!(options.checkpoint_every, 1000);
        assert!(options.count_lines);
        assert!(!options.resume);
        assert!(!options.dry_run);
        assert_eq!(options.limit, None);
    }

    #[test]
    fn rate_message_handles_zero_elapsed() {
        assert_eq!(rate_message(10, Duration::ZERO), "0.0 records/s");
        assert_eq!(rate_message(10, Duration::from_secs(2)), "5.0 records/s");
    }
}
