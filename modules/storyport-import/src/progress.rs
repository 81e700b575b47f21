//! Run counters, the resume cursor, and their durable snapshots.
//!
//! Snapshots are written whole. The orchestrator only advances the cursor
//! when no records are waiting in the batch accumulator, so every snapshot's
//! counters describe exactly the lines up to `last_line`.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use storyport_common::RunProgress;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::writer::BatchOutcome;

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Checkpoint I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checkpoint is not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Failed to replace checkpoint file: {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error("Checkpoint store unavailable: {0}")]
    Unavailable(String),
}

/// Where run snapshots live. The orchestrator only ever saves a full
/// snapshot or loads the latest one.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self) -> Result<Option<RunProgress>, CheckpointError>;

    async fn save(&self, progress: &RunProgress) -> Result<(), CheckpointError>;
}

#[async_trait]
impl<C: CheckpointStore + ?Sized> CheckpointStore for Arc<C> {
    async fn load(&self) -> Result<Option<RunProgress>, CheckpointError> {
        (**self).load().await
    }

    async fn save(&self, progress: &RunProgress) -> Result<(), CheckpointError> {
        (**self).save(progress).await
    }
}

// =============================================================================
// File-backed checkpoints
// =============================================================================

/// JSON snapshot on local disk, replaced atomically via a sibling temp file.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self) -> Result<Option<RunProgress>, CheckpointError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    async fn save(&self, progress: &RunProgress) -> Result<(), CheckpointError> {
        let dir = self.dir();
        std::fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, progress)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)?;
        Ok(())
    }
}

// =============================================================================
// In-memory checkpoints (tests)
// =============================================================================

/// Keeps every saved snapshot so tests can inspect the sequence.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    saved: Mutex<Vec<RunProgress>>,
    failing_saves: AtomicUsize,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with an existing snapshot, as if a previous run left it behind.
    pub fn with_snapshot(progress: RunProgress) -> Self {
        let store = Self::default();
        store.saved.lock().unwrap().push(progress);
        store
    }

    pub fn latest(&self) -> Option<RunProgress> {
        self.saved.lock().unwrap().last().cloned()
    }

    pub fn saves(&self) -> Vec<RunProgress> {
        self.saved.lock().unwrap().clone()
    }

    /// Make the next `times` saves fail.
    pub fn fail_saves(&self, times: usize) {
        self.failing_saves.store(times, Ordering::SeqCst);
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self) -> Result<Option<RunProgress>, CheckpointError> {
        Ok(self.latest())
    }

    async fn save(&self, progress: &RunProgress) -> Result<(), CheckpointError> {
        let injected = self
            .failing_saves
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(CheckpointError::Unavailable("disk full".to_string()));
        }
        self.saved.lock().unwrap().push(progress.clone());
        Ok(())
    }
}

// =============================================================================
// Tracker
// =============================================================================

pub struct ProgressTracker<'a, C: ?Sized> {
    checkpoints: &'a C,
    progress: RunProgress,
    resume_line: u64,
    interval: u64,
    next_checkpoint: u64,
    session_start: Instant,
    prior_elapsed_ms: u64,
}

impl<'a, C: CheckpointStore + ?Sized> ProgressTracker<'a, C> {
    /// Begin a run. With `resume`, counters and the cursor continue from the
    /// stored snapshot; a missing snapshot starts from the top.
    pub async fn start(
        checkpoints: &'a C,
        input: &str,
        dry_run: bool,
        resume: bool,
        interval: u64,
    ) -> Result<Self, CheckpointError> {
        let now = Utc::now();
        let interval = interval.max(1);

        let mut progress = None;
        if resume {
            match checkpoints.load().await? {
                Some(mut prior) => {
                    if prior.input != input {
                        warn!(
                            previous = prior.input.as_str(),
                            current = input,
                            "Resuming with a different input path than the snapshot"
                        );
                        prior.input = input.to_string();
                    }
                    prior.dry_run = dry_run;
                    prior.resumed_at = Some(now);
                    prior.finished_at = None;
                    info!(
                        last_line = prior.last_line,
                        seen = prior.seen,
                        imported = prior.imported,
                        "Resuming from snapshot"
                    );
                    progress = Some(prior);
                }
                None => warn!("Resume requested but no snapshot found; starting from line 0"),
            }
        }
        let progress = progress.unwrap_or_else(|| RunProgress::new(input, dry_run, now));

        Ok(Self {
            checkpoints,
            resume_line: progress.last_line,
            interval,
            next_checkpoint: (progress.seen / interval + 1) * interval,
            prior_elapsed_ms: progress.elapsed_ms,
            session_start: Instant::now(),
            progress,
        })
    }

    /// Lines up to and including this one were handled by an earlier session.
    pub fn resume_line(&self) -> u64 {
        self.resume_line
    }

    pub fn progress(&self) -> &RunProgress {
        &self.progress
    }

    pub fn set_total(&mut self, total: u64) {
        self.progress.total_lines = Some(total);
    }

    pub fn mark_seen(&mut self) {
        self.progress.seen += 1;
    }

    pub fn mark_skipped(&mut self) {
        self.progress.skipped += 1;
    }

    pub fn mark_error(&mut self) {
        self.progress.errors += 1;
    }

    pub fn apply_batch(&mut self, outcome: &BatchOutcome) {
        self.progress.imported += outcome.imported;
        self.progress.skipped += outcome.skipped;
        self.progress.errors += outcome.errors;
        self.progress.categories_created += outcome.categories_created;
        self.progress.tags_created += outcome.tags_created;
    }

    /// Move the cursor. Callers must only do this when every line up to
    /// `line` is reflected in the counters.
    pub fn advance_to(&mut self, line: u64) {
        if line > self.progress.last_line {
            self.progress.last_line = line;
        }
    }

    /// Snapshot when `seen` has crossed the next interval boundary.
    pub async fn checkpoint_if_due(&mut self) {
        if self.progress.seen < self.next_checkpoint {
            return;
        }
        self.next_checkpoint = (self.progress.seen / self.interval + 1) * self.interval;
        self.save().await;
    }

    /// Final unconditional snapshot. Returns the finished progress.
    pub async fn finish(&mut self) -> RunProgress {
        self.progress.finished_at = Some(Utc::now());
        self.save().await;
        self.progress.clone()
    }

    async fn save(&mut self) {
        let now = Utc::now();
        self.progress.updated_at = now;
        self.progress.elapsed_ms =
            self.prior_elapsed_ms + self.session_start.elapsed().as_millis() as u64;

        match self.checkpoints.save(&self.progress).await {
            Ok(()) => debug!(
                last_line = self.progress.last_line,
                seen = self.progress.seen,
                "Progress snapshot saved"
            ),
            Err(e) => warn!(error = %e, "Failed to save progress snapshot; will retry at next interval"),
        }
    }
}
