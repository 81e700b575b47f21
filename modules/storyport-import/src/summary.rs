use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use storyport_common::RunProgress;

/// Final report of a run, printed to stdout by the binary.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportSummary {
    pub input: String,
    pub dry_run: bool,
    pub total_lines: Option<u64>,
    pub last_line: u64,
    pub processed: u64,
    pub imported: u64,
    pub skipped: u64,
    pub errors: u64,
    pub categories_created: u64,
    pub tags_created: u64,
    pub duration: Duration,
    pub resumed_from: Option<u64>,
    /// Set when `errors > 0`.
    pub error_log: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
}

impl ImportSummary {
    pub fn from_progress(
        progress: &RunProgress,
        resumed_from: Option<u64>,
        error_log: Option<PathBuf>,
    ) -> Self {
        Self {
            input: progress.input.clone(),
            dry_run: progress.dry_run,
            total_lines: progress.total_lines,
            last_line: progress.last_line,
            processed: progress.seen,
            imported: progress.imported,
            skipped: progress.skipped,
            errors: progress.errors,
            categories_created: progress.categories_created,
            tags_created: progress.tags_created,
            duration: Duration::from_millis(progress.elapsed_ms),
            resumed_from,
            error_log: error_log.filter(|_| progress.errors > 0),
            started_at: progress.started_at,
        }
    }

    /// Records per second over the whole run.
    pub fn throughput(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.processed as f64 / secs
    }
}

impl fmt::Display for ImportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let title = if self.dry_run {
            "Import summary (dry run, nothing written)"
        } else {
            "Import summary"
        };
        writeln!(f, "{title}")?;
        writeln!(f, "  input:              {}", self.input)?;
        if let Some(line) = self.resumed_from {
            writeln!(f, "  resumed after line: {line}")?;
        }
        match self.total_lines {
            Some(total) => writeln!(f, "  lines:              {} / {total}", self.last_line)?,
            None => writeln!(f, "  lines:              {}", self.last_line)?,
        }
        writeln!(f, "  processed:          {}", self.processed)?;
        writeln!(f, "  imported:           {}", self.imported)?;
        writeln!(f, "  skipped:            {}", self.skipped)?;
        writeln!(f, "  errors:             {}", self.errors)?;
        writeln!(f, "  categories created: {}", self.categories_created)?;
        writeln!(f, "  tags created:       {}", self.tags_created)?;
        writeln!(f, "  duration:           {:.1}s", self.duration.as_secs_f64())?;
        write!(f, "  throughput:         {:.1} records/s", self.throughput())?;
        if let Some(path) = &self.error_log {
            write!(f, "\n  error log:          {}", path.display())?;
        }
        Ok(())
    }
}
