//! Append-only log of per-record failures.
//!
//! One line per failure: `<RFC3339>\t<line N | story ID>\t<message>`. A
//! fresh run removes the previous run's log up front and only creates the
//! file once the first failure is recorded, so a clean run leaves nothing
//! behind.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use tracing::{debug, warn};

/// What a failure is attributed to: an input line (before the story id is
/// known) or a story.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorRef {
    Line(u64),
    Story(String),
}

impl fmt::Display for ErrorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorRef::Line(n) => write!(f, "line {n}"),
            ErrorRef::Story(id) => write!(f, "story {id}"),
        }
    }
}

pub struct ErrorLog {
    path: PathBuf,
    append: bool,
    file: Option<File>,
    count: u64,
}

impl ErrorLog {
    /// `append` keeps earlier entries (resumed runs); otherwise whatever a
    /// previous run left is removed now.
    pub fn new(path: impl Into<PathBuf>, append: bool) -> Self {
        let path = path.into();
        if !append {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "Removed previous error log"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove previous error log"),
            }
        }
        Self {
            path,
            append,
            file: None,
            count: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Failures recorded by this process.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Record a failure. I/O problems are logged and swallowed; losing a log
    /// line must not stop the import.
    pub fn record(&mut self, reference: &ErrorRef, message: &str) {
        self.count += 1;
        let line = format!(
            "{}\t{}\t{}\n",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            reference,
            single_line(message),
        );
        if let Err(e) = self.write(&line) {
            warn!(path = %self.path.display(), error = %e, "Failed to write error log");
        }
    }

    fn write(&mut self, line: &str) -> io::Result<()> {
        if self.file.is_none() {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let mut options = OpenOptions::new();
            if self.append {
                options.append(true).create(true);
            } else {
                options.write(true).create(true).truncate(true);
            }
            self.file = Some(options.open(&self.path)?);
        }
        match self.file.as_mut() {
            Some(file) => file.write_all(line.as_bytes()),
            None => Ok(()),
        }
    }
}

/// Tabs and newlines in a message would break the line format.
fn single_line(message: &str) -> String {
    message
        .chars()
        .map(|c| if c == '\n' || c == '\r' || c == '\t' { ' ' } else { c })
        .collect()
}
