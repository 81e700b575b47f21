//! Line source over a (possibly gzipped) export file.
//!
//! Lines are yielded one at a time from a buffered reader; the file is never
//! held in memory. `spawn_reader` runs that reader on the blocking pool and
//! hands lines to the async side through a bounded channel. `count_lines` is
//! a separate full pass used only for the progress denominator.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::ImportError;

const READ_BUFFER_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
}

impl Compression {
    /// Detect from the file extension (`.gz` / `.gzip`, any case).
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref()
        {
            Some("gz") | Some("gzip") => Compression::Gzip,
            _ => Compression::None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LineSource {
    path: PathBuf,
    compression: Compression,
}

impl LineSource {
    /// Validate that the input can be opened. Fails fast on a missing or
    /// unreadable path.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ImportError> {
        let path = path.into();
        File::open(&path).map_err(|source| ImportError::InputOpen {
            path: path.clone(),
            source,
        })?;
        let compression = Compression::from_path(&path);
        Ok(Self { path, compression })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    fn reader(&self) -> Result<Box<dyn BufRead + Send>, ImportError> {
        let file = File::open(&self.path).map_err(|source| ImportError::InputOpen {
            path: self.path.clone(),
            source,
        })?;
        Ok(match self.compression {
            Compression::Gzip => Box::new(BufReader::with_capacity(
                READ_BUFFER_BYTES,
                MultiGzDecoder::new(file),
            )),
            Compression::None => Box::new(BufReader::with_capacity(READ_BUFFER_BYTES, file)),
        })
    }

    /// Stream the file's lines in order, numbered from 1.
    pub fn lines(&self) -> Result<Lines, ImportError> {
        Ok(Lines {
            reader: self.reader()?,
            line_no: 0,
            buf: Vec::new(),
            done: false,
        })
    }

    /// Read lines on a blocking thread. The reader stops once the receiver
    /// is dropped, so callers may stop early by dropping it.
    pub fn spawn_reader(
        &self,
        capacity: usize,
    ) -> Result<mpsc::Receiver<io::Result<(u64, String)>>, ImportError> {
        let lines = self.lines()?;
        let (tx, rx) = mpsc::channel(capacity.max(1));
        tokio::task::spawn_blocking(move || {
            for item in lines {
                if tx.blocking_send(item).is_err() {
                    debug!("Line receiver dropped; reader stopping");
                    break;
                }
            }
        });
        Ok(rx)
    }

    /// Count lines with the same numbering `lines()` uses (a trailing line
    /// without a newline still counts).
    pub fn count_lines(&self) -> Result<u64, ImportError> {
        let mut reader = self.reader()?;
        let mut buf = Vec::new();
        let mut count = 0;
        loop {
            buf.clear();
            let read = reader
                .read_until(b'\n', &mut buf)
                .map_err(|source| ImportError::InputRead {
                    path: self.path.clone(),
                    source,
                })?;
            if read == 0 {
                return Ok(count);
            }
            count += 1;
        }
    }
}

/// Iterator of `(line_number, line)`. Invalid UTF-8 is replaced rather than
/// rejected; the decoder then reports the line as malformed.
pub struct Lines {
    reader: Box<dyn BufRead + Send>,
    line_no: u64,
    buf: Vec<u8>,
    done: bool,
}

impl Iterator for Lines {
    type Item = io::Result<(u64, String)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(_) => {
                self.line_no += 1;
                if self.buf.last() == Some(&b'\n') {
                    self.buf.pop();
                }
                if self.buf.last() == Some(&b'\r') {
                    self.buf.pop();
                }
                let line = String::from_utf8_lossy(&self.buf).into_owned();
                Some(Ok((self.line_no, line)))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
