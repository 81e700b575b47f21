use std::path::PathBuf;

use storyport_common::ConfigError;
use storyport_store::StoreError;
use thiserror::Error;

use crate::progress::CheckpointError;

/// Failures that abort a run before any record is processed.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Cannot open input {path}: {source}")]
    InputOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed reading input {path}: {source}")]
    InputRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Fallback author {0} not found")]
    AuthorUnresolved(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// A line that is not a valid story record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct DecodeError {
    pub line: u64,
    pub message: String,
}

/// A decoded story whose shape can't be turned into an article.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("story has an empty id")]
    MissingId,

    #[error("story has an empty headline")]
    MissingHeadline,

    #[error("{field} timestamp {value} is out of range")]
    InvalidTimestamp { field: &'static str, value: i64 },

    #[error("section reference {0:?} has no usable slug")]
    EmptySection(String),
}
