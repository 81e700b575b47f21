//! Bulk import of a CMS story export into the article store.
//!
//! One pass over a line-delimited JSON export (optionally gzipped):
//! decode → transform → resolve categories/tags → batched idempotent writes,
//! with a progress snapshot after batches so an interrupted run can resume.

pub mod assemble;
pub mod decode;
pub mod dedup;
pub mod error;
pub mod error_log;
pub mod progress;
pub mod resolver;
pub mod run;
pub mod source;
pub mod summary;
pub mod transform;
pub mod writer;

pub use error::{DecodeError, ImportError, TransformError};
pub use error_log::{ErrorLog, ErrorRef};
pub use progress::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore, ProgressTracker};
pub use run::{ImportOptions, ImportRun, ImportSettings, RunPhase};
pub use summary::ImportSummary;
