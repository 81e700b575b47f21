//! Persistence contract for the CMS import.
//!
//! The pipeline only ever talks to `ImportStore`. `PgImportStore` is the
//! production implementation; `MemoryImportStore` backs tests and local
//! experiments without a database.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryImportStore;
pub use postgres::PgImportStore;
pub use traits::ImportStore;
