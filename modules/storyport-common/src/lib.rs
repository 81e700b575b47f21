pub mod config;
pub mod error;
pub mod slug;
pub mod types;

pub use config::{load_config, AppConfig, AuthorSource, CategoryMapping, CategoryStyle, FileConfig};
pub use error::ConfigError;
pub use types::*;
