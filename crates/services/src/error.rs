//! Shared error types for the services crate.
//!
//! Sync failures never surface here: `load` and `save` absorb them. These are
//! bootstrap errors only.

use thiserror::Error;

use storage::SqliteInitError;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),

    #[error("invalid configuration for {key}: {reason}")]
    Config { key: &'static str, reason: String },
}
