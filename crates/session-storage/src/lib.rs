//! Durable storage for the client session core.
//!
//! This crate provides:
//! - A synchronous key-value storage trait with in-memory and file backends
//! - The versioned, token-free session record and its migrations
//! - [`SessionRecordStore`], which reads and writes that record under one key

mod file;
mod memory;
mod migration;
mod record;
mod store;
mod traits;

pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use migration::{migrate, CURRENT_VERSION};
pub use record::{PersistedSession, RecordEnvelope, TokenMetadata, User};
pub use store::SessionRecordStore;
pub use traits::KeyValueStorage;

use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backend-specific storage error
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Key cannot be mapped onto the backend
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    /// Record could not be migrated to the current schema
    #[error("Migration error: {0}")]
    Migration(String),

    /// JSON encoding/decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
