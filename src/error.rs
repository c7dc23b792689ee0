//! Error types for dedupstore
//!
//! Provides a unified error type for all store operations.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::key::ContentKey;

/// Result type alias using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// Unified error type for dedupstore operations
#[derive(Debug, Error)]
pub enum StoreError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error in store '{store}' while {context}: {source}")]
    Io {
        store: String,
        context: String,
        #[source]
        source: io::Error,
    },

    // -------------------------------------------------------------------------
    // Layout / Corruption Errors
    // -------------------------------------------------------------------------
    #[error("Corrupt layout: {} should be a {}", path.display(), expected)]
    CorruptLayout {
        path: PathBuf,
        expected: &'static str,
    },

    #[error("Corrupt reference table in store '{store}': {reason}")]
    CorruptReferenceTable { store: String, reason: String },

    // -------------------------------------------------------------------------
    // Blob Errors
    // -------------------------------------------------------------------------
    #[error("Key {key} not found in store '{store}'")]
    NotFound { store: String, key: ContentKey },

    #[error("Blob {key} already exists in store '{store}'")]
    WriteConflict { store: String, key: ContentKey },

    #[error("Key {key} in store '{store}' already holds different content")]
    KeyCollision { store: String, key: ContentKey },

    // -------------------------------------------------------------------------
    // Batch Errors
    // -------------------------------------------------------------------------
    /// A batched call stopped early
    ///
    /// `applied` lists, in order, the items that took effect in this
    /// instance's reference table before `source` occurred: keys stored by
    /// `store_many`, or keys released by `release_many`.
    #[error("Batch stopped after {} applied item(s): {}", applied.len(), source)]
    BatchInterrupted {
        applied: Vec<ContentKey>,
        #[source]
        source: Box<StoreError>,
    },

    // -------------------------------------------------------------------------
    // Naming / Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Invalid store name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Whether the caller can reasonably continue using the store.
    ///
    /// Only a missing blob is recoverable; everything else points at
    /// corruption or a broken single-writer discipline.
    pub fn is_recoverable(&self) -> bool {
        match self {
            StoreError::NotFound { .. } => true,
            StoreError::BatchInterrupted { source, .. } => source.is_recoverable(),
            _ => false,
        }
    }

    pub(crate) fn io(store: &str, context: impl Into<String>, source: io::Error) -> Self {
        StoreError::Io {
            store: store.to_string(),
            context: context.into(),
            source,
        }
    }
}
