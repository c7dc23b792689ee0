//! # dedupstore
//!
//! A content-addressable, deduplicating blob store with:
//! - CRC-32 content keys, one file per distinct payload
//! - Reference counting with reclamation of unreferenced blobs
//! - Nested namespaces (substores) with dot-joined qualified names
//! - Lazy, first-write materialization of on-disk state
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Collaborators                        │
//! │        store(bytes) / retrieve(key) / release(key)          │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                 DataStore (namespace tree)                  │
//! │      root ──► substore ──► substore   (cached per parent)   │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌──────────────┐         ┌──────────────┐
//!   │  BlobFiles   │         │  Reference   │
//!   │ data/{key}.* │         │    Table     │
//!   └──────────────┘         └──────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use dedupstore::DataStore;
//!
//! let root = DataStore::from_root("./dedupstore_data", "main")?;
//! let avatars = root.get_substore("pfps")?;
//!
//! let key = avatars.store(b"png bytes")?;
//! assert_eq!(avatars.retrieve(key)?, b"png bytes");
//! assert_eq!(avatars.get_qualified_name(), "main.pfps");
//!
//! avatars.release(key)?;
//! # Ok::<(), dedupstore::StoreError>(())
//! ```
//!
//! ## Concurrency
//! Operations are synchronous and blocking. Each `DataStore` instance
//! serializes its own calls, but nothing coordinates separate processes:
//! keep one writer per store path.

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod key;
pub mod store;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{StoreError, Result};
pub use config::{Config, SyncStrategy};
pub use key::ContentKey;
pub use store::DataStore;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of dedupstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
