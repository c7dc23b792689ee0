//! Store Module
//!
//! Content-addressable, deduplicating blob storage with nested namespaces.
//!
//! ## Responsibilities
//! - Store each distinct payload once, named by its content key
//! - Count logical owners per key and reclaim blobs nobody references
//! - Nest stores so unrelated categories of data never collide
//!
//! ## On-disk Layout
//! ```text
//! {root}/{store-name}/
//!   ├── references.json        {"<key>": <count>, ...}, counts always >= 2
//!   ├── data/
//!   │     └── {key}.{ext}      one file per stored blob
//!   └── {substore-name}/
//!         ├── references.json
//!         └── data/
//! ```
//!
//! ## Reference Counting
//! A count of exactly 1 is never persisted. A blob file with no table entry
//! has count 1; no blob file and no entry means count 0. The first explicit
//! entry for a key is therefore 2.
//!
//! ## Concurrency
//! No cross-process or cross-thread locking of the directory tree. Callers
//! must keep a single writer per store path. Within one process the substore
//! cache hands out one `DataStore` per path per parent, and each instance
//! serializes its own operations.

mod blob;
mod datastore;
mod references;

pub use blob::BlobFiles;
pub use datastore::DataStore;
pub use references::{Decrement, ReferenceTable};

// =============================================================================
// Layout Constants
// =============================================================================

/// Directory holding a store's blob files
pub const DATA_DIR: &str = "data";

/// File holding a store's persisted reference counts
pub const REFERENCES_FILE: &str = "references.json";
