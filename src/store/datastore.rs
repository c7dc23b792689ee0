//! DataStore
//!
//! The addressable namespace: dedup-aware store/retrieve/release on top of
//! `BlobFiles` and `ReferenceTable`, plus navigation into child stores.
//!
//! ## Lifecycle
//! A store starts **unmaterialized**: constructing it (root or substore)
//! touches nothing on disk. The first successful `store()` creates
//! `{store}/`, `{store}/data/` and `{store}/references.json`. There is no way
//! back from within the crate; removing the directory is an external
//! operation.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Result, StoreError};
use crate::key::ContentKey;

use super::{BlobFiles, Decrement, ReferenceTable, DATA_DIR, REFERENCES_FILE};

/// A content-addressable, reference-counted blob namespace
///
/// ## Ownership
/// - `references`: this instance's resident copy of `references.json`,
///   loaded on first use and kept for the instance's lifetime. The mutex
///   also serializes every operation on this instance.
/// - `substores`: children by name. A child is built once and handed out as
///   the same `Arc` on every later lookup, so there is never a second
///   in-memory reference table for the same path under one parent.
/// - `parent`: weak back-reference, so children never keep their parent
///   alive.
///
/// Nothing here guards against another process (or another root instance
/// over the same directory) writing the same store path.
pub struct DataStore {
    name: String,

    /// Dot-joined names from the root, computed once at construction
    qualified_name: String,

    /// Directory owned by this store
    file_path: PathBuf,

    parent: Option<Weak<DataStore>>,

    /// Shared with every store in the tree
    config: Arc<Config>,

    blobs: BlobFiles,

    /// Lazily loaded reference table (None until first access)
    references: Mutex<Option<ReferenceTable>>,

    substores: Mutex<HashMap<String, Arc<DataStore>>>,
}

impl DataStore {
    /// Root store at `{root_path}/{name}` with the default config
    ///
    /// No I/O is performed.
    pub fn from_root(root_path: impl AsRef<Path>, name: &str) -> Result<Arc<Self>> {
        Self::from_root_with_config(root_path, name, Config::default())
    }

    /// Root store at `{root_path}/{name}`
    pub fn from_root_with_config(root_path: impl AsRef<Path>, name: &str, config: Config) -> Result<Arc<Self>> {
        config.validate()?;
        validate_name(name)?;

        let file_path = root_path.as_ref().join(name);
        Ok(Arc::new(Self::new(
            name.to_string(),
            name.to_string(),
            file_path,
            None,
            Arc::new(config),
        )))
    }

    /// Child store `{self}/{name}`, cached per parent instance
    ///
    /// Repeated calls with the same name return the same `Arc`. No I/O is
    /// performed until the child's first `store()`.
    pub fn get_substore(self: &Arc<Self>, name: &str) -> Result<Arc<DataStore>> {
        validate_name(name)?;

        let mut substores = self.substores.lock();
        if let Some(existing) = substores.get(name) {
            return Ok(Arc::clone(existing));
        }

        let child = Arc::new(Self::new(
            name.to_string(),
            format!("{}.{}", self.qualified_name, name),
            self.file_path.join(name),
            Some(Arc::downgrade(self)),
            Arc::clone(&self.config),
        ));
        substores.insert(name.to_string(), Arc::clone(&child));

        debug!(store = %child.qualified_name, "created substore handle");
        Ok(child)
    }

    /// Store a payload and return its content key
    ///
    /// - New content: the blob is written and the key has implicit count 1.
    /// - Known key: no bytes are written; the reference count goes up by one.
    ///   With `detect_collisions` on, differing bytes under the same key are
    ///   rejected with `KeyCollision`.
    ///
    /// Materializes the store on first use.
    pub fn store(&self, data: &[u8]) -> Result<ContentKey> {
        let mut slot = self.references.lock();
        self.materialize(&mut slot)?;

        let key = self.store_locked(&mut slot, data, false)?;
        Ok(key)
    }

    /// Store several payloads, writing the reference table once at the end
    ///
    /// Returns one key per payload, in order. If a payload fails, the ones
    /// before it stay stored and are reported in
    /// `StoreError::BatchInterrupted::applied`; later payloads are not tried.
    pub fn store_many<I, B>(&self, payloads: I) -> Result<Vec<ContentKey>>
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        let mut slot = self.references.lock();
        self.materialize(&mut slot)?;

        let mut applied = Vec::new();
        let mut failure = None;
        for payload in payloads {
            match self.store_locked(&mut slot, payload.as_ref(), true) {
                Ok(key) => applied.push(key),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        self.finish_batch(&mut slot, applied, failure)
    }

    /// Read a blob
    pub fn retrieve(&self, key: ContentKey) -> Result<Vec<u8>> {
        let _guard = self.references.lock();

        match self.blobs.read(key) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(self.not_found(key)),
            Err(e) => Err(StoreError::io(&self.qualified_name, format!("reading blob {}", key), e)),
        }
    }

    /// Drop one reference to `key`
    ///
    /// Returns `true` if the blob was physically deleted, `false` if it is
    /// still referenced or was never stored.
    pub fn release(&self, key: ContentKey) -> Result<bool> {
        let mut slot = self.references.lock();
        self.release_locked(&mut slot, key, false)
    }

    /// Release several keys, writing the reference table once at the end
    ///
    /// Returns the number of blobs physically deleted. If a release fails,
    /// the keys released before it are reported in
    /// `StoreError::BatchInterrupted::applied`; later keys are not tried.
    pub fn release_many<I>(&self, keys: I) -> Result<usize>
    where
        I: IntoIterator<Item = ContentKey>,
    {
        let mut slot = self.references.lock();

        let mut applied = Vec::new();
        let mut reclaimed = 0;
        let mut failure = None;
        for key in keys {
            match self.release_locked(&mut slot, key, true) {
                Ok(deleted) => {
                    applied.push(key);
                    if deleted {
                        reclaimed += 1;
                    }
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        self.finish_batch(&mut slot, applied, failure)?;
        Ok(reclaimed)
    }

    /// Whether a blob file exists for `key`
    pub fn key_exists(&self, key: ContentKey) -> bool {
        self.blobs.exists(key)
    }

    /// Reference count for `key`
    ///
    /// Without `check_exists`, a key with no explicit entry is assumed to be
    /// at count 1. Pass `true` to get 0 for keys with no blob.
    pub fn get_key_references(&self, key: ContentKey, check_exists: bool) -> Result<u64> {
        let mut slot = self.references.lock();
        let blob_exists = check_exists.then(|| self.blobs.exists(key));
        Ok(self.table(&mut slot)?.count_for(key, blob_exists))
    }

    /// Dot-joined chain of names from the root, e.g. `main.pfps`
    pub fn get_qualified_name(&self) -> &str {
        &self.qualified_name
    }

    /// Write any reference-table changes still pending
    pub fn flush(&self) -> Result<()> {
        let mut slot = self.references.lock();
        match slot.as_mut() {
            Some(table) => table.flush(),
            None => Ok(()),
        }
    }

    /// Keys with a blob on disk, sorted ascending
    pub fn keys(&self) -> Result<Vec<ContentKey>> {
        let _guard = self.references.lock();
        self.blobs
            .keys()
            .map_err(|e| StoreError::io(&self.qualified_name, "listing blobs", e))
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory owned by this store
    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// The parent store, if this is a substore whose parent is still alive
    pub fn parent(&self) -> Option<Arc<DataStore>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Whether the store directory and its reference table exist on disk
    pub fn is_materialized(&self) -> bool {
        self.file_path.is_dir() && self.file_path.join(REFERENCES_FILE).is_file()
    }

    /// Names of substores built through this instance, sorted
    pub fn cached_substores(&self) -> Vec<String> {
        let mut names: Vec<String> = self.substores.lock().keys().cloned().collect();
        names.sort();
        names
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn new(
        name: String,
        qualified_name: String,
        file_path: PathBuf,
        parent: Option<Weak<DataStore>>,
        config: Arc<Config>,
    ) -> Self {
        let blobs = BlobFiles::new(
            file_path.join(DATA_DIR),
            config.blob_extension.clone(),
            config.sync_strategy,
        );
        Self {
            name,
            qualified_name,
            file_path,
            parent,
            config,
            blobs,
            references: Mutex::new(None),
            substores: Mutex::new(HashMap::new()),
        }
    }

    /// The resident reference table, loading it on first access
    fn table<'a>(&self, slot: &'a mut MutexGuard<'_, Option<ReferenceTable>>) -> Result<&'a mut ReferenceTable> {
        let table = match slot.take() {
            Some(table) => table,
            None => ReferenceTable::load(
                self.file_path.join(REFERENCES_FILE),
                self.qualified_name.clone(),
                self.config.sync_strategy,
            )?,
        };
        Ok(slot.insert(table))
    }

    /// Create `{store}/`, `{store}/data/` and `references.json` if missing
    fn materialize(&self, slot: &mut MutexGuard<'_, Option<ReferenceTable>>) -> Result<()> {
        let data_dir = self.blobs.dir();
        let references_path = self.file_path.join(REFERENCES_FILE);
        if data_dir.is_dir() && references_path.is_file() {
            return Ok(());
        }

        ensure_dir(&self.qualified_name, &self.file_path)?;
        ensure_dir(&self.qualified_name, data_dir)?;

        let table = self.table(slot)?;
        if !table.path().exists() {
            table.save()?;
        }

        info!(store = %self.qualified_name, path = %self.file_path.display(), "materialized store");
        Ok(())
    }

    fn store_locked(
        &self,
        slot: &mut MutexGuard<'_, Option<ReferenceTable>>,
        data: &[u8],
        delay_save: bool,
    ) -> Result<ContentKey> {
        let key = ContentKey::of(data);

        if self.blobs.exists(key) {
            if self.config.detect_collisions {
                self.check_same_content(key, data)?;
            }
            let count = self.table(slot)?.increment(key, delay_save)?;
            debug!(store = %self.qualified_name, %key, count, "deduplicated blob");
            return Ok(key);
        }

        match self.blobs.write(key, data) {
            Ok(()) => {
                debug!(store = %self.qualified_name, %key, len = data.len(), "wrote blob");
                Ok(key)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                warn!(store = %self.qualified_name, %key, "blob appeared between check and write");
                Err(StoreError::WriteConflict {
                    store: self.qualified_name.clone(),
                    key,
                })
            }
            Err(e) => Err(StoreError::io(&self.qualified_name, format!("writing blob {}", key), e)),
        }
    }

    fn release_locked(
        &self,
        slot: &mut MutexGuard<'_, Option<ReferenceTable>>,
        key: ContentKey,
        delay_save: bool,
    ) -> Result<bool> {
        match self.table(slot)?.decrement(key, delay_save)? {
            Decrement::Retained(remaining) => {
                debug!(store = %self.qualified_name, %key, remaining, "released reference");
                Ok(false)
            }
            Decrement::Reclaim => {
                let deleted = self
                    .blobs
                    .delete(key)
                    .map_err(|e| StoreError::io(&self.qualified_name, format!("deleting blob {}", key), e))?;
                if deleted {
                    debug!(store = %self.qualified_name, %key, "reclaimed blob");
                }
                Ok(deleted)
            }
        }
    }

    /// Persist a batch and report how far it got
    ///
    /// The applied prefix is saved even when a later item failed. If the save
    /// itself fails, the changes stay pending in memory for the next `flush`.
    fn finish_batch(
        &self,
        slot: &mut MutexGuard<'_, Option<ReferenceTable>>,
        applied: Vec<ContentKey>,
        failure: Option<StoreError>,
    ) -> Result<Vec<ContentKey>> {
        let flushed = self.table(slot).and_then(|table| table.flush());

        match failure.or(flushed.err()) {
            None => Ok(applied),
            Some(source) => {
                warn!(store = %self.qualified_name, applied = applied.len(), error = %source, "batch interrupted");
                Err(StoreError::BatchInterrupted {
                    applied,
                    source: Box::new(source),
                })
            }
        }
    }

    fn check_same_content(&self, key: ContentKey, data: &[u8]) -> Result<()> {
        let existing = self
            .blobs
            .read(key)
            .map_err(|e| StoreError::io(&self.qualified_name, format!("reading blob {}", key), e))?;

        if existing != data {
            warn!(store = %self.qualified_name, %key, "checksum collision with different content");
            return Err(StoreError::KeyCollision {
                store: self.qualified_name.clone(),
                key,
            });
        }
        Ok(())
    }

    fn not_found(&self, key: ContentKey) -> StoreError {
        StoreError::NotFound {
            store: self.qualified_name.clone(),
            key,
        }
    }
}

impl std::fmt::Debug for DataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStore")
            .field("qualified_name", &self.qualified_name)
            .field("file_path", &self.file_path)
            .finish_non_exhaustive()
    }
}

/// Create a directory, refusing to replace a non-directory entry
fn ensure_dir(store: &str, path: &Path) -> Result<()> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(StoreError::CorruptLayout {
            path: path.to_path_buf(),
            expected: "directory",
        }),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            fs::create_dir_all(path).map_err(|e| StoreError::io(store, format!("creating {}", path.display()), e))
        }
        Err(e) => Err(StoreError::io(store, format!("inspecting {}", path.display()), e)),
    }
}

/// Reject names that would escape the store directory, clash with the
/// internal layout or make qualified names ambiguous
fn validate_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        Some("name is empty")
    } else if name == DATA_DIR {
        Some("'data' is reserved for blob files")
    } else if name.contains('.') {
        Some("'.' separates qualified names")
    } else if name.contains(['/', '\\']) {
        Some("path separators are not allowed")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(StoreError::InvalidName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}
