//! Reference Table
//!
//! Persisted key → reference count mapping for exactly one store.
//!
//! ## File Format
//! A flat JSON object. JSON requires string keys, so each content key is
//! written in its decimal form and parsed back to `u32` on load:
//! ```text
//! {"3632233996": 2, "907060870": 5}
//! ```
//! Only counts >= 2 are ever written. Implicit counts (1 for a key whose blob
//! exists, 0 otherwise) never appear in the file.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::SyncStrategy;
use crate::error::{Result, StoreError};
use crate::key::ContentKey;

/// Outcome of `ReferenceTable::decrement`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decrement {
    /// Still referenced elsewhere; holds the remaining count (>= 1)
    Retained(u64),

    /// The key had no explicit entry: it was at implicit count 1 (or was never
    /// stored), so the underlying blob should be deleted now
    Reclaim,
}

/// In-memory copy of one store's `references.json`
///
/// Every mutation is written back immediately unless the caller passes
/// `delay_save`, in which case the caller owns the final `save` (or `flush`).
#[derive(Debug)]
pub struct ReferenceTable {
    /// `{store}/references.json`
    path: PathBuf,

    /// Qualified name of the owning store (for error context)
    store: String,

    /// Explicit counts; every value is >= 2
    counts: BTreeMap<ContentKey, u64>,

    sync_strategy: SyncStrategy,

    /// Mutations not yet written to disk
    dirty: bool,
}

impl ReferenceTable {
    /// Load the table for a store
    ///
    /// - Missing file: empty table. The file is created right away if the
    ///   store directory already exists; otherwise it is created when the
    ///   store materializes.
    /// - Not a regular file: `CorruptLayout`.
    /// - Unparseable contents, non-integer keys or counts below 2:
    ///   `CorruptReferenceTable`.
    pub fn load(path: impl Into<PathBuf>, store: impl Into<String>, sync_strategy: SyncStrategy) -> Result<Self> {
        let path = path.into();
        let store = store.into();

        let mut table = Self {
            path,
            store,
            counts: BTreeMap::new(),
            sync_strategy,
            dirty: false,
        };

        match fs::metadata(&table.path) {
            Ok(meta) if meta.is_file() => {
                table.counts = table.read_counts()?;
                debug!(store = %table.store, entries = table.counts.len(), "loaded reference table");
            }
            Ok(_) => {
                warn!(store = %table.store, path = %table.path.display(), "reference table is not a file");
                return Err(StoreError::CorruptLayout {
                    path: table.path,
                    expected: "regular file",
                });
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if table.path.parent().is_some_and(Path::is_dir) {
                    table.save()?;
                }
            }
            Err(e) => {
                return Err(StoreError::io(
                    &table.store,
                    format!("inspecting {}", table.path.display()),
                    e,
                ))
            }
        }

        Ok(table)
    }

    /// Overwrite the reference file with the full table
    ///
    /// Writes `references.json.tmp` and renames it into place, so a crash
    /// leaves either the previous or the new table on disk.
    pub fn save(&mut self) -> Result<()> {
        let encoded: BTreeMap<String, u64> = self
            .counts
            .iter()
            .map(|(key, count)| (key.to_string(), *count))
            .collect();
        let bytes = serde_json::to_vec(&encoded).map_err(|e| {
            StoreError::io(&self.store, "encoding reference table", e.into())
        })?;

        let tmp_path = self.path.with_extension("json.tmp");
        if let Err(e) = self
            .write_file(&tmp_path, &bytes)
            .and_then(|()| fs::rename(&tmp_path, &self.path))
        {
            let _ = fs::remove_file(&tmp_path);
            warn!(store = %self.store, error = %e, "failed to save reference table");
            return Err(StoreError::io(&self.store, format!("writing {}", self.path.display()), e));
        }

        self.dirty = false;
        debug!(store = %self.store, entries = self.counts.len(), "saved reference table");
        Ok(())
    }

    /// Save only if there are unsaved mutations
    pub fn flush(&mut self) -> Result<()> {
        if self.dirty {
            self.save()?;
        }
        Ok(())
    }

    /// Record one more owner of `key`; returns the new count
    ///
    /// A key without an entry is at implicit count 1, so its first entry is 2.
    /// If the save fails the entry is put back and the table is unchanged.
    pub fn increment(&mut self, key: ContentKey, delay_save: bool) -> Result<u64> {
        let previous = self.counts.get(&key).copied();
        let count = previous.map_or(2, |c| c + 1);
        self.counts.insert(key, count);

        self.commit(key, previous, delay_save)?;
        Ok(count)
    }

    /// Drop one owner of `key`
    ///
    /// An entry that falls to 1 is removed (back to implicit count 1) and the
    /// blob is retained. A key with no entry reports `Reclaim`. If the save
    /// fails the entry is put back and the table is unchanged.
    pub fn decrement(&mut self, key: ContentKey, delay_save: bool) -> Result<Decrement> {
        let Some(previous) = self.counts.get(&key).copied() else {
            return Ok(Decrement::Reclaim);
        };

        let remaining = previous - 1;
        if remaining <= 1 {
            self.counts.remove(&key);
        } else {
            self.counts.insert(key, remaining);
        }

        self.commit(key, Some(previous), delay_save)?;
        Ok(Decrement::Retained(remaining.max(1)))
    }

    /// Reference count for `key`
    ///
    /// With no explicit entry, `blob_exists` decides between 1 and 0. Passing
    /// `None` assumes 1, which is only correct if the key is known to be
    /// stored.
    pub fn count_for(&self, key: ContentKey, blob_exists: Option<bool>) -> u64 {
        match (self.counts.get(&key), blob_exists) {
            (Some(count), _) => *count,
            (None, Some(false)) => 0,
            (None, _) => 1,
        }
    }

    /// The persisted count, if any (always >= 2)
    pub fn explicit_count(&self, key: ContentKey) -> Option<u64> {
        self.counts.get(&key).copied()
    }

    /// Keys with explicit counts, in key order
    pub fn iter(&self) -> impl Iterator<Item = (ContentKey, u64)> + '_ {
        self.counts.iter().map(|(k, v)| (*k, *v))
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn read_counts(&self) -> Result<BTreeMap<ContentKey, u64>> {
        let bytes = fs::read(&self.path)
            .map_err(|e| StoreError::io(&self.store, format!("reading {}", self.path.display()), e))?;

        let raw: BTreeMap<String, u64> =
            serde_json::from_slice(&bytes).map_err(|e| self.corrupt(format!("invalid JSON: {}", e)))?;

        let mut counts = BTreeMap::new();
        for (raw_key, count) in raw {
            let key: ContentKey = raw_key
                .parse()
                .map_err(|_| self.corrupt(format!("key '{}' is not a 32-bit unsigned integer", raw_key)))?;
            if count < 2 {
                return Err(self.corrupt(format!("key {} has count {}, expected at least 2", key, count)));
            }
            counts.insert(key, count);
        }
        Ok(counts)
    }

    /// Mark `key` as changed and persist unless deferred
    ///
    /// A failed save restores `previous` (the entry before the change, or no
    /// entry) so an `Err` leaves memory and disk in agreement.
    fn commit(&mut self, key: ContentKey, previous: Option<u64>, delay_save: bool) -> Result<()> {
        let was_dirty = self.dirty;
        self.dirty = true;
        if delay_save {
            return Ok(());
        }

        if let Err(e) = self.save() {
            match previous {
                Some(count) => self.counts.insert(key, count),
                None => self.counts.remove(&key),
            };
            self.dirty = was_dirty;
            return Err(e);
        }
        Ok(())
    }

    fn write_file(&self, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        let mut file = File::create(path)?;
        file.write_all(bytes)?;
        if self.sync_strategy.should_sync() {
            file.sync_all()?;
        }
        Ok(())
    }

    fn corrupt(&self, reason: String) -> StoreError {
        warn!(store = %self.store, %reason, "corrupt reference table");
        StoreError::CorruptReferenceTable {
            store: self.store.clone(),
            reason,
        }
    }
}
