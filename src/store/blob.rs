//! Blob files
//!
//! Maps content keys to files inside a store's `data/` directory.

use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::config::SyncStrategy;
use crate::key::ContentKey;

/// Blob file access for one store's data directory
///
/// Does not create the directory; the owning `DataStore` materializes it
/// before the first write.
#[derive(Debug, Clone)]
pub struct BlobFiles {
    /// `{store}/data`
    dir: PathBuf,
    extension: String,
    sync_strategy: SyncStrategy,
}

impl BlobFiles {
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>, sync_strategy: SyncStrategy) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.into(),
            sync_strategy,
        }
    }

    /// The data directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the blob file for a key: `{dir}/{key}.{ext}`
    pub fn path_for(&self, key: ContentKey) -> PathBuf {
        self.dir.join(key.file_name(&self.extension))
    }

    pub fn exists(&self, key: ContentKey) -> bool {
        self.path_for(key).exists()
    }

    pub fn read(&self, key: ContentKey) -> io::Result<Vec<u8>> {
        fs::read(self.path_for(key))
    }

    /// Create the blob file exclusively
    ///
    /// Fails with `ErrorKind::AlreadyExists` instead of overwriting. A
    /// partially written file is removed before the error is returned.
    pub fn write(&self, key: ContentKey, data: &[u8]) -> io::Result<()> {
        let path = self.path_for(key);
        let mut file = OpenOptions::new().write(true).create_new(true).open(&path)?;

        if let Err(e) = Self::write_contents(&mut file, data, self.sync_strategy) {
            drop(file);
            let _ = fs::remove_file(&path);
            return Err(e);
        }
        Ok(())
    }

    /// Remove the blob file
    ///
    /// Returns `false` if it was already gone.
    pub fn delete(&self, key: ContentKey) -> io::Result<bool> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// All keys with a blob file, sorted ascending
    ///
    /// Entries that are not `{u32}.{ext}` files are skipped. A missing data
    /// directory yields an empty list.
    pub fn keys(&self) -> io::Result<Vec<ContentKey>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            if let Some(key) = name
                .to_str()
                .and_then(|n| ContentKey::from_file_name(n, &self.extension))
            {
                keys.push(key);
            }
        }

        keys.sort();
        Ok(keys)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn write_contents(file: &mut File, data: &[u8], sync_strategy: SyncStrategy) -> io::Result<()> {
        file.write_all(data)?;
        if sync_strategy.should_sync() {
            file.sync_all()?;
        }
        Ok(())
    }
}
