//! Configuration for dedupstore
//!
//! Centralized configuration with sensible defaults. A root store owns its
//! config; every substore shares the root's.

use crate::error::{Result, StoreError};

/// Store configuration
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Layout Configuration
    // -------------------------------------------------------------------------
    /// Extension of blob files: `{store}/data/{key}.{blob_extension}`
    ///
    /// Part of the on-disk contract. Opening an existing store with a
    /// different extension makes its blobs invisible.
    pub blob_extension: String,

    // -------------------------------------------------------------------------
    // Durability Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: whether to fsync blobs and the reference table
    pub sync_strategy: SyncStrategy,

    // -------------------------------------------------------------------------
    // Dedup Configuration
    // -------------------------------------------------------------------------
    /// Compare bytes on the dedup path and reject checksum collisions
    pub detect_collisions: bool,
}

/// Sync strategy for blob and reference-table writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// Leave flushing to the OS page cache
    OsBuffered,
}

impl SyncStrategy {
    pub(crate) fn should_sync(self) -> bool {
        matches!(self, SyncStrategy::EveryWrite)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            blob_extension: "dat".to_string(),
            sync_strategy: SyncStrategy::EveryWrite,
            detect_collisions: true,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check that the config describes a usable layout
    pub fn validate(&self) -> Result<()> {
        let ext = &self.blob_extension;
        if ext.is_empty() {
            return Err(StoreError::Config("blob extension must not be empty".to_string()));
        }
        if ext.contains(['.', '/', '\\']) {
            return Err(StoreError::Config(format!(
                "blob extension '{}' must not contain '.', '/' or '\\'",
                ext
            )));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the blob file extension (without the leading dot)
    pub fn blob_extension(mut self, ext: impl Into<String>) -> Self {
        self.config.blob_extension = ext.into();
        self
    }

    /// Set the sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Enable or disable byte comparison on the dedup path
    pub fn detect_collisions(mut self, enabled: bool) -> Self {
        self.config.detect_collisions = enabled;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
