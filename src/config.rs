// Copyright (c) 2024-present, meta-catalog contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Runtime configuration for the metadata catalog.

use std::path::{Path, PathBuf};

const DEFAULT_CACHE_SIZE: usize = 1_000;
const DEFAULT_RECORD_BYTES: usize = 700;
const DEFAULT_SG_LEVEL: usize = 1;

/// Directory layout and tunables for a single [`crate::MManager`] instance.
///
/// Built with a consuming builder chain, mirroring how the rest of the
/// on-disk-format crates in this codebase are configured:
///
/// ```
/// # use meta_catalog::Config;
/// let dir = tempfile::tempdir().unwrap();
/// let config = Config::new(dir.path())
///     .cache_size(4_096)
///     .tag_record_bytes(1_024)
///     .auto_create_schema(true)
///     .build();
/// ```
#[derive(Clone, Debug)]
pub struct Config {
    /// Directory holding `mlog.txt` and `tlog.bin`.
    pub schema_dir: PathBuf,

    /// Node-cache capacity (number of device paths).
    pub mmanager_cache_size: usize,

    /// Tag-file fixed record size in bytes.
    pub tag_attribute_total_size: usize,

    /// Whether a missing storage group is auto-created on write.
    pub auto_create_schema_enabled: bool,

    /// Depth (root = level 0) at which to materialize an auto-created
    /// storage group.
    pub default_storage_group_level: usize,

    /// Whether the external parameter adapter and per-SG active counters are
    /// consulted at all.
    pub enable_parameter_adapter: bool,
}

impl Config {
    /// Starts a builder rooted at `schema_dir`, seeded with defaults.
    #[must_use]
    pub fn new<P: AsRef<Path>>(schema_dir: P) -> Self {
        Self {
            schema_dir: schema_dir.as_ref().to_path_buf(),
            mmanager_cache_size: DEFAULT_CACHE_SIZE,
            tag_attribute_total_size: DEFAULT_RECORD_BYTES,
            auto_create_schema_enabled: false,
            default_storage_group_level: DEFAULT_SG_LEVEL,
            enable_parameter_adapter: false,
        }
    }

    #[must_use]
    pub fn cache_size(mut self, size: usize) -> Self {
        self.mmanager_cache_size = size;
        self
    }

    #[must_use]
    pub fn tag_record_bytes(mut self, bytes: usize) -> Self {
        self.tag_attribute_total_size = bytes;
        self
    }

    #[must_use]
    pub fn auto_create_schema(mut self, enabled: bool) -> Self {
        self.auto_create_schema_enabled = enabled;
        self
    }

    #[must_use]
    pub fn default_storage_group_level(mut self, level: usize) -> Self {
        self.default_storage_group_level = level;
        self
    }

    #[must_use]
    pub fn enable_parameter_adapter(mut self, enabled: bool) -> Self {
        self.enable_parameter_adapter = enabled;
        self
    }

    /// Finalizes the builder. Provided for symmetry with the rest of the
    /// builder chain; `Config` is otherwise ready to use as-is.
    #[must_use]
    pub fn build(self) -> Self {
        self
    }

    pub(crate) fn mlog_path(&self) -> PathBuf {
        self.schema_dir.join("mlog.txt")
    }

    pub(crate) fn tlog_path(&self) -> PathBuf {
        self.schema_dir.join("tlog.bin")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_conservative() {
        let config = Config::new("/tmp/catalog");
        assert_eq!(config.mmanager_cache_size, DEFAULT_CACHE_SIZE);
        assert_eq!(config.tag_attribute_total_size, DEFAULT_RECORD_BYTES);
        assert!(!config.auto_create_schema_enabled);
        assert!(!config.enable_parameter_adapter);
    }

    #[test]
    fn builder_chain_overrides_fields() {
        let config = Config::new("/tmp/catalog")
            .cache_size(10)
            .tag_record_bytes(64)
            .auto_create_schema(true)
            .default_storage_group_level(2)
            .enable_parameter_adapter(true)
            .build();

        assert_eq!(config.mmanager_cache_size, 10);
        assert_eq!(config.tag_attribute_total_size, 64);
        assert!(config.auto_create_schema_enabled);
        assert_eq!(config.default_storage_group_level, 2);
        assert!(config.enable_parameter_adapter);
    }
}
