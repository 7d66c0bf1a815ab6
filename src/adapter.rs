// Copyright (c) 2024-present, meta-catalog contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! External collaborator interfaces, named by contract only.
//!
//! Neither trait's real implementation lives in this crate: a dynamic
//! configuration service owns [`ParameterAdapter`] and a raw-data storage
//! engine owns [`StorageEngine`]. The catalog only needs to call them at the
//! right points and react to a veto.

/// Gate that a dynamic-configuration service can use to reject a pending
/// mutation before it is durably committed.
pub trait ParameterAdapter: Send + Sync {
    /// Requests a change of `delta` active storage groups. `Err` vetoes it.
    fn adjust_storage_groups(&self, delta: i32) -> Result<(), String>;

    /// Requests a change of `delta` active time-series. `Err` vetoes it.
    fn adjust_timeseries(&self, delta: i32) -> Result<(), String>;

    /// Best-effort hook: a new storage group became active.
    fn init_counter(&self, _storage_group: &str) {}

    /// Best-effort hook: a storage group was removed.
    fn delete_counter(&self, _storage_group: &str) {}
}

/// The storage engine that owns raw data files, invoked once a storage group
/// is emptied of all time-series.
pub trait StorageEngine: Send + Sync {
    fn delete_all_data_files(&self, storage_group: &str);
}

/// An adapter that never vetoes and does not track counters. Used when
/// `enable_parameter_adapter` is `false`, and in tests.
#[derive(Default)]
pub struct NoopAdapter;

impl ParameterAdapter for NoopAdapter {
    fn adjust_storage_groups(&self, _delta: i32) -> Result<(), String> {
        Ok(())
    }

    fn adjust_timeseries(&self, _delta: i32) -> Result<(), String> {
        Ok(())
    }
}

/// A storage engine stub that performs no file deletion. Used when the
/// catalog is operated standalone, outside a full storage engine.
#[derive(Default)]
pub struct NoopStorageEngine;

impl StorageEngine for NoopStorageEngine {
    fn delete_all_data_files(&self, _storage_group: &str) {}
}
