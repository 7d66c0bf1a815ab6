// Copyright (c) 2024-present, meta-catalog contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Per-storage-group series counters.

use rustc_hash::FxHashMap;

/// `series_count` plus a denormalized running maximum, updated synchronously
/// under the catalog's write lock on every create/delete.
#[derive(Default)]
pub struct Counters {
    series_count: FxHashMap<String, i64>,
    max_series_count: i64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn series_count(&self, sg: &str) -> i64 {
        self.series_count.get(sg).copied().unwrap_or(0)
    }

    pub fn max_series_count(&self) -> i64 {
        self.max_series_count
    }

    /// Registers a new, empty storage group.
    pub fn init_storage_group(&mut self, sg: &str) {
        self.series_count.entry(sg.to_string()).or_insert(0);
    }

    /// Drops a storage group's counter entirely (on `delete_storage_group`).
    pub fn remove_storage_group(&mut self, sg: &str) {
        self.series_count.remove(sg);
        self.recompute_max();
    }

    pub fn increment(&mut self, sg: &str) {
        let count = self.series_count.entry(sg.to_string()).or_insert(0);
        *count += 1;
        self.max_series_count = self.max_series_count.max(*count);
    }

    pub fn decrement(&mut self, sg: &str) {
        if let Some(count) = self.series_count.get_mut(sg) {
            *count -= 1;

            if *count < self.max_series_count {
                // A decrement can only ever reduce the max, never grow it
                // elsewhere, so a full rescan is always sufficient here.
                self.recompute_max();
            }
        }
    }

    fn recompute_max(&mut self) {
        self.max_series_count = self.series_count.values().copied().max().unwrap_or(0);
    }
}
