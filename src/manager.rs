// Copyright (c) 2024-present, meta-catalog contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The façade: orchestrates the tree, log, tag file, cache, index and counters
//! under a single reader/writer lock.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::adapter::{NoopAdapter, NoopStorageEngine, ParameterAdapter, StorageEngine};
use crate::cache::NodeCache;
use crate::config::Config;
use crate::counters::Counters;
use crate::error::{Error, Result};
use crate::mlog::{self, LogOperation, MLogWriter};
use crate::path;
use crate::schema::MeasurementSchema;
use crate::tag_index::{TagIndex, TagQuery};
use crate::tag_log::TagLogFile;
use crate::tree::{NodeKind, MTree, MeasurementSchemaPlan, MeasurementSchemaRow};

type TagMap = BTreeMap<String, String>;

/// A single match from [`MManager::get_all_timeseries_schema`], pairing a
/// tree row with the tag submap that made it match.
#[derive(Clone, Debug)]
pub struct TimeseriesSchemaRow {
    pub full_path: String,
    pub alias: Option<String>,
    pub storage_group: String,
    pub data_type: u16,
    pub encoding: u16,
    pub compressor: u16,
    pub tags: TagMap,
}

/// Query parameters for [`MManager::get_all_timeseries_schema`].
#[derive(Clone, Debug, Default)]
pub struct TagSchemaPlan {
    pub prefix: String,
    pub key: String,
    pub value: String,
    pub contains: bool,
    pub offset: usize,
    pub limit: usize,
}

struct Inner {
    tree: MTree,
    tag_index: TagIndex,
    counters: Counters,
    writer: MLogWriter,
    tag_log: TagLogFile,
}

/// The metadata catalog façade. Owns the schema tree, the operation log, the
/// tag side-file, the inverted tag index, per-storage-group counters and the
/// node cache, and serializes all access through a single reader/writer
/// lock.
///
/// Constructed once per process and typically shared behind an `Arc`; there
/// is no internal global/`OnceLock`.
pub struct MManager {
    config: Config,
    state: RwLock<Inner>,
    cache: NodeCache,
    adapter: Arc<dyn ParameterAdapter>,
    storage_engine: Arc<dyn StorageEngine>,
}

impl MManager {
    /// Opens (or creates) the catalog at `config.schema_dir`, replaying any
    /// existing operation log. Uses no-op collaborators: no adapter veto is
    /// ever raised and no data files are ever deleted.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_collaborators(config, Arc::new(NoopAdapter), Arc::new(NoopStorageEngine))
    }

    /// As [`MManager::new`], but wired to real external collaborators.
    pub fn with_collaborators(
        config: Config,
        adapter: Arc<dyn ParameterAdapter>,
        storage_engine: Arc<dyn StorageEngine>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&config.schema_dir)?;

        let mut tree = MTree::new();
        let mut tag_index = TagIndex::new();
        let mut counters = Counters::new();
        let tag_log = TagLogFile::open(&config.tlog_path(), config.tag_attribute_total_size)?;

        log::info!("replaying operation log at {:?}", config.mlog_path());
        let mut replayed = 0usize;

        mlog::replay(&config.mlog_path(), |op| {
            let op_desc = format!("{op:?}");
            match apply_replayed(&mut tree, &mut tag_index, &mut counters, &tag_log, op) {
                Ok(()) => replayed += 1,
                Err(e) => log::error!("skipping replayed operation {op_desc}: {e}"),
            }
        })?;

        log::info!("replay complete: {replayed} operations applied");

        let writer = MLogWriter::open(&config.mlog_path())?;
        let cache = NodeCache::new(config.mmanager_cache_size);

        Ok(Self {
            cache,
            adapter,
            storage_engine,
            state: RwLock::new(Inner {
                tree,
                tag_index,
                counters,
                writer,
                tag_log,
            }),
            config,
        })
    }

    /// Number of series currently registered under `sg`.
    pub fn series_count(&self, sg: &str) -> i64 {
        self.state.read().expect("catalog lock poisoned").counters.series_count(sg)
    }

    /// The running maximum series count across all storage groups.
    pub fn max_series_count(&self) -> i64 {
        self.state.read().expect("catalog lock poisoned").counters.max_series_count()
    }

    /// Consults the adapter's storage-group delta, unless
    /// `enable_parameter_adapter` is off, in which case every delta is
    /// approved without the adapter ever being called.
    fn adjust_storage_groups(&self, delta: i32) -> std::result::Result<(), String> {
        if !self.config.enable_parameter_adapter {
            return Ok(());
        }
        self.adapter.adjust_storage_groups(delta)
    }

    /// As [`MManager::adjust_storage_groups`], for the series delta.
    fn adjust_timeseries(&self, delta: i32) -> std::result::Result<(), String> {
        if !self.config.enable_parameter_adapter {
            return Ok(());
        }
        self.adapter.adjust_timeseries(delta)
    }

    fn init_counter(&self, sg: &str) {
        if self.config.enable_parameter_adapter {
            self.adapter.init_counter(sg);
        }
    }

    fn delete_counter(&self, sg: &str) {
        if self.config.enable_parameter_adapter {
            self.adapter.delete_counter(sg);
        }
    }

    pub fn set_storage_group(&self, path: &str) -> Result<()> {
        let mut state = self.state.write().expect("catalog lock poisoned");
        self.cache.clear();

        state.tree.set_storage_group(path)?;

        if let Err(reason) = self.adjust_storage_groups(1) {
            state.tree.delete_storage_group(path).ok();
            log::warn!("adapter vetoed set_storage_group({path}): {reason}");
            return Err(Error::AdapterVeto(reason));
        }

        state.writer.append(&LogOperation::SetStorageGroup { path: path.to_string() })?;
        state.counters.init_storage_group(path);
        self.init_counter(path);

        Ok(())
    }

    pub fn delete_storage_group(&self, path: &str) -> Result<()> {
        let mut state = self.state.write().expect("catalog lock poisoned");
        self.cache.clear();

        let removed = state.tree.delete_storage_group(path)?;

        if let Err(reason) = self.adjust_storage_groups(-1) {
            // The subtree is already gone; there is no symmetric tree op
            // that recreates leaves with their original schemas, so a veto
            // here is only honored when nothing was actually removed.
            if removed.is_empty() {
                state.tree.set_storage_group(path).ok();
                log::warn!("adapter vetoed delete_storage_group({path}): {reason}");
                return Err(Error::AdapterVeto(reason));
            }
            log::warn!("adapter vetoed delete_storage_group({path}) after removal: {reason}");
        }

        state.writer.append(&LogOperation::DeleteStorageGroup {
            paths: vec![path.to_string()],
        })?;

        state.counters.remove_storage_group(path);
        self.delete_counter(path);
        self.storage_engine.delete_all_data_files(path);

        Ok(())
    }

    /// Creates a time-series, auto-creating its storage group ancestor first
    /// if `auto_create_schema_enabled` is set and none exists yet.
    pub fn create_timeseries(
        &self,
        path: &str,
        schema: MeasurementSchema,
        alias: Option<String>,
        tags: TagMap,
        attributes: TagMap,
    ) -> Result<()> {
        let mut state = self.state.write().expect("catalog lock poisoned");
        self.cache.clear();

        self.ensure_storage_group(&mut state, path)?;

        state.tree.create_timeseries(path, schema.clone(), alias.clone())?;

        if let Err(reason) = self.adjust_timeseries(1) {
            state.tree.delete_timeseries_and_return_empty_sg(path).ok();
            log::warn!("adapter vetoed create_timeseries({path}): {reason}");
            return Err(Error::AdapterVeto(reason));
        }

        let tag_offset = if tags.is_empty() && attributes.is_empty() {
            -1
        } else {
            state.tag_log.write(&tags, &attributes)? as i64
        };

        let leaf_id = state.tree.resolve(path)?;
        state.tree.set_leaf_tag_offset(leaf_id, tag_offset);

        state.writer.append(&LogOperation::create_timeseries(
            path,
            &schema,
            alias.as_deref(),
            tag_offset,
        ))?;

        let sg = state.tree.get_storage_group_name(path)?;
        state.counters.increment(&sg);

        if !tags.is_empty() {
            state.tag_index.index_leaf(path, &tags);
        }

        Ok(())
    }

    /// Auto-creates the storage-group ancestor of `path` when enabled and
    /// absent. Two threads racing to materialize the same storage group
    /// see the second's `StorageGroupAlreadySet` swallowed as success.
    fn ensure_storage_group(&self, state: &mut Inner, path: &str) -> Result<()> {
        if state.tree.get_storage_group_name(path).is_ok() {
            return Ok(());
        }

        if !self.config.auto_create_schema_enabled {
            return Err(Error::StorageGroupNotSet(path.to_string()));
        }

        let sg_path = path::prefix_at_level(path, self.config.default_storage_group_level)?
            .ok_or_else(|| Error::StorageGroupNotSet(path.to_string()))?;

        match state.tree.set_storage_group(&sg_path) {
            Ok(()) => {
                if let Err(reason) = self.adjust_storage_groups(1) {
                    state.tree.delete_storage_group(&sg_path).ok();
                    log::warn!("adapter vetoed auto-create of {sg_path}: {reason}");
                    return Err(Error::AdapterVeto(reason));
                }

                state.writer.append(&LogOperation::SetStorageGroup { path: sg_path.clone() })?;
                state.counters.init_storage_group(&sg_path);
                self.init_counter(&sg_path);
                Ok(())
            }
            Err(Error::StorageGroupAlreadySet(_)) => {
                log::debug!("concurrent auto-create race for {sg_path}, treating as success");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub fn delete_timeseries(&self, path: &str) -> Result<()> {
        let mut state = self.state.write().expect("catalog lock poisoned");
        self.cache.clear();

        let (schema, alias, tags) = self.leaf_snapshot(&mut state, path)?;
        let outcome = state.tree.delete_timeseries_and_return_empty_sg(path)?;

        if let Err(reason) = self.adjust_timeseries(-1) {
            log::warn!("adapter vetoed delete_timeseries({path}): {reason}");
            // Reverse the detach: recreate the leaf exactly as it was,
            // including its tag-file offset, before surfacing the veto.
            if state.tree.create_timeseries(path, schema, alias).is_ok() {
                if let Ok(leaf_id) = state.tree.resolve(path) {
                    state.tree.set_leaf_tag_offset(leaf_id, outcome.removed.tag_offset);
                }
            }
            return Err(Error::AdapterVeto(reason));
        }

        state.writer.append(&LogOperation::DeleteTimeseries { path: path.to_string() })?;
        state.counters.decrement(&outcome.sg_name);

        if let Some(tags) = &tags {
            state.tag_index.remove_leaf(path, tags);
        }

        if outcome.sg_now_empty {
            self.storage_engine.delete_all_data_files(&outcome.sg_name);
        }

        Ok(())
    }

    /// Snapshots the leaf at `path` — schema, alias, and tag submap if it has
    /// one — before it is detached from the tree, so a vetoed delete can be
    /// reconstructed exactly and a committed one can unindex its tags.
    fn leaf_snapshot(&self, state: &mut Inner, path: &str) -> Result<(MeasurementSchema, Option<String>, Option<TagMap>)> {
        let leaf_id = state.tree.resolve(path)?;

        let NodeKind::Leaf { schema, alias, tag_offset } = &state.tree.node(leaf_id).kind else {
            return Err(Error::UnexpectedNodeKind {
                path: path.to_string(),
                expected: "Leaf",
            });
        };

        let schema = schema.clone();
        let alias = alias.clone();
        let tags = if *tag_offset >= 0 {
            Some(state.tag_log.read_tag(*tag_offset as u64)?)
        } else {
            None
        };

        Ok((schema, alias, tags))
    }

    pub fn set_ttl(&self, sg_path: &str, ttl_millis: u64) -> Result<()> {
        let mut state = self.state.write().expect("catalog lock poisoned");
        state.tree.set_ttl(sg_path, ttl_millis)?;
        state.writer.append(&LogOperation::SetTtl {
            path: sg_path.to_string(),
            ttl_millis,
        })?;
        Ok(())
    }

    pub fn get_all_timeseries_name(&self, prefix: &str) -> Result<Vec<String>> {
        self.state.read().expect("catalog lock poisoned").tree.get_all_timeseries_name(prefix)
    }

    pub fn get_devices(&self, prefix: &str) -> Result<Vec<String>> {
        self.state.read().expect("catalog lock poisoned").tree.get_devices(prefix)
    }

    pub fn get_nodes_list(&self, prefix: &str, level: usize) -> Result<Vec<String>> {
        self.state.read().expect("catalog lock poisoned").tree.get_nodes_list(prefix, level)
    }

    pub fn get_storage_group_name(&self, path: &str) -> Result<String> {
        self.state.read().expect("catalog lock poisoned").tree.get_storage_group_name(path)
    }

    pub fn determine_storage_group(&self, pattern: &str) -> Result<BTreeMap<String, String>> {
        self.state.read().expect("catalog lock poisoned").tree.determine_storage_group(pattern)
    }

    pub fn get_all_measurement_schema(&self, plan: &MeasurementSchemaPlan) -> Result<Vec<MeasurementSchemaRow>> {
        self.state.read().expect("catalog lock poisoned").tree.get_all_measurement_schema(plan)
    }

    /// Resolves the device node at `path` through the bounded node cache,
    /// loading through to the tree under the read lock on a miss.
    pub fn get_device_node(&self, path: &str) -> Result<crate::tree::Node> {
        let path_owned = path.to_string();

        self.cache
            .get_or_load(path, || {
                let state = self.state.read().expect("catalog lock poisoned");
                let id = state.tree.resolve(&path_owned).map_err(|e| to_cache_miss(&path_owned, &e))?;
                Ok(state.tree.node(id).clone())
            })
            .map_err(Error::from)
    }

    /// Queries the inverted tag index, filters by the path prefix pattern,
    /// sorts by full path, and paginates identically to
    /// [`MTree::get_all_measurement_schema`].
    pub fn get_all_timeseries_schema(&self, plan: &TagSchemaPlan) -> Result<Vec<TimeseriesSchemaRow>> {
        let state = self.state.read().expect("catalog lock poisoned");

        let allowed: std::collections::BTreeSet<String> =
            state.tree.get_all_timeseries_name(&plan.prefix)?.into_iter().collect();

        let query = if plan.contains {
            TagQuery::Contains(plan.value.clone())
        } else {
            TagQuery::Exact(plan.value.clone())
        };

        let matched = state
            .tag_index
            .query_paginated(&plan.key, &query, &allowed, plan.offset, plan.limit);

        let mut rows = Vec::with_capacity(matched.len());

        for full_path in matched {
            let leaf_id = state.tree.resolve(&full_path)?;
            let (data_type, encoding, compressor, alias, tag_offset) = match &state.tree.node(leaf_id).kind {
                NodeKind::Leaf { schema, alias, tag_offset } => {
                    (schema.data_type, schema.encoding, schema.compressor, alias.clone(), *tag_offset)
                }
                _ => continue,
            };

            let storage_group = state.tree.get_storage_group_name(&full_path)?;
            let tags = if tag_offset >= 0 {
                state.tag_log.read_tag(tag_offset as u64)?
            } else {
                BTreeMap::new()
            };

            rows.push(TimeseriesSchemaRow {
                full_path,
                alias,
                storage_group,
                data_type,
                encoding,
                compressor,
                tags,
            });
        }

        Ok(rows)
    }
}

fn to_cache_miss(path: &str, error: &Error) -> crate::error::CacheMiss {
    match error {
        Error::StorageGroupNotSet(_) => crate::error::CacheMiss::StorageGroupNotSet(path.to_string()),
        _ => crate::error::CacheMiss::PathNotExist(path.to_string()),
    }
}

/// Applies one replayed log operation to in-memory state. The writer stays
/// untouched here (it is only constructed after replay finishes), so this
/// never re-appends. Errors are logged by the caller's `apply` closure via
/// [`mlog::replay`]; this function's `Result` only controls whether the
/// caller's replay counter advances.
fn apply_replayed(
    tree: &mut MTree,
    tag_index: &mut TagIndex,
    counters: &mut Counters,
    tag_log: &TagLogFile,
    op: LogOperation,
) -> Result<()> {
    match op {
        LogOperation::SetStorageGroup { path } => {
            tree.set_storage_group(&path)?;
            counters.init_storage_group(&path);
        }
        LogOperation::DeleteStorageGroup { paths } => {
            for path in paths {
                tree.delete_storage_group(&path)?;
                counters.remove_storage_group(&path);
            }
        }
        LogOperation::CreateTimeseries {
            path,
            data_type,
            encoding,
            compressor,
            props,
            alias,
            tag_offset,
        } => {
            let schema = MeasurementSchema::new(data_type, encoding, compressor)
                .with_props(MeasurementSchema::decode_props(&props));

            tree.create_timeseries(&path, schema, alias)?;
            let leaf_id = tree.resolve(&path)?;
            tree.set_leaf_tag_offset(leaf_id, tag_offset);

            let sg = tree.get_storage_group_name(&path)?;
            counters.increment(&sg);

            if tag_offset >= 0 {
                if let Ok(tags) = tag_log.read_tag(tag_offset as u64) {
                    if !tags.is_empty() {
                        tag_index.index_leaf(&path, &tags);
                    }
                }
            }
        }
        LogOperation::DeleteTimeseries { path } => {
            let tags = if let Ok(leaf_id) = tree.resolve(&path) {
                if let NodeKind::Leaf { tag_offset, .. } = &tree.node(leaf_id).kind {
                    if *tag_offset >= 0 {
                        tag_log.read_tag(*tag_offset as u64).ok()
                    } else {
                        None
                    }
                } else {
                    None
                }
            } else {
                None
            };

            let outcome = tree.delete_timeseries_and_return_empty_sg(&path)?;
            counters.decrement(&outcome.sg_name);

            if let Some(tags) = tags {
                if !tags.is_empty() {
                    tag_index.remove_leaf(&path, &tags);
                }
            }
        }
        LogOperation::SetTtl { path, ttl_millis } => {
            tree.set_ttl(&path, ttl_millis)?;
        }
    }

    Ok(())
}
