// Copyright (c) 2024-present, meta-catalog contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The in-memory schema tree (`MTree`).
//!
//! All mutating methods here are pure data-structure operations: they do not
//! touch the operation log, the tag file, or the external adapter. That
//! orchestration lives one layer up, in [`crate::manager::MManager`], so the
//! tree itself stays trivially unit-testable.

mod arena;

pub use arena::{Node, NodeId, NodeKind};

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::path;
use crate::schema::MeasurementSchema;
use arena::Arena;

/// A leaf detached from the tree, carrying just enough information for the
/// caller to reconcile the tag file, the inverted index and the counters.
#[derive(Clone, Debug)]
pub struct RemovedLeaf {
    pub path: String,
    pub tag_offset: i64,
}

/// Result of [`MTree::delete_timeseries_and_return_empty_sg`].
#[derive(Clone, Debug)]
pub struct DeleteOutcome {
    pub sg_name: String,
    pub removed: RemovedLeaf,
    /// Whether the storage group holds zero leaves after pruning. The
    /// storage group node itself is *not* deleted here regardless.
    pub sg_now_empty: bool,
}

/// A single row returned by [`MTree::get_all_measurement_schema`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MeasurementSchemaRow {
    pub full_path: String,
    pub alias: Option<String>,
    pub storage_group: String,
    pub data_type: u16,
    pub encoding: u16,
    pub compressor: u16,
    pub tag_offset: i64,
}

/// Query parameters for [`MTree::get_all_measurement_schema`].
#[derive(Clone, Debug, Default)]
pub struct MeasurementSchemaPlan {
    pub prefix: String,
    pub offset: usize,
    /// `0` means unbounded.
    pub limit: usize,
}

/// The hierarchical schema tree: `root.storage_group.device.series`.
pub struct MTree {
    arena: Arena,
    root: NodeId,
}

impl Default for MTree {
    fn default() -> Self {
        Self::new()
    }
}

impl MTree {
    #[must_use]
    pub fn new() -> Self {
        let mut arena = Arena::new();
        let root = arena.insert(path::ROOT.to_string(), None, NodeKind::Internal);
        Self { arena, root }
    }

    /// Returns the node at a fully-qualified, wildcard-free path.
    pub fn resolve(&self, path: &str) -> Result<NodeId> {
        let segments = path::split(path)?;
        let mut current = self.root;

        for seg in &segments[1..] {
            let node = self.arena.get(current);
            current = *node
                .children
                .get(*seg)
                .ok_or_else(|| Error::PathNotExist(path.to_string()))?;
        }

        Ok(current)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        self.arena.get(id)
    }

    /// Reconstructs the dotted path of a node by walking parent links.
    pub fn full_path(&self, id: NodeId) -> String {
        let mut segments = Vec::new();
        let mut current = Some(id);

        while let Some(cur) = current {
            let node = self.arena.get(cur);
            segments.push(node.name.clone());
            current = node.parent;
        }

        segments.reverse();
        path::join_owned(&segments)
    }

    /// Walks `path` until it encounters a [`NodeKind::StorageGroup`] and
    /// returns that prefix. Only existing ancestors are considered, which is
    /// what lets `create_timeseries` reuse this to validate an SG ancestor
    /// before the rest of the path has been materialized.
    pub fn get_storage_group_name(&self, path: &str) -> Result<String> {
        let segments = path::split(path)?;
        let mut current = self.root;
        let mut acc = vec![segments[0].to_string()];

        if self.arena.get(current).is_storage_group() {
            return Ok(path::join_owned(&acc));
        }

        for seg in &segments[1..] {
            let node = self.arena.get(current);
            let Some(&child) = node.children.get(*seg) else {
                break;
            };
            current = child;
            acc.push((*seg).to_string());

            if self.arena.get(current).is_storage_group() {
                return Ok(path::join_owned(&acc));
            }
        }

        Err(Error::StorageGroupNotSet(path.to_string()))
    }

    pub fn set_storage_group(&mut self, path: &str) -> Result<()> {
        let segments = path::split(path)?;
        let mut current = self.root;

        if self.arena.get(current).is_storage_group() {
            return Err(Error::StorageGroupAlreadySet(path.to_string()));
        }

        for seg in &segments[1..] {
            if self.arena.get(current).is_leaf() {
                return Err(Error::PathAlreadyExist(path.to_string()));
            }

            current = match self.arena.get(current).children.get(*seg) {
                Some(&child) => child,
                None => {
                    let child = self
                        .arena
                        .insert((*seg).to_string(), Some(current), NodeKind::Internal);
                    self.arena
                        .get_mut(current)
                        .children
                        .insert((*seg).to_string(), child);
                    child
                }
            };

            if self.arena.get(current).is_storage_group() {
                return Err(Error::StorageGroupAlreadySet(path.to_string()));
            }
        }

        if self.subtree_contains_storage_group(current) {
            return Err(Error::StorageGroupAlreadySet(path.to_string()));
        }

        self.arena.get_mut(current).kind = NodeKind::StorageGroup { data_ttl: 0 };
        Ok(())
    }

    fn subtree_contains_storage_group(&self, node_id: NodeId) -> bool {
        let node = self.arena.get(node_id);
        node.is_storage_group()
            || node
                .children
                .values()
                .any(|&c| self.subtree_contains_storage_group(c))
    }

    pub fn delete_storage_group(&mut self, path: &str) -> Result<Vec<RemovedLeaf>> {
        let node_id = self.resolve(path)?;
        let node = self.arena.get(node_id);

        if !node.is_storage_group() {
            return Err(Error::StorageGroupNotSet(path.to_string()));
        }

        let parent = node.parent;
        let name = node.name.clone();

        let mut removed = Vec::new();
        self.remove_subtree_contents(node_id, path, &mut removed);
        self.arena.remove(node_id);

        if let Some(parent_id) = parent {
            self.arena.get_mut(parent_id).children.remove(&name);
            self.prune_upward(parent_id);
        }

        Ok(removed)
    }

    fn remove_subtree_contents(&mut self, node_id: NodeId, path_prefix: &str, removed: &mut Vec<RemovedLeaf>) {
        let children: Vec<(String, NodeId)> = self
            .arena
            .get(node_id)
            .children
            .iter()
            .map(|(k, &v)| (k.clone(), v))
            .collect();

        for (name, child) in children {
            let child_path = format!("{path_prefix}.{name}");
            self.remove_subtree_contents(child, &child_path, removed);

            if let NodeKind::Leaf { tag_offset, .. } = self.arena.get(child).kind {
                removed.push(RemovedLeaf {
                    path: child_path,
                    tag_offset,
                });
            }

            self.arena.remove(child);
        }

        self.arena.get_mut(node_id).children.clear();
    }

    /// Removes empty `Internal` ancestors starting at `node_id`, stopping at
    /// the root, at a node that still has children, or at a node that is not
    /// `Internal` (a storage group boundary is never pruned away here).
    fn prune_upward(&mut self, mut node_id: NodeId) {
        loop {
            if node_id == self.root {
                break;
            }

            let node = self.arena.get(node_id);

            if !node.children.is_empty() || !matches!(node.kind, NodeKind::Internal) {
                break;
            }

            let Some(parent) = node.parent else { break };
            let name = node.name.clone();

            self.arena.get_mut(parent).children.remove(&name);
            self.arena.remove(node_id);
            node_id = parent;
        }
    }

    pub fn create_timeseries(
        &mut self,
        path: &str,
        schema: MeasurementSchema,
        alias: Option<String>,
    ) -> Result<NodeId> {
        let segments = path::split(path)?;

        if segments.last().copied() == Some(path::TIME) {
            return Err(Error::IllegalPath(path.to_string()));
        }

        // An ancestor storage group must already exist; it is never
        // auto-created here (that policy lives in MManager).
        self.get_storage_group_name(path)
            .map_err(|_| Error::StorageGroupNotSet(path.to_string()))?;

        let mut current = self.root;

        for seg in &segments[1..segments.len() - 1] {
            if self.arena.get(current).is_leaf() {
                return Err(Error::PathAlreadyExist(path.to_string()));
            }

            current = match self.arena.get(current).children.get(*seg) {
                Some(&child) => child,
                None => {
                    let child = self
                        .arena
                        .insert((*seg).to_string(), Some(current), NodeKind::Internal);
                    self.arena
                        .get_mut(current)
                        .children
                        .insert((*seg).to_string(), child);
                    child
                }
            };
        }

        let leaf_name = segments[segments.len() - 1];

        if self.arena.get(current).is_leaf() {
            return Err(Error::PathAlreadyExist(path.to_string()));
        }

        if self.arena.get(current).children.contains_key(leaf_name) {
            return Err(Error::PathAlreadyExist(path.to_string()));
        }

        let leaf_id = self.arena.insert(
            leaf_name.to_string(),
            Some(current),
            NodeKind::Leaf {
                schema,
                alias,
                tag_offset: -1,
            },
        );
        self.arena
            .get_mut(current)
            .children
            .insert(leaf_name.to_string(), leaf_id);

        Ok(leaf_id)
    }

    /// Records the tag-file offset on a leaf after the payload has been
    /// written. Called by `MManager` once the write actually lands on disk.
    pub fn set_leaf_tag_offset(&mut self, leaf_id: NodeId, offset: i64) {
        if let NodeKind::Leaf { tag_offset, .. } = &mut self.arena.get_mut(leaf_id).kind {
            *tag_offset = offset;
        }
    }

    pub fn set_ttl(&mut self, sg_path: &str, ttl_millis: u64) -> Result<()> {
        let id = self.resolve(sg_path)?;

        match &mut self.arena.get_mut(id).kind {
            NodeKind::StorageGroup { data_ttl } => {
                *data_ttl = ttl_millis;
                Ok(())
            }
            _ => Err(Error::StorageGroupNotSet(sg_path.to_string())),
        }
    }

    pub fn delete_timeseries_and_return_empty_sg(&mut self, path: &str) -> Result<DeleteOutcome> {
        let leaf_id = self.resolve(path)?;
        let leaf_node = self.arena.get(leaf_id);

        let NodeKind::Leaf { tag_offset, .. } = leaf_node.kind else {
            return Err(Error::UnexpectedNodeKind {
                path: path.to_string(),
                expected: "Leaf",
            });
        };

        let parent = leaf_node.parent.expect("a leaf always has a parent");
        let name = leaf_node.name.clone();

        // The storage group must be resolved before the leaf is detached:
        // deletion can empty intermediate devices, but the SG node itself
        // survives, so this is stable either way.
        let sg_name = self.get_storage_group_name(path)?;

        self.arena.get_mut(parent).children.remove(&name);
        self.arena.remove(leaf_id);
        self.prune_upward(parent);

        let sg_id = self.resolve(&sg_name)?;
        let sg_now_empty = !self.subtree_contains_leaf(sg_id);

        Ok(DeleteOutcome {
            sg_name,
            removed: RemovedLeaf {
                path: path.to_string(),
                tag_offset,
            },
            sg_now_empty,
        })
    }

    fn subtree_contains_leaf(&self, node_id: NodeId) -> bool {
        let node = self.arena.get(node_id);
        node.is_leaf() || node.children.values().any(|&c| self.subtree_contains_leaf(c))
    }

    pub fn get_all_timeseries_name(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .collect_leaf_entries(prefix)?
            .into_iter()
            .map(|(path, _)| path)
            .collect())
    }

    /// Distinct device paths (parents of matched leaves), sorted.
    pub fn get_devices(&self, prefix: &str) -> Result<Vec<String>> {
        let mut devices: Vec<String> = self
            .collect_leaf_entries(prefix)?
            .into_iter()
            .filter_map(|(leaf_path, _)| path::parent_of(&leaf_path).ok().flatten())
            .collect();

        devices.sort();
        devices.dedup();
        Ok(devices)
    }

    fn collect_leaf_entries(&self, prefix: &str) -> Result<Vec<(String, NodeId)>> {
        let segments = path::split(prefix)?;
        let mut acc = vec![segments[0].to_string()];
        let mut results = Vec::new();
        self.collect_leaves(self.root, &segments[1..], &mut acc, &mut results);
        Ok(results)
    }

    fn collect_leaves(
        &self,
        node_id: NodeId,
        pattern: &[&str],
        acc: &mut Vec<String>,
        results: &mut Vec<(String, NodeId)>,
    ) {
        if pattern.is_empty() {
            if self.arena.get(node_id).is_leaf() {
                results.push((path::join_owned(acc), node_id));
            }
            return;
        }

        let seg = pattern[0];
        let node = self.arena.get(node_id);

        if path::is_wildcard(seg) && pattern.len() == 1 {
            let children: Vec<(String, NodeId)> =
                node.children.iter().map(|(k, &v)| (k.clone(), v)).collect();

            for (name, child) in children {
                acc.push(name);
                self.collect_all_leaves(child, acc, results);
                acc.pop();
            }
            return;
        }

        if path::is_wildcard(seg) {
            let children: Vec<(String, NodeId)> =
                node.children.iter().map(|(k, &v)| (k.clone(), v)).collect();

            for (name, child) in children {
                acc.push(name);
                self.collect_leaves(child, &pattern[1..], acc, results);
                acc.pop();
            }
        } else if let Some(&child) = node.children.get(seg) {
            acc.push(seg.to_string());
            self.collect_leaves(child, &pattern[1..], acc, results);
            acc.pop();
        }
    }

    /// Collects every leaf at any depth of one level or more below `node_id`.
    /// Used for a trailing `*`, which never matches the node it starts from.
    fn collect_all_leaves(&self, node_id: NodeId, acc: &mut Vec<String>, results: &mut Vec<(String, NodeId)>) {
        let node = self.arena.get(node_id);

        if node.is_leaf() {
            results.push((path::join_owned(acc), node_id));
            return;
        }

        let children: Vec<(String, NodeId)> = node.children.iter().map(|(k, &v)| (k.clone(), v)).collect();

        for (name, child) in children {
            acc.push(name);
            self.collect_all_leaves(child, acc, results);
            acc.pop();
        }
    }

    /// Every node whose depth (root = 0) equals `level`, under a concrete
    /// (wildcard-free) `prefix`.
    pub fn get_nodes_list(&self, prefix: &str, level: usize) -> Result<Vec<String>> {
        let segments = path::split(prefix)?;

        if segments.iter().any(|s| path::is_wildcard(s)) {
            return Err(Error::IllegalPath(prefix.to_string()));
        }

        let prefix_depth = segments.len() - 1;

        if level < prefix_depth {
            return Ok(Vec::new());
        }

        let node_id = self.resolve(prefix)?;
        let mut acc: Vec<String> = segments.iter().map(|s| (*s).to_string()).collect();
        let mut results = Vec::new();
        self.collect_nodes_at_depth(node_id, prefix_depth, level, &mut acc, &mut results);
        Ok(results)
    }

    fn collect_nodes_at_depth(
        &self,
        node_id: NodeId,
        current_depth: usize,
        target_depth: usize,
        acc: &mut Vec<String>,
        results: &mut Vec<String>,
    ) {
        if current_depth == target_depth {
            results.push(path::join_owned(acc));
            return;
        }

        let node = self.arena.get(node_id);
        let children: Vec<(String, NodeId)> = node.children.iter().map(|(k, &v)| (k.clone(), v)).collect();

        for (name, child) in children {
            acc.push(name);
            self.collect_nodes_at_depth(child, current_depth + 1, target_depth, acc, results);
            acc.pop();
        }
    }

    /// Splits a wildcard path at the first storage-group boundary reachable
    /// by any matching walk. A trailing `*` keeps expanding one level at a
    /// time until it hits a storage group; any other wildcard expands
    /// exactly one level then continues matching the rest of the pattern.
    pub fn determine_storage_group(&self, pattern: &str) -> Result<BTreeMap<String, String>> {
        let segments = path::split(pattern)?;
        let mut acc = vec![segments[0].to_string()];
        let mut results = BTreeMap::new();
        self.determine_walk(self.root, &segments[1..], &mut acc, &mut results);
        Ok(results)
    }

    fn determine_walk(
        &self,
        node_id: NodeId,
        remaining: &[&str],
        acc: &mut Vec<String>,
        results: &mut BTreeMap<String, String>,
    ) {
        let node = self.arena.get(node_id);

        if node.is_storage_group() {
            let sg_path = path::join_owned(acc);
            let rewrite = if remaining.is_empty() {
                sg_path.clone()
            } else {
                format!("{sg_path}.{}", remaining.join("."))
            };
            results.insert(sg_path, rewrite);
            return;
        }

        let Some(&seg) = remaining.first() else {
            return;
        };

        let children: Vec<(String, NodeId)> = node.children.iter().map(|(k, &v)| (k.clone(), v)).collect();

        if path::is_wildcard(seg) {
            let next_remaining = if remaining.len() == 1 { remaining } else { &remaining[1..] };

            for (name, child) in children {
                acc.push(name);
                self.determine_walk(child, next_remaining, acc, results);
                acc.pop();
            }
        } else if let Some(&child) = node.children.get(seg) {
            acc.push(seg.to_string());
            self.determine_walk(child, &remaining[1..], acc, results);
            acc.pop();
        }
    }

    pub fn get_all_measurement_schema(&self, plan: &MeasurementSchemaPlan) -> Result<Vec<MeasurementSchemaRow>> {
        let mut rows = Vec::new();

        for (full_path, leaf_id) in self.collect_leaf_entries(&plan.prefix)? {
            let NodeKind::Leaf { schema, alias, tag_offset } = &self.arena.get(leaf_id).kind else {
                continue;
            };

            let storage_group = self.get_storage_group_name(&full_path)?;

            rows.push(MeasurementSchemaRow {
                full_path,
                alias: alias.clone(),
                storage_group,
                data_type: schema.data_type,
                encoding: schema.encoding,
                compressor: schema.compressor,
                tag_offset: *tag_offset,
            });
        }

        rows.sort_by(|a, b| a.full_path.cmp(&b.full_path));

        let skipped = rows.into_iter().skip(plan.offset);
        Ok(if plan.limit == 0 {
            skipped.collect()
        } else {
            skipped.take(plan.limit).collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> MeasurementSchema {
        MeasurementSchema::new(1, 2, 3)
    }

    #[test]
    fn set_and_delete_storage_group_round_trips() {
        let mut tree = MTree::new();
        tree.set_storage_group("root.sg1").unwrap();
        assert!(tree.resolve("root.sg1").unwrap() != tree.root);

        let removed = tree.delete_storage_group("root.sg1").unwrap();
        assert!(removed.is_empty());
        assert!(matches!(tree.resolve("root.sg1"), Err(Error::PathNotExist(_))));
    }

    #[test]
    fn storage_group_cannot_overlap() {
        let mut tree = MTree::new();
        tree.set_storage_group("root.a").unwrap();
        assert!(matches!(
            tree.set_storage_group("root.a.b"),
            Err(Error::StorageGroupAlreadySet(_))
        ));
        assert!(matches!(
            tree.set_storage_group("root.a"),
            Err(Error::StorageGroupAlreadySet(_))
        ));
    }

    #[test]
    fn create_timeseries_requires_storage_group() {
        let mut tree = MTree::new();
        assert!(matches!(
            tree.create_timeseries("root.sg1.d1.s1", schema(), None),
            Err(Error::StorageGroupNotSet(_))
        ));
    }

    #[test]
    fn create_and_delete_timeseries_prunes_empty_device() {
        let mut tree = MTree::new();
        tree.set_storage_group("root.sg1").unwrap();
        tree.create_timeseries("root.sg1.d1.s1", schema(), None).unwrap();

        assert_eq!(tree.get_all_timeseries_name("root.sg1.*").unwrap(), vec!["root.sg1.d1.s1"]);

        let outcome = tree.delete_timeseries_and_return_empty_sg("root.sg1.d1.s1").unwrap();
        assert_eq!(outcome.sg_name, "root.sg1");
        assert!(outcome.sg_now_empty);
        assert!(matches!(tree.resolve("root.sg1.d1"), Err(Error::PathNotExist(_))));
        assert!(tree.resolve("root.sg1").is_ok());
    }

    #[test]
    fn wildcard_matching_boundary_cases() {
        let mut tree = MTree::new();
        tree.set_storage_group("root.sg1").unwrap();
        tree.create_timeseries("root.sg1.x.s", schema(), None).unwrap();
        tree.create_timeseries("root.sg1.x.y.s", schema(), None).unwrap();

        let mut single_level = tree.get_all_timeseries_name("root.sg1.*.s").unwrap();
        single_level.sort();
        assert_eq!(single_level, vec!["root.sg1.x.s"]);

        let mut trailing = tree.get_all_timeseries_name("root.sg1.x.*").unwrap();
        trailing.sort();
        assert_eq!(trailing, vec!["root.sg1.x.s", "root.sg1.x.y.s"]);
    }

    #[test]
    fn determine_storage_group_expands_trailing_wildcard() {
        let mut tree = MTree::new();
        tree.set_storage_group("root.group1").unwrap();
        tree.set_storage_group("root.group2").unwrap();
        tree.set_storage_group("root.area1.group3").unwrap();

        let map = tree.determine_storage_group("root.*").unwrap();
        assert_eq!(map.get("root.group1").map(String::as_str), Some("root.group1.*"));
        assert_eq!(map.get("root.group2").map(String::as_str), Some("root.group2.*"));
        assert_eq!(
            map.get("root.area1.group3").map(String::as_str),
            Some("root.area1.group3.*")
        );
    }

    #[test]
    fn determine_storage_group_expands_one_level_for_interior_wildcard() {
        let mut tree = MTree::new();
        tree.set_storage_group("root.group1").unwrap();
        tree.set_storage_group("root.group2").unwrap();

        let map = tree.determine_storage_group("root.*.s1").unwrap();
        assert_eq!(map.get("root.group1").map(String::as_str), Some("root.group1.s1"));
        assert_eq!(map.get("root.group2").map(String::as_str), Some("root.group2.s1"));
    }

    #[test]
    fn get_nodes_list_respects_level() {
        let mut tree = MTree::new();
        tree.set_storage_group("root.sg1").unwrap();
        tree.create_timeseries("root.sg1.d1.s1", schema(), None).unwrap();
        tree.create_timeseries("root.sg1.d2.s1", schema(), None).unwrap();

        let mut devices = tree.get_nodes_list("root.sg1", 2).unwrap();
        devices.sort();
        assert_eq!(devices, vec!["root.sg1.d1", "root.sg1.d2"]);
    }

    #[test]
    fn measurement_schema_plan_paginates() {
        let mut tree = MTree::new();
        tree.set_storage_group("root.sg1").unwrap();
        for i in 0..5 {
            tree.create_timeseries(&format!("root.sg1.d1.s{i}"), schema(), None).unwrap();
        }

        let plan = MeasurementSchemaPlan {
            prefix: "root.sg1.*".to_string(),
            offset: 1,
            limit: 2,
        };
        let rows = tree.get_all_measurement_schema(&plan).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].full_path, "root.sg1.d1.s1");
        assert_eq!(rows[1].full_path, "root.sg1.d1.s2");
    }
}
