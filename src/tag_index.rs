// Copyright (c) 2024-present, meta-catalog contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Inverted tag index: `tag_key -> tag_value -> set<full_path>`.
//!
//! Kept entirely in memory and rebuilt by replaying leaf creations during
//! startup; nothing here is itself durable.

use std::collections::{BTreeMap, BTreeSet};

use rustc_hash::FxHashMap;

/// How a tag-value query should match.
#[derive(Clone, Debug)]
pub enum TagQuery {
    /// Value must equal exactly.
    Exact(String),
    /// Value must contain the given substring.
    Contains(String),
}

#[derive(Default)]
pub struct TagIndex {
    index: FxHashMap<String, FxHashMap<String, BTreeSet<String>>>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `path`'s tags. Called once per leaf, right after its tag
    /// payload is durably written.
    pub fn index_leaf(&mut self, path: &str, tags: &BTreeMap<String, String>) {
        for (key, value) in tags {
            self.index
                .entry(key.clone())
                .or_default()
                .entry(value.clone())
                .or_default()
                .insert(path.to_string());
        }
    }

    /// Unregisters `path`'s tags. Called once per leaf deletion, with the
    /// same tag map that was originally indexed.
    pub fn remove_leaf(&mut self, path: &str, tags: &BTreeMap<String, String>) {
        for (key, value) in tags {
            let Some(values) = self.index.get_mut(key) else {
                continue;
            };

            if let Some(paths) = values.get_mut(value) {
                paths.remove(path);

                if paths.is_empty() {
                    values.remove(value);
                }
            }

            if values.is_empty() {
                self.index.remove(key);
            }
        }
    }

    /// Full paths of every leaf carrying `tag_key` whose value matches
    /// `query`, in ascending path order.
    pub fn query(&self, tag_key: &str, query: &TagQuery) -> BTreeSet<String> {
        let Some(values) = self.index.get(tag_key) else {
            return BTreeSet::new();
        };

        match query {
            TagQuery::Exact(value) => values.get(value).cloned().unwrap_or_default(),
            TagQuery::Contains(needle) => values
                .iter()
                .filter(|(value, _)| value.contains(needle.as_str()))
                .flat_map(|(_, paths)| paths.iter().cloned())
                .collect(),
        }
    }

    /// Queries `tag_key`/`query`, intersects with `allowed` (typically the
    /// result of a path-prefix wildcard expansion), and paginates the sorted
    /// result.
    pub fn query_paginated(
        &self,
        tag_key: &str,
        query: &TagQuery,
        allowed: &BTreeSet<String>,
        offset: usize,
        limit: usize,
    ) -> Vec<String> {
        let matched = self.query(tag_key, query);
        let intersected = matched.intersection(allowed).cloned().skip(offset);

        if limit == 0 {
            intersected.collect()
        } else {
            intersected.take(limit).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn exact_query_finds_indexed_leaves() {
        let mut index = TagIndex::new();
        index.index_leaf("root.sg1.d1.s1", &tags(&[("unit", "celsius")]));
        index.index_leaf("root.sg1.d2.s1", &tags(&[("unit", "fahrenheit")]));

        let matches = index.query("unit", &TagQuery::Exact("celsius".to_string()));
        assert_eq!(matches, BTreeSet::from(["root.sg1.d1.s1".to_string()]));
    }

    #[test]
    fn contains_query_matches_substring() {
        let mut index = TagIndex::new();
        index.index_leaf("root.sg1.d1.s1", &tags(&[("location", "room-north")]));
        index.index_leaf("root.sg1.d2.s1", &tags(&[("location", "room-south")]));

        let matches = index.query("location", &TagQuery::Contains("room".to_string()));
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn remove_leaf_drops_empty_buckets() {
        let mut index = TagIndex::new();
        let leaf_tags = tags(&[("unit", "celsius")]);
        index.index_leaf("root.sg1.d1.s1", &leaf_tags);
        index.remove_leaf("root.sg1.d1.s1", &leaf_tags);

        assert!(index.query("unit", &TagQuery::Exact("celsius".to_string())).is_empty());
        assert!(index.index.is_empty());
    }

    #[test]
    fn query_paginated_intersects_and_paginates() {
        let mut index = TagIndex::new();
        for i in 0..5 {
            index.index_leaf(&format!("root.sg1.d{i}.s1"), &tags(&[("unit", "celsius")]));
        }

        let allowed: BTreeSet<String> = ["root.sg1.d1.s1", "root.sg1.d2.s1", "root.sg1.d3.s1"]
            .into_iter()
            .map(str::to_string)
            .collect();

        let page = index.query_paginated("unit", &TagQuery::Exact("celsius".to_string()), &allowed, 1, 1);
        assert_eq!(page, vec!["root.sg1.d2.s1".to_string()]);
    }
}
