// Copyright (c) 2024-present, meta-catalog contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Dotted-path utilities shared by the tree, the cache and the operation log.

use crate::error::{Error, Result};

/// The literal root identifier every path must start with.
pub const ROOT: &str = "root";

/// The reserved identifier denoting the time column; never a valid leaf name.
pub const TIME: &str = "time";

/// Single-level wildcard used in prefix patterns.
pub const WILDCARD: &str = "*";

/// Splits a dotted path into its segments, validating basic shape.
///
/// Fails [`Error::IllegalPath`] if the path is empty, does not start with
/// [`ROOT`], or contains an empty segment (e.g. `root..s1` or a trailing dot).
pub fn split(path: &str) -> Result<Vec<&str>> {
    if path.is_empty() {
        return Err(Error::IllegalPath(path.to_string()));
    }

    let segments: Vec<&str> = path.split('.').collect();

    if segments.first() != Some(&ROOT) {
        return Err(Error::IllegalPath(path.to_string()));
    }

    if segments.iter().any(|s| s.is_empty()) {
        return Err(Error::IllegalPath(path.to_string()));
    }

    Ok(segments)
}

/// Joins path segments back into a dotted path.
pub fn join(segments: &[&str]) -> String {
    segments.join(".")
}

/// Joins owned path segments back into a dotted path.
pub fn join_owned(segments: &[String]) -> String {
    segments.join(".")
}

/// Returns `true` if the segment is the single-level wildcard.
pub fn is_wildcard(segment: &str) -> bool {
    segment == WILDCARD
}

/// Extracts the path prefix at the given level (root is level 0).
///
/// Returns `None` if the path is shorter than `level + 1` segments.
pub fn prefix_at_level(path: &str, level: usize) -> Result<Option<String>> {
    let segments = split(path)?;

    if segments.len() < level + 1 {
        return Ok(None);
    }

    Ok(Some(join(&segments[..=level])))
}

/// Returns the parent path of `path`, or `None` if `path` is just `root`.
pub fn parent_of(path: &str) -> Result<Option<String>> {
    let segments = split(path)?;

    if segments.len() <= 1 {
        return Ok(None);
    }

    Ok(Some(join(&segments[..segments.len() - 1])))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_valid_path() {
        assert_eq!(split("root.sg1.d1.s1").unwrap(), vec!["root", "sg1", "d1", "s1"]);
    }

    #[test]
    fn rejects_missing_root() {
        assert!(matches!(split("sg1.d1.s1"), Err(Error::IllegalPath(_))));
    }

    #[test]
    fn rejects_empty_segment() {
        assert!(matches!(split("root..s1"), Err(Error::IllegalPath(_))));
        assert!(matches!(split("root.sg1."), Err(Error::IllegalPath(_))));
    }

    #[test]
    fn rejects_empty_string() {
        assert!(matches!(split(""), Err(Error::IllegalPath(_))));
    }

    #[test]
    fn prefix_at_level_truncates() {
        assert_eq!(
            prefix_at_level("root.sg1.d1.s1", 1).unwrap().as_deref(),
            Some("root.sg1")
        );
        assert_eq!(prefix_at_level("root.sg1", 3).unwrap(), None);
    }

    #[test]
    fn parent_of_truncates_by_one_segment() {
        assert_eq!(parent_of("root.sg1.d1").unwrap().as_deref(), Some("root.sg1"));
        assert_eq!(parent_of("root").unwrap(), None);
    }
}
