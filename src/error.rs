// Copyright (c) 2024-present, meta-catalog contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::fmt;

/// Errors that can occur while operating the metadata catalog.
#[derive(Debug)]
pub enum Error {
    /// A path is syntactically invalid (does not start with `root`, or contains an empty segment).
    IllegalPath(String),

    /// Lookup of a path that does not exist.
    PathNotExist(String),

    /// Create where a node already exists at the target path.
    PathAlreadyExist(String),

    /// An operation required an ancestor storage group and none was found.
    StorageGroupNotSet(String),

    /// A storage group overlaps an existing one (as ancestor, self, or descendant).
    StorageGroupAlreadySet(String),

    /// An operation that is only valid for one node variant was applied to another.
    UnexpectedNodeKind {
        /// Path of the offending node.
        path: String,
        /// Variant that was expected.
        expected: &'static str,
    },

    /// A serialized tag/attribute payload exceeds the configured tag-file record size.
    PayloadTooLarge {
        /// Encoded size in bytes.
        size: usize,
        /// Configured record size in bytes.
        limit: usize,
    },

    /// The external parameter adapter vetoed a delta.
    AdapterVeto(String),

    /// I/O error while reading or writing the operation log or tag file.
    Io(std::io::Error),

    /// A tag-file record failed to deserialize.
    Corrupt(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IllegalPath(p) => write!(f, "illegal path: {p}"),
            Self::PathNotExist(p) => write!(f, "path does not exist: {p}"),
            Self::PathAlreadyExist(p) => write!(f, "path already exists: {p}"),
            Self::StorageGroupNotSet(p) => write!(f, "no storage group set for: {p}"),
            Self::StorageGroupAlreadySet(p) => write!(f, "storage group already set: {p}"),
            Self::UnexpectedNodeKind { path, expected } => {
                write!(f, "node at {path} is not a {expected}")
            }
            Self::PayloadTooLarge { size, limit } => {
                write!(f, "tag/attribute payload of {size} bytes exceeds record size {limit}")
            }
            Self::AdapterVeto(reason) => write!(f, "adapter vetoed operation: {reason}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Corrupt(reason) => write!(f, "corrupt tag record: {reason}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Result alias used throughout the catalog.
pub type Result<T> = std::result::Result<T, Error>;

/// Outcome of a load-through cache lookup, later folded into [`Error`].
///
/// Kept distinct from [`Error`] because the cache does not know which of the two
/// path-shaped errors its loader raised until it inspects the underlying cause.
#[derive(Debug)]
pub(crate) enum CacheMiss {
    PathNotExist(String),
    StorageGroupNotSet(String),
}

impl From<CacheMiss> for Error {
    fn from(value: CacheMiss) -> Self {
        match value {
            CacheMiss::PathNotExist(p) => Error::PathNotExist(p),
            CacheMiss::StorageGroupNotSet(p) => Error::StorageGroupNotSet(p),
        }
    }
}
