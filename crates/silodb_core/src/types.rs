//! Core type definitions for silodb.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Unique identifier for a document.
///
/// Document ids are opaque strings chosen by the application.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(String);

impl DocId {
    /// Creates a new document id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DocId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Error produced when parsing a revision id.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid revision id {input:?}: {reason}")]
pub struct RevisionIdError {
    /// The rejected input.
    pub input: String,
    /// Why it was rejected.
    pub reason: &'static str,
}

/// Identifier for a single revision of a document.
///
/// A revision id has the form `<generation>-<digest>`, where the generation
/// is a positive integer equal to the revision's depth from the root of the
/// revision tree, and the digest is an opaque suffix.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevisionId(String);

impl RevisionId {
    /// Parses a revision id, validating the generation prefix.
    pub fn parse(id: impl Into<String>) -> Result<Self, RevisionIdError> {
        let id = id.into();
        let reject = |reason| RevisionIdError {
            input: id.clone(),
            reason,
        };

        let (prefix, digest) = id
            .split_once('-')
            .ok_or_else(|| reject("missing '-' separator"))?;
        if digest.is_empty() {
            return Err(reject("empty digest"));
        }
        let generation: u64 = prefix
            .parse()
            .map_err(|_| reject("generation prefix is not an integer"))?;
        if generation == 0 {
            return Err(reject("generation must be positive"));
        }
        if prefix.starts_with('+') || (prefix.len() > 1 && prefix.starts_with('0')) {
            return Err(reject("generation prefix is not canonical"));
        }
        Ok(Self(id))
    }

    /// Builds the id of a fresh child revision one generation below `parent`.
    ///
    /// The digest is a random UUID, which is sufficient for a store that does
    /// not deduplicate identical writes.
    #[must_use]
    pub fn child_of(parent: Option<&RevisionId>) -> Self {
        let generation = parent.map_or(0, RevisionId::generation) + 1;
        Self(format!("{}-{}", generation, uuid::Uuid::new_v4().simple()))
    }

    /// Returns the generation encoded in the prefix.
    #[must_use]
    pub fn generation(&self) -> u64 {
        // Valid by construction; parse() rejects malformed prefixes.
        self.0
            .split_once('-')
            .and_then(|(prefix, _)| prefix.parse().ok())
            .unwrap_or(0)
    }

    /// Returns the opaque digest suffix.
    #[must_use]
    pub fn digest(&self) -> &str {
        self.0.split_once('-').map(|(_, d)| d).unwrap_or("")
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-store monotonic counter assigned to each revision at insertion.
///
/// Sequences order insertions and key attachment rows; they are never
/// reused.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Sequence(pub u64);

impl Sequence {
    /// Creates a new sequence number.
    #[must_use]
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// Returns the raw sequence value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next sequence number.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq:{}", self.0)
    }
}
