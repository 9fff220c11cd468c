//! Commit records and the transient values exchanged by the sync protocol.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Debug, Display};
use std::hash::Hash;

/// Bounds every commit id type satisfies.
///
/// Ids are opaque to the core; the total order is only used to make
/// traversal and merge folding deterministic.
pub trait CommitId: Clone + Ord + Hash + Debug + Display + Send + Sync + 'static {}

impl<T> CommitId for T where T: Clone + Ord + Hash + Debug + Display + Send + Sync + 'static {}

/// Bounds every diff type satisfies.
pub trait Diff: Clone + Debug + PartialEq + Send + Sync + 'static {}

impl<T> Diff for T where T: Clone + Debug + PartialEq + Send + Sync + 'static {}

/// An immutable node of the commit graph.
///
/// Each parent edge carries the diffs that transform the parent's document
/// into this commit's document. A merge commit has one edge per merged head.
#[derive(Debug, Clone)]
pub struct OtCommit<K, D> {
    id: K,
    parents: BTreeMap<K, Vec<D>>,
    level: u64,
    epoch: u64,
    timestamp: Option<u64>,
}

impl<K: CommitId, D: Diff> OtCommit<K, D> {
    /// Build a commit from its parts.
    #[must_use]
    pub const fn new(id: K, parents: BTreeMap<K, Vec<D>>, level: u64, epoch: u64) -> Self {
        Self {
            id,
            parents,
            level,
            epoch,
            timestamp: None,
        }
    }

    /// Build a root commit (no parents, level 1).
    #[must_use]
    pub const fn root(id: K, epoch: u64) -> Self {
        Self::new(id, BTreeMap::new(), 1, epoch)
    }

    /// Attach an informational wall-clock timestamp in milliseconds.
    #[must_use]
    pub const fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    #[must_use]
    pub const fn id(&self) -> &K {
        &self.id
    }

    /// Parent ids mapped to the diffs leading from each parent to this commit.
    #[must_use]
    pub const fn parents(&self) -> &BTreeMap<K, Vec<D>> {
        &self.parents
    }

    #[must_use]
    pub fn parent_ids(&self) -> BTreeSet<K> {
        self.parents.keys().cloned().collect()
    }

    /// Longest path length from the root; the root has level 1.
    #[must_use]
    pub const fn level(&self) -> u64 {
        self.level
    }

    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    #[must_use]
    pub const fn timestamp(&self) -> Option<u64> {
        self.timestamp
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    #[must_use]
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    /// Content equality, ignoring the informational timestamp.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.id == other.id
            && self.level == other.level
            && self.epoch == other.epoch
            && self.parents == other.parents
    }
}

/// Diffs that move a cursor forward to `commit_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchData<K, D> {
    /// Commit the cursor ends on.
    pub commit_id: K,
    /// Level of `commit_id`.
    pub level: u64,
    /// Squashed diffs to apply on top of the cursor's current state.
    pub diffs: Vec<D>,
}

impl<K, D> FetchData<K, D> {
    #[must_use]
    pub const fn new(commit_id: K, level: u64, diffs: Vec<D>) -> Self {
        Self {
            commit_id,
            level,
            diffs,
        }
    }
}
