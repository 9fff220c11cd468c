//! Graph algorithms over an [`OtRepository`].
//!
//! Everything here is built from two collaborators only: the repository (for
//! commits, heads and snapshots) and the document's [`OtSystem`]. No state
//! survives between calls; each traversal keeps its own [`CommitCache`] so a
//! commit is fetched from storage at most once per call.
//!
//! # Traversal order
//!
//! Backward walks pop commits from a max-heap keyed by `(level, id)`. A
//! child's level is always greater than each parent's, so when several heads
//! are walked at once every commit is visited only after all of its
//! reachable descendants. Diff accumulation is therefore topologically valid
//! and the multi-head merge sees complete reachability information.
//!
//! # Sub-modules
//!
//! - [`find_parent`]: level-ordered ancestor search ([`FindResult`]).
//! - [`merge`]: common-ancestor search and multi-head merge.
//! - [`graph`]: in-memory subgraph for diagnostics ([`CommitGraph`]).

pub mod find_parent;
pub mod graph;
pub mod merge;

use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::try_join_all;
use tracing::debug;

use crate::commit::{CommitId, Diff, OtCommit};
use crate::error::OtError;
use crate::reducer::ToList;
use crate::repo::OtRepository;
use crate::system::OtSystem;

pub use find_parent::FindResult;
pub use graph::CommitGraph;

/// Commits loaded during one traversal, keyed by id.
pub(crate) struct CommitCache<'a, K, D, R: ?Sized> {
    repository: &'a R,
    commits: HashMap<K, OtCommit<K, D>>,
}

impl<'a, K, D, R> CommitCache<'a, K, D, R>
where
    K: CommitId,
    D: Diff,
    R: OtRepository<K, D> + ?Sized,
{
    pub(crate) fn new(repository: &'a R) -> Self {
        Self {
            repository,
            commits: HashMap::new(),
        }
    }

    /// Fetch every id not loaded yet, concurrently.
    pub(crate) async fn load_all<I>(&mut self, ids: I) -> Result<(), OtError>
    where
        I: IntoIterator<Item = K>,
    {
        let missing: Vec<K> = ids
            .into_iter()
            .filter(|id| !self.commits.contains_key(id))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        let repository = self.repository;
        let loaded = try_join_all(missing.iter().map(|id| repository.load_commit(id))).await?;
        for commit in loaded {
            self.commits.insert(commit.id().clone(), commit);
        }
        Ok(())
    }

    pub(crate) fn get(&self, id: &K) -> Result<&OtCommit<K, D>, OtError> {
        self.commits
            .get(id)
            .ok_or_else(|| OtError::not_found(format_args!("commit {id}")))
    }

    pub(crate) fn len(&self) -> usize {
        self.commits.len()
    }
}

/// Ancestor search, head reduction and merge for one repository and
/// document type.
pub struct OtAlgorithms<K, D, R, S> {
    repository: Arc<R>,
    system: Arc<S>,
    _types: PhantomData<fn() -> (K, D)>,
}

impl<K, D, R, S> Clone for OtAlgorithms<K, D, R, S> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            system: Arc::clone(&self.system),
            _types: PhantomData,
        }
    }
}

impl<K, D, R, S> OtAlgorithms<K, D, R, S>
where
    K: CommitId,
    D: Diff,
    R: OtRepository<K, D>,
    S: OtSystem<D>,
{
    #[must_use]
    pub const fn new(repository: Arc<R>, system: Arc<S>) -> Self {
        Self {
            repository,
            system,
            _types: PhantomData,
        }
    }

    #[must_use]
    pub const fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    #[must_use]
    pub const fn system(&self) -> &Arc<S> {
        &self.system
    }

    /// Drop every head that is a transitive ancestor of another head.
    ///
    /// The walk never descends below the lowest level among `heads`, since
    /// no head can live there.
    ///
    /// # Errors
    ///
    /// Propagates repository failures, including [`OtError::NotFound`] for
    /// unknown ids.
    pub async fn exclude_parents(&self, heads: &BTreeSet<K>) -> Result<BTreeSet<K>, OtError> {
        if heads.len() <= 1 {
            return Ok(heads.clone());
        }
        let mut cache = CommitCache::new(&*self.repository);
        cache.load_all(heads.iter().cloned()).await?;

        let mut min_level = u64::MAX;
        let mut frontier = BinaryHeap::new();
        for head in heads {
            let level = cache.get(head)?.level();
            min_level = min_level.min(level);
            frontier.push((level, head.clone()));
        }

        let mut result = heads.clone();
        let mut visited: HashSet<K> = heads.iter().cloned().collect();
        while let Some((_, id)) = frontier.pop() {
            let parents: Vec<K> = cache.get(&id)?.parents().keys().cloned().collect();
            for parent in &parents {
                result.remove(parent);
            }
            let fresh: Vec<K> = parents
                .into_iter()
                .filter(|parent| visited.insert(parent.clone()))
                .collect();
            cache.load_all(fresh.iter().cloned()).await?;
            for parent in fresh {
                let level = cache.get(&parent)?.level();
                if level >= min_level {
                    frontier.push((level, parent));
                }
            }
        }

        if result.len() != heads.len() {
            debug!(heads = ?heads, reduced = ?result, "excluded ancestor heads");
        }
        Ok(result)
    }

    /// Merge the repository's current heads and publish the result as the
    /// only head.
    ///
    /// # Errors
    ///
    /// Propagates merge and repository failures. On failure the heads are
    /// left untouched.
    pub async fn merge_and_update_heads(&self) -> Result<K, OtError> {
        let heads = self.repository.get_heads().await?;
        let reduced = self.exclude_parents(&heads).await?;
        let merged = self.merge(&reduced).await?;
        let mut excluded = heads;
        excluded.remove(&merged);
        self.repository
            .update_heads(BTreeSet::from([merged.clone()]), excluded)
            .await?;
        Ok(merged)
    }

    /// Squashed document state at `commit_id`, rebuilt from the nearest
    /// snapshot at or below it.
    ///
    /// # Errors
    ///
    /// [`OtError::NotFound`] when no snapshot is reachable.
    pub async fn checkout_at(&self, commit_id: &K) -> Result<Vec<D>, OtError> {
        let repository = &*self.repository;
        let found = self
            .find_parent(
                &BTreeSet::from([commit_id.clone()]),
                &ToList,
                move |commit: &OtCommit<K, D>| {
                    let id = commit.id().clone();
                    async move { repository.load_snapshot(&id).await }
                },
            )
            .await?;
        let mut diffs = found.found;
        diffs.extend(found.accumulated_diffs);
        Ok(self.system.squash(&diffs))
    }

    /// Materialize and store a snapshot for `commit_id`.
    ///
    /// # Errors
    ///
    /// Propagates [`OtAlgorithms::checkout_at`] and repository failures.
    pub async fn save_snapshot(&self, commit_id: &K) -> Result<(), OtError> {
        let diffs = self.checkout_at(commit_id).await?;
        debug!(commit = %commit_id, diffs = diffs.len(), "materialized snapshot");
        self.repository.save_snapshot(commit_id, diffs).await
    }

    /// Load the subgraph reachable from `heads`, stopping after `limit`
    /// commits when given.
    ///
    /// # Errors
    ///
    /// Propagates repository failures.
    pub async fn load_graph(
        &self,
        heads: &BTreeSet<K>,
        limit: Option<usize>,
    ) -> Result<CommitGraph<K, D>, OtError> {
        let limit = limit.unwrap_or(usize::MAX);
        let mut cache = CommitCache::new(&*self.repository);
        let mut graph = CommitGraph::new();
        let mut pending: Vec<K> = heads.iter().cloned().collect();
        let mut seen: HashSet<K> = heads.iter().cloned().collect();

        while !pending.is_empty() && cache.len() < limit {
            let room = limit - cache.len();
            let batch: Vec<K> = pending.drain(..pending.len().min(room)).collect();
            cache.load_all(batch.iter().cloned()).await?;
            for id in batch {
                let commit = cache.get(&id)?;
                for parent in commit.parents().keys() {
                    if seen.insert(parent.clone()) {
                        pending.push(parent.clone());
                    }
                }
                graph.insert(commit.clone());
            }
        }
        Ok(graph)
    }
}
