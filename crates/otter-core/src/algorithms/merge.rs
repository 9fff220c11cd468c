//! Multi-head merge.
//!
//! The merge runs in two phases:
//!
//! 1. A level-ordered walk from every head finds the nearest commit all of
//!    them reach, recording for each head the squashed diffs leading from
//!    that ancestor up to it.
//! 2. Heads are folded in ascending id order. The running merged diff is
//!    transformed against each further head; every parent edge collected so
//!    far is extended with the transform's continuation.
//!
//! Both phases depend only on commit content and id order, so any two
//! replicas merging the same heads build commits with identical parent edges.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap, HashSet};

use tracing::debug;

use super::{CommitCache, OtAlgorithms};
use crate::commit::{CommitId, Diff, OtCommit};
use crate::error::OtError;
use crate::repo::OtRepository;
use crate::system::OtSystem;

enum Merged<K, D> {
    /// Nothing to merge; the only head.
    Existing(K),
    /// New merge commit, not yet pushed.
    Created(OtCommit<K, D>),
}

/// Nearest commit reachable from every head.
struct CommonAncestor<K, D> {
    id: K,
    /// Squashed diffs from the ancestor to each head.
    paths: BTreeMap<K, Vec<D>>,
}

impl<K, D, R, S> OtAlgorithms<K, D, R, S>
where
    K: CommitId,
    D: Diff,
    R: OtRepository<K, D>,
    S: OtSystem<D>,
{
    /// Merge `heads` into one commit, push it, and return its id.
    ///
    /// A single head is returned unchanged and nothing is pushed. Callers
    /// should reduce `heads` with [`OtAlgorithms::exclude_parents`] first;
    /// a head that is an ancestor of another still merges correctly but
    /// yields a redundant parent edge.
    ///
    /// The merge commit's level is one above the highest head and its epoch
    /// is the highest head epoch.
    ///
    /// # Errors
    ///
    /// - [`OtError::InvalidArgument`] for an empty head set.
    /// - [`OtError::NotFound`] when the heads share no ancestor.
    /// - [`OtError::TransformConflict`] from the document system.
    /// - Repository failures from loading or pushing.
    pub async fn merge(&self, heads: &BTreeSet<K>) -> Result<K, OtError> {
        match self.build_merge(heads).await? {
            Merged::Existing(id) => Ok(id),
            Merged::Created(commit) => {
                let id = commit.id().clone();
                self.repository.push_commit(commit).await?;
                Ok(id)
            }
        }
    }

    /// Like [`OtAlgorithms::merge`] but returns the whole commit. A single
    /// head is loaded and returned as is.
    ///
    /// # Errors
    ///
    /// Same as [`OtAlgorithms::merge`].
    pub async fn merge_and_push(&self, heads: &BTreeSet<K>) -> Result<OtCommit<K, D>, OtError> {
        match self.build_merge(heads).await? {
            Merged::Existing(id) => self.repository.load_commit(&id).await,
            Merged::Created(commit) => {
                self.repository.push_commit(commit.clone()).await?;
                Ok(commit)
            }
        }
    }

    async fn build_merge(&self, heads: &BTreeSet<K>) -> Result<Merged<K, D>, OtError> {
        let mut iter = heads.iter();
        let (Some(first), second) = (iter.next(), iter.next()) else {
            return Err(OtError::InvalidArgument("cannot merge an empty head set".into()));
        };
        if second.is_none() {
            return Ok(Merged::Existing(first.clone()));
        }

        let mut cache = CommitCache::new(&*self.repository);
        let ancestor = self.common_ancestor(&mut cache, heads).await?;

        let mut level = 0;
        let mut epoch = 0;
        for head in heads {
            let commit = cache.get(head)?;
            level = level.max(commit.level());
            epoch = epoch.max(commit.epoch());
        }

        let parents = self.fold_heads(ancestor.paths)?;
        let merge = self
            .repository
            .create_commit_from(epoch, parents, level + 1)
            .await?;

        debug!(
            heads = ?heads,
            ancestor = %ancestor.id,
            merge = %merge.id(),
            level = level + 1,
            "merged heads"
        );
        Ok(Merged::Created(merge))
    }

    /// Fold per-head paths into merge-commit parent edges.
    fn fold_heads(&self, paths: BTreeMap<K, Vec<D>>) -> Result<BTreeMap<K, Vec<D>>, OtError> {
        let mut paths = paths.into_iter();
        let Some((first, mut merged)) = paths.next() else {
            return Ok(BTreeMap::new());
        };
        let mut edges: BTreeMap<K, Vec<D>> = BTreeMap::from([(first, Vec::new())]);

        for (head, head_diffs) in paths {
            let transformed = self.system.transform(&merged, &head_diffs)?;
            for edge in edges.values_mut() {
                edge.extend(transformed.right.iter().cloned());
            }
            edges.insert(head, transformed.left);
            merged.extend(transformed.right);
            merged = self.system.squash(&merged);
        }

        Ok(edges
            .into_iter()
            .map(|(head, edge)| {
                let squashed = self.system.squash(&edge);
                (head, squashed)
            })
            .collect())
    }

    /// Walk from all heads at once. The first popped commit every head
    /// reaches is the nearest common ancestor, since a commit is popped only
    /// after all of its higher-level descendants.
    async fn common_ancestor(
        &self,
        cache: &mut CommitCache<'_, K, D, R>,
        heads: &BTreeSet<K>,
    ) -> Result<CommonAncestor<K, D>, OtError> {
        cache.load_all(heads.iter().cloned()).await?;

        let mut frontier = BinaryHeap::new();
        let mut reach: HashMap<K, BTreeMap<K, Vec<D>>> = HashMap::new();
        for head in heads {
            frontier.push((cache.get(head)?.level(), head.clone()));
            reach
                .entry(head.clone())
                .or_default()
                .insert(head.clone(), Vec::new());
        }

        let mut popped: HashSet<K> = HashSet::new();
        while let Some((_, id)) = frontier.pop() {
            popped.insert(id.clone());
            let reached = reach.remove(&id).unwrap_or_default();
            if reached.len() == heads.len() {
                return Ok(CommonAncestor { id, paths: reached });
            }

            let parent_ids: Vec<K> = cache.get(&id)?.parents().keys().cloned().collect();
            cache.load_all(parent_ids).await?;

            let commit = cache.get(&id)?;
            for (parent, edge) in commit.parents() {
                if popped.contains(parent) {
                    continue;
                }
                let known = match reach.entry(parent.clone()) {
                    Entry::Occupied(slot) => slot.into_mut(),
                    Entry::Vacant(slot) => {
                        frontier.push((cache.get(parent)?.level(), parent.clone()));
                        slot.insert(BTreeMap::new())
                    }
                };
                for (head, diffs) in &reached {
                    if known.contains_key(head) {
                        continue;
                    }
                    let mut path = edge.clone();
                    path.extend(diffs.iter().cloned());
                    known.insert(head.clone(), self.system.squash(&path));
                }
            }
        }

        Err(OtError::not_found(format_args!(
            "common ancestor of heads {heads:?}"
        )))
    }
}
