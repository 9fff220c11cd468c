//! Level-ordered ancestor search.

use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};
use std::future::Future;

use tracing::trace;

use super::{CommitCache, OtAlgorithms};
use crate::commit::{CommitId, Diff, OtCommit};
use crate::error::OtError;
use crate::reducer::DiffsReducer;
use crate::repo::OtRepository;
use crate::system::OtSystem;

/// Outcome of [`OtAlgorithms::find_parent`].
#[derive(Debug, Clone, PartialEq)]
pub struct FindResult<K, A, T> {
    /// The ancestor the probe accepted.
    pub commit: K,
    /// The start head whose path reached `commit`.
    pub child: K,
    pub child_level: u64,
    pub epoch: u64,
    /// Reduced diffs along the path from `commit` to `child`.
    pub accumulated_diffs: A,
    /// Whatever the probe returned.
    pub found: T,
}

/// Path bookkeeping for one discovered commit.
struct Path<K, A> {
    child: K,
    child_level: u64,
    epoch: u64,
    acc: A,
}

impl<K, D, R, S> OtAlgorithms<K, D, R, S>
where
    K: CommitId,
    D: Diff,
    R: OtRepository<K, D>,
    S: OtSystem<D>,
{
    /// Walk backwards from `heads` in descending `(level, id)` order until
    /// `probe` accepts a commit.
    ///
    /// Each commit is visited at most once. A commit reachable along several
    /// paths keeps the path of whichever child discovered it first, so the
    /// accumulated diffs describe exactly one route to one head.
    ///
    /// The probe's future must own what it needs: clone the commit id into it
    /// rather than borrowing the commit.
    ///
    /// # Errors
    ///
    /// - [`OtError::NotFound`] when the walk runs out of commits without a
    ///   match, or when a referenced commit is missing.
    /// - Any error the probe or repository returns.
    pub async fn find_parent<Rd, P, Fut, T>(
        &self,
        heads: &BTreeSet<K>,
        reducer: &Rd,
        mut probe: P,
    ) -> Result<FindResult<K, Rd::Acc, T>, OtError>
    where
        Rd: DiffsReducer<D>,
        P: FnMut(&OtCommit<K, D>) -> Fut,
        Fut: Future<Output = Result<Option<T>, OtError>>,
    {
        let mut cache = CommitCache::new(&*self.repository);
        cache.load_all(heads.iter().cloned()).await?;

        let mut frontier = BinaryHeap::new();
        let mut paths: HashMap<K, Path<K, Rd::Acc>> = HashMap::new();
        let mut visited: HashSet<K> = heads.iter().cloned().collect();
        for head in heads {
            let commit = cache.get(head)?;
            paths.insert(
                head.clone(),
                Path {
                    child: head.clone(),
                    child_level: commit.level(),
                    epoch: commit.epoch(),
                    acc: reducer.initial(),
                },
            );
            frontier.push((commit.level(), head.clone()));
        }

        while let Some((level, id)) = frontier.pop() {
            let path = paths
                .remove(&id)
                .ok_or_else(|| OtError::not_found(format_args!("path to commit {id}")))?;
            trace!(commit = %id, level, child = %path.child, "visit");

            if let Some(found) = probe(cache.get(&id)?).await? {
                return Ok(FindResult {
                    commit: id,
                    child: path.child,
                    child_level: path.child_level,
                    epoch: path.epoch,
                    accumulated_diffs: path.acc,
                    found,
                });
            }

            let fresh: Vec<K> = cache
                .get(&id)?
                .parents()
                .keys()
                .filter(|parent| visited.insert((*parent).clone()))
                .cloned()
                .collect();
            cache.load_all(fresh.iter().cloned()).await?;

            let commit = cache.get(&id)?;
            for (parent, edge) in commit.parents() {
                if !fresh.contains(parent) {
                    continue;
                }
                let parent_level = cache.get(parent)?.level();
                paths.insert(
                    parent.clone(),
                    Path {
                        child: path.child.clone(),
                        child_level: path.child_level,
                        epoch: path.epoch,
                        acc: reducer.accumulate(&path.acc, edge),
                    },
                );
                frontier.push((parent_level, parent.clone()));
            }
        }

        Err(OtError::not_found(format_args!(
            "ancestor of {heads:?} matching the search"
        )))
    }
}
