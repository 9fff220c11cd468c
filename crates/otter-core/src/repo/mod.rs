//! Commit storage contract.
//!
//! An [`OtRepository`] persists commits, snapshots and the head set. It holds
//! no merge logic. The only mutual exclusion the whole system relies on is
//! [`OtRepository::update_heads`]: implementations must apply the addition
//! and removal as one linearizable step.
//!
//! # Sub-modules
//!
//! - [`ids`]: commit id generation ([`SequentialIds`], [`ContentHashIds`]).
//! - [`memory`]: process-local reference implementation ([`InMemoryRepository`]).

pub mod ids;
pub mod memory;

use std::collections::{BTreeMap, BTreeSet};
use std::marker::PhantomData;

use async_trait::async_trait;
use futures::future::try_join_all;

use crate::commit::{CommitId, Diff, OtCommit};
use crate::error::OtError;

pub use ids::{CommitHash, CommitIdGenerator, ContentHashIds, SequentialIds};
pub use memory::InMemoryRepository;

/// Stateful supplier of head sets, used for long-polling.
///
/// Each call to [`HeadsPoller::next_heads`] eventually resolves with the
/// current head set. Implementations backed by change notification resolve
/// the first call immediately and later calls only once the heads changed.
#[async_trait]
pub trait HeadsPoller<K>: Send {
    /// Wait for the next head set.
    ///
    /// # Errors
    ///
    /// Returns [`OtError::Storage`] when the underlying medium fails.
    async fn next_heads(&mut self) -> Result<BTreeSet<K>, OtError>;
}

/// Asynchronous commit store.
#[async_trait]
pub trait OtRepository<K: CommitId, D: Diff>: Send + Sync {
    /// Build, without persisting, a commit with the given parent edges.
    /// The repository assigns the id.
    async fn create_commit_from(
        &self,
        epoch: u64,
        parents: BTreeMap<K, Vec<D>>,
        level: u64,
    ) -> Result<OtCommit<K, D>, OtError>;

    /// Build, without persisting, a single-parent commit.
    async fn create_commit(
        &self,
        epoch: u64,
        parent: K,
        diffs: Vec<D>,
        level: u64,
    ) -> Result<OtCommit<K, D>, OtError> {
        self.create_commit_from(epoch, BTreeMap::from([(parent, diffs)]), level)
            .await
    }

    /// Persist commits. Re-pushing an identical commit is a no-op.
    ///
    /// Fails with [`OtError::CommitConflict`] when an id already exists with
    /// different content.
    async fn push(&self, commits: Vec<OtCommit<K, D>>) -> Result<(), OtError>;

    async fn push_commit(&self, commit: OtCommit<K, D>) -> Result<(), OtError> {
        self.push(vec![commit]).await
    }

    /// Atomically add `new_heads` to and remove `excluded_heads` from the head set.
    async fn update_heads(
        &self,
        new_heads: BTreeSet<K>,
        excluded_heads: BTreeSet<K>,
    ) -> Result<(), OtError>;

    /// Push one commit and make it replace its parents as a head.
    async fn push_and_update_head(&self, commit: OtCommit<K, D>) -> Result<(), OtError> {
        let head = BTreeSet::from([commit.id().clone()]);
        let parents = commit.parent_ids();
        self.push_commit(commit).await?;
        self.update_heads(head, parents).await
    }

    /// Push a batch; the commits no other pushed commit builds on become
    /// heads, and every parent of the batch is removed from the heads.
    async fn push_and_update_heads(&self, commits: Vec<OtCommit<K, D>>) -> Result<(), OtError> {
        let parents: BTreeSet<K> = commits
            .iter()
            .flat_map(|commit| commit.parents().keys().cloned())
            .collect();
        let heads: BTreeSet<K> = commits
            .iter()
            .map(|commit| commit.id().clone())
            .filter(|id| !parents.contains(id))
            .collect();
        self.push(commits).await?;
        self.update_heads(heads, parents).await
    }

    /// Every head, regardless of epoch.
    async fn get_all_heads(&self) -> Result<BTreeSet<K>, OtError>;

    async fn get_all_head_commits(&self) -> Result<Vec<OtCommit<K, D>>, OtError> {
        let heads = self.get_all_heads().await?;
        try_join_all(heads.iter().map(|id| self.load_commit(id))).await
    }

    /// Head commits of the newest epoch.
    async fn get_head_commits(&self) -> Result<Vec<OtCommit<K, D>>, OtError> {
        let all = self.get_all_head_commits().await?;
        let max_epoch = all.iter().map(OtCommit::epoch).max().unwrap_or(0);
        Ok(all
            .into_iter()
            .filter(|commit| commit.epoch() == max_epoch)
            .collect())
    }

    /// Heads of the newest epoch; older-epoch heads are history only.
    async fn get_heads(&self) -> Result<BTreeSet<K>, OtError> {
        Ok(self
            .get_head_commits()
            .await?
            .into_iter()
            .map(|commit| commit.id().clone())
            .collect())
    }

    /// Supplier for long-polling the head set. Defaults to repeated
    /// [`OtRepository::get_heads`].
    fn poll_heads(&self) -> Box<dyn HeadsPoller<K> + '_> {
        Box::new(RepeatedHeads {
            repository: self,
            _diff: PhantomData,
        })
    }

    /// Load a commit; [`OtError::NotFound`] if absent.
    async fn load_commit(&self, id: &K) -> Result<OtCommit<K, D>, OtError>;

    async fn has_commit(&self, id: &K) -> Result<bool, OtError> {
        match self.load_commit(id).await {
            Ok(_) => Ok(true),
            Err(OtError::NotFound { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn load_snapshot(&self, id: &K) -> Result<Option<Vec<D>>, OtError>;

    async fn has_snapshot(&self, id: &K) -> Result<bool, OtError> {
        Ok(self.load_snapshot(id).await?.is_some())
    }

    async fn save_snapshot(&self, id: &K, diffs: Vec<D>) -> Result<(), OtError>;

    /// Create, push and publish a root commit with an empty snapshot, so the
    /// repository can be checked out.
    async fn init_root(&self, epoch: u64) -> Result<K, OtError> {
        let root = self.create_commit_from(epoch, BTreeMap::new(), 1).await?;
        let id = root.id().clone();
        self.push_commit(root).await?;
        self.save_snapshot(&id, Vec::new()).await?;
        self.update_heads(BTreeSet::from([id.clone()]), BTreeSet::new())
            .await?;
        Ok(id)
    }
}

/// Default poller: every call reads the heads again.
struct RepeatedHeads<'a, R: ?Sized, D> {
    repository: &'a R,
    _diff: PhantomData<fn() -> D>,
}

#[async_trait]
impl<K, D, R> HeadsPoller<K> for RepeatedHeads<'_, R, D>
where
    K: CommitId,
    D: Diff,
    R: OtRepository<K, D> + ?Sized,
{
    async fn next_heads(&mut self) -> Result<BTreeSet<K>, OtError> {
        self.repository.get_heads().await
    }
}
