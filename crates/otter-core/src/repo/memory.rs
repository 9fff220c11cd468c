//! Process-local repository.
//!
//! All state lives behind one async [`RwLock`]; `update_heads` takes the write
//! half, which makes it linearizable with respect to every other operation.
//! The active head set is also published on a [`watch`] channel so
//! [`OtRepository::poll_heads`] can long-poll instead of re-reading.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{RwLock, watch};
use tracing::{debug, trace};

use super::ids::{CommitIdGenerator, SequentialIds};
use super::{HeadsPoller, OtRepository};
use crate::commit::{CommitId, Diff, OtCommit};
use crate::error::OtError;

#[derive(Debug)]
struct Store<K, D> {
    commits: HashMap<K, OtCommit<K, D>>,
    heads: BTreeSet<K>,
    snapshots: HashMap<K, Vec<D>>,
}

impl<K: CommitId, D: Diff> Store<K, D> {
    fn active_heads(&self) -> BTreeSet<K> {
        let epoch_of = |id: &K| self.commits.get(id).map_or(0, OtCommit::epoch);
        let max_epoch = self.heads.iter().map(epoch_of).max().unwrap_or(0);
        self.heads
            .iter()
            .filter(|id| epoch_of(id) == max_epoch)
            .cloned()
            .collect()
    }
}

/// Operation counters, mostly for tests and simulation reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepositoryStats {
    /// Distinct commits stored.
    pub commits: usize,
    /// Commits accepted by `push`, including idempotent re-pushes.
    pub pushed: u64,
    /// Successful `update_heads` calls.
    pub head_updates: u64,
    /// Snapshots stored.
    pub snapshots: usize,
}

/// Reference [`OtRepository`] holding everything in memory.
pub struct InMemoryRepository<K, D, G = SequentialIds> {
    ids: G,
    store: RwLock<Store<K, D>>,
    heads_tx: watch::Sender<BTreeSet<K>>,
    pushed: AtomicU64,
    head_updates: AtomicU64,
}

impl<D: Diff> InMemoryRepository<u64, D, SequentialIds> {
    /// Repository with sequential `u64` ids starting at 1.
    #[must_use]
    pub fn new() -> Self {
        Self::with_ids(SequentialIds::default())
    }
}

impl<D: Diff> Default for InMemoryRepository<u64, D, SequentialIds> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, D, G> InMemoryRepository<K, D, G>
where
    K: CommitId,
    D: Diff,
    G: CommitIdGenerator<K, D>,
{
    /// Repository using a custom id generator.
    #[must_use]
    pub fn with_ids(ids: G) -> Self {
        let (heads_tx, _) = watch::channel(BTreeSet::new());
        Self {
            ids,
            store: RwLock::new(Store {
                commits: HashMap::new(),
                heads: BTreeSet::new(),
                snapshots: HashMap::new(),
            }),
            heads_tx,
            pushed: AtomicU64::new(0),
            head_updates: AtomicU64::new(0),
        }
    }

    pub async fn stats(&self) -> RepositoryStats {
        let store = self.store.read().await;
        RepositoryStats {
            commits: store.commits.len(),
            pushed: self.pushed.load(Ordering::Relaxed),
            head_updates: self.head_updates.load(Ordering::Relaxed),
            snapshots: store.snapshots.len(),
        }
    }

    /// Every stored commit id, ascending.
    pub async fn commit_ids(&self) -> Vec<K> {
        let store = self.store.read().await;
        let mut ids: Vec<K> = store.commits.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl<K, D, G> OtRepository<K, D> for InMemoryRepository<K, D, G>
where
    K: CommitId,
    D: Diff,
    G: CommitIdGenerator<K, D>,
{
    async fn create_commit_from(
        &self,
        epoch: u64,
        parents: BTreeMap<K, Vec<D>>,
        level: u64,
    ) -> Result<OtCommit<K, D>, OtError> {
        let id = self.ids.next_id(epoch, &parents, level)?;
        Ok(OtCommit::new(id, parents, level, epoch))
    }

    async fn push(&self, commits: Vec<OtCommit<K, D>>) -> Result<(), OtError> {
        let mut store = self.store.write().await;
        // Validate the whole batch first so a conflict leaves nothing half-written.
        let batch_levels: HashMap<&K, u64> = commits.iter().map(|c| (c.id(), c.level())).collect();
        for commit in &commits {
            if let Some(existing) = store.commits.get(commit.id()) {
                if !existing.same_content(commit) {
                    return Err(OtError::CommitConflict {
                        id: commit.id().to_string(),
                    });
                }
            }
            for parent in commit.parents().keys() {
                let parent_level = store
                    .commits
                    .get(parent)
                    .map(OtCommit::level)
                    .or_else(|| batch_levels.get(parent).copied());
                if let Some(parent_level) = parent_level {
                    if commit.level() <= parent_level {
                        return Err(OtError::InvalidArgument(format!(
                            "commit {} level {} must exceed parent {parent} level {parent_level}",
                            commit.id(),
                            commit.level()
                        )));
                    }
                }
            }
        }
        let count = commits.len() as u64;
        for commit in commits {
            trace!(id = %commit.id(), level = commit.level(), "store commit");
            store.commits.entry(commit.id().clone()).or_insert(commit);
        }
        self.pushed.fetch_add(count, Ordering::Relaxed);
        Ok(())
    }

    async fn update_heads(
        &self,
        new_heads: BTreeSet<K>,
        excluded_heads: BTreeSet<K>,
    ) -> Result<(), OtError> {
        let mut store = self.store.write().await;
        if let Some(missing) = new_heads.iter().find(|id| !store.commits.contains_key(*id)) {
            return Err(OtError::not_found(format_args!("head commit {missing}")));
        }
        for id in &excluded_heads {
            store.heads.remove(id);
        }
        store.heads.extend(new_heads.iter().cloned());
        let active = store.active_heads();
        debug!(
            added = ?new_heads,
            removed = ?excluded_heads,
            heads = ?active,
            "update heads"
        );
        self.heads_tx.send_if_modified(|current| {
            if *current == active {
                false
            } else {
                *current = active;
                true
            }
        });
        self.head_updates.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn get_all_heads(&self) -> Result<BTreeSet<K>, OtError> {
        Ok(self.store.read().await.heads.clone())
    }

    async fn get_heads(&self) -> Result<BTreeSet<K>, OtError> {
        Ok(self.store.read().await.active_heads())
    }

    fn poll_heads(&self) -> Box<dyn HeadsPoller<K> + '_> {
        Box::new(WatchPoller {
            rx: self.heads_tx.subscribe(),
            primed: false,
        })
    }

    async fn load_commit(&self, id: &K) -> Result<OtCommit<K, D>, OtError> {
        self.store
            .read()
            .await
            .commits
            .get(id)
            .cloned()
            .ok_or_else(|| OtError::not_found(format_args!("commit {id}")))
    }

    async fn load_snapshot(&self, id: &K) -> Result<Option<Vec<D>>, OtError> {
        Ok(self.store.read().await.snapshots.get(id).cloned())
    }

    async fn save_snapshot(&self, id: &K, diffs: Vec<D>) -> Result<(), OtError> {
        let mut store = self.store.write().await;
        if !store.commits.contains_key(id) {
            return Err(OtError::not_found(format_args!("commit {id}")));
        }
        debug!(id = %id, diffs = diffs.len(), "save snapshot");
        store.snapshots.insert(id.clone(), diffs);
        Ok(())
    }
}

/// Long-poll over the published head set.
struct WatchPoller<K> {
    rx: watch::Receiver<BTreeSet<K>>,
    primed: bool,
}

#[async_trait]
impl<K: CommitId> HeadsPoller<K> for WatchPoller<K> {
    async fn next_heads(&mut self) -> Result<BTreeSet<K>, OtError> {
        if self.primed {
            self.rx
                .changed()
                .await
                .map_err(|_| OtError::Storage("repository dropped".into()))?;
        }
        self.primed = true;
        Ok(self.rx.borrow_and_update().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    type Repo = InMemoryRepository<u64, String>;

    async fn commit(repo: &Repo, parent: u64, diff: &str, level: u64) -> OtCommit<u64, String> {
        repo.create_commit(0, parent, vec![diff.to_string()], level)
            .await
            .expect("create commit")
    }

    #[tokio::test]
    async fn push_is_idempotent_for_identical_content() {
        let repo = Repo::new();
        let root = repo.init_root(0).await.expect("root");
        let child = commit(&repo, root, "a", 2).await;

        repo.push_commit(child.clone()).await.expect("first push");
        repo.push_commit(child.clone()).await.expect("repeat push");

        assert_eq!(repo.stats().await.commits, 2);
        assert!(repo.has_commit(child.id()).await.expect("lookup"));
    }

    #[tokio::test]
    async fn push_rejects_reused_id_with_other_content() {
        let repo = Repo::new();
        let root = repo.init_root(0).await.expect("root");
        let child = commit(&repo, root, "a", 2).await;
        repo.push_commit(child.clone()).await.expect("push");

        let forged = OtCommit::new(
            *child.id(),
            BTreeMap::from([(root, vec!["b".to_string()])]),
            2,
            0,
        );
        let err = repo.push_commit(forged).await.expect_err("conflict");
        assert!(matches!(err, OtError::CommitConflict { .. }));
    }

    #[tokio::test]
    async fn push_rejects_level_not_above_parent() {
        let repo = Repo::new();
        let root = repo.init_root(0).await.expect("root");
        let a = commit(&repo, root, "a", 2).await;
        repo.push_commit(a.clone()).await.expect("push");

        let flat = commit(&repo, *a.id(), "b", 2).await;
        let err = repo.push_commit(flat.clone()).await.expect_err("same level");
        assert!(matches!(err, OtError::InvalidArgument(_)), "got {err:?}");
        assert!(!repo.has_commit(flat.id()).await.expect("lookup"));

        // A batch is checked against its own members as well.
        let b = commit(&repo, *a.id(), "b", 3).await;
        let c = commit(&repo, *b.id(), "c", 3).await;
        let err = repo.push(vec![b.clone(), c]).await.expect_err("inverted batch");
        assert!(matches!(err, OtError::InvalidArgument(_)), "got {err:?}");
        assert!(!repo.has_commit(b.id()).await.expect("lookup"));
        assert_eq!(repo.stats().await.commits, 2);
    }

    #[tokio::test]
    async fn load_missing_commit_is_not_found() {
        let repo = Repo::new();
        let err = repo.load_commit(&99).await.expect_err("missing");
        assert!(matches!(err, OtError::NotFound { .. }));
        assert!(!repo.has_commit(&99).await.expect("lookup"));
    }

    #[tokio::test]
    async fn get_heads_keeps_only_newest_epoch() {
        let repo = Repo::new();
        let old = repo.init_root(0).await.expect("root");
        let fresh = repo
            .create_commit_from(1, BTreeMap::new(), 1)
            .await
            .expect("create");
        let fresh_id = *fresh.id();
        repo.push_commit(fresh).await.expect("push");
        repo.update_heads(BTreeSet::from([fresh_id]), BTreeSet::new())
            .await
            .expect("update");

        assert_eq!(
            repo.get_all_heads().await.expect("all heads"),
            BTreeSet::from([old, fresh_id])
        );
        assert_eq!(repo.get_heads().await.expect("heads"), BTreeSet::from([fresh_id]));
    }

    #[tokio::test]
    async fn update_heads_requires_known_commits() {
        let repo = Repo::new();
        let err = repo
            .update_heads(BTreeSet::from([5]), BTreeSet::new())
            .await
            .expect_err("unknown head");
        assert!(matches!(err, OtError::NotFound { .. }));
        assert!(repo.get_all_heads().await.expect("heads").is_empty());
    }

    #[tokio::test]
    async fn push_and_update_heads_replaces_parents() {
        let repo = Repo::new();
        let root = repo.init_root(0).await.expect("root");
        let a = commit(&repo, root, "a", 2).await;
        let b = repo
            .create_commit(0, *a.id(), vec!["b".into()], 3)
            .await
            .expect("create");
        let b_id = *b.id();

        repo.push_and_update_heads(vec![a, b]).await.expect("push");
        assert_eq!(repo.get_heads().await.expect("heads"), BTreeSet::from([b_id]));
    }

    #[tokio::test]
    async fn poller_wakes_on_head_change() {
        let repo = Repo::new();
        let root = repo.init_root(0).await.expect("root");
        let mut poller = repo.poll_heads();
        assert_eq!(poller.next_heads().await.expect("first"), BTreeSet::from([root]));

        let pending = tokio::time::timeout(Duration::from_millis(20), poller.next_heads()).await;
        assert!(pending.is_err(), "no change yet, poll must keep waiting");

        let child = commit(&repo, root, "a", 2).await;
        let child_id = *child.id();
        repo.push_and_update_head(child).await.expect("push");
        assert_eq!(poller.next_heads().await.expect("changed"), BTreeSet::from([child_id]));
    }

    #[tokio::test]
    async fn snapshot_requires_existing_commit() {
        let repo = Repo::new();
        let root = repo.init_root(0).await.expect("root");
        assert_eq!(repo.load_snapshot(&root).await.expect("load"), Some(vec![]));
        assert!(repo.save_snapshot(&42, vec![]).await.is_err());
        assert!(!repo.has_snapshot(&42).await.expect("lookup"));
    }
}
