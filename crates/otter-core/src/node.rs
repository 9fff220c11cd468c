//! Client-facing synchronization node.
//!
//! An [`OtNode`] is what a replica talks to. It is stateless apart from its
//! configuration and stop signal: the replica keeps its own cursor (the
//! commit id its local state is based on) and passes it in.
//!
//! Commits cross the node boundary as a caller-chosen type `C`, converted
//! with `From` in both directions. Using [`OtCommit`] itself for `C` needs no
//! extra code.

use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, instrument, warn};

use crate::algorithms::OtAlgorithms;
use crate::commit::{CommitId, Diff, FetchData, OtCommit};
use crate::config::NodeConfig;
use crate::error::OtError;
use crate::reducer::{ToList, ToSquashedList};
use crate::repo::OtRepository;
use crate::system::OtSystem;

pub struct OtNode<K, D, C, R, S> {
    algorithms: OtAlgorithms<K, D, R, S>,
    config: NodeConfig,
    stop: watch::Sender<bool>,
    _commit: PhantomData<fn() -> C>,
}

impl<K, D, C, R, S> OtNode<K, D, C, R, S>
where
    K: CommitId,
    D: Diff,
    C: From<OtCommit<K, D>>,
    OtCommit<K, D>: From<C>,
    R: OtRepository<K, D>,
    S: OtSystem<D>,
{
    /// Node with default [`NodeConfig`].
    #[must_use]
    pub fn new(repository: Arc<R>, system: Arc<S>) -> Self {
        Self::with_config(OtAlgorithms::new(repository, system), NodeConfig::default())
    }

    #[must_use]
    pub fn with_config(algorithms: OtAlgorithms<K, D, R, S>, config: NodeConfig) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            algorithms,
            config,
            stop,
            _commit: PhantomData,
        }
    }

    #[must_use]
    pub const fn algorithms(&self) -> &OtAlgorithms<K, D, R, S> {
        &self.algorithms
    }

    #[must_use]
    pub const fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Build, without pushing, a commit on top of `parent`. The commit
    /// inherits the parent's epoch.
    ///
    /// # Errors
    ///
    /// [`OtError::NotFound`] for an unknown parent,
    /// [`OtError::InvalidArgument`] when `level` does not exceed the
    /// parent's level, or repository failures.
    #[instrument(skip_all, fields(parent = %parent, level = level))]
    pub async fn create_commit(&self, parent: K, diffs: Vec<D>, level: u64) -> Result<C, OtError> {
        let repository = self.algorithms.repository();
        let parent_commit = repository.load_commit(&parent).await?;
        if level <= parent_commit.level() {
            return Err(OtError::InvalidArgument(format!(
                "level {level} must exceed parent {parent} level {}",
                parent_commit.level()
            )));
        }
        let epoch = parent_commit.epoch();
        let commit = repository.create_commit(epoch, parent, diffs, level).await?;
        debug!(id = %commit.id(), epoch, "created commit");
        Ok(C::from(commit))
    }

    /// Publish a local commit and merge it with whatever else is at the
    /// heads.
    ///
    /// Returns the squashed diffs that move a replica from the pushed commit
    /// to the new single head. Once the repository accepts the commit the
    /// rest runs to completion or fails; the node does not retry it.
    ///
    /// # Errors
    ///
    /// Repository failures, or [`OtError::TransformConflict`] when the merge
    /// cannot be built. On error after the push the commit is stored but may
    /// not be reachable from the heads; pushing it again is safe.
    #[instrument(skip_all)]
    pub async fn push(&self, commit: C) -> Result<FetchData<K, D>, OtError> {
        let commit = OtCommit::from(commit);
        let id = commit.id().clone();
        let repository = self.algorithms.repository();

        repository.push_commit(commit).await?;
        let heads = repository.get_heads().await?;

        let mut candidates = heads.clone();
        candidates.insert(id.clone());
        let reduced = self.algorithms.exclude_parents(&candidates).await?;
        let merged = self.algorithms.merge(&reduced).await?;

        let merged_heads = BTreeSet::from([merged.clone()]);
        let mut excluded = heads;
        excluded.remove(&merged);
        repository
            .update_heads(merged_heads.clone(), excluded)
            .await?;

        let fetched = self.do_fetch(&merged_heads, &id).await?;
        debug!(
            pushed = %id,
            head = %fetched.commit_id,
            diffs = fetched.diffs.len(),
            "push complete"
        );
        Ok(fetched)
    }

    /// Full document state at the current heads.
    ///
    /// Walks back to the nearest commit with a snapshot, replays the path to
    /// the head it came from, then fetches forward to the present heads.
    ///
    /// # Errors
    ///
    /// [`OtError::NotFound`] when the repository has no heads or no reachable
    /// snapshot.
    #[instrument(skip_all)]
    pub async fn checkout(&self) -> Result<FetchData<K, D>, OtError> {
        let repository = self.algorithms.repository();
        let heads = repository.get_heads().await?;
        let store = &**repository;
        let found = self
            .algorithms
            .find_parent(&heads, &ToList, move |commit: &OtCommit<K, D>| {
                let id = commit.id().clone();
                async move { store.load_snapshot(&id).await }
            })
            .await?;
        debug!(snapshot = %found.commit, child = %found.child, "snapshot located");

        let mut diffs = found.found;
        diffs.extend(found.accumulated_diffs);
        let fetched = self.fetch(&found.child).await?;
        diffs.extend(fetched.diffs);

        Ok(FetchData::new(
            fetched.commit_id,
            fetched.level,
            self.algorithms.system().squash(&diffs),
        ))
    }

    /// Squashed diffs from `current` to the current heads.
    ///
    /// # Errors
    ///
    /// [`OtError::NotFound`] when `current` is not an ancestor of the heads.
    #[instrument(skip_all, fields(current = %current))]
    pub async fn fetch(&self, current: &K) -> Result<FetchData<K, D>, OtError> {
        let heads = self.algorithms.repository().get_heads().await?;
        self.do_fetch(&heads, current).await
    }

    /// Wait until the heads move past `current`, then fetch.
    ///
    /// Transient storage failures are retried with backoff under the
    /// configured [`RetryPolicy`](crate::config::RetryPolicy); identical
    /// consecutive head sets are spaced by the poll interval. Dropping the
    /// returned future abandons only the wait.
    ///
    /// # Errors
    ///
    /// - [`OtError::Stopped`] once [`OtNode::stop`] is called.
    /// - A transient error that exhausted the retry budget.
    /// - Any non-transient repository error, unretried.
    #[instrument(skip_all, fields(current = %current))]
    pub async fn poll(&self, current: &K) -> Result<FetchData<K, D>, OtError> {
        let mut stop = self.stop.subscribe();
        if *stop.borrow_and_update() {
            return Err(OtError::Stopped);
        }
        let mut poller = self.algorithms.repository().poll_heads();
        let mut failures = 0u32;
        let mut previous: Option<BTreeSet<K>> = None;

        loop {
            let polled = tokio::select! {
                biased;
                _ = stop.wait_for(|stopped| *stopped) => return Err(OtError::Stopped),
                heads = poller.next_heads() => heads,
            };
            match polled {
                Ok(heads) => {
                    failures = 0;
                    if !heads.contains(current) {
                        return self.do_fetch(&heads, current).await;
                    }
                    if previous.as_ref() == Some(&heads) {
                        pause(&mut stop, self.config.poll_interval()).await?;
                    }
                    previous = Some(heads);
                }
                Err(err) if err.is_transient() => {
                    failures += 1;
                    if !self.config.retry.allows(failures) {
                        warn!(error = %err, failures, "poll retries exhausted");
                        return Err(err);
                    }
                    let delay = self.config.retry.delay_for(failures);
                    warn!(
                        error = %err,
                        failures,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "poll failed, retrying"
                    );
                    pause(&mut stop, delay).await?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Signal every in-flight and future [`OtNode::poll`] to return
    /// [`OtError::Stopped`].
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    async fn do_fetch(&self, heads: &BTreeSet<K>, current: &K) -> Result<FetchData<K, D>, OtError> {
        let system = self.algorithms.system();
        let reducer = ToSquashedList::new(Arc::clone(system));
        let target = current.clone();
        let found = self
            .algorithms
            .find_parent(heads, &reducer, move |commit: &OtCommit<K, D>| {
                let hit = *commit.id() == target;
                async move { Ok(hit.then_some(())) }
            })
            .await?;
        Ok(FetchData::new(
            found.child,
            found.child_level,
            system.squash(&found.accumulated_diffs),
        ))
    }
}

/// Sleep for `delay` unless the stop signal fires first.
async fn pause(stop: &mut watch::Receiver<bool>, delay: Duration) -> Result<(), OtError> {
    tokio::select! {
        biased;
        _ = stop.wait_for(|stopped| *stopped) => Err(OtError::Stopped),
        () = tokio::time::sleep(delay) => Ok(()),
    }
}
