//! Storage fault injection.
//!
//! [`FaultyRepository`] wraps any repository and fails a seeded fraction of
//! its calls with [`OtError::Storage`]. Two push faults are modelled: a
//! rejected push stores nothing, a lost acknowledgement stores the commits
//! and then reports failure, so the caller cannot tell whether it landed.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use otter_core::{CommitId, Diff, OtCommit, OtError, OtRepository};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::rng::DeterministicRng;

/// Per-call failure rates, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageFaults {
    /// `push` fails before storing anything.
    pub reject_push_percent: u8,
    /// `push` stores the commits, then fails.
    pub lost_ack_percent: u8,
    /// `get_heads` fails.
    pub read_heads_percent: u8,
    /// `update_heads` fails without touching the heads.
    pub update_heads_percent: u8,
    /// `load_commit` and `load_snapshot` fail.
    pub load_percent: u8,
}

impl Default for StorageFaults {
    fn default() -> Self {
        Self {
            reject_push_percent: 10,
            lost_ack_percent: 5,
            read_heads_percent: 5,
            update_heads_percent: 5,
            load_percent: 1,
        }
    }
}

impl StorageFaults {
    /// No faults at all.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            reject_push_percent: 0,
            lost_ack_percent: 0,
            read_heads_percent: 0,
            update_heads_percent: 0,
            load_percent: 0,
        }
    }

    #[must_use]
    pub const fn is_none(&self) -> bool {
        self.reject_push_percent == 0
            && self.lost_ack_percent == 0
            && self.read_heads_percent == 0
            && self.update_heads_percent == 0
            && self.load_percent == 0
    }
}

/// Faults injected so far, by call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultCounts {
    pub rejected_pushes: u64,
    pub lost_acks: u64,
    pub head_reads: u64,
    pub head_updates: u64,
    pub loads: u64,
}

impl FaultCounts {
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.rejected_pushes + self.lost_acks + self.head_reads + self.head_updates + self.loads
    }
}

#[derive(Debug, Clone, Copy)]
enum Call {
    RejectPush,
    LostAck,
    ReadHeads,
    UpdateHeads,
    Load,
}

struct Injector {
    rng: DeterministicRng,
    counts: FaultCounts,
}

/// Repository decorator failing a seeded share of calls.
pub struct FaultyRepository<R> {
    inner: R,
    faults: StorageFaults,
    enabled: AtomicBool,
    injector: Mutex<Injector>,
}

impl<R> FaultyRepository<R> {
    #[must_use]
    pub fn new(inner: R, faults: StorageFaults, rng: DeterministicRng) -> Self {
        Self {
            inner,
            faults,
            enabled: AtomicBool::new(true),
            injector: Mutex::new(Injector {
                rng,
                counts: FaultCounts::default(),
            }),
        }
    }

    #[must_use]
    pub const fn inner(&self) -> &R {
        &self.inner
    }

    /// Turn injection on or off; the random stream is not advanced while off.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub async fn counts(&self) -> FaultCounts {
        self.injector.lock().await.counts
    }

    async fn trip(&self, call: Call) -> bool {
        if !self.enabled.load(Ordering::SeqCst) {
            return false;
        }
        let percent = match call {
            Call::RejectPush => self.faults.reject_push_percent,
            Call::LostAck => self.faults.lost_ack_percent,
            Call::ReadHeads => self.faults.read_heads_percent,
            Call::UpdateHeads => self.faults.update_heads_percent,
            Call::Load => self.faults.load_percent,
        };
        if percent == 0 {
            return false;
        }

        let mut injector = self.injector.lock().await;
        if !injector.rng.hit_rate_percent(percent) {
            return false;
        }
        let counts = &mut injector.counts;
        match call {
            Call::RejectPush => counts.rejected_pushes += 1,
            Call::LostAck => counts.lost_acks += 1,
            Call::ReadHeads => counts.head_reads += 1,
            Call::UpdateHeads => counts.head_updates += 1,
            Call::Load => counts.loads += 1,
        }
        debug!(?call, "injecting storage fault");
        true
    }

    async fn fail_if(&self, call: Call) -> Result<(), OtError> {
        if self.trip(call).await {
            Err(OtError::Storage(format!("injected {call:?} fault")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl<K, D, R> OtRepository<K, D> for FaultyRepository<R>
where
    K: CommitId,
    D: Diff,
    R: OtRepository<K, D>,
{
    async fn create_commit_from(
        &self,
        epoch: u64,
        parents: BTreeMap<K, Vec<D>>,
        level: u64,
    ) -> Result<OtCommit<K, D>, OtError> {
        self.inner.create_commit_from(epoch, parents, level).await
    }

    async fn push(&self, commits: Vec<OtCommit<K, D>>) -> Result<(), OtError> {
        self.fail_if(Call::RejectPush).await?;
        self.inner.push(commits).await?;
        self.fail_if(Call::LostAck).await
    }

    async fn update_heads(
        &self,
        new_heads: BTreeSet<K>,
        excluded_heads: BTreeSet<K>,
    ) -> Result<(), OtError> {
        self.fail_if(Call::UpdateHeads).await?;
        self.inner.update_heads(new_heads, excluded_heads).await
    }

    async fn get_all_heads(&self) -> Result<BTreeSet<K>, OtError> {
        self.fail_if(Call::ReadHeads).await?;
        self.inner.get_all_heads().await
    }

    async fn get_heads(&self) -> Result<BTreeSet<K>, OtError> {
        self.fail_if(Call::ReadHeads).await?;
        self.inner.get_heads().await
    }

    async fn load_commit(&self, id: &K) -> Result<OtCommit<K, D>, OtError> {
        self.fail_if(Call::Load).await?;
        self.inner.load_commit(id).await
    }

    async fn load_snapshot(&self, id: &K) -> Result<Option<Vec<D>>, OtError> {
        self.fail_if(Call::Load).await?;
        self.inner.load_snapshot(id).await
    }

    async fn save_snapshot(&self, id: &K, diffs: Vec<D>) -> Result<(), OtError> {
        self.inner.save_snapshot(id, diffs).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otter_core::InMemoryRepository;
    use otter_core::dictionary::DictionaryOperation;

    type Repo = InMemoryRepository<u64, DictionaryOperation>;

    fn always(call: &str) -> StorageFaults {
        let mut faults = StorageFaults::none();
        match call {
            "reject" => faults.reject_push_percent = 100,
            "ack" => faults.lost_ack_percent = 100,
            "heads" => faults.read_heads_percent = 100,
            _ => faults.load_percent = 100,
        }
        faults
    }

    #[tokio::test]
    async fn rejected_push_stores_nothing() {
        let repo = FaultyRepository::new(Repo::new(), always("reject"), DeterministicRng::new(1));
        let commit = repo
            .create_commit_from(0, BTreeMap::<u64, Vec<DictionaryOperation>>::new(), 1)
            .await
            .expect("create");
        let err = repo.push_commit(commit).await.expect_err("rejected");
        assert!(err.is_transient());
        assert!(repo.inner().commit_ids().await.is_empty());
        assert_eq!(repo.counts().await.rejected_pushes, 1);
    }

    #[tokio::test]
    async fn lost_ack_still_stores_the_commit() {
        let repo = FaultyRepository::new(Repo::new(), always("ack"), DeterministicRng::new(1));
        let commit = repo
            .create_commit_from(0, BTreeMap::<u64, Vec<DictionaryOperation>>::new(), 1)
            .await
            .expect("create");
        let id = *commit.id();
        repo.push_commit(commit).await.expect_err("ack lost");
        assert_eq!(repo.inner().commit_ids().await, vec![id]);
    }

    #[tokio::test]
    async fn disabled_injector_passes_everything_through() {
        let repo = FaultyRepository::new(Repo::new(), always("heads"), DeterministicRng::new(1));
        assert!(repo.get_heads().await.is_err());
        repo.set_enabled(false);
        assert!(repo.get_heads().await.expect("heads").is_empty());
        assert_eq!(repo.counts().await.total(), 1);
    }

    #[tokio::test]
    async fn zero_rates_never_fail() {
        let repo = FaultyRepository::new(Repo::new(), StorageFaults::none(), DeterministicRng::new(9));
        let root = repo.init_root(0).await.expect("root");
        for _ in 0..50 {
            repo.load_commit(&root).await.expect("load");
        }
        assert_eq!(repo.counts().await, FaultCounts::default());
    }

    #[test]
    fn faults_deserialize_with_defaults() {
        let faults: StorageFaults = toml::from_str("load_percent = 0").expect("parse");
        assert_eq!(faults.load_percent, 0);
        assert_eq!(faults.reject_push_percent, StorageFaults::default().reject_push_percent);
    }
}
