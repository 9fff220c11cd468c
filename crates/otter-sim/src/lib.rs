//! Deterministic multi-replica simulation for otter.
//!
//! A [`Simulator`] drives a handful of [`Replica`]s against one shared
//! in-memory repository wrapped in a [`FaultyRepository`]. Every choice
//! (which replica acts, what it does, which storage call fails) comes from a
//! seeded [`DeterministicRng`], so a failing seed replays exactly. After the
//! scripted steps the run settles with faults off and the
//! [`ConvergenceOracle`] checks the outcome.
//!
//! # Conventions
//!
//! - **Errors**: `anyhow::Result` for harness failures; storage faults are
//!   part of the run and are recorded in the trace instead.
//! - **Logging**: `tracing` macros; the binary installs the subscriber.

pub mod campaign;
pub mod faults;
pub mod oracle;
pub mod replica;
pub mod rng;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use otter_core::dictionary::{DictionaryOperation, DictionaryOtSystem, DictionaryState};
use otter_core::{InMemoryRepository, OtCommit, OtError, OtNode, OtRepository, OtState};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub use campaign::{
    CampaignConfig, CampaignReport, DetailedTrace, load_campaign_config, replay_seed, run_campaign,
    run_single_seed,
};
pub use faults::{FaultCounts, FaultyRepository, StorageFaults};
pub use oracle::{ConvergenceOracle, InvariantViolation, OracleResult, Settled};
pub use replica::{Replica, ReplicaId, ReplicaState};
pub use rng::DeterministicRng;

pub type SimRepository = FaultyRepository<InMemoryRepository<u64, DictionaryOperation>>;
pub type SimCommit = OtCommit<u64, DictionaryOperation>;
pub type SimNode = OtNode<u64, DictionaryOperation, SimCommit, SimRepository, DictionaryOtSystem>;

const FAULT_STREAM: u64 = 1;

/// Relative weights of the actions a replica takes on its turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionWeights {
    pub edit: u32,
    pub commit: u32,
    pub push: u32,
    pub fetch: u32,
}

impl Default for ActionWeights {
    fn default() -> Self {
        Self {
            edit: 50,
            commit: 20,
            push: 20,
            fetch: 10,
        }
    }
}

impl ActionWeights {
    fn total(&self) -> u64 {
        [self.edit, self.commit, self.push, self.fetch]
            .into_iter()
            .map(u64::from)
            .sum()
    }

    fn choose(&self, rng: &mut DeterministicRng) -> Action {
        let roll = rng.next_bounded(self.total());
        let edit = u64::from(self.edit);
        let commit = edit + u64::from(self.commit);
        let push = commit + u64::from(self.push);
        if roll < edit {
            Action::Edit
        } else if roll < commit {
            Action::Commit
        } else if roll < push {
            Action::Push
        } else {
            Action::Fetch
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Edit,
    Commit,
    Push,
    Fetch,
}

/// Parameters of one seeded run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub seed: u64,
    pub replicas: usize,
    /// Scripted turns before settling.
    pub steps: u64,
    /// Size of the key space; small spaces force conflicts.
    pub keys: usize,
    /// Percent of edits that delete instead of set.
    pub delete_percent: u8,
    pub weights: ActionWeights,
    pub faults: StorageFaults,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            replicas: 4,
            steps: 64,
            keys: 6,
            delete_percent: 10,
            weights: ActionWeights::default(),
            faults: StorageFaults::default(),
        }
    }
}

impl SimulationConfig {
    /// # Errors
    ///
    /// Returns an error if any parameter is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.replicas == 0 {
            bail!("replicas must be > 0");
        }
        if self.steps == 0 {
            bail!("steps must be > 0");
        }
        if self.keys == 0 {
            bail!("keys must be > 0");
        }
        if self.delete_percent > 100 {
            bail!("delete_percent must be <= 100");
        }
        if self.weights.total() == 0 {
            bail!("at least one action weight must be > 0");
        }
        Ok(())
    }
}

/// One observable step of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub step: u64,
    pub replica: ReplicaId,
    pub kind: TraceEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEventKind {
    Edit { key: String, value: Option<String> },
    Commit { commit: u64 },
    Push { commit: u64, head: u64, diffs: usize },
    Fetch { from: u64, to: u64, diffs: usize },
    /// An operation failed with an injected fault; it will be retried.
    Fault { action: String, code: String },
    /// An operation failed with an error the fault model does not produce.
    Error { action: String, message: String },
    Settled { head: u64 },
}

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub trace: Vec<TraceEvent>,
    pub settled: Settled,
    pub faults: FaultCounts,
    /// Merge commits in the final history.
    pub merges: usize,
    /// Faults were injected and concurrent branches had to be merged.
    pub interesting_state_reached: bool,
}

impl SimulationResult {
    #[must_use]
    pub fn head(&self) -> Option<u64> {
        self.settled.heads.first().copied()
    }
}

/// Seeded driver for one run.
pub struct Simulator {
    config: SimulationConfig,
    rng: DeterministicRng,
    trace: Vec<TraceEvent>,
    unexpected: Vec<(ReplicaId, String)>,
}

impl Simulator {
    /// # Errors
    ///
    /// Returns an error when the config is invalid.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let rng = DeterministicRng::new(config.seed);
        Ok(Self {
            config,
            rng,
            trace: Vec::new(),
            unexpected: Vec::new(),
        })
    }

    #[must_use]
    pub const fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Run the scripted steps, settle, and collect the result.
    ///
    /// # Errors
    ///
    /// Fails when the harness itself cannot proceed: the root cannot be
    /// created, or the settle phase fails with faults disabled.
    pub async fn run(&mut self) -> Result<SimulationResult> {
        let repository: Arc<SimRepository> = Arc::new(FaultyRepository::new(
            InMemoryRepository::new(),
            self.config.faults,
            DeterministicRng::fork(self.config.seed, FAULT_STREAM),
        ));
        repository.set_enabled(false);
        let root = repository.init_root(0).await.context("failed to create root")?;
        repository.set_enabled(true);

        let system = Arc::new(DictionaryOtSystem);
        let mut replicas: Vec<Replica> = (0..self.config.replicas)
            .map(|id| Replica::new(id, OtNode::new(Arc::clone(&repository), Arc::clone(&system)), root))
            .collect();

        for step in 0..self.config.steps {
            let index = self.rng.pick(replicas.len());
            let action = self.config.weights.choose(&mut self.rng);
            self.act(step, &mut replicas[index], action).await;
        }

        let faults = repository.counts().await;
        repository.set_enabled(false);
        let settled = self.settle(&repository, &mut replicas).await?;
        let merges = settled
            .graph
            .topological_order()
            .iter()
            .filter(|commit| commit.is_merge())
            .count();

        info!(
            seed = self.config.seed,
            steps = self.config.steps,
            faults = faults.total(),
            merges,
            "simulation complete"
        );

        Ok(SimulationResult {
            trace: std::mem::take(&mut self.trace),
            settled,
            faults,
            merges,
            interesting_state_reached: faults.total() > 0 && merges > 0,
        })
    }

    async fn act(&mut self, step: u64, replica: &mut Replica, action: Action) {
        let id = replica.id();
        match action {
            Action::Edit => {
                let key = format!("k{}", self.rng.pick(self.config.keys));
                let value = (!self.rng.hit_rate_percent(self.config.delete_percent))
                    .then(|| format!("r{id}s{step}"));
                if replica.edit(&key, value.as_deref()).is_some() {
                    self.record(step, id, TraceEventKind::Edit { key, value });
                }
            }
            Action::Commit => match replica.commit().await {
                Ok(Some(commit)) => self.record(step, id, TraceEventKind::Commit { commit }),
                Ok(None) => {}
                Err(err) => self.failed(step, id, "commit", &err),
            },
            Action::Push => {
                let from = replica.unacknowledged();
                match replica.push().await {
                    Ok(Some(fetched)) => self.record(
                        step,
                        id,
                        TraceEventKind::Push {
                            commit: from.unwrap_or(fetched.commit_id),
                            head: fetched.commit_id,
                            diffs: fetched.diffs.len(),
                        },
                    ),
                    Ok(None) => {}
                    Err(err) => self.failed(step, id, "push", &err),
                }
            }
            Action::Fetch => {
                let from = replica.cursor();
                match replica.fetch().await {
                    Ok(Some(fetched)) if fetched.commit_id != from => self.record(
                        step,
                        id,
                        TraceEventKind::Fetch {
                            from,
                            to: fetched.commit_id,
                            diffs: fetched.diffs.len(),
                        },
                    ),
                    Ok(_) => {}
                    Err(err) => self.failed(step, id, "fetch", &err),
                }
            }
        }
    }

    async fn settle(
        &mut self,
        repository: &Arc<SimRepository>,
        replicas: &mut [Replica],
    ) -> Result<Settled> {
        let step = self.config.steps;
        for replica in replicas.iter_mut() {
            replica
                .flush()
                .await
                .with_context(|| format!("replica {} failed to flush", replica.id()))?;
        }
        let Some(first) = replicas.first() else {
            bail!("no replicas to settle");
        };
        let head = first
            .node()
            .algorithms()
            .merge_and_update_heads()
            .await
            .context("failed to merge remaining heads")?;
        for replica in replicas.iter_mut() {
            replica
                .fetch()
                .await
                .with_context(|| format!("replica {} failed to catch up", replica.id()))?;
        }
        self.record(step, 0, TraceEventKind::Settled { head });

        let node = replicas[0].node();
        let heads = repository.get_heads().await?;
        let checked_out = node.checkout().await.context("checkout after settle")?;
        let mut checkout = DictionaryState::new();
        checkout.apply_all(&checked_out.diffs);
        let graph = node.algorithms().load_graph(&heads, None).await?;
        debug!(head, commits = graph.len(), "settled");

        Ok(Settled {
            heads,
            checkout,
            replicas: replicas.iter().map(Replica::snapshot).collect(),
            graph,
            unexpected_errors: std::mem::take(&mut self.unexpected),
        })
    }

    fn record(&mut self, step: u64, replica: ReplicaId, kind: TraceEventKind) {
        self.trace.push(TraceEvent {
            step,
            replica,
            kind,
        });
    }

    fn failed(&mut self, step: u64, replica: ReplicaId, action: &str, err: &OtError) {
        let kind = if err.is_transient() {
            TraceEventKind::Fault {
                action: action.to_owned(),
                code: err.code().to_string(),
            }
        } else {
            self.unexpected.push((replica, err.to_string()));
            TraceEventKind::Error {
                action: action.to_owned(),
                message: err.to_string(),
            }
        };
        debug!(replica, action, %err, "step failed");
        self.record(step, replica, kind);
    }
}

/// Single-threaded runtime the simulation runs on; one task, one order.
///
/// # Errors
///
/// Fails when tokio cannot build the runtime.
pub fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context("failed to start simulation runtime")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(SimulationConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_weights_rejected() {
        let config = SimulationConfig {
            weights: ActionWeights {
                edit: 0,
                commit: 0,
                push: 0,
                fetch: 0,
            },
            ..SimulationConfig::default()
        };
        assert!(Simulator::new(config).is_err());
    }

    #[test]
    fn weights_pick_only_enabled_actions() {
        let weights = ActionWeights {
            edit: 0,
            commit: 0,
            push: 1,
            fetch: 0,
        };
        let mut rng = DeterministicRng::new(11);
        assert!((0..100).all(|_| weights.choose(&mut rng) == Action::Push));
    }

    #[tokio::test]
    async fn fault_free_run_converges() {
        let config = SimulationConfig {
            seed: 3,
            faults: StorageFaults::none(),
            ..SimulationConfig::default()
        };
        let result = Simulator::new(config).expect("config").run().await.expect("run");
        let oracle = ConvergenceOracle::check_all(&result.settled);
        assert!(oracle.passed, "{:?}", oracle.violations);
        assert_eq!(result.faults, FaultCounts::default());
        assert!(!result.interesting_state_reached);
    }

    #[tokio::test]
    async fn faulty_run_still_converges() {
        let config = SimulationConfig {
            seed: 21,
            steps: 120,
            faults: StorageFaults {
                reject_push_percent: 25,
                lost_ack_percent: 15,
                read_heads_percent: 10,
                update_heads_percent: 10,
                load_percent: 2,
            },
            ..SimulationConfig::default()
        };
        let result = Simulator::new(config).expect("config").run().await.expect("run");
        let oracle = ConvergenceOracle::check_all(&result.settled);
        assert!(oracle.passed, "{:?}", oracle.violations);
        assert!(result.faults.total() > 0);
        assert!(
            result
                .trace
                .iter()
                .any(|event| matches!(event.kind, TraceEventKind::Fault { .. }))
        );
    }
}
