use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use otter_core::CommitGraph;
use otter_core::dictionary::{DictionaryOperation, DictionaryState};

use crate::replica::{ReplicaId, ReplicaState};

/// Repository and replicas after the final settle, when every replica has
/// pushed its work and fetched the head.
#[derive(Debug, Clone)]
pub struct Settled {
    pub heads: BTreeSet<u64>,
    /// Document checked out fresh from the heads.
    pub checkout: DictionaryState,
    pub replicas: Vec<ReplicaState>,
    pub graph: CommitGraph<u64, DictionaryOperation>,
    /// Non-transient errors raised during the run, by replica.
    pub unexpected_errors: Vec<(ReplicaId, String)>,
}

/// Outcome of the oracle checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleResult {
    pub passed: bool,
    pub violations: Vec<InvariantViolation>,
}

impl OracleResult {
    const fn pass() -> Self {
        Self {
            passed: true,
            violations: Vec::new(),
        }
    }

    fn from_violations(violations: Vec<InvariantViolation>) -> Self {
        Self {
            passed: violations.is_empty(),
            violations,
        }
    }

    fn merge(mut self, other: Self) -> Self {
        if !other.passed {
            self.passed = false;
            self.violations.extend(other.violations);
        }
        self
    }
}

/// A single failed invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// The repository ended with other than exactly one head.
    HeadCount { heads: Vec<u64> },

    /// A replica's document differs from a fresh checkout.
    Divergence {
        replica: ReplicaId,
        /// Keys whose value differs, with (replica value, checkout value).
        differing: BTreeMap<String, (Option<String>, Option<String>)>,
    },

    /// A replica is not positioned on the head.
    CursorBehind {
        replica: ReplicaId,
        cursor: u64,
        head: u64,
    },

    /// A replica still has local work after settling.
    UnflushedWork { replica: ReplicaId },

    /// A commit a replica created is not reachable from the head.
    LostCommit { replica: ReplicaId, commit: u64 },

    /// A commit's level does not exceed its parents' levels.
    LevelOrder { commit: u64, parent: u64 },

    /// A replica hit an error the fault model never injects.
    Unexpected { replica: ReplicaId, error: String },
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HeadCount { heads } => write!(f, "HeadCount: expected one head, found {heads:?}"),
            Self::Divergence { replica, differing } => {
                write!(f, "Divergence: replica {replica} differs on {} key(s):", differing.len())?;
                for (key, (local, checkout)) in differing {
                    write!(f, " {key}={local:?} vs {checkout:?};")?;
                }
                Ok(())
            }
            Self::CursorBehind {
                replica,
                cursor,
                head,
            } => write!(f, "CursorBehind: replica {replica} at {cursor}, head is {head}"),
            Self::UnflushedWork { replica } => {
                write!(f, "UnflushedWork: replica {replica} still holds local edits")
            }
            Self::LostCommit { replica, commit } => {
                write!(f, "LostCommit: commit {commit} by replica {replica} unreachable from head")
            }
            Self::LevelOrder { commit, parent } => {
                write!(f, "LevelOrder: commit {commit} is not above parent {parent}")
            }
            Self::Unexpected { replica, error } => {
                write!(f, "Unexpected: replica {replica} failed with {error}")
            }
        }
    }
}

/// Invariant checks over a [`Settled`] run.
///
/// 1. **Single head**: settling leaves exactly one head.
/// 2. **Convergence**: every replica sits on the head with the checked-out
///    document and no local work.
/// 3. **Durability**: every authored commit is an ancestor of the head.
/// 4. **Level order**: levels strictly increase from parent to child.
/// 5. **Clean errors**: only injected storage faults surfaced.
pub struct ConvergenceOracle;

impl ConvergenceOracle {
    #[must_use]
    pub fn check_single_head(settled: &Settled) -> OracleResult {
        if settled.heads.len() == 1 {
            OracleResult::pass()
        } else {
            OracleResult::from_violations(vec![InvariantViolation::HeadCount {
                heads: settled.heads.iter().copied().collect(),
            }])
        }
    }

    #[must_use]
    pub fn check_convergence(settled: &Settled) -> OracleResult {
        let head = settled.heads.first().copied();
        let mut violations = Vec::new();
        for replica in &settled.replicas {
            if let Some(head) = head
                && replica.cursor != head
            {
                violations.push(InvariantViolation::CursorBehind {
                    replica: replica.id,
                    cursor: replica.cursor,
                    head,
                });
            }
            if replica.uncommitted > 0 || replica.unacknowledged.is_some() {
                violations.push(InvariantViolation::UnflushedWork {
                    replica: replica.id,
                });
            }
            let differing = diff_documents(&replica.document, &settled.checkout);
            if !differing.is_empty() {
                violations.push(InvariantViolation::Divergence {
                    replica: replica.id,
                    differing,
                });
            }
        }
        OracleResult::from_violations(violations)
    }

    #[must_use]
    pub fn check_durability(settled: &Settled) -> OracleResult {
        let Some(head) = settled.heads.first() else {
            return OracleResult::pass();
        };
        let violations = settled
            .replicas
            .iter()
            .flat_map(|replica| {
                replica
                    .authored
                    .iter()
                    .filter(|commit| *commit != head && !settled.graph.is_ancestor(commit, head))
                    .map(|&commit| InvariantViolation::LostCommit {
                        replica: replica.id,
                        commit,
                    })
            })
            .collect();
        OracleResult::from_violations(violations)
    }

    #[must_use]
    pub fn check_level_order(graph: &CommitGraph<u64, DictionaryOperation>) -> OracleResult {
        let mut violations = Vec::new();
        for commit in graph.topological_order() {
            for parent in commit.parents().keys() {
                let Some(node) = graph.get(parent) else {
                    continue;
                };
                if node.commit.level() >= commit.level() {
                    violations.push(InvariantViolation::LevelOrder {
                        commit: *commit.id(),
                        parent: *parent,
                    });
                }
            }
        }
        OracleResult::from_violations(violations)
    }

    #[must_use]
    pub fn check_errors(settled: &Settled) -> OracleResult {
        OracleResult::from_violations(
            settled
                .unexpected_errors
                .iter()
                .map(|(replica, error)| InvariantViolation::Unexpected {
                    replica: *replica,
                    error: error.clone(),
                })
                .collect(),
        )
    }

    /// Every check, violations accumulated.
    #[must_use]
    pub fn check_all(settled: &Settled) -> OracleResult {
        Self::check_single_head(settled)
            .merge(Self::check_convergence(settled))
            .merge(Self::check_durability(settled))
            .merge(Self::check_level_order(&settled.graph))
            .merge(Self::check_errors(settled))
    }
}

fn diff_documents(
    local: &DictionaryState,
    checkout: &DictionaryState,
) -> BTreeMap<String, (Option<String>, Option<String>)> {
    let keys: BTreeSet<&String> = local.entries().keys().chain(checkout.entries().keys()).collect();
    keys.into_iter()
        .filter_map(|key| {
            let left = local.get(key);
            let right = checkout.get(key);
            (left != right).then(|| (key.clone(), (left.map(str::to_owned), right.map(str::to_owned))))
        })
        .collect()
}
