//! In-memory commit subgraph with parent/child traversal.
//!
//! A [`CommitGraph`] is a read-only picture of part of a repository, loaded
//! by [`OtAlgorithms::load_graph`](super::OtAlgorithms::load_graph). It is
//! used for diagnostics and tests; the merge algorithms never build one.
//!
//! # Construction
//!
//! Commits can be inserted in any order. Parent/child links are resolved as
//! both ends arrive, and parents outside the loaded window are simply absent.
//! Duplicate commits (same id) are skipped.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt::{self, Write as _};

use crate::commit::{CommitId, Diff, OtCommit};

// ---------------------------------------------------------------------------
// GraphNode
// ---------------------------------------------------------------------------

/// A loaded commit and the children that reference it.
#[derive(Debug, Clone)]
pub struct GraphNode<K, D> {
    pub commit: OtCommit<K, D>,
    pub children: BTreeSet<K>,
}

// ---------------------------------------------------------------------------
// CommitGraph
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CommitGraph<K, D> {
    nodes: BTreeMap<K, GraphNode<K, D>>,
    /// Children already inserted, keyed by a parent that is not loaded yet.
    pending_children: BTreeMap<K, BTreeSet<K>>,
}

impl<K: CommitId, D: Diff> CommitGraph<K, D> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
            pending_children: BTreeMap::new(),
        }
    }

    /// Insert a commit, linking it to any loaded parents and children.
    pub fn insert(&mut self, commit: OtCommit<K, D>) {
        let id = commit.id().clone();
        if self.nodes.contains_key(&id) {
            return;
        }

        for parent in commit.parents().keys() {
            match self.nodes.get_mut(parent) {
                Some(node) => {
                    node.children.insert(id.clone());
                }
                None => {
                    self.pending_children
                        .entry(parent.clone())
                        .or_default()
                        .insert(id.clone());
                }
            }
        }
        let children = self.pending_children.remove(&id).unwrap_or_default();

        self.nodes.insert(id, GraphNode { commit, children });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: &K) -> Option<&GraphNode<K, D>> {
        self.nodes.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &K) -> bool {
        self.nodes.contains_key(id)
    }

    /// Commits with no parent inside the graph.
    #[must_use]
    pub fn roots(&self) -> Vec<&K> {
        self.nodes
            .iter()
            .filter(|(_, node)| {
                node.commit
                    .parents()
                    .keys()
                    .all(|parent| !self.nodes.contains_key(parent))
            })
            .map(|(id, _)| id)
            .collect()
    }

    /// Commits no loaded commit builds on.
    #[must_use]
    pub fn tips(&self) -> Vec<&K> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.children.is_empty())
            .map(|(id, _)| id)
            .collect()
    }

    /// Transitive parents of `id` inside the graph, excluding `id`.
    #[must_use]
    pub fn ancestors(&self, id: &K) -> BTreeSet<K> {
        self.walk(id, |node| node.commit.parents().keys().cloned().collect())
    }

    /// Transitive children of `id`, excluding `id`.
    #[must_use]
    pub fn descendants(&self, id: &K) -> BTreeSet<K> {
        self.walk(id, |node| node.children.iter().cloned().collect())
    }

    fn walk(&self, start: &K, next: impl Fn(&GraphNode<K, D>) -> Vec<K>) -> BTreeSet<K> {
        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(start.clone());
        while let Some(current) = queue.pop_front() {
            let Some(node) = self.nodes.get(&current) else {
                continue;
            };
            for id in next(node) {
                if visited.insert(id.clone()) {
                    queue.push_back(id);
                }
            }
        }
        visited
    }

    /// Whether there is a path from `ancestor` up to `descendant`.
    #[must_use]
    pub fn is_ancestor(&self, ancestor: &K, descendant: &K) -> bool {
        ancestor != descendant && self.ancestors(descendant).contains(ancestor)
    }

    /// Commits ordered by `(level, id)`, which is a topological order since
    /// a child's level exceeds its parents'.
    #[must_use]
    pub fn topological_order(&self) -> Vec<&OtCommit<K, D>> {
        let mut commits: Vec<&OtCommit<K, D>> =
            self.nodes.values().map(|node| &node.commit).collect();
        commits.sort_by(|a, b| (a.level(), a.id()).cmp(&(b.level(), b.id())));
        commits
    }

    pub fn ids(&self) -> impl Iterator<Item = &K> {
        self.nodes.keys()
    }

    /// Render as Graphviz DOT. Edges point from parent to child and are
    /// labelled with `describe` applied to the edge's diffs; `current`, when
    /// present, is drawn filled.
    ///
    /// # Errors
    ///
    /// Propagates formatter errors, which writing to a `String` never produces.
    pub fn to_graphviz<F>(&self, current: Option<&K>, describe: F) -> Result<String, fmt::Error>
    where
        F: Fn(&[D]) -> String,
    {
        let mut out = String::from("digraph commits {\n  rankdir=BT;\n");
        for commit in self.topological_order() {
            let id = commit.id();
            let style = if current == Some(id) {
                ", style=filled"
            } else {
                ""
            };
            writeln!(
                out,
                "  \"{id}\" [label=\"{id} (level {}, epoch {})\"{style}];",
                commit.level(),
                commit.epoch()
            )?;
            for (parent, diffs) in commit.parents() {
                writeln!(
                    out,
                    "  \"{parent}\" -> \"{id}\" [label=\"{}\"];",
                    escape(&describe(diffs))
                )?;
            }
        }
        out.push_str("}\n");
        Ok(out)
    }
}

impl<K: CommitId, D: Diff> Default for CommitGraph<K, D> {
    fn default() -> Self {
        Self::new()
    }
}

fn escape(label: &str) -> String {
    label.replace('\\', "\\\\").replace('"', "\\\"")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
