//! A simulated client replica.
//!
//! The replica keeps what a real editor keeps: the commit its document is
//! based on, the materialized document, uncommitted local edits, and at most
//! one commit awaiting acknowledgement. An unacknowledged commit is re-pushed
//! as-is; push is content-idempotent, so a lost acknowledgement is harmless.

use otter_core::dictionary::{DictionaryOperation, DictionaryState};
use otter_core::{FetchData, OtError, OtState};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{SimCommit, SimNode};

/// Stable identifier for a simulated replica.
pub type ReplicaId = usize;

/// Immutable view of a replica after a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaState {
    pub id: ReplicaId,
    /// Commit the document is based on.
    pub cursor: u64,
    pub document: DictionaryState,
    /// Every commit this replica created, in creation order.
    pub authored: Vec<u64>,
    /// Local edits not yet committed.
    pub uncommitted: usize,
    /// Commit created but not yet acknowledged.
    pub unacknowledged: Option<u64>,
}

pub struct Replica {
    id: ReplicaId,
    node: SimNode,
    cursor: u64,
    level: u64,
    document: DictionaryState,
    working: Vec<DictionaryOperation>,
    pending: Option<SimCommit>,
    authored: Vec<u64>,
}

impl Replica {
    /// Replica whose empty document sits on `root`.
    #[must_use]
    pub fn new(id: ReplicaId, node: SimNode, root: u64) -> Self {
        Self {
            id,
            node,
            cursor: root,
            level: 1,
            document: DictionaryState::new(),
            working: Vec::new(),
            pending: None,
            authored: Vec::new(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> ReplicaId {
        self.id
    }

    #[must_use]
    pub const fn cursor(&self) -> u64 {
        self.cursor
    }

    #[must_use]
    pub const fn document(&self) -> &DictionaryState {
        &self.document
    }

    #[must_use]
    pub const fn node(&self) -> &SimNode {
        &self.node
    }

    #[must_use]
    pub const fn is_awaiting_ack(&self) -> bool {
        self.pending.is_some()
    }

    #[must_use]
    pub fn unacknowledged(&self) -> Option<u64> {
        self.pending.as_ref().map(|commit| *commit.id())
    }

    /// Set `key` locally. Refused while a commit awaits acknowledgement, and
    /// a write of the current value records nothing.
    pub fn edit(&mut self, key: &str, value: Option<&str>) -> Option<DictionaryOperation> {
        if self.pending.is_some() {
            return None;
        }
        let operation = self.document.set_operation(key, value);
        if operation.is_empty() {
            return None;
        }
        self.document.apply(&operation);
        self.working.push(operation.clone());
        Some(operation)
    }

    /// Turn the local edits into a commit on top of the cursor.
    ///
    /// # Errors
    ///
    /// Repository failures while loading the cursor; the edits are kept.
    pub async fn commit(&mut self) -> Result<Option<u64>, OtError> {
        if self.pending.is_some() || self.working.is_empty() {
            return Ok(None);
        }
        let commit = self
            .node
            .create_commit(self.cursor, self.working.clone(), self.level + 1)
            .await?;
        let id = *commit.id();
        debug!(replica = self.id, commit = id, edits = self.working.len(), "committed");
        self.working.clear();
        self.authored.push(id);
        self.pending = Some(commit);
        Ok(Some(id))
    }

    /// Push the unacknowledged commit, if any, and move to the merged head.
    ///
    /// # Errors
    ///
    /// Propagates push failures; the commit stays unacknowledged.
    pub async fn push(&mut self) -> Result<Option<FetchData<u64, DictionaryOperation>>, OtError> {
        let Some(commit) = self.pending.clone() else {
            return Ok(None);
        };
        let fetched = self.node.push(commit).await?;
        self.pending = None;
        self.advance(&fetched);
        Ok(Some(fetched))
    }

    /// Catch up with the heads. Only a replica with nothing local to publish
    /// fetches; otherwise its edits would need rebasing.
    ///
    /// # Errors
    ///
    /// Propagates fetch failures; the cursor does not move.
    pub async fn fetch(&mut self) -> Result<Option<FetchData<u64, DictionaryOperation>>, OtError> {
        if self.pending.is_some() || !self.working.is_empty() {
            return Ok(None);
        }
        let fetched = self.node.fetch(&self.cursor).await?;
        self.advance(&fetched);
        Ok(Some(fetched))
    }

    /// Commit, push and fetch until nothing local remains.
    ///
    /// # Errors
    ///
    /// The first failure of any step.
    pub async fn flush(&mut self) -> Result<(), OtError> {
        self.commit().await?;
        self.push().await?;
        self.fetch().await?;
        Ok(())
    }

    #[must_use]
    pub fn snapshot(&self) -> ReplicaState {
        ReplicaState {
            id: self.id,
            cursor: self.cursor,
            document: self.document.clone(),
            authored: self.authored.clone(),
            uncommitted: self.working.len(),
            unacknowledged: self.unacknowledged(),
        }
    }

    fn advance(&mut self, fetched: &FetchData<u64, DictionaryOperation>) {
        self.document.apply_all(&fetched.diffs);
        self.cursor = fetched.commit_id;
        self.level = fetched.level;
    }
}
