//! Commit id generation.
//!
//! Two strategies are provided:
//!
//! - [`SequentialIds`]: `u64` ids in creation order, unique within one
//!   repository.
//! - [`ContentHashIds`]: BLAKE3 hash of the commit's epoch, level and parent
//!   edges. Replicas that independently build the same merge commit derive
//!   the same id, so pushing it twice is a no-op rather than a second commit.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::OtError;

/// Assigns ids to newly created commits.
pub trait CommitIdGenerator<K, D>: Send + Sync {
    /// Id for a commit with the given content.
    ///
    /// # Errors
    ///
    /// Returns [`OtError::InvalidArgument`] when the content cannot be encoded.
    fn next_id(&self, epoch: u64, parents: &BTreeMap<K, Vec<D>>, level: u64) -> Result<K, OtError>;
}

/// Monotonic counter ids.
#[derive(Debug)]
pub struct SequentialIds {
    next: AtomicU64,
}

impl SequentialIds {
    /// Start counting at `first`.
    #[must_use]
    pub const fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }
}

impl Default for SequentialIds {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl<D> CommitIdGenerator<u64, D> for SequentialIds {
    fn next_id(&self, _epoch: u64, _parents: &BTreeMap<u64, Vec<D>>, _level: u64) -> Result<u64, OtError> {
        Ok(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Content-addressed commit id: a full BLAKE3 digest.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommitHash([u8; 32]);

impl CommitHash {
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for CommitHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for CommitHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps graph dumps and logs readable.
        let full = self.to_string();
        write!(f, "CommitHash({})", &full[..12])
    }
}

impl FromStr for CommitHash {
    type Err = OtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hash = blake3::Hash::from_hex(s)
            .map_err(|err| OtError::InvalidArgument(format!("bad commit hash {s:?}: {err}")))?;
        Ok(Self(*hash.as_bytes()))
    }
}

impl Serialize for CommitHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CommitHash {
    fn deserialize<De: Deserializer<'de>>(deserializer: De) -> Result<Self, De::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Derives [`CommitHash`] ids from canonical JSON of the commit content.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentHashIds;

impl<D: Serialize> CommitIdGenerator<CommitHash, D> for ContentHashIds {
    fn next_id(
        &self,
        epoch: u64,
        parents: &BTreeMap<CommitHash, Vec<D>>,
        level: u64,
    ) -> Result<CommitHash, OtError> {
        let encoded = serde_json::to_vec(&(epoch, level, parents))
            .map_err(|err| OtError::InvalidArgument(format!("cannot encode commit: {err}")))?;
        Ok(CommitHash(*blake3::hash(&encoded).as_bytes()))
    }
}
