//! otter-core library.
//!
//! Operational transformation over a replicated commit graph: replicas edit
//! locally, publish commits, and converge through automatic multi-head merges.
//!
//! - [`system`]: the diff algebra a document type plugs in ([`OtSystem`]).
//! - [`repo`]: the commit store contract and an in-memory implementation.
//! - [`algorithms`]: ancestor search, head reduction, merge.
//! - [`node`]: the replica-facing push/checkout/fetch/poll API.
//! - [`dictionary`]: a string dictionary document, used by tests and the
//!   simulator.

pub mod algorithms;
pub mod commit;
pub mod config;
pub mod dictionary;
pub mod error;
pub mod node;
pub mod reducer;
pub mod repo;
pub mod state;
pub mod system;

// Conventions
//
// - Errors: library operations return `Result<_, OtError>`; config loaders
//   return `anyhow::Result` with file context.
// - Logging: `tracing` macros (`warn!`, `debug!`, `trace!`) with structured
//   fields.

pub use algorithms::{CommitGraph, FindResult, OtAlgorithms};
pub use commit::{CommitId, Diff, FetchData, OtCommit};
pub use config::{NodeConfig, RetryPolicy, load_node_config};
pub use error::{ErrorCode, OtError};
pub use node::OtNode;
pub use reducer::{Discard, DiffsReducer, ToList, ToSquashedList};
pub use repo::{HeadsPoller, InMemoryRepository, OtRepository};
pub use state::OtState;
pub use system::{OtSystem, TransformResult};
