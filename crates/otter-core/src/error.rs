use std::fmt;

/// Machine-readable error codes, stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    CommitNotFound,
    TransformConflict,
    CommitConflict,
    InvalidArgument,
    StorageFailure,
    NodeStopped,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::CommitNotFound => "E2001",
            Self::TransformConflict => "E2002",
            Self::CommitConflict => "E3001",
            Self::InvalidArgument => "E3002",
            Self::StorageFailure => "E5001",
            Self::NodeStopped => "E5002",
        }
    }

    /// Short human-facing summary for logs.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::CommitNotFound => "Commit or snapshot not found",
            Self::TransformConflict => "Diffs cannot be transformed",
            Self::CommitConflict => "Commit id reused with different content",
            Self::InvalidArgument => "Invalid argument",
            Self::StorageFailure => "Repository storage failure",
            Self::NodeStopped => "Node stopped",
        }
    }

    /// Optional remediation hint surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::CommitNotFound => Some("Checkout again from the current heads."),
            Self::TransformConflict => {
                Some("Both diff sequences must start from the same document state.")
            }
            Self::CommitConflict => Some("Create a fresh commit instead of reusing the id."),
            Self::InvalidArgument | Self::NodeStopped => None,
            Self::StorageFailure => Some("Retry from the last known head."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Errors raised by the diff algebra, repositories, graph algorithms and node.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OtError {
    /// A referenced commit or snapshot does not exist, or no ancestor
    /// satisfied a search predicate.
    #[error("not found: {what}")]
    NotFound { what: String },

    /// Two diff sequences could not be transformed against each other.
    #[error("transform conflict: {0}")]
    TransformConflict(String),

    /// A commit id was pushed again with different content.
    #[error("commit {id} already exists with different content")]
    CommitConflict { id: String },

    /// The caller passed an argument the operation cannot work with.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Transient failure of the storage medium.
    #[error("storage failure: {0}")]
    Storage(String),

    /// The node was stopped while the operation was in flight.
    #[error("node stopped")]
    Stopped,
}

impl OtError {
    pub(crate) fn not_found(what: impl fmt::Display) -> Self {
        Self::NotFound {
            what: what.to_string(),
        }
    }

    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } => ErrorCode::CommitNotFound,
            Self::TransformConflict(_) => ErrorCode::TransformConflict,
            Self::CommitConflict { .. } => ErrorCode::CommitConflict,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::Storage(_) => ErrorCode::StorageFailure,
            Self::Stopped => ErrorCode::NodeStopped,
        }
    }

    /// Whether a retry policy may re-drive the failed call.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}
