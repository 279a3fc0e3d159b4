use std::fmt;
use std::io;

use crate::event::EntityKind;
use crate::rank::RankError;

/// Machine-readable error codes for agent-friendly decision making.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotFound,
    PermissionDenied,
    TakeAssignedRequired,
    Archived,
    InvalidStatus,
    StatusNoteRequired,
    InvalidChildrenKind,
    InvalidItemKind,
    InvalidRank,
    RankExhausted,
    EventContract,
    ForkConflict,
    GitWriteBlocked,
    NonFastForwardPush,
    GitFailed,
    Cancelled,
    AttachmentTooLarge,
    CorruptIndex,
    LockContention,
    IoFailed,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotFound => "E2001",
            Self::PermissionDenied => "E2002",
            Self::TakeAssignedRequired => "E2003",
            Self::Archived => "E2004",
            Self::InvalidStatus => "E2101",
            Self::StatusNoteRequired => "E2102",
            Self::InvalidChildrenKind => "E2103",
            Self::InvalidItemKind => "E2104",
            Self::InvalidRank => "E2201",
            Self::RankExhausted => "E2202",
            Self::EventContract => "E3001",
            Self::ForkConflict => "E3002",
            Self::CorruptIndex => "E3003",
            Self::GitWriteBlocked => "E4001",
            Self::NonFastForwardPush => "E4002",
            Self::GitFailed => "E4003",
            Self::Cancelled => "E5001",
            Self::AttachmentTooLarge => "E5002",
            Self::IoFailed => "E5003",
            Self::LockContention => "E5004",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::NotFound => "Entity not found",
            Self::PermissionDenied => "Permission denied",
            Self::TakeAssignedRequired => "Item is assigned to someone else",
            Self::Archived => "Entity is archived",
            Self::InvalidStatus => "Invalid status",
            Self::StatusNoteRequired => "Status requires a note",
            Self::InvalidChildrenKind => "Invalid children kind",
            Self::InvalidItemKind => "Invalid item kind",
            Self::InvalidRank => "Invalid rank",
            Self::RankExhausted => "Rank space exhausted",
            Self::EventContract => "Event contract violated",
            Self::ForkConflict => "Entity history has forked",
            Self::CorruptIndex => "Derived index is corrupt",
            Self::GitWriteBlocked => "Git operation in progress",
            Self::NonFastForwardPush => "Push rejected (non-fast-forward)",
            Self::GitFailed => "Git command failed",
            Self::Cancelled => "Operation cancelled",
            Self::AttachmentTooLarge => "Attachment too large",
            Self::IoFailed => "I/O failure",
            Self::LockContention => "Lock contention",
        }
    }

    /// Optional remediation hint that can be surfaced to operators and agents.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::NotFound | Self::InvalidRank | Self::EventContract | Self::Cancelled => None,
            Self::PermissionDenied => {
                Some("Ask the owner or assignee to make the change, or get the item assigned.")
            }
            Self::TakeAssignedRequired => Some("Pass the take-assigned override to claim it."),
            Self::Archived => Some("Unarchive the item before changing it."),
            Self::InvalidStatus => Some("Use one of the outline's status ids, or empty to clear."),
            Self::StatusNoteRequired => Some("Provide a note with this status change."),
            Self::InvalidChildrenKind => Some("Use one of: \"\", \"checkbox\"."),
            Self::InvalidItemKind => Some("Use one of: \"\", \"status\", \"checkbox\"."),
            Self::RankExhausted => Some("Rebalance the sibling ranks and retry."),
            Self::ForkConflict => Some("Merge the divergent heads explicitly, then retry."),
            Self::CorruptIndex => Some("Delete .clarity/index.sqlite; it is rebuilt from events."),
            Self::GitWriteBlocked => {
                Some("Finish or abort the merge/rebase/cherry-pick/revert, then retry.")
            }
            Self::NonFastForwardPush => Some("Pull with rebase, then push again."),
            Self::GitFailed => Some("Inspect the repository with `git status`."),
            Self::AttachmentTooLarge => Some("Attach a smaller file."),
            Self::IoFailed => Some("Check disk space and write permissions."),
            Self::LockContention => Some("Another writer holds the lock; retry shortly."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Errors surfaced by the storage engine, replay, and mutation layer.
#[derive(Debug, thiserror::Error)]
pub enum ClarityError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("actor {actor} may not edit item {item}")]
    PermissionDenied { actor: String, item: String },

    #[error("item {item} is assigned to {assigned}; pass take-assigned to claim it")]
    TakeAssignedRequired { item: String, assigned: String },

    #[error("{kind} {id} is archived")]
    Archived { kind: &'static str, id: String },

    #[error("invalid status {status:?} for outline {outline}")]
    InvalidStatus { status: String, outline: String },

    #[error("status {status:?} requires a note")]
    StatusNoteRequired { status: String },

    #[error("invalid children kind {0:?}")]
    InvalidChildrenKind(String),

    #[error("invalid item kind {0:?}")]
    InvalidItemKind(String),

    #[error(transparent)]
    Rank(#[from] RankError),

    #[error("event contract: {0}")]
    EventContract(String),

    #[error("fork on {kind}/{id}: {heads} heads; merge explicitly before writing")]
    ForkConflict {
        kind: EntityKind,
        id: String,
        heads: usize,
    },

    #[error("git {0} in progress or unmerged paths present; refusing to write")]
    GitWriteBlocked(String),

    #[error("push rejected (non-fast-forward): {0}")]
    NonFastForwardPush(String),

    #[error("git: {0}")]
    Git(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded after {0:?}")]
    DeadlineExceeded(std::time::Duration),

    #[error("attachment {name} is {size} bytes, limit is {limit}")]
    AttachmentTooLarge { name: String, size: u64, limit: u64 },

    #[error("lock error: {0}")]
    Lock(#[from] crate::lock::LockError),

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ClarityError {
    /// Shorthand for [`ClarityError::NotFound`].
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::PermissionDenied { .. } => ErrorCode::PermissionDenied,
            Self::TakeAssignedRequired { .. } => ErrorCode::TakeAssignedRequired,
            Self::Archived { .. } => ErrorCode::Archived,
            Self::InvalidStatus { .. } => ErrorCode::InvalidStatus,
            Self::StatusNoteRequired { .. } => ErrorCode::StatusNoteRequired,
            Self::InvalidChildrenKind(_) => ErrorCode::InvalidChildrenKind,
            Self::InvalidItemKind(_) => ErrorCode::InvalidItemKind,
            Self::Rank(RankError::Exhausted { .. }) => ErrorCode::RankExhausted,
            Self::Rank(_) => ErrorCode::InvalidRank,
            Self::EventContract(_) => ErrorCode::EventContract,
            Self::ForkConflict { .. } => ErrorCode::ForkConflict,
            Self::GitWriteBlocked(_) => ErrorCode::GitWriteBlocked,
            Self::NonFastForwardPush(_) => ErrorCode::NonFastForwardPush,
            Self::Git(_) => ErrorCode::GitFailed,
            Self::Cancelled | Self::DeadlineExceeded(_) => ErrorCode::Cancelled,
            Self::AttachmentTooLarge { .. } => ErrorCode::AttachmentTooLarge,
            Self::Sqlite(_) => ErrorCode::CorruptIndex,
            Self::Lock(err) => err.code(),
            Self::Json(_) | Self::Io(_) => ErrorCode::IoFailed,
        }
    }

    /// Optional remediation hint for operators and agents.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

/// Crate-wide result alias.
pub type Result<T, E = ClarityError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::{ClarityError, ErrorCode};
    use crate::rank::RankError;
    use std::collections::HashSet;

    #[test]
    fn all_codes_are_unique() {
        let all = [
            ErrorCode::NotFound,
            ErrorCode::PermissionDenied,
            ErrorCode::TakeAssignedRequired,
            ErrorCode::Archived,
            ErrorCode::InvalidStatus,
            ErrorCode::StatusNoteRequired,
            ErrorCode::InvalidChildrenKind,
            ErrorCode::InvalidItemKind,
            ErrorCode::InvalidRank,
            ErrorCode::RankExhausted,
            ErrorCode::EventContract,
            ErrorCode::ForkConflict,
            ErrorCode::GitWriteBlocked,
            ErrorCode::NonFastForwardPush,
            ErrorCode::GitFailed,
            ErrorCode::Cancelled,
            ErrorCode::AttachmentTooLarge,
            ErrorCode::CorruptIndex,
            ErrorCode::LockContention,
            ErrorCode::IoFailed,
        ];

        let mut seen = HashSet::new();
        for code in all {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn rank_errors_split_into_invalid_and_exhausted() {
        let exhausted = ClarityError::from(RankError::Exhausted { attempts: 256 });
        assert_eq!(exhausted.code(), ErrorCode::RankExhausted);

        let invalid = ClarityError::from(RankError::InvalidChar("A".into()));
        assert_eq!(invalid.code(), ErrorCode::InvalidRank);
    }

    #[test]
    fn not_found_display_names_kind_and_id() {
        let err = ClarityError::not_found("item", "item-abc");
        assert_eq!(err.to_string(), "item not found: item-abc");
        assert!(err.hint().is_none());
    }
}
