//! Error types for circle operations.
//!
//! Every error maps onto one stable [`ErrorKind`] so that a transport layer
//! can render it without inspecting variants. Business-rule failures
//! (`Forbidden`, `NotFound`, `Conflict`, `Invalid`) are final; only
//! `Unavailable` is worth retrying.

use serde::Serialize;
use thiserror::Error;

/// Stable classification of a [`CircleError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A capability or gating check failed.
    Forbidden,
    /// The circle, post, invite or membership does not exist.
    NotFound,
    /// The operation lost a race or collides with existing state.
    Conflict,
    /// Malformed input.
    Invalid,
    /// Storage or fact provider fault or timeout.
    Unavailable,
}

impl ErrorKind {
    /// Converts to string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Invalid => "invalid",
            Self::Unavailable => "unavailable",
        }
    }
}

/// Error type for circle operations.
#[derive(Error, Debug)]
pub enum CircleError {
    /// Capability or gating check failed.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Entity not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// State conflict (duplicate slug, last admin, lost race).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Invalid data provided.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// No invite exists for the given code.
    #[error("Invite not found")]
    InviteNotFound,

    /// The invite was already redeemed.
    #[error("Invite already used")]
    InviteAlreadyUsed,

    /// The invite expired before redemption.
    #[error("Invite expired at {expired_at}")]
    InviteExpired {
        /// Expiry timestamp (Unix seconds).
        expired_at: i64,
    },

    /// The invite is bound to a different address.
    #[error("Invite was issued to a different address")]
    InviteAddressMismatch,

    /// A gating fact could not be verified (e.g. chain query failed).
    #[error("Unverifiable {rule} rule: {reason}")]
    Unverifiable {
        /// Rule type that could not be checked.
        rule: &'static str,
        /// Provider-supplied reason.
        reason: String,
    },

    /// Fact provider failure.
    #[error("Fact provider unavailable: {0}")]
    Provider(String),

    /// An external call exceeded its time budget.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Database error from `SQLite`.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl CircleError {
    /// Returns the stable kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Forbidden(_) | Self::InviteAddressMismatch => ErrorKind::Forbidden,
            Self::NotFound(_) | Self::InviteNotFound => ErrorKind::NotFound,
            Self::Conflict(_) | Self::InviteAlreadyUsed | Self::InviteExpired { .. } => {
                ErrorKind::Conflict
            }
            Self::InvalidData(_) => ErrorKind::Invalid,
            Self::Unverifiable { .. }
            | Self::Provider(_)
            | Self::Timeout(_)
            | Self::Storage(_)
            | Self::Database(_) => ErrorKind::Unavailable,
        }
    }

    /// Returns whether the caller may retry the operation with backoff.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Unavailable)
    }
}

/// Result type alias for circle operations.
pub type Result<T> = std::result::Result<T, CircleError>;
