//! Crate-wide error kinds and the facade-level error type.
//!
//! Every public operation returns a [`VoteError`] tagged with one of the
//! six [`ErrorKind`]s from the service contract; the transport layer (out
//! of scope for this core) maps each kind to an HTTP status uniformly.

use std::fmt;

use crate::codec::CodecError;
use crate::eligibility::EligibilityError;
use crate::methods::MethodError;
use crate::splitter::SplitError;
use crate::store::StoreError;

/// Machine-readable error tag returned to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Syntactically or semantically malformed request.
    Invalid,
    /// Caller lacks permission, voter not eligible, delegation rule forbids.
    NotAllowed,
    /// Poll not found.
    NotExists,
    /// Operation requires `started` state.
    NotStarted,
    /// This represented voter already has a ballot for this poll.
    DoubleVote,
    /// Unexpected failure; details logged, not exposed.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Invalid => "invalid",
            ErrorKind::NotAllowed => "not-allowed",
            ErrorKind::NotExists => "not-exists",
            ErrorKind::NotStarted => "not-started",
            ErrorKind::DoubleVote => "double-vote",
            ErrorKind::Internal => "internal",
        };
        write!(f, "{s}")
    }
}

/// The error type returned by every [`crate::facade::VoteService`] operation.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct VoteError {
    pub kind: ErrorKind,
    pub message: String,
}

impl VoteError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Invalid, message)
    }

    pub fn not_allowed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotAllowed, message)
    }

    pub fn not_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotExists, message)
    }

    pub fn not_started(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotStarted, message)
    }

    pub fn double_vote(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DoubleVote, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl From<EligibilityError> for VoteError {
    fn from(e: EligibilityError) -> Self {
        VoteError::not_allowed(e.to_string())
    }
}

impl From<SplitError> for VoteError {
    fn from(e: SplitError) -> Self {
        VoteError::invalid(e.to_string())
    }
}

impl From<MethodError> for VoteError {
    fn from(e: MethodError) -> Self {
        VoteError::invalid(e.to_string())
    }
}

impl From<CodecError> for VoteError {
    fn from(e: CodecError) -> Self {
        VoteError::internal(e.to_string())
    }
}

impl From<StoreError> for VoteError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::PollNotFound => VoteError::not_exists("poll does not exist"),
            StoreError::PollNotStarted => VoteError::not_started("poll is not started"),
            StoreError::UserHasVotedBefore => {
                VoteError::double_vote("represented voter already has a ballot for this poll")
            }
            other => VoteError::internal(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for VoteError {
    fn from(e: sqlx::Error) -> Self {
        VoteError::internal(format!("database error: {e}"))
    }
}
