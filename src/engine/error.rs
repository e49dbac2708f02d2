use ulid::Ulid;

use crate::model::BookingStatus;

#[derive(Debug)]
pub enum EngineError {
    /// Malformed request data — rejected before any computation.
    InvalidInput(&'static str),
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// The requested status change is not a legal edge from the current state.
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    /// The target interval overlaps another blocking commitment (id when
    /// known), or the business lock could not be taken in time. Retryable
    /// after re-querying slots — not by resubmitting the same interval.
    SchedulingConflict(Option<Ulid>),
    LimitExceeded(&'static str),
    /// The atomic WAL write failed. Retryable; no partial state was applied.
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidTransition { from, to } => {
                write!(f, "invalid transition: {from} -> {to}")
            }
            EngineError::SchedulingConflict(Some(id)) => {
                write!(f, "scheduling conflict with commitment {id}")
            }
            EngineError::SchedulingConflict(None) => write!(f, "scheduling conflict"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
