use thiserror::Error;

use crate::access::AccessDenied;
use crate::model::{ReservationStatus, Window};

use super::policy::CancelRefusal;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("table {table_number} is already reserved {window}")]
    Conflict {
        table_id: ulid::Ulid,
        table_number: String,
        /// The blocking reservation's window, for display.
        window: Window,
    },
    #[error("no table for {party_size} is available {window}")]
    NoTableAvailable { party_size: u32, window: Window },
    #[error("cannot move reservation from {from} to {to}")]
    InvalidTransition {
        from: ReservationStatus,
        to: ReservationStatus,
    },
    #[error("cancellation refused: {0}")]
    CancellationRefused(#[from] CancelRefusal),
    #[error("access denied: {0}")]
    AccessDenied(#[from] AccessDenied),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
}

impl EngineError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        EngineError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Stable machine-readable code for protocol responses.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::NotFound { .. } => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::Conflict { .. } => "conflict",
            EngineError::NoTableAvailable { .. } => "unavailable",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::CancellationRefused(_) => "cancellation_refused",
            EngineError::AccessDenied(_) => "access_denied",
            EngineError::LimitExceeded(_) => "limit_exceeded",
        }
    }
}
