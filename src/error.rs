//! Error types for the exchange engine.

use thiserror::Error;

use crate::domain::item::{ItemId, ItemStatus, UserId};
use crate::domain::request::RequestId;

/// Result type alias using the handover error type.
pub type Result<T> = std::result::Result<T, HandoverError>;

/// Main error type for the exchange engine.
#[derive(Error, Debug)]
pub enum HandoverError {
    /// Malformed or missing input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Item not found
    #[error("Item not found: {0}")]
    ItemNotFound(ItemId),

    /// Request not found
    #[error("Request not found: {0}")]
    RequestNotFound(RequestId),

    /// Caller lacks the required relationship to the entity
    #[error("Forbidden: user {user} may not {action}")]
    Forbidden { user: UserId, action: &'static str },

    /// Operation not valid for the current lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Status change outside the allowed transition table
    #[error("Invalid transition: '{from}' -> '{to}'")]
    InvalidTransition { from: String, to: String },

    /// Lost a race on a conditional update; re-read and decide again
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// General error from anyhow
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Coarse error taxonomy used at the external boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Forbidden,
    InvalidState,
    Conflict,
    Internal,
}

impl HandoverError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HandoverError::Validation(_) => ErrorKind::Validation,
            HandoverError::ItemNotFound(_) | HandoverError::RequestNotFound(_) => {
                ErrorKind::NotFound
            }
            HandoverError::Forbidden { .. } => ErrorKind::Forbidden,
            HandoverError::InvalidState(_) | HandoverError::InvalidTransition { .. } => {
                ErrorKind::InvalidState
            }
            HandoverError::Conflict(_) => ErrorKind::Conflict,
            HandoverError::Serialization(_) | HandoverError::Other(_) => ErrorKind::Internal,
        }
    }

    /// Only a lost compare-and-swap is worth retrying, after re-reading state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, HandoverError::Conflict(_))
    }

    pub(crate) fn item_transition(from: ItemStatus, to: ItemStatus) -> Self {
        HandoverError::InvalidTransition {
            from: from.as_str().to_string(),
            to: to.as_str().to_string(),
        }
    }
}
