//! Error types for the signal tree.
//!
//! Every expected, data-driven failure is reported as a [`SignalError`]
//! through a command result or an operation result. Nothing here is ever
//! raised as a panic; contract violations (a façade asked to decode a value
//! that does not fit its declared type, an operation completed twice) panic
//! at the call site instead.

use thiserror::Error;

use crate::tree::Id;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, SignalError>;

/// Reasons a command or operation did not succeed.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalError {
    /// A validator refused the command. The tree was not touched.
    #[error("Command {command} rejected by validator")]
    ValidationRejected { command: Id },

    /// A condition did not hold or the tree shape did not allow the change.
    #[error("Precondition failed: {reason}")]
    PreconditionFailed { reason: String },

    /// The referenced node does not exist.
    #[error("Node not found: {id}")]
    NotFound { id: Id },

    /// An `update()` retry loop was cancelled before it succeeded.
    #[error("Operation cancelled")]
    Cancelled,

    /// A command or value could not be encoded or decoded.
    #[error("Codec error: {reason}")]
    Codec { reason: String },
}

impl SignalError {
    pub(crate) fn precondition(reason: impl Into<String>) -> Self {
        SignalError::PreconditionFailed {
            reason: reason.into(),
        }
    }

    /// Check if this error is a regular unsuccessful outcome of a condition
    /// or structural check, including references to missing nodes.
    pub fn is_precondition_failure(&self) -> bool {
        matches!(
            self,
            SignalError::PreconditionFailed { .. } | SignalError::NotFound { .. }
        )
    }

    /// Check if this error comes from a validator.
    pub fn is_validation_rejected(&self) -> bool {
        matches!(self, SignalError::ValidationRejected { .. })
    }

    /// Check if this error indicates a cancelled operation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SignalError::Cancelled)
    }
}

impl From<serde_json::Error> for SignalError {
    fn from(err: serde_json::Error) -> Self {
        SignalError::Codec {
            reason: err.to_string(),
        }
    }
}

impl From<rmp_serde::encode::Error> for SignalError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        SignalError::Codec {
            reason: err.to_string(),
        }
    }
}

impl From<rmp_serde::decode::Error> for SignalError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        SignalError::Codec {
            reason: err.to_string(),
        }
    }
}
