//! Error types for trigger binding and listener management.

use sbtrigger_core::TransportError;
use thiserror::Error;

/// Errors raised while binding a trigger, creating clients or running a listener.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BindingError {
    /// A required configuration value is missing or empty.
    #[error("value cannot be null or empty: {name}")]
    MissingArgument {
        /// Name of the missing value.
        name: &'static str,
    },

    /// The entity path was rejected by strict validation.
    #[error("invalid entity path '{path}': {reason}")]
    InvalidEntityPath {
        /// The rejected path.
        path: String,
        /// Reason for rejection.
        reason: String,
    },

    /// The trigger value could not be converted to the trigger payload type.
    #[error("Unable to convert trigger to {target}.")]
    Conversion {
        /// Name of the payload type.
        target: &'static str,
    },

    /// The message body could not be turned into the parameter type.
    #[error("failed to bind message body to {target}: {reason}")]
    Deserialize {
        /// Name of the parameter type.
        target: &'static str,
        /// Reason for failure.
        reason: String,
    },

    /// `create_listener` was called twice on the same trigger binding.
    #[error("a listener has already been created for '{entity_path}'")]
    ListenerAlreadyCreated {
        /// Entity the listener is bound to.
        entity_path: String,
    },

    /// Lifecycle operation not valid in the listener's current state.
    #[error("listener for '{entity_path}' cannot {operation} while {state}")]
    InvalidState {
        /// Entity the listener is bound to.
        entity_path: String,
        /// The rejected operation.
        operation: &'static str,
        /// Current state.
        state: &'static str,
    },

    /// The listener has been disposed.
    #[error("listener for '{entity_path}' has been disposed")]
    Disposed {
        /// Entity the listener is bound to.
        entity_path: String,
    },

    /// The operation was cancelled by its cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// Broker client error.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl BindingError {
    /// Creates a deserialization error.
    pub fn deserialize(target: &'static str, reason: impl ToString) -> Self {
        Self::Deserialize {
            target,
            reason: reason.to_string(),
        }
    }

    /// Whether this is a configuration error (fatal for a registration).
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::MissingArgument { .. } | Self::InvalidEntityPath { .. }
        ) || matches!(self, Self::Transport(TransportError::InvalidConfig(_)))
    }
}

/// Result type for binding operations.
pub type BindingResult<T> = Result<T, BindingError>;

/// Rejects empty values with [`BindingError::MissingArgument`].
pub(crate) fn require_non_empty(value: &str, name: &'static str) -> BindingResult<()> {
    if value.is_empty() {
        return Err(BindingError::MissingArgument { name });
    }
    Ok(())
}
