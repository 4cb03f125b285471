//! Error types shared by every layer that talks to the broker.
//!
//! Binding-level errors (conversion, configuration) live in `sbtrigger-framework`.

use thiserror::Error;

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors raised by broker clients.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Connection could not be established.
    #[error("connection failed: {endpoint} - {reason}")]
    ConnectionFailed {
        /// The endpoint that failed to connect.
        endpoint: String,
        /// Reason for failure.
        reason: String,
    },

    /// The client was closed before or during the operation.
    #[error("client for '{entity_path}' is closed")]
    Closed {
        /// Entity the closed client was bound to.
        entity_path: String,
    },

    /// Invalid client configuration (bad connection string, bad path).
    #[error("invalid transport configuration: {0}")]
    InvalidConfig(String),

    /// The addressed queue, topic or subscription does not exist.
    #[error("messaging entity '{entity_path}' not found")]
    EntityNotFound {
        /// The missing entity path.
        entity_path: String,
    },

    /// The lock token is unknown or its lock has expired.
    #[error("lock '{lock_token}' is lost or expired")]
    LockLost {
        /// The lock token that was presented.
        lock_token: String,
    },

    /// No session could be locked within the wait period.
    #[error("no session available on '{entity_path}'")]
    SessionCannotBeLocked {
        /// Entity a session was requested from.
        entity_path: String,
    },

    /// The entity requires sessions but a plain receiver was used, or vice versa.
    #[error("session mismatch on '{entity_path}': {reason}")]
    SessionMismatch {
        /// Entity the operation targeted.
        entity_path: String,
        /// Reason for failure.
        reason: String,
    },

    /// Message send failed.
    #[error("failed to send message: {0}")]
    SendFailed(String),
}

impl TransportError {
    /// Creates an invalid configuration error.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Creates an entity-not-found error.
    pub fn entity_not_found(entity_path: impl Into<String>) -> Self {
        Self::EntityNotFound {
            entity_path: entity_path.into(),
        }
    }

    /// Creates a closed-client error.
    pub fn closed(entity_path: impl Into<String>) -> Self {
        Self::Closed {
            entity_path: entity_path.into(),
        }
    }

    /// Creates a lock-lost error.
    pub fn lock_lost(lock_token: impl Into<String>) -> Self {
        Self::LockLost {
            lock_token: lock_token.into(),
        }
    }
}

// =============================================================================
// Property Errors
// =============================================================================

/// Errors raised when reading a message property.
///
/// These are recovered locally by metadata extraction: the affected field is
/// omitted and everything else is still reported.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PropertyError {
    /// Broker-assigned property read on a message that was never received.
    #[error("property '{property}' is only available on received messages")]
    NotReceived {
        /// Name of the property.
        property: &'static str,
    },

    /// The property exists but its value cannot be produced.
    #[error("property '{property}' is unavailable: {reason}")]
    Unavailable {
        /// Name of the property.
        property: &'static str,
        /// Reason for failure.
        reason: String,
    },
}

impl PropertyError {
    /// Creates an unavailable-property error.
    pub fn unavailable(property: &'static str, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            property,
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type for property reads.
pub type PropertyResult<T> = Result<T, PropertyError>;
