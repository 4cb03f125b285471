//! Runtime error types.

use thiserror::Error;

use sbtrigger_framework::BindingError;

use crate::config::ConfigError;

/// Errors that can occur during host operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration error, including unresolved connections.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Trigger binding or listener error.
    #[error(transparent)]
    Binding(#[from] BindingError),

    /// A function with this name is already registered.
    #[error("Function already registered: {0}")]
    DuplicateFunction(String),

    /// No function with this name is registered.
    #[error("Function not found: {0}")]
    FunctionNotFound(String),

    /// The host was already started; listeners cannot be created twice.
    #[error("Trigger host has already been started")]
    AlreadyStarted,
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
