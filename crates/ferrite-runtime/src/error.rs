//! Error types for the runtime crate.

use thiserror::Error;

/// Opaque failure reported by a compiler; passed through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Compilation failed: {0}")]
pub struct CompileError(pub String);

/// Opaque failure reported by an execution engine; passed through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Execution failed: {0}")]
pub struct ExecutionError(pub String);

/// Runtime errors.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Unknown device id, or id not addressable from this process.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unsatisfiable request or caller programming error.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Capability intentionally absent on this platform. Never retriable.
    #[error("{operation} is not supported by the {platform} client")]
    Unsupported {
        operation: &'static str,
        platform: &'static str,
    },

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// Broken internal invariant (malformed compiler output and the like).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RuntimeError {
    /// Whether retrying the same call can never succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(self, RuntimeError::Unsupported { .. })
    }
}

impl From<ferrite_core::Error> for RuntimeError {
    fn from(err: ferrite_core::Error) -> Self {
        match err {
            ferrite_core::Error::InvalidArgument(msg) | ferrite_core::Error::InvalidShape(msg) => {
                RuntimeError::InvalidArgument(msg)
            }
            ferrite_core::Error::Internal(msg) => RuntimeError::Internal(msg),
        }
    }
}

/// Specialized Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;
