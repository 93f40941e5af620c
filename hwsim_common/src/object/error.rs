//! Object-level error types.

use thiserror::Error;

/// Failure raised while constructing, initializing or resetting an object.
#[derive(Debug, Clone, Error)]
pub enum ObjectError {
    /// Options table could not be deserialized or failed validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A referenced object does not exist.
    #[error("Missing dependency: {0}")]
    MissingDependency(String),

    /// The core refused a request made during init/reset.
    #[error("Core request failed: {0}")]
    Core(String),
}

/// Synchronous rejection returned by `exec_command`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandReject {
    /// The object does not implement this command.
    #[error("command not supported")]
    Unsupported,

    /// The object is not in a state that accepts the command.
    #[error("object not ready: {0}")]
    NotReady(String),

    /// A previous command is still in progress.
    #[error("object busy")]
    Busy,

    /// An argument is outside the accepted range.
    #[error("argument out of range: {0}")]
    OutOfRange(String),
}

impl CommandReject {
    /// Negative errno-style result code reported to submitters.
    pub fn code(&self) -> i32 {
        match self {
            CommandReject::Unsupported => -95,
            CommandReject::NotReady(_) => -11,
            CommandReject::Busy => -16,
            CommandReject::OutOfRange(_) => -34,
        }
    }
}
