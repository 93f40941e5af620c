//! Error types for the simulation core

use crate::events::SubscriptionId;
use crate::timers::TimerHandle;
use hwsim_common::config::ConfigError;
use hwsim_common::object::{CommandReject, ObjectError, ObjectId, ObjectKind};
use thiserror::Error;

/// Errors returned by core operations
#[derive(Error, Debug)]
pub enum CoreError {
    /// Object cache could not provide a slot
    #[error("Object cache exhausted: {cache}")]
    CacheExhausted {
        /// Cache name
        cache: String,
    },

    /// An object with the same kind and name is already registered
    #[error("Duplicate object: {kind} '{name}'")]
    DuplicateObject {
        /// Object kind
        kind: ObjectKind,
        /// Object name
        name: String,
    },

    /// No factory is registered for the requested kind
    #[error("Unknown object kind: {0}")]
    UnknownObjectKind(String),

    /// Handle does not refer to a live object
    #[error("Object not found: {0}")]
    ObjectNotFound(ObjectId),

    /// An object failed to build, initialize or reset
    #[error("Object '{name}' failed: {source}")]
    Object {
        /// Dotted object name
        name: String,
        /// Underlying object error
        #[source]
        source: ObjectError,
    },

    /// Target refused the command synchronously
    #[error("Command rejected by {target}: {reason}")]
    CommandRejected {
        /// Target object
        target: ObjectId,
        /// Rejection reason
        reason: CommandReject,
    },

    /// Subscription is not (or no longer) registered
    #[error("Subscription not registered: {0:?}")]
    NotSubscribed(SubscriptionId),

    /// Timer is not (or no longer) registered
    #[error("Timer not registered: {0:?}")]
    TimerNotRegistered(TimerHandle),

    /// Operation not allowed in the current lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A simulation thread could not be spawned
    #[error("Failed to spawn thread '{name}': {source}")]
    ThreadSpawn {
        /// Thread name
        name: String,
        /// OS error
        #[source]
        source: std::io::Error,
    },

    /// One or more threads panicked before they could be joined
    #[error("Threads panicked: {}", .0.join(", "))]
    ThreadJoin(Vec<String>),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result alias for core operations
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Negative result code matching the error, for integer-only callers.
    pub fn code(&self) -> i32 {
        match self {
            CoreError::CacheExhausted { .. } => -12,
            CoreError::CommandRejected { reason, .. } => reason.code(),
            CoreError::ObjectNotFound(_) => -19,
            CoreError::DuplicateObject { .. } => -17,
            CoreError::NotSubscribed(_) | CoreError::TimerNotRegistered(_) => -2,
            CoreError::UnknownObjectKind(_) | CoreError::Config(_) => -22,
            CoreError::Object { .. } | CoreError::InvalidState(_) => -1,
            CoreError::ThreadSpawn { .. } | CoreError::ThreadJoin(_) => -11,
        }
    }
}
