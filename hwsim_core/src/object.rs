//! Simulated object capability set.
//!
//! Every object kind implements [`SimObject`]. Only `kind` and `status`
//! are mandatory; the other capabilities default to no-ops (or, for
//! commands, to `CommandReject::Unsupported`).
//!
//! # Lifecycle
//!
//! 1. factory builds the object from its options table
//! 2. `init()` once, in registration order (may look up other objects)
//! 3. `update()` on the object's own thread at its update frequency
//! 4. `exec_command()` / `on_event()` / `on_command_complete()` from the
//!    pipeline workers, serialized with `update()` by the object's mutex
//! 5. `reset()` while every thread is paused
//! 6. `destroy()` after the object has been unlinked from every queue
//!
//! # Locking
//!
//! All methods run with the object's own lock held. Reading another
//! object's status through the context locks that object, so status
//! reads must follow the (acyclic) dependency direction: an axis reads
//! its steppers, an endstop reads its axis, never the other way around.

use crate::clock::ClockSnapshot;
use crate::commands::Command;
use crate::completion::Completion;
use crate::context::ObjectContext;
use crate::events::EventNotice;
use hwsim_common::object::{CommandReject, ObjectError, ObjectKind, ObjectStatus};

/// Factory building an object from its name and options table.
pub type ObjectFactory = fn(&str, &toml::Table) -> Result<Box<dyn SimObject>, ObjectError>;

/// Capability table of a simulated object.
pub trait SimObject: Send {
    /// Object kind.
    fn kind(&self) -> ObjectKind;

    /// Resolve dependencies and set up timers/subscriptions.
    fn init(&mut self, _ctx: &ObjectContext<'_>) -> Result<(), ObjectError> {
        Ok(())
    }

    /// Return to the power-on state.
    fn reset(&mut self, _ctx: &ObjectContext<'_>) -> Result<(), ObjectError> {
        Ok(())
    }

    /// Accept or refuse a command. Accepted commands must eventually be
    /// completed through `ctx.complete`.
    fn exec_command(
        &mut self,
        _command: &Command,
        _ctx: &ObjectContext<'_>,
    ) -> Result<(), CommandReject> {
        Err(CommandReject::Unsupported)
    }

    /// Fixed-layout snapshot of the current state.
    fn status(&self) -> ObjectStatus;

    /// Advance physical state to `now`.
    fn update(&mut self, _now: ClockSnapshot, _ctx: &ObjectContext<'_>) {}

    /// Event delivered to an internal subscription.
    fn on_event(&mut self, _event: &EventNotice<'_>, _ctx: &ObjectContext<'_>) {}

    /// Completion of a command this object submitted.
    fn on_command_complete(&mut self, _completion: &Completion, _ctx: &ObjectContext<'_>) {}

    /// Release resources. The object is already unreachable.
    fn destroy(&mut self, _ctx: &ObjectContext<'_>) {}
}

/// Read a typed option, falling back to `default` when absent.
///
/// # Errors
/// `ObjectError::InvalidConfig` when the key exists with another type.
pub fn option<T: serde::de::DeserializeOwned>(
    options: &toml::Table,
    key: &str,
    default: T,
) -> Result<T, ObjectError> {
    match options.get(key) {
        None => Ok(default),
        Some(value) => value
            .clone()
            .try_into()
            .map_err(|e| ObjectError::InvalidConfig(format!("option '{key}': {e}"))),
    }
}

/// Read a required typed option.
pub fn required<T: serde::de::DeserializeOwned>(
    options: &toml::Table,
    key: &str,
) -> Result<T, ObjectError> {
    options
        .get(key)
        .ok_or_else(|| ObjectError::InvalidConfig(format!("missing option '{key}'")))?
        .clone()
        .try_into()
        .map_err(|e| ObjectError::InvalidConfig(format!("option '{key}': {e}")))
}
