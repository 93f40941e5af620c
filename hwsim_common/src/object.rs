//! Simulated object data model.
//!
//! Everything the core and an external binding layer need to agree on:
//! object kinds and identities, typed command arguments, event payloads,
//! per-kind status snapshots and the object-level error types.

pub mod command;
pub mod error;
pub mod event;
pub mod kind;
pub mod status;

pub use command::{
    AxisCommand, CommandArgs, CommandId, Direction, HeaterCommand, ProbeCommand, PwmCommand,
    ResultPayload, StepperCommand,
};
pub use error::{CommandReject, ObjectError};
pub use event::{EventData, EventKind};
pub use kind::{ObjectId, ObjectKind};
pub use status::{
    AxisStatus, AxisType, EndstopStatus, EndstopType, HeaterStatus, ObjectStatus, ProbeStatus,
    PwmStatus, StepperStatus, ThermistorStatus, ToolheadStatus,
};
