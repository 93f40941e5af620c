//! Prelude module for common re-exports.
//!
//! ```rust
//! use hwsim_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, LogLevel, SharedConfig};
pub use crate::machine::{LogRule, MachineConfig, ObjectConfig, TimingConfig};

// ─── Result codes ───────────────────────────────────────────────────
pub use crate::consts::{RESULT_CANCELLED, RESULT_OK, RESULT_TARGET_DESTROYED};

// ─── Object model ───────────────────────────────────────────────────
pub use crate::object::{
    AxisCommand, CommandArgs, CommandId, CommandReject, Direction, EventData, EventKind,
    HeaterCommand, ObjectError, ObjectId, ObjectKind, ObjectStatus, ProbeCommand, PwmCommand,
    ResultPayload, StepperCommand,
};
