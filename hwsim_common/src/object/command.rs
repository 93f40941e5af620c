//! Command identities and typed command arguments.

use super::kind::ObjectKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a submitted command.
///
/// Valid identifiers never have [`CommandId::ERROR_FLAG`] set. The flag is
/// reserved for the raw integer surface offered to binding layers, where a
/// failed submission is reported in-band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommandId(u64);

impl CommandId {
    /// High bit marking an error sentinel.
    pub const ERROR_FLAG: u64 = 1 << 63;

    /// Wrap a raw identifier.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Build an error sentinel carrying `code` in the low bits.
    pub const fn error(code: u32) -> Self {
        Self(Self::ERROR_FLAG | code as u64)
    }

    /// Raw identifier.
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// True when this value is an error sentinel, not a real command.
    pub const fn is_error(self) -> bool {
        self.0 & Self::ERROR_FLAG != 0
    }

    /// Error code carried by a sentinel (0 for valid identifiers).
    pub const fn error_code(self) -> u32 {
        if self.is_error() {
            (self.0 & !Self::ERROR_FLAG) as u32
        } else {
            0
        }
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_error() {
            write!(f, "cmd!err{}", self.error_code())
        } else {
            write!(f, "cmd{}", self.0)
        }
    }
}

/// Stepper rotation direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Increasing step count.
    Forward,
    /// Decreasing step count.
    Backward,
}

impl Direction {
    /// +1 for forward, -1 for backward.
    pub fn sign(self) -> i64 {
        match self {
            Direction::Forward => 1,
            Direction::Backward => -1,
        }
    }
}

/// Stepper sub-commands.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum StepperCommand {
    /// Energize or release the motor.
    Enable {
        /// Desired enable state.
        enable: bool,
    },
    /// Move a number of (micro)steps.
    Move {
        /// Step count.
        steps: u64,
        /// Direction of travel.
        direction: Direction,
    },
    /// Change the step rate.
    SetSpeed {
        /// Steps per second.
        steps_per_second: f64,
    },
}

/// Axis sub-commands.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AxisCommand {
    /// Move to an absolute position in millimetres.
    MoveTo {
        /// Target position.
        position: f64,
    },
    /// Move to zero and mark the axis homed.
    Home,
}

/// Heater sub-commands.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum HeaterCommand {
    /// Set the target temperature (0 turns the heater off).
    SetTemperature {
        /// Target in degrees Celsius.
        celsius: f64,
    },
}

/// Probe sub-commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeCommand {
    /// Lower the probe so it can trigger.
    Deploy,
    /// Retract the probe.
    Stow,
}

/// PWM sub-commands.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PwmCommand {
    /// Set the duty cycle (0.0 ..= 1.0).
    SetDuty {
        /// Duty cycle.
        duty: f64,
    },
}

/// Typed command payload, one variant per commandable object kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CommandArgs {
    /// Stepper command.
    Stepper(StepperCommand),
    /// Axis command.
    Axis(AxisCommand),
    /// Heater command.
    Heater(HeaterCommand),
    /// Probe command.
    Probe(ProbeCommand),
    /// PWM command.
    Pwm(PwmCommand),
}

impl CommandArgs {
    /// Object kind this command is meant for.
    pub fn target_kind(&self) -> ObjectKind {
        match self {
            CommandArgs::Stepper(_) => ObjectKind::Stepper,
            CommandArgs::Axis(_) => ObjectKind::Axis,
            CommandArgs::Heater(_) => ObjectKind::Heater,
            CommandArgs::Probe(_) => ObjectKind::Probe,
            CommandArgs::Pwm(_) => ObjectKind::Pwm,
        }
    }

    /// Numeric sub-command id within the target kind.
    pub fn sub_command(&self) -> u16 {
        match self {
            CommandArgs::Stepper(StepperCommand::Enable { .. }) => 0,
            CommandArgs::Stepper(StepperCommand::Move { .. }) => 1,
            CommandArgs::Stepper(StepperCommand::SetSpeed { .. }) => 2,
            CommandArgs::Axis(AxisCommand::MoveTo { .. }) => 0,
            CommandArgs::Axis(AxisCommand::Home) => 1,
            CommandArgs::Heater(HeaterCommand::SetTemperature { .. }) => 0,
            CommandArgs::Probe(ProbeCommand::Deploy) => 0,
            CommandArgs::Probe(ProbeCommand::Stow) => 1,
            CommandArgs::Pwm(PwmCommand::SetDuty { .. }) => 0,
        }
    }
}

/// Optional data attached to a completion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ResultPayload {
    /// Steps travelled.
    Steps(u64),
    /// Final position in millimetres.
    Position(f64),
    /// Temperature in degrees Celsius.
    Temperature(f64),
}
