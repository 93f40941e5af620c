//! Per-kind status snapshots.
//!
//! Every snapshot is a fixed-layout `Copy` struct so the state snapshot API
//! can hand them across threads (and to binding layers) without borrowing
//! object internals.

use super::kind::ObjectKind;
use crate::consts::MAX_TOOLHEAD_AXES;
use serde::{Deserialize, Serialize};
use static_assertions::assert_impl_all;

/// Cartesian/extruder axis designation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AxisType {
    /// X axis.
    #[default]
    X,
    /// Y axis.
    Y,
    /// Z axis.
    Z,
    /// Extruder.
    E,
}

impl AxisType {
    /// Slot of this axis in a toolhead position vector.
    pub fn slot(self) -> usize {
        match self {
            AxisType::X => 0,
            AxisType::Y => 1,
            AxisType::Z => 2,
            AxisType::E => 3,
        }
    }
}

/// Which end of an axis an endstop sits at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EndstopType {
    /// Triggers at or below zero.
    #[default]
    Min,
    /// Triggers at or beyond the axis length.
    Max,
}

/// Stepper snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct StepperStatus {
    /// Motor energized.
    pub enabled: bool,
    /// Signed step position.
    pub steps: i64,
    /// Full steps per rotation.
    pub steps_per_rotation: u32,
    /// Microsteps per full step.
    pub microsteps: u32,
    /// A move is in progress.
    pub moving: bool,
}

impl StepperStatus {
    /// Microsteps per full rotation.
    pub fn steps_per_revolution(&self) -> u64 {
        u64::from(self.steps_per_rotation) * u64::from(self.microsteps.max(1))
    }
}

/// Axis snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct AxisStatus {
    /// Axis designation.
    pub axis_type: AxisType,
    /// Position in millimetres.
    pub position: f64,
    /// Travel length in millimetres.
    pub length: f64,
    /// Axis has been homed since the last reset.
    pub homed: bool,
    /// A move is in progress.
    pub moving: bool,
}

/// Endstop snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct EndstopStatus {
    /// Endstop position.
    pub endstop_type: EndstopType,
    /// Current trigger state.
    pub triggered: bool,
}

/// Heater snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct HeaterStatus {
    /// Current temperature (°C).
    pub temperature: f64,
    /// Target temperature (°C), 0 when off.
    pub target: f64,
    /// Applied duty cycle (0.0 ..= 1.0).
    pub duty: f64,
    /// Maximum accepted target (°C).
    pub max_temperature: f64,
}

/// Thermistor snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ThermistorStatus {
    /// Sensed temperature (°C).
    pub temperature: f64,
    /// Thermistor resistance (Ω).
    pub resistance: f64,
    /// Raw ADC reading.
    pub adc: u16,
}

/// Probe snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ProbeStatus {
    /// Probe deployed.
    pub deployed: bool,
    /// Probe triggered.
    pub triggered: bool,
    /// Position of the probed axis (mm).
    pub position: f64,
}

/// PWM snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct PwmStatus {
    /// Duty cycle.
    pub duty: f64,
    /// Accumulated on-time (ns).
    pub on_time_ns: u64,
    /// Accumulated total time (ns).
    pub total_time_ns: u64,
}

/// Toolhead snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ToolheadStatus {
    /// X, Y, Z, E positions (mm); unused slots stay zero.
    pub position: [f64; MAX_TOOLHEAD_AXES],
    /// Number of attached axes.
    pub axis_count: u8,
}

/// Type-indexed status snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ObjectStatus {
    /// Stepper snapshot.
    Stepper(StepperStatus),
    /// Axis snapshot.
    Axis(AxisStatus),
    /// Endstop snapshot.
    Endstop(EndstopStatus),
    /// Heater snapshot.
    Heater(HeaterStatus),
    /// Thermistor snapshot.
    Thermistor(ThermistorStatus),
    /// Probe snapshot.
    Probe(ProbeStatus),
    /// PWM snapshot.
    Pwm(PwmStatus),
    /// Toolhead snapshot.
    Toolhead(ToolheadStatus),
}

assert_impl_all!(ObjectStatus: Send, Sync, Copy);

impl ObjectStatus {
    /// Kind of object that produced this snapshot.
    pub fn kind(&self) -> ObjectKind {
        match self {
            ObjectStatus::Stepper(_) => ObjectKind::Stepper,
            ObjectStatus::Axis(_) => ObjectKind::Axis,
            ObjectStatus::Endstop(_) => ObjectKind::Endstop,
            ObjectStatus::Heater(_) => ObjectKind::Heater,
            ObjectStatus::Thermistor(_) => ObjectKind::Thermistor,
            ObjectStatus::Probe(_) => ObjectKind::Probe,
            ObjectStatus::Pwm(_) => ObjectKind::Pwm,
            ObjectStatus::Toolhead(_) => ObjectKind::Toolhead,
        }
    }

    /// Stepper snapshot, if this is one.
    pub fn as_stepper(&self) -> Option<&StepperStatus> {
        match self {
            ObjectStatus::Stepper(s) => Some(s),
            _ => None,
        }
    }

    /// Axis snapshot, if this is one.
    pub fn as_axis(&self) -> Option<&AxisStatus> {
        match self {
            ObjectStatus::Axis(s) => Some(s),
            _ => None,
        }
    }

    /// Heater snapshot, if this is one.
    pub fn as_heater(&self) -> Option<&HeaterStatus> {
        match self {
            ObjectStatus::Heater(s) => Some(s),
            _ => None,
        }
    }
}
