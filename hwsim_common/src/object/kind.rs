//! Object kinds and identities.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of simulated object kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    /// Stepper motor.
    Stepper,
    /// Linear axis driven by one or more steppers.
    Axis,
    /// Limit switch attached to an axis.
    Endstop,
    /// Heater with closed-loop temperature control.
    Heater,
    /// Temperature sensor reading a heater.
    Thermistor,
    /// Bed probe attached to an axis.
    Probe,
    /// PWM output.
    Pwm,
    /// Toolhead aggregating axis positions.
    Toolhead,
}

impl ObjectKind {
    /// Number of kinds.
    pub const COUNT: usize = 8;

    /// All kinds, in declaration order.
    pub const ALL: [ObjectKind; Self::COUNT] = [
        ObjectKind::Stepper,
        ObjectKind::Axis,
        ObjectKind::Endstop,
        ObjectKind::Heater,
        ObjectKind::Thermistor,
        ObjectKind::Probe,
        ObjectKind::Pwm,
        ObjectKind::Toolhead,
    ];

    /// Dense index, usable for per-kind arrays.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Canonical lowercase name (also the factory key).
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::Stepper => "stepper",
            ObjectKind::Axis => "axis",
            ObjectKind::Endstop => "endstop",
            ObjectKind::Heater => "heater",
            ObjectKind::Thermistor => "thermistor",
            ObjectKind::Probe => "probe",
            ObjectKind::Pwm => "pwm",
            ObjectKind::Toolhead => "toolhead",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ObjectKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| s.to_string())
    }
}

/// Stable opaque object handle.
///
/// Assigned by the registry from a monotonic counter, so a handle is
/// never reused within one simulation instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(u64);

impl ObjectId {
    /// Wrap a raw handle value.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw handle value.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_indices_are_dense() {
        for (idx, kind) in ObjectKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), idx);
        }
    }

    #[test]
    fn kind_round_trips_through_name() {
        for kind in ObjectKind::ALL {
            assert_eq!(kind.as_str().parse::<ObjectKind>(), Ok(kind));
        }
        assert_eq!("PWM".parse::<ObjectKind>(), Ok(ObjectKind::Pwm));
        assert!("spindle".parse::<ObjectKind>().is_err());
    }

    #[test]
    fn object_id_display() {
        assert_eq!(ObjectId::from_raw(7).to_string(), "#7");
    }
}
