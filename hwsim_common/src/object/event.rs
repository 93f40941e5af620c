//! Event kinds and payloads.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of event kinds emitted by simulated objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// A stepper finished a move.
    StepperMoveComplete,
    /// An axis reached its home position.
    AxisHomed,
    /// An endstop changed trigger state.
    EndstopTriggered,
    /// A heater reached its target temperature.
    HeaterTempReached,
    /// A deployed probe triggered.
    ProbeTriggered,
    /// Every toolhead axis reached the origin.
    ToolheadOrigin,
}

impl EventKind {
    /// Number of kinds; sizes the subscription bucket array.
    pub const COUNT: usize = 6;

    /// Dense index into per-kind arrays.
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Event payload. The variant determines the [`EventKind`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum EventData {
    /// Steps travelled by the completed move.
    StepperMoveComplete {
        /// Step count of the move.
        steps: u64,
    },
    /// Axis homed.
    AxisHomed {
        /// Position after homing (mm).
        position: f64,
    },
    /// Endstop state change.
    EndstopTriggered {
        /// New trigger state.
        triggered: bool,
    },
    /// Heater at temperature.
    HeaterTempReached {
        /// Measured temperature.
        temperature: f64,
    },
    /// Probe triggered.
    ProbeTriggered {
        /// Axis position at trigger (mm).
        position: f64,
    },
    /// Toolhead at origin.
    ToolheadOrigin,
}

impl EventData {
    /// Kind of this payload.
    pub fn kind(&self) -> EventKind {
        match self {
            EventData::StepperMoveComplete { .. } => EventKind::StepperMoveComplete,
            EventData::AxisHomed { .. } => EventKind::AxisHomed,
            EventData::EndstopTriggered { .. } => EventKind::EndstopTriggered,
            EventData::HeaterTempReached { .. } => EventKind::HeaterTempReached,
            EventData::ProbeTriggered { .. } => EventKind::ProbeTriggered,
            EventData::ToolheadOrigin => EventKind::ToolheadOrigin,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_kind_matches_index_range() {
        let samples = [
            EventData::StepperMoveComplete { steps: 1 },
            EventData::AxisHomed { position: 0.0 },
            EventData::EndstopTriggered { triggered: true },
            EventData::HeaterTempReached { temperature: 200.0 },
            EventData::ProbeTriggered { position: 0.5 },
            EventData::ToolheadOrigin,
        ];
        let mut seen = [false; EventKind::COUNT];
        for data in samples {
            seen[data.kind().index()] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }
}
