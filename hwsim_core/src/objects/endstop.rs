//! Limit switch watching an axis position.

use crate::clock::ClockSnapshot;
use crate::context::ObjectContext;
use crate::object::{SimObject, option, required};
use hwsim_common::object::{
    EndstopStatus, EndstopType, EventData, ObjectError, ObjectId, ObjectKind, ObjectStatus,
};

const TRIGGER_EPSILON: f64 = 1e-6;

/// Endstop object.
#[derive(Debug)]
pub struct Endstop {
    endstop_type: EndstopType,
    axis_name: String,
    axis: Option<ObjectId>,
    triggered: bool,
}

/// Factory for [`ObjectKind::Endstop`].
///
/// Options: `axis` (required), `type` (`min` or `max`, default `min`).
pub fn create_object(
    _name: &str,
    options: &toml::Table,
) -> Result<Box<dyn SimObject>, ObjectError> {
    Ok(Box::new(Endstop {
        endstop_type: option(options, "type", EndstopType::Min)?,
        axis_name: required(options, "axis")?,
        axis: None,
        triggered: false,
    }))
}

impl Endstop {
    fn is_triggered(&self, position: f64, length: f64) -> bool {
        match self.endstop_type {
            EndstopType::Min => position <= TRIGGER_EPSILON,
            EndstopType::Max => position >= length - TRIGGER_EPSILON,
        }
    }
}

impl SimObject for Endstop {
    fn kind(&self) -> ObjectKind {
        ObjectKind::Endstop
    }

    fn init(&mut self, ctx: &ObjectContext<'_>) -> Result<(), ObjectError> {
        let axis = ctx
            .lookup(ObjectKind::Axis, &self.axis_name)
            .ok_or_else(|| ObjectError::MissingDependency(format!("axis '{}'", self.axis_name)))?;
        self.axis = Some(axis);
        Ok(())
    }

    fn reset(&mut self, _ctx: &ObjectContext<'_>) -> Result<(), ObjectError> {
        self.triggered = false;
        Ok(())
    }

    fn status(&self) -> ObjectStatus {
        ObjectStatus::Endstop(EndstopStatus {
            endstop_type: self.endstop_type,
            triggered: self.triggered,
        })
    }

    fn update(&mut self, _now: ClockSnapshot, ctx: &ObjectContext<'_>) {
        let Some(axis) = self.axis.and_then(|id| ctx.status_of(id)) else {
            return;
        };
        let Some(axis) = axis.as_axis() else {
            return;
        };
        let triggered = self.is_triggered(axis.position, axis.length);
        if triggered == self.triggered {
            return;
        }
        self.triggered = triggered;
        ctx.logger().debug(format_args!(
            "{} at {:.3} mm",
            if triggered { "triggered" } else { "released" },
            axis.position
        ));
        if let Err(e) = ctx.emit(EventData::EndstopTriggered { triggered }) {
            ctx.logger().warn(format_args!("dropping endstop event: {e}"));
        }
    }
}
