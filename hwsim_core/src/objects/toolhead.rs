//! Toolhead aggregating the positions of up to four axes.
//!
//! Emits `ToolheadOrigin` each time every attached axis arrives at zero,
//! and keeps count of the `AxisHomed` events of its axes.

use crate::clock::ClockSnapshot;
use crate::context::ObjectContext;
use crate::events::{EventNotice, SubscriptionId};
use crate::object::{SimObject, required};
use hwsim_common::consts::MAX_TOOLHEAD_AXES;
use hwsim_common::object::{
    EventData, EventKind, ObjectError, ObjectId, ObjectKind, ObjectStatus, ToolheadStatus,
};

const ORIGIN_EPSILON: f64 = 1e-6;

/// Toolhead object.
#[derive(Debug)]
pub struct Toolhead {
    axis_names: Vec<String>,
    axes: Vec<(ObjectId, usize)>,
    subscription: Option<SubscriptionId>,
    position: [f64; MAX_TOOLHEAD_AXES],
    at_origin: bool,
    homed_events: u64,
}

/// Factory for [`ObjectKind::Toolhead`]. Option: `axes` (required).
pub fn create_object(
    _name: &str,
    options: &toml::Table,
) -> Result<Box<dyn SimObject>, ObjectError> {
    let axis_names: Vec<String> = required(options, "axes")?;
    if axis_names.is_empty() || axis_names.len() > MAX_TOOLHEAD_AXES {
        return Err(ObjectError::InvalidConfig(format!(
            "toolhead needs 1..={MAX_TOOLHEAD_AXES} axes, got {}",
            axis_names.len()
        )));
    }
    Ok(Box::new(Toolhead {
        axis_names,
        axes: Vec::new(),
        subscription: None,
        position: [0.0; MAX_TOOLHEAD_AXES],
        at_origin: false,
        homed_events: 0,
    }))
}

impl Toolhead {
    /// `AxisHomed` events seen since the last reset.
    pub fn homed_events(&self) -> u64 {
        self.homed_events
    }
}

impl SimObject for Toolhead {
    fn kind(&self) -> ObjectKind {
        ObjectKind::Toolhead
    }

    fn init(&mut self, ctx: &ObjectContext<'_>) -> Result<(), ObjectError> {
        self.axes.clear();
        for name in &self.axis_names {
            let id = ctx
                .lookup(ObjectKind::Axis, name)
                .ok_or_else(|| ObjectError::MissingDependency(format!("axis '{name}'")))?;
            let slot = ctx
                .status_of(id)
                .and_then(|s| s.as_axis().map(|a| a.axis_type.slot()))
                .ok_or_else(|| ObjectError::MissingDependency(format!("axis '{name}'")))?;
            if self.axes.iter().any(|&(_, s)| s == slot) {
                return Err(ObjectError::InvalidConfig(format!(
                    "axis '{name}' duplicates slot {slot}"
                )));
            }
            self.axes.push((id, slot));
        }
        if let Some(old) = self.subscription.take() {
            // Re-init: drop the previous subscription first.
            let _ = ctx.unsubscribe(EventKind::AxisHomed, old);
        }
        self.subscription = Some(ctx.subscribe(EventKind::AxisHomed, ObjectKind::Axis, None));
        Ok(())
    }

    fn reset(&mut self, _ctx: &ObjectContext<'_>) -> Result<(), ObjectError> {
        self.position = [0.0; MAX_TOOLHEAD_AXES];
        self.at_origin = false;
        self.homed_events = 0;
        Ok(())
    }

    fn status(&self) -> ObjectStatus {
        ObjectStatus::Toolhead(ToolheadStatus {
            position: self.position,
            axis_count: self.axes.len() as u8,
        })
    }

    fn update(&mut self, _now: ClockSnapshot, ctx: &ObjectContext<'_>) {
        for &(id, slot) in &self.axes {
            if let Some(axis) = ctx.status_of(id).and_then(|s| s.as_axis().copied()) {
                self.position[slot] = axis.position;
            }
        }
        let at_origin = self
            .axes
            .iter()
            .all(|&(_, slot)| self.position[slot].abs() <= ORIGIN_EPSILON);
        if at_origin && !self.at_origin {
            if let Err(e) = ctx.emit(EventData::ToolheadOrigin) {
                ctx.logger().warn(format_args!("dropping origin event: {e}"));
            }
        }
        self.at_origin = at_origin;
    }

    fn on_event(&mut self, event: &EventNotice<'_>, ctx: &ObjectContext<'_>) {
        if !self.axes.iter().any(|&(id, _)| id == event.source_id) {
            return;
        }
        self.homed_events += 1;
        ctx.logger()
            .debug(format_args!("axis {} homed", event.source_name));
    }
}
