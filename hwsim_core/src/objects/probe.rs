//! Bed probe: triggers when its axis reaches the trigger height while
//! deployed.

use crate::clock::ClockSnapshot;
use crate::commands::Command;
use crate::context::ObjectContext;
use crate::object::{SimObject, option, required};
use hwsim_common::consts::RESULT_OK;
use hwsim_common::object::{
    CommandArgs, CommandReject, EventData, ObjectError, ObjectId, ObjectKind, ObjectStatus,
    ProbeCommand, ProbeStatus,
};

/// Probe object.
#[derive(Debug)]
pub struct Probe {
    axis_name: String,
    axis: Option<ObjectId>,
    trigger_position: f64,
    deployed: bool,
    triggered: bool,
    position: f64,
}

/// Factory for [`ObjectKind::Probe`].
///
/// Options: `axis` (required), `trigger_position` in mm (default 0.0).
pub fn create_object(
    _name: &str,
    options: &toml::Table,
) -> Result<Box<dyn SimObject>, ObjectError> {
    Ok(Box::new(Probe {
        axis_name: required(options, "axis")?,
        axis: None,
        trigger_position: option(options, "trigger_position", 0.0)?,
        deployed: false,
        triggered: false,
        position: 0.0,
    }))
}

impl SimObject for Probe {
    fn kind(&self) -> ObjectKind {
        ObjectKind::Probe
    }

    fn init(&mut self, ctx: &ObjectContext<'_>) -> Result<(), ObjectError> {
        self.axis = Some(
            ctx.lookup(ObjectKind::Axis, &self.axis_name)
                .ok_or_else(|| ObjectError::MissingDependency(format!("axis '{}'", self.axis_name)))?,
        );
        Ok(())
    }

    fn reset(&mut self, _ctx: &ObjectContext<'_>) -> Result<(), ObjectError> {
        self.deployed = false;
        self.triggered = false;
        Ok(())
    }

    fn exec_command(
        &mut self,
        command: &Command,
        ctx: &ObjectContext<'_>,
    ) -> Result<(), CommandReject> {
        let CommandArgs::Probe(sub) = command.args else {
            return Err(CommandReject::Unsupported);
        };
        match sub {
            ProbeCommand::Deploy => self.deployed = true,
            ProbeCommand::Stow => {
                self.deployed = false;
                self.triggered = false;
            }
        }
        ctx.complete(command.id, RESULT_OK, None);
        Ok(())
    }

    fn status(&self) -> ObjectStatus {
        ObjectStatus::Probe(ProbeStatus {
            deployed: self.deployed,
            triggered: self.triggered,
            position: self.position,
        })
    }

    fn update(&mut self, _now: ClockSnapshot, ctx: &ObjectContext<'_>) {
        let Some(position) = self
            .axis
            .and_then(|id| ctx.status_of(id))
            .and_then(|s| s.as_axis().map(|a| a.position))
        else {
            return;
        };
        self.position = position;

        let at_trigger = position <= self.trigger_position;
        if !self.deployed || at_trigger == self.triggered {
            return;
        }
        self.triggered = at_trigger;
        if at_trigger {
            ctx.logger().info(format_args!("triggered at {position:.3} mm"));
            if let Err(e) = ctx.emit(EventData::ProbeTriggered { position }) {
                ctx.logger().warn(format_args!("dropping probe event: {e}"));
            }
        }
    }
}
