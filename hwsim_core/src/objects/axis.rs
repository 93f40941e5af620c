//! Linear axis driven by one or more steppers.
//!
//! Position is derived from the first motor's step count. `MoveTo` and
//! `Home` enable the motors and queue one `Move` per motor; the axis
//! command completes once every motor move has completed.
//!
//! # Options
//!
//! - `motors` (required): stepper names
//! - `type`: `x`, `y`, `z` or `e` (default `x`)
//! - `mm_per_rotation`: travel per motor rotation (default 40.0)
//! - `length`: travel length in mm (default 200.0)

use crate::clock::ClockSnapshot;
use crate::commands::{Command, CompletionHandler};
use crate::completion::Completion;
use crate::context::ObjectContext;
use crate::object::{SimObject, option, required};
use hwsim_common::consts::RESULT_OK;
use hwsim_common::object::{
    AxisCommand, AxisStatus, AxisType, CommandArgs, CommandId, CommandReject, Direction,
    EventData, ObjectError, ObjectId, ObjectKind, ObjectStatus, ResultPayload, StepperCommand,
};
use std::collections::HashSet;

const POSITION_EPSILON: f64 = 1e-9;

#[derive(Debug)]
struct AxisMove {
    command: CommandId,
    target: f64,
    homing: bool,
    outstanding: HashSet<CommandId>,
    failure: Option<i32>,
}

/// Axis object.
#[derive(Debug)]
pub struct Axis {
    axis_type: AxisType,
    motor_names: Vec<String>,
    motors: Vec<ObjectId>,
    steps_per_revolution: u64,
    mm_per_rotation: f64,
    length: f64,
    origin_steps: i64,
    position: f64,
    homed: bool,
    active: Option<AxisMove>,
}

impl Axis {
    fn motor_steps(&self, ctx: &ObjectContext<'_>) -> Option<i64> {
        let motor = *self.motors.first()?;
        ctx.status_of(motor)?.as_stepper().map(|s| s.steps)
    }

    fn steps_to_mm(&self, steps: i64) -> f64 {
        (steps - self.origin_steps) as f64 / self.steps_per_revolution as f64
            * self.mm_per_rotation
    }

    fn refresh_position(&mut self, ctx: &ObjectContext<'_>) {
        if let Some(steps) = self.motor_steps(ctx) {
            self.position = self.steps_to_mm(steps);
        }
    }

    fn start(
        &mut self,
        command: CommandId,
        target: f64,
        homing: bool,
        ctx: &ObjectContext<'_>,
    ) -> Result<(), CommandReject> {
        if self.active.is_some() {
            return Err(CommandReject::Busy);
        }
        self.refresh_position(ctx);

        let delta = target - self.position;
        let steps = (delta.abs() / self.mm_per_rotation * self.steps_per_revolution as f64).round()
            as u64;
        if steps == 0 {
            self.finish(command, target, homing, RESULT_OK, ctx);
            return Ok(());
        }
        let direction = if delta >= 0.0 {
            Direction::Forward
        } else {
            Direction::Backward
        };

        let mut outstanding = HashSet::with_capacity(self.motors.len());
        for &motor in &self.motors {
            let handler = CompletionHandler::Object(ctx.id());
            let queued = ctx
                .submit_command(
                    motor,
                    CommandArgs::Stepper(StepperCommand::Enable { enable: true }),
                    handler.clone(),
                )
                .and_then(|_| {
                    ctx.submit_command(
                        motor,
                        CommandArgs::Stepper(StepperCommand::Move { steps, direction }),
                        handler,
                    )
                });
            match queued {
                Ok(id) => {
                    outstanding.insert(id);
                }
                Err(e) => return Err(CommandReject::NotReady(format!("motor {motor}: {e}"))),
            }
        }

        ctx.logger().debug(format_args!(
            "{} {:.3} -> {target:.3} mm ({steps} steps {direction:?})",
            if homing { "home" } else { "move" },
            self.position
        ));
        self.active = Some(AxisMove {
            command,
            target,
            homing,
            outstanding,
            failure: None,
        });
        Ok(())
    }

    fn finish(
        &mut self,
        command: CommandId,
        target: f64,
        homing: bool,
        result: i32,
        ctx: &ObjectContext<'_>,
    ) {
        if homing && result == RESULT_OK {
            if let Some(steps) = self.motor_steps(ctx) {
                self.origin_steps = steps;
            }
            self.position = 0.0;
            self.homed = true;
            if let Err(e) = ctx.emit(EventData::AxisHomed { position: 0.0 }) {
                ctx.logger().warn(format_args!("dropping homed event: {e}"));
            }
        } else {
            self.refresh_position(ctx);
        }
        let payload = if result == RESULT_OK { target } else { self.position };
        ctx.complete(command, result, Some(ResultPayload::Position(payload)));
    }
}

/// Factory for [`ObjectKind::Axis`].
pub fn create_object(
    _name: &str,
    options: &toml::Table,
) -> Result<Box<dyn SimObject>, ObjectError> {
    let motor_names: Vec<String> = required(options, "motors")?;
    if motor_names.is_empty() {
        return Err(ObjectError::InvalidConfig("axis needs at least one motor".to_string()));
    }
    let mm_per_rotation: f64 = option(options, "mm_per_rotation", 40.0)?;
    let length: f64 = option(options, "length", 200.0)?;
    if mm_per_rotation <= 0.0 || length <= 0.0 {
        return Err(ObjectError::InvalidConfig(
            "mm_per_rotation and length must be positive".to_string(),
        ));
    }
    Ok(Box::new(Axis {
        axis_type: option(options, "type", AxisType::X)?,
        motor_names,
        motors: Vec::new(),
        steps_per_revolution: 1,
        mm_per_rotation,
        length,
        origin_steps: 0,
        position: 0.0,
        homed: false,
        active: None,
    }))
}

impl SimObject for Axis {
    fn kind(&self) -> ObjectKind {
        ObjectKind::Axis
    }

    fn init(&mut self, ctx: &ObjectContext<'_>) -> Result<(), ObjectError> {
        self.motors.clear();
        for name in &self.motor_names {
            let id = ctx
                .lookup(ObjectKind::Stepper, name)
                .ok_or_else(|| ObjectError::MissingDependency(format!("stepper '{name}'")))?;
            self.motors.push(id);
        }
        let first = ctx
            .status_of(self.motors[0])
            .and_then(|s| s.as_stepper().copied())
            .ok_or_else(|| ObjectError::MissingDependency(self.motor_names[0].clone()))?;
        self.steps_per_revolution = first.steps_per_revolution();
        self.refresh_position(ctx);
        Ok(())
    }

    fn reset(&mut self, _ctx: &ObjectContext<'_>) -> Result<(), ObjectError> {
        // Motor moves are cancelled by the motors' own reset.
        self.active = None;
        self.origin_steps = 0;
        self.position = 0.0;
        self.homed = false;
        Ok(())
    }

    fn exec_command(
        &mut self,
        command: &Command,
        ctx: &ObjectContext<'_>,
    ) -> Result<(), CommandReject> {
        match command.args {
            CommandArgs::Axis(AxisCommand::MoveTo { position }) => {
                if !(-POSITION_EPSILON..=self.length + POSITION_EPSILON).contains(&position) {
                    return Err(CommandReject::OutOfRange(format!(
                        "{position} mm outside 0..={}",
                        self.length
                    )));
                }
                self.start(command.id, position, false, ctx)
            }
            CommandArgs::Axis(AxisCommand::Home) => self.start(command.id, 0.0, true, ctx),
            _ => Err(CommandReject::Unsupported),
        }
    }

    fn status(&self) -> ObjectStatus {
        ObjectStatus::Axis(AxisStatus {
            axis_type: self.axis_type,
            position: self.position,
            length: self.length,
            homed: self.homed,
            moving: self.active.is_some(),
        })
    }

    fn update(&mut self, _now: ClockSnapshot, ctx: &ObjectContext<'_>) {
        self.refresh_position(ctx);
    }

    fn on_command_complete(&mut self, completion: &Completion, ctx: &ObjectContext<'_>) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        // Enable completions are not tracked.
        if !active.outstanding.remove(&completion.command_id) {
            return;
        }
        if completion.result != RESULT_OK {
            active.failure.get_or_insert(completion.result);
        }
        if !active.outstanding.is_empty() {
            return;
        }
        if let Some(done) = self.active.take() {
            let result = done.failure.unwrap_or(RESULT_OK);
            self.finish(done.command, done.target, done.homing, result, ctx);
        }
    }
}
