//! Stepper motor model.
//!
//! Steps at a constant rate (default: one rotation per second) while a
//! move is active. The move completes with the number of steps travelled
//! and a `StepperMoveComplete` event.
//!
//! # Options
//!
//! | key                  | default                      |
//! |----------------------|------------------------------|
//! | `steps_per_rotation` | 200                          |
//! | `microsteps`         | 1                            |
//! | `steps_per_second`   | `steps_per_rotation * microsteps` |

use crate::clock::ClockSnapshot;
use crate::commands::Command;
use crate::context::ObjectContext;
use crate::object::{SimObject, option};
use hwsim_common::consts::{RESULT_CANCELLED, RESULT_OK};
use hwsim_common::object::{
    CommandArgs, CommandId, CommandReject, Direction, EventData, ObjectError, ObjectKind,
    ObjectStatus, ResultPayload, StepperCommand, StepperStatus,
};

#[derive(Debug, Clone, Copy)]
struct ActiveMove {
    command: CommandId,
    total: u64,
    remaining: u64,
    direction: Direction,
    /// Fractional steps carried between updates.
    carry: f64,
}

/// Stepper motor.
#[derive(Debug)]
pub struct Stepper {
    steps_per_rotation: u32,
    microsteps: u32,
    default_rate: f64,
    rate: f64,
    enabled: bool,
    steps: i64,
    active: Option<ActiveMove>,
    last_ns: Option<u64>,
}

impl Stepper {
    /// Motor with the given geometry stepping at `rate` steps/s.
    pub fn new(steps_per_rotation: u32, microsteps: u32, rate: f64) -> Result<Self, ObjectError> {
        if steps_per_rotation == 0 || microsteps == 0 {
            return Err(ObjectError::InvalidConfig(
                "steps_per_rotation and microsteps must be non-zero".to_string(),
            ));
        }
        if !(rate.is_finite() && rate > 0.0) {
            return Err(ObjectError::InvalidConfig(format!(
                "steps_per_second must be positive, got {rate}"
            )));
        }
        Ok(Self {
            steps_per_rotation,
            microsteps,
            default_rate: rate,
            rate,
            enabled: false,
            steps: 0,
            active: None,
            last_ns: None,
        })
    }

    fn cancel_move(&mut self, ctx: &ObjectContext<'_>) {
        if let Some(mv) = self.active.take() {
            let done = mv.total - mv.remaining;
            ctx.logger()
                .debug(format_args!("move {} cancelled after {done} steps", mv.command));
            ctx.complete(mv.command, RESULT_CANCELLED, Some(ResultPayload::Steps(done)));
        }
    }

    fn start_move(
        &mut self,
        command: CommandId,
        steps: u64,
        direction: Direction,
        ctx: &ObjectContext<'_>,
    ) -> Result<(), CommandReject> {
        if !self.enabled {
            return Err(CommandReject::NotReady("motor disabled".to_string()));
        }
        if self.active.is_some() {
            return Err(CommandReject::Busy);
        }
        if steps == 0 {
            ctx.complete(command, RESULT_OK, Some(ResultPayload::Steps(0)));
            return Ok(());
        }
        self.active = Some(ActiveMove {
            command,
            total: steps,
            remaining: steps,
            direction,
            carry: 0.0,
        });
        self.last_ns = Some(ctx.clock().runtime_ns);
        ctx.logger()
            .trace(format_args!("move {steps} {direction:?} at {} steps/s", self.rate));
        Ok(())
    }
}

/// Factory for [`ObjectKind::Stepper`].
pub fn create_object(
    _name: &str,
    options: &toml::Table,
) -> Result<Box<dyn SimObject>, ObjectError> {
    let steps_per_rotation: u32 = option(options, "steps_per_rotation", 200)?;
    let microsteps: u32 = option(options, "microsteps", 1)?;
    let default_rate = f64::from(steps_per_rotation) * f64::from(microsteps);
    let rate: f64 = option(options, "steps_per_second", default_rate)?;
    Ok(Box::new(Stepper::new(steps_per_rotation, microsteps, rate)?))
}

impl SimObject for Stepper {
    fn kind(&self) -> ObjectKind {
        ObjectKind::Stepper
    }

    fn reset(&mut self, ctx: &ObjectContext<'_>) -> Result<(), ObjectError> {
        self.cancel_move(ctx);
        self.enabled = false;
        self.steps = 0;
        self.rate = self.default_rate;
        self.last_ns = None;
        Ok(())
    }

    fn exec_command(
        &mut self,
        command: &Command,
        ctx: &ObjectContext<'_>,
    ) -> Result<(), CommandReject> {
        let CommandArgs::Stepper(sub) = command.args else {
            return Err(CommandReject::Unsupported);
        };
        match sub {
            StepperCommand::Enable { enable } => {
                if !enable {
                    self.cancel_move(ctx);
                }
                self.enabled = enable;
                ctx.complete(command.id, RESULT_OK, None);
                Ok(())
            }
            StepperCommand::Move { steps, direction } => {
                self.start_move(command.id, steps, direction, ctx)
            }
            StepperCommand::SetSpeed { steps_per_second } => {
                if !(steps_per_second.is_finite() && steps_per_second > 0.0) {
                    return Err(CommandReject::OutOfRange(format!(
                        "steps_per_second {steps_per_second}"
                    )));
                }
                self.rate = steps_per_second;
                ctx.complete(command.id, RESULT_OK, None);
                Ok(())
            }
        }
    }

    fn status(&self) -> ObjectStatus {
        ObjectStatus::Stepper(StepperStatus {
            enabled: self.enabled,
            steps: self.steps,
            steps_per_rotation: self.steps_per_rotation,
            microsteps: self.microsteps,
            moving: self.active.is_some(),
        })
    }

    fn update(&mut self, now: ClockSnapshot, ctx: &ObjectContext<'_>) {
        let last = self.last_ns.replace(now.runtime_ns).unwrap_or(now.runtime_ns);
        let Some(mv) = self.active.as_mut() else {
            return;
        };

        let dt = now.runtime_ns.saturating_sub(last) as f64 / 1e9;
        mv.carry += dt * self.rate;
        let whole = (mv.carry.floor() as u64).min(mv.remaining);
        mv.carry -= whole as f64;
        mv.remaining -= whole;
        self.steps += mv.direction.sign() * whole as i64;

        if mv.remaining > 0 {
            return;
        }
        let total = mv.total;
        let command = mv.command;
        self.active = None;
        ctx.complete(command, RESULT_OK, Some(ResultPayload::Steps(total)));
        if let Err(e) = ctx.emit(EventData::StepperMoveComplete { steps: total }) {
            ctx.logger()
                .warn(format_args!("dropping move-complete event: {e}"));
        }
    }
}
