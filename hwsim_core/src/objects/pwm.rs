//! PWM output accumulating on-time at its duty cycle.

use crate::clock::ClockSnapshot;
use crate::commands::Command;
use crate::context::ObjectContext;
use crate::object::{SimObject, option};
use hwsim_common::consts::RESULT_OK;
use hwsim_common::object::{
    CommandArgs, CommandReject, ObjectError, ObjectKind, ObjectStatus, PwmCommand, PwmStatus,
};

/// PWM object.
#[derive(Debug, Default)]
pub struct Pwm {
    initial_duty: f64,
    duty: f64,
    on_time_ns: f64,
    total_time_ns: u64,
    last_ns: Option<u64>,
}

fn check_duty(duty: f64) -> bool {
    (0.0..=1.0).contains(&duty)
}

/// Factory for [`ObjectKind::Pwm`]. Option: `duty` (default 0.0).
pub fn create_object(
    _name: &str,
    options: &toml::Table,
) -> Result<Box<dyn SimObject>, ObjectError> {
    let duty: f64 = option(options, "duty", 0.0)?;
    if !check_duty(duty) {
        return Err(ObjectError::InvalidConfig(format!("duty {duty} outside 0..=1")));
    }
    Ok(Box::new(Pwm {
        initial_duty: duty,
        duty,
        ..Pwm::default()
    }))
}

impl SimObject for Pwm {
    fn kind(&self) -> ObjectKind {
        ObjectKind::Pwm
    }

    fn reset(&mut self, _ctx: &ObjectContext<'_>) -> Result<(), ObjectError> {
        self.duty = self.initial_duty;
        self.on_time_ns = 0.0;
        self.total_time_ns = 0;
        self.last_ns = None;
        Ok(())
    }

    fn exec_command(
        &mut self,
        command: &Command,
        ctx: &ObjectContext<'_>,
    ) -> Result<(), CommandReject> {
        let CommandArgs::Pwm(PwmCommand::SetDuty { duty }) = command.args else {
            return Err(CommandReject::Unsupported);
        };
        if !check_duty(duty) {
            return Err(CommandReject::OutOfRange(format!("duty {duty}")));
        }
        self.duty = duty;
        ctx.complete(command.id, RESULT_OK, None);
        Ok(())
    }

    fn status(&self) -> ObjectStatus {
        ObjectStatus::Pwm(PwmStatus {
            duty: self.duty,
            on_time_ns: self.on_time_ns as u64,
            total_time_ns: self.total_time_ns,
        })
    }

    fn update(&mut self, now: ClockSnapshot, _ctx: &ObjectContext<'_>) {
        let last = self.last_ns.replace(now.runtime_ns).unwrap_or(now.runtime_ns);
        let dt = now.runtime_ns.saturating_sub(last);
        self.total_time_ns += dt;
        self.on_time_ns += dt as f64 * self.duty;
    }
}
