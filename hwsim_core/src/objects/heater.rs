//! Heater with a lumped thermal model and PID duty control.
//!
//! The temperature integrates on every update. The PID runs only when the
//! heater's timer has fired since the last update; the timer callback just
//! raises a flag, so it never needs the heater's lock.
//!
//! A `SetTemperature` command completes once the temperature is within
//! `tolerance` of the target, together with a `HeaterTempReached` event.
//! A newer target cancels the previous command.

use super::pid::{PidGains, PidState, pid_compute};
use crate::clock::ClockSnapshot;
use crate::commands::Command;
use crate::context::ObjectContext;
use crate::object::{SimObject, option};
use crate::timers::TimerHandle;
use hwsim_common::consts::{RESULT_CANCELLED, RESULT_OK};
use hwsim_common::object::{
    CommandArgs, CommandId, CommandReject, EventData, HeaterCommand, HeaterStatus, ObjectError,
    ObjectKind, ObjectStatus, ResultPayload,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Swappable heat transfer formula.
pub trait ThermalModel: Send + std::fmt::Debug {
    /// Temperature after `dt` seconds at `duty`, starting from `temperature`.
    fn advance(&self, temperature: f64, duty: f64, dt: f64) -> f64;

    /// Temperature with the heater off for a long time.
    fn ambient(&self) -> f64;
}

/// Single thermal mass losing heat linearly to ambient.
///
/// `C · dT/dt = duty · P − k · (T − T_amb)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LumpedThermalModel {
    /// Heater power at full duty [W].
    pub power: f64,
    /// Heat capacity [J/K].
    pub heat_capacity: f64,
    /// Loss coefficient [W/K].
    pub loss: f64,
    /// Ambient temperature [°C].
    pub ambient: f64,
}

impl Default for LumpedThermalModel {
    fn default() -> Self {
        Self {
            power: 40.0,
            heat_capacity: 12.0,
            loss: 0.12,
            ambient: 25.0,
        }
    }
}

impl ThermalModel for LumpedThermalModel {
    fn advance(&self, temperature: f64, duty: f64, dt: f64) -> f64 {
        let flow = duty * self.power - self.loss * (temperature - self.ambient);
        temperature + flow * dt / self.heat_capacity
    }

    fn ambient(&self) -> f64 {
        self.ambient
    }
}

/// Heater object.
#[derive(Debug)]
pub struct Heater {
    model: Box<dyn ThermalModel>,
    gains: PidGains,
    pid: PidState,
    max_temperature: f64,
    tolerance: f64,
    pid_interval_ms: u64,
    temperature: f64,
    target: f64,
    duty: f64,
    pending: Option<CommandId>,
    pid_due: Arc<AtomicBool>,
    timer: Option<TimerHandle>,
    last_ns: Option<u64>,
    last_pid_ns: Option<u64>,
}

impl Heater {
    /// Heater at ambient temperature with the given model and gains.
    pub fn new(model: Box<dyn ThermalModel>, gains: PidGains, max_temperature: f64) -> Self {
        let temperature = model.ambient();
        Self {
            model,
            gains,
            pid: PidState::default(),
            max_temperature,
            tolerance: 1.0,
            pid_interval_ms: 100,
            temperature,
            target: 0.0,
            duty: 0.0,
            pending: None,
            pid_due: Arc::new(AtomicBool::new(false)),
            timer: None,
            last_ns: None,
            last_pid_ns: None,
        }
    }

    fn cancel_pending(&mut self, ctx: &ObjectContext<'_>) {
        if let Some(id) = self.pending.take() {
            ctx.complete(id, RESULT_CANCELLED, Some(ResultPayload::Temperature(self.temperature)));
        }
    }

    fn run_pid(&mut self, now_ns: u64) {
        let dt = match self.last_pid_ns.replace(now_ns) {
            Some(last) => now_ns.saturating_sub(last) as f64 / 1e9,
            None => self.pid_interval_ms as f64 / 1000.0,
        };
        self.duty = if self.target > 0.0 {
            let error = self.target - self.temperature;
            pid_compute(&mut self.pid, &self.gains, error, dt).clamp(0.0, self.gains.out_max)
        } else {
            0.0
        };
    }
}

/// Factory for [`ObjectKind::Heater`].
pub fn create_object(
    _name: &str,
    options: &toml::Table,
) -> Result<Box<dyn SimObject>, ObjectError> {
    let defaults = LumpedThermalModel::default();
    let model = LumpedThermalModel {
        power: option(options, "power", defaults.power)?,
        heat_capacity: option(options, "heat_capacity", defaults.heat_capacity)?,
        loss: option(options, "loss", defaults.loss)?,
        ambient: option(options, "ambient", defaults.ambient)?,
    };
    if model.heat_capacity <= 0.0 || model.power < 0.0 || model.loss < 0.0 {
        return Err(ObjectError::InvalidConfig(
            "heat_capacity must be positive; power and loss non-negative".to_string(),
        ));
    }
    let gains: PidGains = option(options, "pid", PidGains::default())?;
    let max_temperature: f64 = option(options, "max_temperature", 300.0)?;
    if max_temperature <= model.ambient {
        return Err(ObjectError::InvalidConfig(format!(
            "max_temperature {max_temperature} must exceed ambient {}",
            model.ambient
        )));
    }

    let mut heater = Heater::new(Box::new(model), gains, max_temperature);
    heater.tolerance = option(options, "tolerance", 1.0)?;
    heater.pid_interval_ms = option(options, "pid_interval_ms", 100u64)?.max(1);
    Ok(Box::new(heater))
}

impl SimObject for Heater {
    fn kind(&self) -> ObjectKind {
        ObjectKind::Heater
    }

    fn init(&mut self, ctx: &ObjectContext<'_>) -> Result<(), ObjectError> {
        let mask = ctx.tick_mask();
        let period = (ctx.tick_frequency().saturating_mul(self.pid_interval_ms) / 1000).max(1);
        if period > mask.max_delay() {
            return Err(ObjectError::InvalidConfig(format!(
                "pid_interval_ms {} is {period} ticks, beyond the {}-bit tick range",
                self.pid_interval_ms,
                mask.bits()
            )));
        }
        let due = Arc::clone(&self.pid_due);
        let first = mask.add(ctx.clock().ticks, period);
        self.timer = Some(ctx.register_timer(
            first,
            Box::new(move |now: u64| {
                due.store(true, Ordering::Release);
                mask.add(now, period)
            }),
        ));
        ctx.logger().debug(format_args!(
            "PID every {} ms ({period} ticks)",
            self.pid_interval_ms
        ));
        Ok(())
    }

    fn reset(&mut self, ctx: &ObjectContext<'_>) -> Result<(), ObjectError> {
        self.cancel_pending(ctx);
        self.temperature = self.model.ambient();
        self.target = 0.0;
        self.duty = 0.0;
        self.pid.reset();
        self.last_ns = None;
        self.last_pid_ns = None;
        Ok(())
    }

    fn exec_command(
        &mut self,
        command: &Command,
        ctx: &ObjectContext<'_>,
    ) -> Result<(), CommandReject> {
        let CommandArgs::Heater(HeaterCommand::SetTemperature { celsius }) = command.args else {
            return Err(CommandReject::Unsupported);
        };
        if !(0.0..=self.max_temperature).contains(&celsius) {
            return Err(CommandReject::OutOfRange(format!(
                "{celsius} °C outside 0..={}",
                self.max_temperature
            )));
        }

        self.cancel_pending(ctx);
        self.target = celsius;
        self.pid.reset();
        ctx.logger().info(format_args!("target {celsius} °C"));
        if celsius == 0.0 {
            self.duty = 0.0;
            ctx.complete(command.id, RESULT_OK, Some(ResultPayload::Temperature(self.temperature)));
        } else {
            self.pending = Some(command.id);
        }
        Ok(())
    }

    fn status(&self) -> ObjectStatus {
        ObjectStatus::Heater(HeaterStatus {
            temperature: self.temperature,
            target: self.target,
            duty: self.duty,
            max_temperature: self.max_temperature,
        })
    }

    fn update(&mut self, now: ClockSnapshot, ctx: &ObjectContext<'_>) {
        let last = self.last_ns.replace(now.runtime_ns).unwrap_or(now.runtime_ns);
        let dt = now.runtime_ns.saturating_sub(last) as f64 / 1e9;
        self.temperature = self.model.advance(self.temperature, self.duty, dt);

        if self.pid_due.swap(false, Ordering::AcqRel) {
            self.run_pid(now.runtime_ns);
        }

        if let Some(id) = self.pending {
            if (self.temperature - self.target).abs() <= self.tolerance {
                self.pending = None;
                let temperature = self.temperature;
                ctx.complete(id, RESULT_OK, Some(ResultPayload::Temperature(temperature)));
                if let Err(e) = ctx.emit(EventData::HeaterTempReached { temperature }) {
                    ctx.logger().warn(format_args!("dropping temp-reached event: {e}"));
                }
            }
        }
    }

    fn destroy(&mut self, ctx: &ObjectContext<'_>) {
        // Owned timers are already gone; only log.
        if let Some(timer) = self.timer.take() {
            ctx.logger().debug(format_args!("released PID timer {}", timer.raw()));
        }
    }
}
