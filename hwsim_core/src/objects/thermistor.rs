//! Thermistor reading a heater's temperature through a beta model.
//!
//! `R(T) = R25 · exp(β · (1/T − 1/298.15))` with `T` in kelvin, read
//! through a pull-up divider into an `adc_bits` converter.

use crate::clock::ClockSnapshot;
use crate::context::ObjectContext;
use crate::object::{SimObject, option, required};
use hwsim_common::object::{
    ObjectError, ObjectId, ObjectKind, ObjectStatus, ThermistorStatus,
};

const KELVIN_OFFSET: f64 = 273.15;
const T25_KELVIN: f64 = 298.15;

/// Beta-model parameters and divider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BetaModel {
    /// Beta coefficient [K].
    pub beta: f64,
    /// Resistance at 25 °C [Ω].
    pub r25: f64,
    /// Divider pull-up [Ω].
    pub pullup: f64,
    /// ADC resolution in bits.
    pub adc_bits: u8,
}

impl Default for BetaModel {
    fn default() -> Self {
        Self {
            beta: 3950.0,
            r25: 100_000.0,
            pullup: 4_700.0,
            adc_bits: 12,
        }
    }
}

impl BetaModel {
    /// Resistance at `celsius`.
    pub fn resistance(&self, celsius: f64) -> f64 {
        let kelvin = celsius + KELVIN_OFFSET;
        self.r25 * (self.beta * (1.0 / kelvin - 1.0 / T25_KELVIN)).exp()
    }

    /// ADC code for `resistance` on the low side of the divider.
    pub fn adc(&self, resistance: f64) -> u16 {
        let full_scale = f64::from((1u32 << self.adc_bits) - 1);
        (full_scale * resistance / (resistance + self.pullup)).round() as u16
    }
}

/// Thermistor object.
#[derive(Debug)]
pub struct Thermistor {
    model: BetaModel,
    heater_name: String,
    heater: Option<ObjectId>,
    temperature: f64,
    resistance: f64,
    adc: u16,
}

/// Factory for [`ObjectKind::Thermistor`].
///
/// Options: `heater` (required), `beta`, `r25`, `pullup`, `adc_bits`.
pub fn create_object(
    _name: &str,
    options: &toml::Table,
) -> Result<Box<dyn SimObject>, ObjectError> {
    let defaults = BetaModel::default();
    let model = BetaModel {
        beta: option(options, "beta", defaults.beta)?,
        r25: option(options, "r25", defaults.r25)?,
        pullup: option(options, "pullup", defaults.pullup)?,
        adc_bits: option(options, "adc_bits", defaults.adc_bits)?,
    };
    if !(1..=16).contains(&model.adc_bits) || model.r25 <= 0.0 || model.pullup <= 0.0 {
        return Err(ObjectError::InvalidConfig(
            "adc_bits must be 1..=16; r25 and pullup positive".to_string(),
        ));
    }
    Ok(Box::new(Thermistor {
        model,
        heater_name: required(options, "heater")?,
        heater: None,
        temperature: 0.0,
        resistance: 0.0,
        adc: 0,
    }))
}

impl Thermistor {
    fn sample(&mut self, celsius: f64) {
        self.temperature = celsius;
        self.resistance = self.model.resistance(celsius);
        self.adc = self.model.adc(self.resistance);
    }
}

impl SimObject for Thermistor {
    fn kind(&self) -> ObjectKind {
        ObjectKind::Thermistor
    }

    fn init(&mut self, ctx: &ObjectContext<'_>) -> Result<(), ObjectError> {
        let heater = ctx.lookup(ObjectKind::Heater, &self.heater_name).ok_or_else(|| {
            ObjectError::MissingDependency(format!("heater '{}'", self.heater_name))
        })?;
        self.heater = Some(heater);
        if let Some(status) = ctx.status_of(heater).and_then(|s| s.as_heater().copied()) {
            self.sample(status.temperature);
        }
        Ok(())
    }

    fn status(&self) -> ObjectStatus {
        ObjectStatus::Thermistor(ThermistorStatus {
            temperature: self.temperature,
            resistance: self.resistance,
            adc: self.adc,
        })
    }

    fn update(&mut self, _now: ClockSnapshot, ctx: &ObjectContext<'_>) {
        let reading = self
            .heater
            .and_then(|id| ctx.status_of(id))
            .and_then(|s| s.as_heater().map(|h| h.temperature));
        if let Some(celsius) = reading {
            self.sample(celsius);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resistance_at_25c_is_r25() {
        let model = BetaModel::default();
        assert!((model.resistance(25.0) - 100_000.0).abs() < 1e-6);
        assert!(model.resistance(200.0) < model.resistance(25.0));
    }

    #[test]
    fn adc_falls_as_temperature_rises() {
        let model = BetaModel::default();
        let cold = model.adc(model.resistance(25.0));
        let hot = model.adc(model.resistance(220.0));
        assert!(cold > hot);
        assert!(cold <= 4095);
    }

    #[test]
    fn factory_rejects_bad_adc_width() {
        let options: toml::Table = "heater = \"hotend\"\nadc_bits = 20".parse().unwrap();
        assert!(create_object("t0", &options).is_err());
    }
}
