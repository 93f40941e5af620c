//! Built-in object models.
//!
//! - [`stepper`] - step-rate motor with move completion
//! - [`axis`] - steps to millimetres, fans moves out to its motors
//! - [`endstop`] - min/max switch on an axis
//! - [`heater`] - lumped thermal model under PID control
//! - [`thermistor`] - beta-model sensor on a heater
//! - [`probe`] - deployable trigger on an axis
//! - [`pwm`] - duty-cycle output
//! - [`toolhead`] - aggregated axis positions
//!
//! # Adding New Objects
//!
//! 1. Create a submodule implementing `SimObject`
//! 2. Expose a `create_object` factory
//! 3. Register it in [`register_all_objects`]

pub mod axis;
pub mod endstop;
pub mod heater;
pub mod pid;
pub mod probe;
pub mod pwm;
pub mod stepper;
pub mod thermistor;
pub mod toolhead;

use crate::registry::ObjectFactories;
use hwsim_common::object::ObjectKind;

/// Register every built-in kind.
pub fn register_all_objects(factories: &mut ObjectFactories) {
    factories.register(ObjectKind::Stepper, stepper::create_object);
    factories.register(ObjectKind::Axis, axis::create_object);
    factories.register(ObjectKind::Endstop, endstop::create_object);
    factories.register(ObjectKind::Heater, heater::create_object);
    factories.register(ObjectKind::Thermistor, thermistor::create_object);
    factories.register(ObjectKind::Probe, probe::create_object);
    factories.register(ObjectKind::Pwm, pwm::create_object);
    factories.register(ObjectKind::Toolhead, toolhead::create_object);
}
