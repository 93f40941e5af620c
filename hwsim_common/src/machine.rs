//! Machine description loaded from `machine.toml`.
//!
//! - `MachineConfig` - timing, scheduling, logging and the object list
//! - `TimingConfig` - virtual clock and worker cadence
//! - `SchedulingConfig` - best-effort real-time scheduling requests
//! - `LoggingConfig` - object logger filter rules
//! - `ObjectConfig` - one simulated object and its options table
//!
//! # TOML Example
//!
//! ```toml
//! [timing]
//! tick_width = 32
//! controller_frequency = 1000000
//!
//! [[objects]]
//! kind = "stepper"
//! name = "x_motor"
//! [objects.options]
//! steps_per_rotation = 200
//! microsteps = 16
//! ```

use crate::config::{ConfigError, LogLevel, SharedConfig};
use crate::consts::{
    DEFAULT_CONTROLLER_FREQUENCY_HZ, DEFAULT_TICK_WIDTH, DEFAULT_TIMER_FREQUENCY_HZ,
    DEFAULT_UPDATE_FREQUENCY_HZ, DEFAULT_WORKER_INTERVAL_US,
};
use crate::object::ObjectKind;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

fn default_tick_width() -> u8 {
    DEFAULT_TICK_WIDTH
}

fn default_controller_frequency() -> u64 {
    DEFAULT_CONTROLLER_FREQUENCY_HZ
}

fn default_timer_frequency() -> u64 {
    DEFAULT_TIMER_FREQUENCY_HZ
}

fn default_update_frequency() -> u64 {
    DEFAULT_UPDATE_FREQUENCY_HZ
}

fn default_worker_interval_us() -> u64 {
    DEFAULT_WORKER_INTERVAL_US
}

/// Virtual clock and thread cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Width of the tick counter in bits (1..=64).
    #[serde(default = "default_tick_width")]
    pub tick_width: u8,

    /// Tick rate of the virtual controller clock.
    #[serde(default = "default_controller_frequency")]
    pub controller_frequency: u64,

    /// Rate at which the clock thread publishes and drives the timer wheel.
    #[serde(default = "default_timer_frequency")]
    pub timer_frequency: u64,

    /// Default per-object update rate.
    #[serde(default = "default_update_frequency")]
    pub update_frequency: u64,

    /// Sleep between passes of the command/event/completion workers.
    #[serde(default = "default_worker_interval_us")]
    pub worker_interval_us: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tick_width: default_tick_width(),
            controller_frequency: default_controller_frequency(),
            timer_frequency: default_timer_frequency(),
            update_frequency: default_update_frequency(),
            worker_interval_us: default_worker_interval_us(),
        }
    }
}

impl TimingConfig {
    /// Validate ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_width == 0 || self.tick_width > 64 {
            return Err(ConfigError::ValidationError(format!(
                "tick_width must be in 1..=64, got {}",
                self.tick_width
            )));
        }
        for (name, value) in [
            ("controller_frequency", self.controller_frequency),
            ("timer_frequency", self.timer_frequency),
            ("update_frequency", self.update_frequency),
            ("worker_interval_us", self.worker_interval_us),
        ] {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be greater than 0"
                )));
            }
        }
        Ok(())
    }
}

/// Best-effort scheduling requests for simulation threads.
///
/// Denied requests are logged and ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulingConfig {
    /// `SCHED_FIFO` priority for the clock thread (1..=99).
    #[serde(default)]
    pub clock_priority: Option<i32>,

    /// `SCHED_FIFO` priority for object update threads.
    #[serde(default)]
    pub object_priority: Option<i32>,

    /// CPU core to pin the clock thread to.
    #[serde(default)]
    pub clock_cpu: Option<usize>,
}

/// Logger filter rule: names matching `pattern` log at `level` and above.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogRule {
    /// Glob over dotted logger names, e.g. `stepper.*`.
    pub pattern: String,
    /// Minimum level for matching loggers.
    pub level: LogLevel,
}

/// Object logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Level for loggers no rule matches; defaults to `[shared].log_level`.
    #[serde(default)]
    pub level: Option<LogLevel>,

    /// Ordered rules; the last matching rule wins.
    #[serde(default)]
    pub rules: Vec<LogRule>,
}

/// One simulated object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectConfig {
    /// Object kind.
    pub kind: ObjectKind,

    /// Name, unique within the kind.
    pub name: String,

    /// Update frequency override (Hz).
    #[serde(default)]
    pub update_frequency: Option<u64>,

    /// Kind-specific options, interpreted by the kind's factory.
    #[serde(default)]
    pub options: toml::Table,
}

/// Main configuration loaded from `machine.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MachineConfig {
    /// Shared service configuration.
    #[serde(default)]
    pub shared: SharedConfig,

    /// Clock and cadence.
    #[serde(default)]
    pub timing: TimingConfig,

    /// Real-time scheduling requests.
    #[serde(default)]
    pub scheduling: SchedulingConfig,

    /// Object logging.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Objects, created in order.
    #[serde(default)]
    pub objects: Vec<ObjectConfig>,
}

impl MachineConfig {
    /// Validate the machine configuration.
    ///
    /// # Validation Rules
    /// 1. `[shared]` valid
    /// 2. timing ranges valid
    /// 3. scheduling priorities in 1..=99
    /// 4. object names non-empty and unique within their kind
    /// 5. per-object update frequencies non-zero
    /// 6. log rule patterns non-empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        self.timing.validate()?;

        for priority in [
            self.scheduling.clock_priority,
            self.scheduling.object_priority,
        ]
        .into_iter()
        .flatten()
        {
            if !(1..=99).contains(&priority) {
                return Err(ConfigError::ValidationError(format!(
                    "real-time priority must be in 1..=99, got {priority}"
                )));
            }
        }

        let mut names = HashSet::new();
        for object in &self.objects {
            if object.name.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "{} object with empty name",
                    object.kind
                )));
            }
            if !names.insert((object.kind, object.name.as_str())) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate {} name: {}",
                    object.kind, object.name
                )));
            }
            if object.update_frequency == Some(0) {
                return Err(ConfigError::ValidationError(format!(
                    "{} '{}': update_frequency must be greater than 0",
                    object.kind, object.name
                )));
            }
        }

        if let Some(rule) = self.logging.rules.iter().find(|r| r.pattern.is_empty()) {
            return Err(ConfigError::ValidationError(format!(
                "empty log rule pattern (level {:?})",
                rule.level
            )));
        }

        Ok(())
    }

    /// Effective default object log level.
    pub fn log_level(&self) -> LogLevel {
        self.logging.level.unwrap_or(self.shared.log_level)
    }

    /// Most verbose level any object logger can emit at: the default
    /// level or any rule level, whichever is lower.
    pub fn most_verbose_level(&self) -> LogLevel {
        self.logging
            .rules
            .iter()
            .map(|rule| rule.level)
            .fold(self.log_level(), LogLevel::min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigLoader;

    const SAMPLE: &str = r#"
[shared]
service_name = "bench"
log_level = "warn"

[timing]
tick_width = 16
controller_frequency = 10000

[logging]
rules = [{ pattern = "stepper.*", level = "debug" }]

[[objects]]
kind = "stepper"
name = "x_motor"
update_frequency = 2000
[objects.options]
steps_per_rotation = 200
microsteps = 16

[[objects]]
kind = "axis"
name = "x"
[objects.options]
motors = ["x_motor"]
"#;

    #[test]
    fn parses_sample_machine() {
        let config = MachineConfig::parse(SAMPLE).expect("parse");
        config.validate().expect("valid");
        assert_eq!(config.timing.tick_width, 16);
        assert_eq!(config.timing.timer_frequency, DEFAULT_TIMER_FREQUENCY_HZ);
        assert_eq!(config.objects.len(), 2);
        assert_eq!(config.objects[0].kind, ObjectKind::Stepper);
        assert_eq!(config.objects[0].update_frequency, Some(2000));
        assert_eq!(
            config.objects[0].options.get("microsteps"),
            Some(&toml::Value::Integer(16))
        );
        assert_eq!(config.log_level(), LogLevel::Warn);
    }

    #[test]
    fn rejects_duplicate_names_within_kind() {
        let mut config = MachineConfig::parse(SAMPLE).unwrap();
        let mut dup = config.objects[0].clone();
        dup.update_frequency = None;
        config.objects.push(dup);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(msg)) if msg.contains("Duplicate")
        ));
    }

    #[test]
    fn same_name_in_different_kinds_is_allowed() {
        let mut config = MachineConfig::parse(SAMPLE).unwrap();
        config.objects[1].name = "x_motor".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn most_verbose_level_covers_rules() {
        let config = MachineConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.most_verbose_level(), LogLevel::Debug);

        let quiet = MachineConfig::parse("[shared]\nservice_name = \"q\"\nlog_level = \"warn\"").unwrap();
        assert_eq!(quiet.most_verbose_level(), LogLevel::Warn);
    }

    #[test]
    fn rejects_bad_tick_width() {
        let mut config = MachineConfig::default();
        config.timing.tick_width = 65;
        assert!(config.validate().is_err());
        config.timing.tick_width = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_priority() {
        let mut config = MachineConfig::default();
        config.scheduling.clock_priority = Some(120);
        assert!(config.validate().is_err());
    }
}
