//! Hierarchical object loggers.
//!
//! Every object gets a logger named `<kind>.<name>`. Whether a message is
//! emitted depends on the shared [`LogFilter`]: a default level plus an
//! ordered list of glob rules over logger names, the last matching rule
//! winning. Enabled messages are forwarded to `tracing` with the dotted
//! name in a `logger` field, so the subscriber installed by the binary
//! decides where they end up.

use crate::error::CoreResult;
use hwsim_common::config::{ConfigError, LogLevel};
use hwsim_common::machine::LogRule;
use parking_lot::RwLock;
use std::ffi::{CStr, CString};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

struct CompiledRule {
    pattern: CString,
    level: LogLevel,
}

struct FilterRules {
    default: LogLevel,
    rules: Vec<CompiledRule>,
}

/// `fnmatch(3)` match of `name` against `pattern`.
fn glob_match(pattern: &CStr, name: &str) -> bool {
    let Ok(name) = CString::new(name) else {
        return false;
    };
    // SAFETY: both arguments are valid NUL-terminated strings.
    unsafe { libc::fnmatch(pattern.as_ptr(), name.as_ptr(), 0) == 0 }
}

/// Level filter shared by every object logger of a core.
pub struct LogFilter {
    rules: RwLock<FilterRules>,
    version: AtomicU64,
}

impl LogFilter {
    /// Filter with only a default level.
    pub fn new(default: LogLevel) -> Self {
        Self {
            rules: RwLock::new(FilterRules {
                default,
                rules: Vec::new(),
            }),
            version: AtomicU64::new(0),
        }
    }

    /// Filter built from a default level and ordered rules.
    pub fn with_rules(default: LogLevel, rules: &[LogRule]) -> CoreResult<Self> {
        let filter = Self::new(default);
        for rule in rules {
            filter.add_rule(&rule.pattern, rule.level)?;
        }
        Ok(filter)
    }

    fn bump(&self) {
        self.version.fetch_add(1, Ordering::Release);
    }

    /// Change the default level.
    pub fn set_default(&self, level: LogLevel) {
        self.rules.write().default = level;
        self.bump();
    }

    /// Append a rule. Later rules take precedence.
    pub fn add_rule(&self, pattern: &str, level: LogLevel) -> CoreResult<()> {
        if pattern.is_empty() {
            return Err(ConfigError::ValidationError("empty log rule pattern".into()).into());
        }
        let pattern = CString::new(pattern).map_err(|e| {
            ConfigError::ValidationError(format!("invalid log rule pattern: {e}"))
        })?;
        self.rules.write().rules.push(CompiledRule { pattern, level });
        self.bump();
        Ok(())
    }

    /// Drop every rule, keeping the default level.
    pub fn clear_rules(&self) {
        self.rules.write().rules.clear();
        self.bump();
    }

    /// Effective level for the logger called `name`.
    pub fn level_for(&self, name: &str) -> LogLevel {
        let rules = self.rules.read();
        rules
            .rules
            .iter()
            .rev()
            .find(|rule| glob_match(&rule.pattern, name))
            .map_or(rules.default, |rule| rule.level)
    }

    /// Changes whenever the rules or default change.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}

impl fmt::Debug for LogFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rules = self.rules.read();
        f.debug_struct("LogFilter")
            .field("default", &rules.default)
            .field("rules", &rules.rules.len())
            .finish()
    }
}

/// Named logger handed to an object at creation.
pub struct ObjectLogger {
    name: Arc<str>,
    filter: Arc<LogFilter>,
    cached_version: AtomicU64,
    cached_level: AtomicU8,
}

impl ObjectLogger {
    /// Logger called `name` using `filter`.
    pub fn new(name: impl Into<Arc<str>>, filter: Arc<LogFilter>) -> Self {
        let name = name.into();
        let level = filter.level_for(&name);
        let version = filter.version();
        Self {
            name,
            filter,
            cached_version: AtomicU64::new(version),
            cached_level: AtomicU8::new(level.as_u8()),
        }
    }

    /// Dotted logger name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Logger for a sub-component, named `<self>.<suffix>`.
    pub fn child(&self, suffix: &str) -> ObjectLogger {
        ObjectLogger::new(format!("{}.{}", self.name, suffix), Arc::clone(&self.filter))
    }

    /// Current threshold, refreshed when the filter changed.
    pub fn level(&self) -> LogLevel {
        let version = self.filter.version();
        if self.cached_version.load(Ordering::Acquire) != version {
            let level = self.filter.level_for(&self.name);
            self.cached_level.store(level.as_u8(), Ordering::Relaxed);
            self.cached_version.store(version, Ordering::Release);
            return level;
        }
        LogLevel::from_u8(self.cached_level.load(Ordering::Relaxed))
    }

    /// True when a message at `level` would be emitted.
    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.level()
    }

    /// Emit a message at `level`.
    pub fn log(&self, level: LogLevel, args: fmt::Arguments<'_>) {
        if !self.enabled(level) {
            return;
        }
        let logger = &*self.name;
        match level {
            LogLevel::Trace => tracing::trace!(logger, "{}", args),
            LogLevel::Debug => tracing::debug!(logger, "{}", args),
            LogLevel::Info => tracing::info!(logger, "{}", args),
            LogLevel::Warn => tracing::warn!(logger, "{}", args),
            LogLevel::Error => tracing::error!(logger, "{}", args),
        }
    }

    /// Emit at ERROR.
    pub fn error(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Error, args);
    }

    /// Emit at WARN.
    pub fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Warn, args);
    }

    /// Emit at INFO.
    pub fn info(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Info, args);
    }

    /// Emit at DEBUG.
    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Debug, args);
    }

    /// Emit at TRACE.
    pub fn trace(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Trace, args);
    }
}

impl fmt::Debug for ObjectLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectLogger")
            .field("name", &self.name)
            .field("level", &self.level())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_matching_rule_wins() {
        let filter = LogFilter::new(LogLevel::Warn);
        filter.add_rule("stepper.*", LogLevel::Debug).unwrap();
        filter.add_rule("stepper.e_*", LogLevel::Error).unwrap();

        assert_eq!(filter.level_for("stepper.x_motor"), LogLevel::Debug);
        assert_eq!(filter.level_for("stepper.e_motor"), LogLevel::Error);
        assert_eq!(filter.level_for("heater.bed"), LogLevel::Warn);
    }

    #[test]
    fn glob_supports_classes() {
        let filter = LogFilter::new(LogLevel::Info);
        filter.add_rule("axis.[xy]", LogLevel::Trace).unwrap();
        assert_eq!(filter.level_for("axis.x"), LogLevel::Trace);
        assert_eq!(filter.level_for("axis.z"), LogLevel::Info);
    }

    #[test]
    fn logger_refreshes_after_filter_change() {
        let filter = Arc::new(LogFilter::new(LogLevel::Info));
        let logger = ObjectLogger::new("pwm.fan", Arc::clone(&filter));
        assert!(!logger.enabled(LogLevel::Debug));

        filter.add_rule("pwm.*", LogLevel::Debug).unwrap();
        assert!(logger.enabled(LogLevel::Debug));

        filter.clear_rules();
        filter.set_default(LogLevel::Error);
        assert!(!logger.enabled(LogLevel::Warn));
        assert!(logger.enabled(LogLevel::Error));
    }

    #[test]
    fn child_logger_name() {
        let filter = Arc::new(LogFilter::new(LogLevel::Info));
        let logger = ObjectLogger::new("heater.hotend", filter);
        assert_eq!(logger.child("pid").name(), "heater.hotend.pid");
    }

    #[test]
    fn rejects_empty_and_nul_patterns() {
        let filter = LogFilter::new(LogLevel::Info);
        assert!(filter.add_rule("", LogLevel::Debug).is_err());
        assert!(filter.add_rule("a\0b", LogLevel::Debug).is_err());
    }
}
