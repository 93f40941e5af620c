//! Object registry and factory table.
//!
//! [`ObjectFactories`] maps each [`ObjectKind`] to the function that builds
//! it. It is populated at startup and handed to the core by value; there is
//! no global registry.
//!
//! [`ObjectRegistry`] owns the live objects of one core, in registration
//! order. Handles come from a monotonic counter and are never reused.

use crate::error::{CoreError, CoreResult};
use crate::logging::ObjectLogger;
use crate::object::{ObjectFactory, SimObject};
use hwsim_common::object::{ObjectId, ObjectKind, ObjectStatus};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

/// Per-object lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ObjectState {
    /// Built, not yet initialized.
    Created = 0,
    /// `init` succeeded.
    Initialized = 1,
    /// Update thread running.
    Running = 2,
    /// Update thread paused.
    Paused = 3,
    /// Unlinked and destroyed.
    Destroyed = 4,
}

impl ObjectState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ObjectState::Created,
            1 => ObjectState::Initialized,
            2 => ObjectState::Running,
            3 => ObjectState::Paused,
            _ => ObjectState::Destroyed,
        }
    }
}

/// Registry entry for one live object.
pub struct ObjectEntry {
    id: ObjectId,
    kind: ObjectKind,
    name: Arc<str>,
    update_frequency: u64,
    logger: ObjectLogger,
    state: AtomicU8,
    last_update_ns: AtomicU64,
    object: Mutex<Box<dyn SimObject>>,
}

impl ObjectEntry {
    /// Handle.
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Kind.
    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    /// Name, unique within the kind.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_arc(&self) -> &Arc<str> {
        &self.name
    }

    /// Update rate (Hz).
    pub fn update_frequency(&self) -> u64 {
        self.update_frequency
    }

    /// Logger named `<kind>.<name>`.
    pub fn logger(&self) -> &ObjectLogger {
        &self.logger
    }

    /// Lifecycle state.
    pub fn state(&self) -> ObjectState {
        ObjectState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: ObjectState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Runtime (ns) of the last update; drives stepped-mode scheduling.
    pub(crate) fn last_update_ns(&self) -> u64 {
        self.last_update_ns.load(Ordering::Acquire)
    }

    pub(crate) fn set_last_update_ns(&self, runtime_ns: u64) {
        self.last_update_ns.store(runtime_ns, Ordering::Release);
    }

    /// Lock the object. Every capability call goes through this lock.
    pub(crate) fn lock(&self) -> parking_lot::MutexGuard<'_, Box<dyn SimObject>> {
        self.object.lock()
    }

    /// Status snapshot (locks the object).
    pub fn status(&self) -> ObjectStatus {
        self.object.lock().status()
    }
}

impl fmt::Debug for ObjectEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectEntry")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Live objects of one core.
pub struct ObjectRegistry {
    next_id: AtomicU64,
    objects: RwLock<Vec<Arc<ObjectEntry>>>,
}

impl Default for ObjectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            objects: RwLock::new(Vec::new()),
        }
    }

    /// Register a built object.
    ///
    /// # Errors
    /// `CoreError::DuplicateObject` if `(kind, name)` is taken.
    pub fn insert(
        &self,
        name: &str,
        object: Box<dyn SimObject>,
        update_frequency: u64,
        logger: ObjectLogger,
    ) -> CoreResult<Arc<ObjectEntry>> {
        let kind = object.kind();
        let mut objects = self.objects.write();
        if objects.iter().any(|e| e.kind == kind && &*e.name == name) {
            return Err(CoreError::DuplicateObject {
                kind,
                name: name.to_string(),
            });
        }

        let entry = Arc::new(ObjectEntry {
            id: ObjectId::from_raw(self.next_id.fetch_add(1, Ordering::Relaxed)),
            kind,
            name: Arc::from(name),
            update_frequency: update_frequency.max(1),
            logger,
            state: AtomicU8::new(ObjectState::Created as u8),
            last_update_ns: AtomicU64::new(0),
            object: Mutex::new(object),
        });
        objects.push(Arc::clone(&entry));
        Ok(entry)
    }

    /// True when `(kind, name)` is registered.
    pub fn contains(&self, kind: ObjectKind, name: &str) -> bool {
        self.lookup(kind, name).is_some()
    }

    /// Find an object by kind and name.
    pub fn lookup(&self, kind: ObjectKind, name: &str) -> Option<ObjectId> {
        self.objects
            .read()
            .iter()
            .find(|e| e.kind == kind && &*e.name == name)
            .map(|e| e.id)
    }

    /// Entry for a handle.
    pub fn get(&self, id: ObjectId) -> Option<Arc<ObjectEntry>> {
        self.objects.read().iter().find(|e| e.id == id).cloned()
    }

    /// Handles of every object of `kind`, in registration order.
    pub fn list(&self, kind: ObjectKind) -> Vec<ObjectId> {
        self.objects
            .read()
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.id)
            .collect()
    }

    /// Every entry, in registration order.
    pub fn all(&self) -> Vec<Arc<ObjectEntry>> {
        self.objects.read().clone()
    }

    /// Unlink an object. Returns its entry if it was registered.
    pub fn remove(&self, id: ObjectId) -> Option<Arc<ObjectEntry>> {
        let mut objects = self.objects.write();
        let pos = objects.iter().position(|e| e.id == id)?;
        Some(objects.remove(pos))
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// True when no object is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Factory table keyed by object kind.
pub struct ObjectFactories {
    factories: HashMap<ObjectKind, ObjectFactory>,
}

impl ObjectFactories {
    /// Empty table.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register the factory for `kind`.
    ///
    /// # Panics
    /// Panics if `kind` already has a factory.
    pub fn register(&mut self, kind: ObjectKind, factory: ObjectFactory) {
        if self.factories.contains_key(&kind) {
            panic!("Object kind '{kind}' is already registered");
        }
        self.factories.insert(kind, factory);
    }

    /// Factory for `kind`.
    pub fn get(&self, kind: ObjectKind) -> Option<ObjectFactory> {
        self.factories.get(&kind).copied()
    }

    /// Build an object of `kind`.
    ///
    /// # Errors
    /// `UnknownObjectKind` without a factory, `Object` if the factory fails.
    pub fn create(
        &self,
        kind: ObjectKind,
        name: &str,
        options: &toml::Table,
    ) -> CoreResult<Box<dyn SimObject>> {
        let factory = self
            .get(kind)
            .ok_or_else(|| CoreError::UnknownObjectKind(kind.to_string()))?;
        factory(name, options).map_err(|source| CoreError::Object {
            name: format!("{kind}.{name}"),
            source,
        })
    }

    /// Registered kinds.
    pub fn kinds(&self) -> Vec<ObjectKind> {
        let mut kinds: Vec<_> = self.factories.keys().copied().collect();
        kinds.sort();
        kinds
    }
}

impl Default for ObjectFactories {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogFilter;
    use hwsim_common::config::LogLevel;
    use hwsim_common::object::{ObjectError, PwmStatus};

    struct Dummy(ObjectKind);

    impl SimObject for Dummy {
        fn kind(&self) -> ObjectKind {
            self.0
        }

        fn status(&self) -> ObjectStatus {
            ObjectStatus::Pwm(PwmStatus::default())
        }
    }

    fn create_dummy(_name: &str, _options: &toml::Table) -> Result<Box<dyn SimObject>, ObjectError> {
        Ok(Box::new(Dummy(ObjectKind::Pwm)))
    }

    fn create_failing(_name: &str, _options: &toml::Table) -> Result<Box<dyn SimObject>, ObjectError> {
        Err(ObjectError::InvalidConfig("nope".into()))
    }

    fn logger(name: &str) -> ObjectLogger {
        ObjectLogger::new(name, Arc::new(LogFilter::new(LogLevel::Info)))
    }

    #[test]
    fn insert_rejects_duplicates_within_kind() {
        let registry = ObjectRegistry::new();
        let a = registry
            .insert("fan", Box::new(Dummy(ObjectKind::Pwm)), 100, logger("pwm.fan"))
            .unwrap();
        let b = registry
            .insert("fan", Box::new(Dummy(ObjectKind::Heater)), 100, logger("heater.fan"))
            .unwrap();
        assert_ne!(a.id(), b.id());

        let dup = registry.insert("fan", Box::new(Dummy(ObjectKind::Pwm)), 100, logger("pwm.fan"));
        assert!(matches!(dup, Err(CoreError::DuplicateObject { .. })));
        assert_eq!(registry.lookup(ObjectKind::Heater, "fan"), Some(b.id()));
        assert_eq!(registry.list(ObjectKind::Pwm), vec![a.id()]);
    }

    #[test]
    fn ids_are_never_reused() {
        let registry = ObjectRegistry::new();
        let first = registry
            .insert("a", Box::new(Dummy(ObjectKind::Pwm)), 1, logger("pwm.a"))
            .unwrap()
            .id();
        assert!(registry.remove(first).is_some());
        assert!(registry.remove(first).is_none());
        let second = registry
            .insert("a", Box::new(Dummy(ObjectKind::Pwm)), 1, logger("pwm.a"))
            .unwrap()
            .id();
        assert_ne!(first, second);
        assert!(registry.get(first).is_none());
    }

    #[test]
    fn factories_create_and_report_failures() {
        let mut factories = ObjectFactories::new();
        factories.register(ObjectKind::Pwm, create_dummy);
        factories.register(ObjectKind::Heater, create_failing);

        let empty = toml::Table::new();
        assert!(factories.create(ObjectKind::Pwm, "fan", &empty).is_ok());
        assert!(matches!(
            factories.create(ObjectKind::Heater, "bed", &empty),
            Err(CoreError::Object { name, .. }) if name == "heater.bed"
        ));
        assert!(matches!(
            factories.create(ObjectKind::Probe, "z", &empty),
            Err(CoreError::UnknownObjectKind(_))
        ));
        assert_eq!(factories.kinds(), vec![ObjectKind::Heater, ObjectKind::Pwm]);
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn duplicate_factory_panics() {
        let mut factories = ObjectFactories::new();
        factories.register(ObjectKind::Pwm, create_dummy);
        factories.register(ObjectKind::Pwm, create_dummy);
    }
}
