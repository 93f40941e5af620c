//! Simulation core: object lifecycle, threads and the external control
//! surface.
//!
//! [`SimCore`] owns one [`SimContext`] and the thread set that drives it.
//! It can run in two modes:
//!
//! - **threaded**: `start()` spawns the clock, the timer driver, the three
//!   pipeline workers and one update thread per object;
//! - **stepped**: while not started, `step(n)` advances the clock by `n`
//!   controller ticks and runs timers, due updates and the pipelines on
//!   the calling thread, in that order.

use crate::clock::{ClockSnapshot, ClockStats, TickMask};
use crate::commands::CompletionHandler;
use crate::context::{CompletionSink, SimContext};
use crate::error::{CoreError, CoreResult};
use crate::events::{EventHandler, SubscriptionId};
use crate::logging::LogFilter;
use crate::object::SimObject;
use crate::objects::register_all_objects;
use crate::registry::{ObjectEntry, ObjectFactories, ObjectState};
use crate::threads::{PauseGate, RtRequest, ThreadRole, ThreadSet, clock_loop, timer_loop};
use crate::timers::{TimerCallback, TimerHandle};
use hwsim_common::config::{ConfigError, LogLevel};
use hwsim_common::consts::{
    DEFAULT_CONTROLLER_FREQUENCY_HZ, DEFAULT_TICK_WIDTH, DEFAULT_TIMER_FREQUENCY_HZ,
    DEFAULT_UPDATE_FREQUENCY_HZ, DEFAULT_WORKER_INTERVAL_US, RESULT_TARGET_DESTROYED,
};
use hwsim_common::machine::{LogRule, MachineConfig};
use hwsim_common::object::{
    CommandArgs, CommandId, EventData, EventKind, ObjectId, ObjectKind, ObjectStatus,
};
use parking_lot::Mutex;
use serde::Serialize;
use static_assertions::assert_impl_all;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Core construction parameters.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Tick counter width in bits.
    pub tick_width: u8,
    /// Controller tick rate (Hz).
    pub controller_frequency: u64,
    /// Clock publication / timer wheel rate (Hz).
    pub timer_frequency: u64,
    /// Default object update rate (Hz).
    pub update_frequency: u64,
    /// Pipeline worker cadence.
    pub worker_interval: Duration,
    /// Default object log level.
    pub log_level: LogLevel,
    /// Object log filter rules.
    pub log_rules: Vec<LogRule>,
    /// Scheduling request for the clock thread.
    pub clock_rt: RtRequest,
    /// Scheduling request for object update threads.
    pub object_rt: RtRequest,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            tick_width: DEFAULT_TICK_WIDTH,
            controller_frequency: DEFAULT_CONTROLLER_FREQUENCY_HZ,
            timer_frequency: DEFAULT_TIMER_FREQUENCY_HZ,
            update_frequency: DEFAULT_UPDATE_FREQUENCY_HZ,
            worker_interval: Duration::from_micros(DEFAULT_WORKER_INTERVAL_US),
            log_level: LogLevel::Info,
            log_rules: Vec::new(),
            clock_rt: RtRequest::default(),
            object_rt: RtRequest::default(),
        }
    }
}

impl CoreConfig {
    /// Core parameters from a machine description.
    pub fn from_machine(machine: &MachineConfig) -> Self {
        let timing = &machine.timing;
        Self {
            tick_width: timing.tick_width,
            controller_frequency: timing.controller_frequency,
            timer_frequency: timing.timer_frequency,
            update_frequency: timing.update_frequency,
            worker_interval: Duration::from_micros(timing.worker_interval_us),
            log_level: machine.log_level(),
            log_rules: machine.logging.rules.clone(),
            clock_rt: RtRequest {
                priority: machine.scheduling.clock_priority,
                cpu: machine.scheduling.clock_cpu,
            },
            object_rt: RtRequest {
                priority: machine.scheduling.object_priority,
                cpu: None,
            },
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("controller_frequency", self.controller_frequency),
            ("timer_frequency", self.timer_frequency),
            ("update_frequency", self.update_frequency),
        ] {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be greater than 0"
                )));
            }
        }
        if self.worker_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "worker_interval must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Serializable per-object status line.
#[derive(Debug, Clone, Serialize)]
pub struct ObjectReport {
    /// Raw handle.
    pub id: u64,
    /// Object kind.
    pub kind: ObjectKind,
    /// Object name.
    pub name: String,
    /// Status snapshot.
    pub status: ObjectStatus,
}

/// Simulation core.
pub struct SimCore {
    config: CoreConfig,
    sim: Arc<SimContext>,
    factories: ObjectFactories,
    gate: Arc<PauseGate>,
    threads: Mutex<Option<ThreadSet>>,
    stepped_ticks: AtomicU64,
}

impl SimCore {
    /// Build a core with the given factory table.
    ///
    /// # Errors
    /// `CoreError::Config` for zero frequencies or a bad tick width or log
    /// rule.
    pub fn new(config: CoreConfig, factories: ObjectFactories) -> CoreResult<Self> {
        config.validate()?;
        let mask = TickMask::new(config.tick_width)?;
        let log_filter = Arc::new(LogFilter::with_rules(config.log_level, &config.log_rules)?);
        let sim = Arc::new(SimContext::new(mask, config.controller_frequency, log_filter)?);

        info!(
            "SimCore created (tick_width={}, controller={}Hz, timer={}Hz, update={}Hz)",
            config.tick_width,
            config.controller_frequency,
            config.timer_frequency,
            config.update_frequency
        );

        Ok(Self {
            config,
            sim,
            factories,
            gate: Arc::new(PauseGate::new()),
            threads: Mutex::new(None),
            stepped_ticks: AtomicU64::new(0),
        })
    }

    /// Build a core knowing every built-in object kind.
    pub fn with_builtin_objects(config: CoreConfig) -> CoreResult<Self> {
        let mut factories = ObjectFactories::new();
        register_all_objects(&mut factories);
        Self::new(config, factories)
    }

    /// Build a core from a machine description: create every configured
    /// object in order, then initialize them.
    ///
    /// # Errors
    /// Validation, creation and init failures; the first one aborts.
    pub fn from_machine_config(machine: &MachineConfig) -> CoreResult<Self> {
        machine.validate()?;
        let core = Self::with_builtin_objects(CoreConfig::from_machine(machine))?;
        for object in &machine.objects {
            core.create_object_with_frequency(
                object.kind,
                &object.name,
                &object.options,
                object.update_frequency,
            )?;
        }
        core.init_all()?;
        info!("Loaded {} objects from machine configuration", machine.objects.len());
        Ok(core)
    }

    /// Construction parameters.
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Shared simulation context.
    pub fn context(&self) -> &Arc<SimContext> {
        &self.sim
    }

    /// Object log filter; rules may be changed at runtime.
    pub fn log_filter(&self) -> &Arc<LogFilter> {
        self.sim.log_filter()
    }

    /// True while the simulation threads run.
    pub fn is_started(&self) -> bool {
        self.threads.lock().is_some()
    }

    /// True while paused.
    pub fn is_paused(&self) -> bool {
        self.gate.is_paused()
    }

    // ─── Objects ────────────────────────────────────────────────────

    /// Create an object through its kind's factory at the default update
    /// rate.
    pub fn create_object(
        &self,
        kind: ObjectKind,
        name: &str,
        options: &toml::Table,
    ) -> CoreResult<ObjectId> {
        self.create_object_with_frequency(kind, name, options, None)
    }

    /// Create an object with an optional update rate override.
    ///
    /// # Errors
    /// `DuplicateObject`, `UnknownObjectKind`, or `Object` if the factory
    /// (or, on a started core, `init`) fails.
    pub fn create_object_with_frequency(
        &self,
        kind: ObjectKind,
        name: &str,
        options: &toml::Table,
        update_frequency: Option<u64>,
    ) -> CoreResult<ObjectId> {
        if self.sim.registry().contains(kind, name) {
            return Err(CoreError::DuplicateObject {
                kind,
                name: name.to_string(),
            });
        }
        let object = self.factories.create(kind, name, options)?;
        self.insert_object(name, object, update_frequency)
    }

    /// Register a pre-built object at the default update rate.
    pub fn add_object(&self, name: &str, object: Box<dyn SimObject>) -> CoreResult<ObjectId> {
        self.insert_object(name, object, None)
    }

    /// Register a pre-built object at `update_frequency` Hz.
    pub fn add_object_with_frequency(
        &self,
        name: &str,
        object: Box<dyn SimObject>,
        update_frequency: u64,
    ) -> CoreResult<ObjectId> {
        self.insert_object(name, object, Some(update_frequency))
    }

    fn insert_object(
        &self,
        name: &str,
        object: Box<dyn SimObject>,
        update_frequency: Option<u64>,
    ) -> CoreResult<ObjectId> {
        let kind = object.kind();
        let frequency = update_frequency.unwrap_or(self.config.update_frequency);
        let logger = self.sim.logger(kind, name);
        let entry = self
            .sim
            .registry()
            .insert(name, object, frequency, logger)?;
        debug!(object = %entry.id(), "created {kind}.{name} ({frequency}Hz)");

        // Late arrivals on a started core are initialized and get a thread.
        let mut threads = self.threads.lock();
        if let Some(threads) = threads.as_mut() {
            if let Err(e) = self.init_entry(&entry) {
                self.sim.registry().remove(entry.id());
                return Err(e);
            }
            self.spawn_object(threads, Arc::clone(&entry))?;
            entry.set_state(if self.gate.is_paused() {
                ObjectState::Paused
            } else {
                ObjectState::Running
            });
        }
        Ok(entry.id())
    }

    fn init_entry(&self, entry: &ObjectEntry) -> CoreResult<()> {
        self.sim
            .with_entry(entry, |object, ctx| object.init(ctx))
            .map_err(|source| CoreError::Object {
                name: format!("{}.{}", entry.kind(), entry.name()),
                source,
            })?;
        entry.set_state(ObjectState::Initialized);
        Ok(())
    }

    /// Initialize every created object in registration order.
    ///
    /// # Errors
    /// The first `init` failure; objects initialized before it stay so.
    pub fn init_all(&self) -> CoreResult<()> {
        for entry in self.sim.registry().all() {
            if entry.state() == ObjectState::Created {
                self.init_entry(&entry)?;
            }
        }
        Ok(())
    }

    /// Destroy an object.
    ///
    /// The object is unlinked first, then its thread is stopped, its
    /// queued and in-flight commands complete with
    /// `RESULT_TARGET_DESTROYED`, its subscriptions and timers are dropped
    /// and finally its `destroy` runs.
    pub fn destroy_object(&self, id: ObjectId) -> CoreResult<()> {
        let entry = self
            .sim
            .registry()
            .remove(id)
            .ok_or(CoreError::ObjectNotFound(id))?;

        let stopped = match self.threads.lock().as_mut() {
            Some(threads) => threads.stop_object(id, self.sim.clock().signal()),
            None => Ok(()),
        };

        let purged = self.sim.commands().purge_target(id);
        for command in &purged {
            self.sim
                .completions()
                .post(*command, RESULT_TARGET_DESTROYED, None);
        }
        let subscriptions = self.sim.events().remove_object(id);
        let timers = self.sim.timers().unregister_owner(id);

        self.sim.with_entry(&entry, |object, ctx| object.destroy(ctx));
        entry.set_state(ObjectState::Destroyed);
        info!(
            object = %id,
            commands = purged.len(),
            subscriptions,
            timers,
            "destroyed {}.{}",
            entry.kind(),
            entry.name()
        );
        stopped
    }

    /// Find an object by kind and name.
    pub fn lookup(&self, kind: ObjectKind, name: &str) -> Option<ObjectId> {
        self.sim.registry().lookup(kind, name)
    }

    /// Objects of `kind`, in registration order.
    pub fn list(&self, kind: ObjectKind) -> Vec<ObjectId> {
        self.sim.registry().list(kind)
    }

    /// Lifecycle state of an object.
    pub fn object_state(&self, id: ObjectId) -> Option<ObjectState> {
        self.sim.registry().get(id).map(|entry| entry.state())
    }

    /// Status snapshots, `None` for unknown handles.
    pub fn status(&self, ids: &[ObjectId]) -> Vec<Option<ObjectStatus>> {
        ids.iter().map(|id| self.sim.status(*id)).collect()
    }

    /// Status of every object, in registration order.
    pub fn report(&self) -> Vec<ObjectReport> {
        self.sim
            .registry()
            .all()
            .iter()
            .map(|entry| ObjectReport {
                id: entry.id().raw(),
                kind: entry.kind(),
                name: entry.name().to_string(),
                status: entry.status(),
            })
            .collect()
    }

    // ─── Commands, events, timers ───────────────────────────────────

    /// Execute a command on the calling thread.
    ///
    /// `Ok(id)` means accepted; the completion arrives later through
    /// `handler`.
    ///
    /// # Errors
    /// `ObjectNotFound`, `CacheExhausted` or `CommandRejected`.
    pub fn exec_command(
        &self,
        target: ObjectId,
        args: CommandArgs,
        handler: CompletionHandler,
    ) -> CoreResult<CommandId> {
        self.sim.exec_command(None, target, args, handler)
    }

    /// Queue a command for the command worker.
    ///
    /// Rejections are reported to `handler` with the rejection code.
    pub fn submit_command(
        &self,
        target: ObjectId,
        args: CommandArgs,
        handler: CompletionHandler,
    ) -> CoreResult<CommandId> {
        if self.sim.registry().get(target).is_none() {
            return Err(CoreError::ObjectNotFound(target));
        }
        self.sim.commands().submit(None, target, args, handler)
    }

    /// Integer-only variant of [`submit_command`](Self::submit_command):
    /// failures come back as an id with `CommandId::ERROR_FLAG` set.
    pub fn submit_command_raw(
        &self,
        target: ObjectId,
        args: CommandArgs,
        handler: CompletionHandler,
    ) -> CommandId {
        match self.submit_command(target, args, handler) {
            Ok(id) => id,
            Err(e) => {
                debug!(target = %target, "submit failed: {e}");
                CommandId::error(e.code().unsigned_abs())
            }
        }
    }

    /// Inject an event on behalf of `source`.
    pub fn submit_event(&self, source: ObjectId, data: EventData) -> CoreResult<()> {
        let entry = self
            .sim
            .registry()
            .get(source)
            .ok_or(CoreError::ObjectNotFound(source))?;
        self.sim
            .events()
            .submit(entry.kind(), source, entry.name_arc(), data)
    }

    /// Inject an event whose payload the caller keeps a reference to.
    pub fn submit_shared_event(&self, source: ObjectId, data: Arc<EventData>) -> CoreResult<()> {
        let entry = self
            .sim
            .registry()
            .get(source)
            .ok_or(CoreError::ObjectNotFound(source))?;
        self.sim
            .events()
            .submit_shared(entry.kind(), source, entry.name_arc(), data)
    }

    /// Subscribe to `event` from objects of `source_kind`, optionally only
    /// from `source`.
    pub fn subscribe(
        &self,
        event: EventKind,
        source_kind: ObjectKind,
        source: Option<ObjectId>,
        handler: EventHandler,
    ) -> SubscriptionId {
        self.sim.events().subscribe(event, source_kind, source, handler)
    }

    /// Remove a subscription.
    pub fn unsubscribe(&self, event: EventKind, id: SubscriptionId) -> CoreResult<()> {
        self.sim.events().unsubscribe(event, id)
    }

    /// Register a timer; `timeout` 0 leaves it disarmed.
    pub fn register_timer(&self, timeout: u64, callback: TimerCallback) -> TimerHandle {
        self.sim.timers().register(timeout, callback)
    }

    /// Move a timer to `timeout` (0 disarms).
    pub fn reschedule_timer(&self, handle: TimerHandle, timeout: u64) -> CoreResult<()> {
        self.sim.timers().reschedule(handle, timeout)
    }

    /// Remove a timer.
    pub fn unregister_timer(&self, handle: TimerHandle) -> CoreResult<()> {
        self.sim.timers().unregister(handle)
    }

    /// Replace the sink for completions no handler claimed.
    pub fn set_completion_sink(&self, sink: Option<CompletionSink>) {
        self.sim.set_default_sink(sink);
    }

    // ─── Clock ──────────────────────────────────────────────────────

    /// Current clock.
    pub fn clock(&self) -> ClockSnapshot {
        self.sim.clock().snapshot()
    }

    /// Clock thread statistics.
    pub fn clock_stats(&self) -> ClockStats {
        self.sim.clock().stats()
    }

    fn step_quantum(&self) -> u64 {
        let fastest = self
            .sim
            .registry()
            .all()
            .iter()
            .map(|entry| entry.update_frequency())
            .fold(self.config.timer_frequency, u64::max);
        (self.config.controller_frequency / fastest).max(1)
    }

    /// Advance a stopped core by `ticks` controller ticks.
    ///
    /// Time moves in quanta of one period of the fastest update or timer
    /// rate. After each quantum the timer wheel runs, then every due
    /// object updates, then commands, events and completions are
    /// processed.
    ///
    /// # Errors
    /// `InvalidState` on a started or paused core.
    pub fn step(&self, ticks: u64) -> CoreResult<ClockSnapshot> {
        let threads = self.threads.lock();
        if threads.is_some() {
            return Err(CoreError::InvalidState(
                "step() requires a core that is not started".to_string(),
            ));
        }
        if self.gate.is_paused() {
            return Err(CoreError::InvalidState("core is paused".to_string()));
        }

        let quantum = self.step_quantum();
        let mut remaining = ticks;
        let mut now = self.sim.clock().snapshot();
        while remaining > 0 {
            let advance = remaining.min(quantum);
            remaining -= advance;
            let raw = self.stepped_ticks.fetch_add(advance, Ordering::AcqRel) + advance;
            now = self.sim.clock().publish_ticks(raw);
            self.step_pass(now);
        }
        drop(threads);
        Ok(now)
    }

    fn step_pass(&self, now: ClockSnapshot) {
        self.sim.timers().run(now.ticks);
        for entry in self.sim.registry().all() {
            if entry.state() == ObjectState::Created {
                continue;
            }
            let period_ns = NANOS_PER_SEC / entry.update_frequency();
            if now.runtime_ns.saturating_sub(entry.last_update_ns()) >= period_ns {
                self.sim.update_object(&entry);
            }
        }
        self.sim.process_commands();
        self.sim.dispatch_events();
        self.sim.drain_completions();
    }

    // ─── Lifecycle ──────────────────────────────────────────────────

    /// Start the simulation threads.
    ///
    /// Objects still in `Created` are initialized first. `sink`, when
    /// given, replaces the default completion sink. If any thread fails to
    /// spawn, every thread already started is stopped again.
    ///
    /// # Errors
    /// `InvalidState` when already started, init or spawn failures.
    pub fn start(&self, sink: Option<CompletionSink>) -> CoreResult<()> {
        let mut slot = self.threads.lock();
        if slot.is_some() {
            return Err(CoreError::InvalidState("core already started".to_string()));
        }
        self.init_all()?;
        if let Some(sink) = sink {
            self.sim.set_default_sink(Some(sink));
        }

        let mut threads = ThreadSet::new(Arc::clone(&self.gate));
        if let Err(e) = self.spawn_all(&mut threads) {
            error!("SimCore start failed: {e}; stopping {} threads", threads.len());
            if let Err(stop) = threads.stop_all(self.sim.clock().signal()) {
                warn!("teardown after failed start: {stop}");
            }
            return Err(e);
        }

        let state = if self.gate.is_paused() {
            ObjectState::Paused
        } else {
            ObjectState::Running
        };
        for entry in self.sim.registry().all() {
            entry.set_state(state);
        }
        info!("SimCore started ({} threads)", threads.len());
        *slot = Some(threads);
        Ok(())
    }

    fn spawn_all(&self, threads: &mut ThreadSet) -> CoreResult<()> {
        let clock_period = Duration::from_nanos(NANOS_PER_SEC / self.config.timer_frequency);
        let sim = Arc::clone(&self.sim);
        threads.spawn("hwsim-clock", ThreadRole::Clock, self.config.clock_rt, move |ctl| {
            clock_loop(&ctl, sim.clock(), clock_period);
        })?;

        let sim = Arc::clone(&self.sim);
        threads.spawn("hwsim-timers", ThreadRole::Timers, RtRequest::default(), move |ctl| {
            timer_loop(&ctl, sim.clock(), sim.timers());
        })?;

        let workers: [(&str, fn(&SimContext) -> usize); 3] = [
            ("hwsim-commands", SimContext::process_commands),
            ("hwsim-events", SimContext::dispatch_events),
            ("hwsim-complete", SimContext::drain_completions),
        ];
        for (name, pass) in workers {
            let sim = Arc::clone(&self.sim);
            let interval = self.config.worker_interval;
            threads.spawn(name, ThreadRole::Worker, RtRequest::default(), move |ctl| {
                ctl.run_paced(interval, || {
                    pass(&sim);
                });
            })?;
        }

        for entry in self.sim.registry().all() {
            self.spawn_object(threads, entry)?;
        }
        Ok(())
    }

    fn spawn_object(&self, threads: &mut ThreadSet, entry: Arc<ObjectEntry>) -> CoreResult<()> {
        let period = Duration::from_nanos((NANOS_PER_SEC / entry.update_frequency()).max(1));
        let name = format!("{}.{}", entry.kind(), entry.name());
        let role = ThreadRole::Object(entry.id());
        let sim = Arc::clone(&self.sim);
        threads.spawn(name, role, self.config.object_rt, move |ctl| {
            ctl.run_paced(period, || sim.update_object(&entry));
        })
    }

    /// Stop every simulation thread.
    ///
    /// In-flight commands are forgotten; a completion posted for one of
    /// them later goes to the default sink. Stopping a core that is not
    /// started is a no-op.
    pub fn stop(&self) -> CoreResult<()> {
        let Some(mut threads) = self.threads.lock().take() else {
            return Ok(());
        };
        let result = threads.stop_all(self.sim.clock().signal());

        let now = self.sim.clock().snapshot();
        let raw = u128::from(now.runtime_ns) * u128::from(self.config.controller_frequency)
            / u128::from(NANOS_PER_SEC);
        self.stepped_ticks.store(raw as u64, Ordering::Release);

        let discarded = self.sim.commands().pending() + self.sim.commands().in_flight();
        self.sim.commands().clear();
        for entry in self.sim.registry().all() {
            entry.set_state(ObjectState::Initialized);
        }
        info!(
            runtime_ms = now.runtime_ns / 1_000_000,
            discarded, "SimCore stopped"
        );
        result
    }

    /// Pause every thread; returns once none of them is mid-pass.
    pub fn pause(&self) {
        let threads = self.threads.lock();
        match threads.as_ref() {
            Some(threads) => {
                threads.pause();
                for entry in self.sim.registry().all() {
                    if entry.state() == ObjectState::Running {
                        entry.set_state(ObjectState::Paused);
                    }
                }
            }
            None => {
                self.gate.close();
            }
        }
        debug!("SimCore paused");
    }

    /// Resume after [`pause`](Self::pause).
    pub fn resume(&self) {
        let threads = self.threads.lock();
        match threads.as_ref() {
            Some(threads) => {
                for entry in self.sim.registry().all() {
                    if entry.state() == ObjectState::Paused {
                        entry.set_state(ObjectState::Running);
                    }
                }
                threads.resume();
            }
            None => self.gate.open(),
        }
        debug!("SimCore resumed");
    }

    /// Reset the given objects (all when `None`) with every thread paused.
    ///
    /// A core that was already paused stays paused.
    ///
    /// # Errors
    /// `ObjectNotFound` for an unknown handle (nothing is reset), or the
    /// first `reset` failure (later targets are skipped).
    pub fn reset(&self, ids: Option<&[ObjectId]>) -> CoreResult<()> {
        let registry = self.sim.registry();
        let targets: Vec<Arc<ObjectEntry>> = match ids {
            None => registry.all(),
            Some(ids) => ids
                .iter()
                .map(|id| registry.get(*id).ok_or(CoreError::ObjectNotFound(*id)))
                .collect::<CoreResult<_>>()?,
        };

        let was_paused = self.gate.is_paused();
        self.pause();
        let result = targets.iter().try_for_each(|entry| {
            self.sim
                .with_entry(entry, |object, ctx| object.reset(ctx))
                .map_err(|source| CoreError::Object {
                    name: format!("{}.{}", entry.kind(), entry.name()),
                    source,
                })
        });
        if !was_paused {
            self.resume();
        }
        info!(objects = targets.len(), ok = result.is_ok(), "reset");
        result
    }
}

assert_impl_all!(SimCore: Send, Sync);

impl Drop for SimCore {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("SimCore stop on drop: {e}");
        }
        for entry in self.sim.registry().all().iter().rev() {
            if let Err(e) = self.destroy_object(entry.id()) {
                warn!("destroy {} on drop: {e}", entry.name());
            }
        }
    }
}
