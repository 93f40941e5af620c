//! Shared simulation context.
//!
//! One [`SimContext`] per core holds everything the threads share: clock,
//! timer wheel, registry, the three pipelines and the logging filter.
//! Objects never see it directly; each capability call gets an
//! [`ObjectContext`] bound to the calling object.

use crate::cache::CacheSet;
use crate::clock::{ClockSnapshot, TickMask, VirtualClock};
use crate::commands::{Command, CommandQueue, CommandRecord, CompletionCallback, CompletionHandler};
use crate::completion::{Completion, CompletionRing};
use crate::error::{CoreError, CoreResult};
use crate::events::{EventHandler, EventNode, EventQueue, SubscriptionId};
use crate::logging::{LogFilter, ObjectLogger};
use crate::object::SimObject;
use crate::registry::{ObjectEntry, ObjectRegistry};
use crate::timers::{TimerCallback, TimerHandle, TimerWheel};
use hwsim_common::config::LogLevel;
use hwsim_common::object::{
    CommandArgs, CommandId, CommandReject, EventData, EventKind, ObjectId, ObjectKind,
    ObjectStatus, ResultPayload,
};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Command record cache name.
pub const COMMAND_CACHE: &str = "hwsim.commands";
/// Event node cache name.
pub const EVENT_CACHE: &str = "hwsim.events";

/// Receiver of completions no handler claimed.
pub type CompletionSink = CompletionCallback;

/// State shared by every simulation thread of one core.
pub struct SimContext {
    clock: VirtualClock,
    timers: TimerWheel,
    registry: ObjectRegistry,
    commands: CommandQueue,
    events: EventQueue,
    completions: CompletionRing,
    caches: CacheSet,
    log_filter: Arc<LogFilter>,
    default_sink: RwLock<Option<CompletionSink>>,
}

impl SimContext {
    /// Build a context with a `mask`-wide clock at `frequency` Hz.
    pub fn new(mask: TickMask, frequency: u64, log_filter: Arc<LogFilter>) -> CoreResult<Self> {
        let caches = CacheSet::new();
        let command_cache = caches.acquire::<CommandRecord>(COMMAND_CACHE)?;
        let event_cache = caches.acquire::<EventNode>(EVENT_CACHE)?;
        Ok(Self {
            clock: VirtualClock::new(mask, frequency),
            timers: TimerWheel::new(mask),
            registry: ObjectRegistry::new(),
            commands: CommandQueue::new(command_cache),
            events: EventQueue::new(event_cache),
            completions: CompletionRing::new(),
            caches,
            log_filter,
            default_sink: RwLock::new(None),
        })
    }

    /// Virtual clock.
    pub fn clock(&self) -> &VirtualClock {
        &self.clock
    }

    /// Timer wheel.
    pub fn timers(&self) -> &TimerWheel {
        &self.timers
    }

    /// Object registry.
    pub fn registry(&self) -> &ObjectRegistry {
        &self.registry
    }

    /// Command pipeline.
    pub fn commands(&self) -> &CommandQueue {
        &self.commands
    }

    /// Event pipeline.
    pub fn events(&self) -> &EventQueue {
        &self.events
    }

    /// Completion ring.
    pub fn completions(&self) -> &CompletionRing {
        &self.completions
    }

    /// Named caches.
    pub fn caches(&self) -> &CacheSet {
        &self.caches
    }

    /// Object logger filter.
    pub fn log_filter(&self) -> &Arc<LogFilter> {
        &self.log_filter
    }

    /// Logger for `<kind>.<name>`.
    pub fn logger(&self, kind: ObjectKind, name: &str) -> ObjectLogger {
        ObjectLogger::new(format!("{kind}.{name}"), Arc::clone(&self.log_filter))
    }

    /// Replace the default completion sink.
    pub fn set_default_sink(&self, sink: Option<CompletionSink>) {
        *self.default_sink.write() = sink;
    }

    fn forward_to_sink(&self, completion: &Completion) {
        let sink = self.default_sink.read().clone();
        match sink {
            Some(sink) => sink(completion),
            None => debug!(
                command = %completion.command_id,
                result = completion.result,
                "completion without handler dropped"
            ),
        }
    }

    /// Run `f` with the object locked and a context bound to it.
    ///
    /// Returns `None` when the object is no longer registered.
    pub fn with_object<R>(
        &self,
        id: ObjectId,
        f: impl FnOnce(&mut dyn SimObject, &ObjectContext<'_>) -> R,
    ) -> Option<R> {
        let entry = self.registry.get(id)?;
        Some(self.with_entry(&entry, f))
    }

    pub(crate) fn with_entry<R>(
        &self,
        entry: &ObjectEntry,
        f: impl FnOnce(&mut dyn SimObject, &ObjectContext<'_>) -> R,
    ) -> R {
        let ctx = ObjectContext { sim: self, entry };
        let mut object = entry.lock();
        f(&mut **object, &ctx)
    }

    /// One update pass of `entry` at the current clock.
    pub fn update_object(&self, entry: &ObjectEntry) {
        let now = self.clock.snapshot();
        self.with_entry(entry, |object, ctx| object.update(now, ctx));
        entry.set_last_update_ns(now.runtime_ns);
    }

    /// Dispatch every pending command to its target.
    pub fn process_commands(&self) -> usize {
        self.commands.process(
            |command| self.dispatch_command(command),
            |command, handler, reason| {
                debug!(command = %command.id, target = %command.target, %reason, "command rejected");
                let completion = Completion {
                    command_id: command.id,
                    result: reason.code(),
                    payload: None,
                };
                self.deliver_completion(handler, &completion);
            },
        )
    }

    fn dispatch_command(&self, command: &Command) -> Result<(), CommandReject> {
        self.with_object(command.target, |object, ctx| object.exec_command(command, ctx))
            .unwrap_or_else(|| Err(CommandReject::NotReady(format!("object {} not found", command.target))))
    }

    /// Execute a command synchronously on the calling thread.
    ///
    /// The command is recorded as submitted first; on rejection the record
    /// is dropped and the reason returned.
    pub fn exec_command(
        &self,
        source: Option<ObjectId>,
        target: ObjectId,
        args: CommandArgs,
        handler: CompletionHandler,
    ) -> CoreResult<CommandId> {
        let entry = self
            .registry
            .get(target)
            .ok_or(CoreError::ObjectNotFound(target))?;
        let command = self.commands.begin(source, target, args, handler)?;
        let result = self.with_entry(&entry, |object, ctx| object.exec_command(&command, ctx));
        match result {
            Ok(()) => Ok(command.id),
            Err(reason) => {
                self.commands.reject(command.id);
                Err(CoreError::CommandRejected { target, reason })
            }
        }
    }

    /// Deliver every queued event.
    pub fn dispatch_events(&self) -> usize {
        self.events.dispatch(|id, notice| {
            if self
                .with_object(id, |object, ctx| object.on_event(notice, ctx))
                .is_none()
            {
                debug!(subscriber = %id, kind = %notice.kind, "event subscriber gone");
            }
        })
    }

    /// Drain the completion ring, routing each entry to its handler.
    pub fn drain_completions(&self) -> usize {
        self.completions.drain(|completion| {
            match self.commands.take_submitted(completion.command_id) {
                Some(record) => self.deliver_completion(record.handler, &completion),
                None => self.forward_to_sink(&completion),
            }
        })
    }

    fn deliver_completion(&self, handler: CompletionHandler, completion: &Completion) {
        match handler {
            CompletionHandler::Default => self.forward_to_sink(completion),
            CompletionHandler::External(callback) => callback(completion),
            CompletionHandler::Object(id) => {
                if self
                    .with_object(id, |object, ctx| object.on_command_complete(completion, ctx))
                    .is_none()
                {
                    debug!(handler = %id, command = %completion.command_id, "completion handler gone");
                }
            }
        }
    }

    /// Status of one object.
    pub fn status(&self, id: ObjectId) -> Option<ObjectStatus> {
        self.registry.get(id).map(|entry| entry.status())
    }
}

/// Context handed to every capability call of one object.
pub struct ObjectContext<'a> {
    sim: &'a SimContext,
    entry: &'a ObjectEntry,
}

impl<'a> ObjectContext<'a> {
    /// Calling object's handle.
    pub fn id(&self) -> ObjectId {
        self.entry.id()
    }

    /// Calling object's name.
    pub fn name(&self) -> &str {
        self.entry.name()
    }

    /// Calling object's kind.
    pub fn kind(&self) -> ObjectKind {
        self.entry.kind()
    }

    /// Calling object's logger.
    pub fn logger(&self) -> &ObjectLogger {
        self.entry.logger()
    }

    /// Shortcut for `logger().log(..)`.
    pub fn log(&self, level: LogLevel, args: std::fmt::Arguments<'_>) {
        self.entry.logger().log(level, args);
    }

    /// Current clock.
    pub fn clock(&self) -> ClockSnapshot {
        self.sim.clock.snapshot()
    }

    /// Tick mask for deadline arithmetic.
    pub fn tick_mask(&self) -> TickMask {
        self.sim.clock.mask()
    }

    /// Controller ticks per second.
    pub fn tick_frequency(&self) -> u64 {
        self.sim.clock.frequency()
    }

    /// Object update period in controller ticks (at least 1).
    pub fn update_period_ticks(&self) -> u64 {
        (self.sim.clock.frequency() / self.entry.update_frequency()).max(1)
    }

    /// Find another object.
    pub fn lookup(&self, kind: ObjectKind, name: &str) -> Option<ObjectId> {
        self.sim.registry.lookup(kind, name)
    }

    /// Handles of every object of `kind`.
    pub fn list(&self, kind: ObjectKind) -> Vec<ObjectId> {
        self.sim.registry.list(kind)
    }

    /// Kind of another object.
    pub fn kind_of(&self, id: ObjectId) -> Option<ObjectKind> {
        self.sim.registry.get(id).map(|e| e.kind())
    }

    /// Status of another object. Locks it, so `id` must be a dependency of
    /// the caller. Returns `None` for the caller itself.
    pub fn status_of(&self, id: ObjectId) -> Option<ObjectStatus> {
        if id == self.entry.id() {
            return None;
        }
        self.sim.status(id)
    }

    /// Queue a command from this object.
    pub fn submit_command(
        &self,
        target: ObjectId,
        args: CommandArgs,
        handler: CompletionHandler,
    ) -> CoreResult<CommandId> {
        self.sim
            .commands
            .submit(Some(self.entry.id()), target, args, handler)
    }

    /// Post the completion of a command this object accepted.
    pub fn complete(&self, command: CommandId, result: i32, payload: Option<ResultPayload>) {
        self.sim.completions.post(command, result, payload);
    }

    /// Emit an event from this object.
    pub fn emit(&self, data: EventData) -> CoreResult<()> {
        self.sim
            .events
            .submit(self.entry.kind(), self.entry.id(), self.entry.name_arc(), data)
    }

    /// Emit an event whose payload the caller keeps a reference to.
    pub fn emit_shared(&self, data: Arc<EventData>) -> CoreResult<()> {
        self.sim
            .events
            .submit_shared(self.entry.kind(), self.entry.id(), self.entry.name_arc(), data)
    }

    /// Subscribe this object's `on_event` to `event` from `source_kind`.
    pub fn subscribe(
        &self,
        event: EventKind,
        source_kind: ObjectKind,
        source: Option<ObjectId>,
    ) -> SubscriptionId {
        self.sim
            .events
            .subscribe(event, source_kind, source, EventHandler::Object(self.entry.id()))
    }

    /// Remove a subscription.
    pub fn unsubscribe(&self, event: EventKind, id: SubscriptionId) -> CoreResult<()> {
        self.sim.events.unsubscribe(event, id)
    }

    /// Register a timer owned by this object.
    pub fn register_timer(&self, timeout: u64, callback: TimerCallback) -> TimerHandle {
        self.sim
            .timers
            .register_owned(Some(self.entry.id()), timeout, callback)
    }

    /// Move a timer.
    pub fn reschedule_timer(&self, handle: TimerHandle, timeout: u64) -> CoreResult<()> {
        self.sim.timers.reschedule(handle, timeout)
    }

    /// Remove a timer.
    pub fn unregister_timer(&self, handle: TimerHandle) -> CoreResult<()> {
        self.sim.timers.unregister(handle)
    }
}
