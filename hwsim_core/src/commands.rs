//! Command pipeline.
//!
//! ```text
//!   submit ──► pending ──worker──► submitted ──exec_command──► target
//!                                      ▲                          │
//!                                      └──── completion ring ◄────┘
//! ```
//!
//! A command is recorded in the submitted set *before* the target sees it,
//! so a completion posted from inside `exec_command` always finds its
//! record. A synchronous rejection removes the record again and is
//! reported straight to the submitter's handler.

use crate::cache::{CacheBox, ObjectCache};
use crate::completion::Completion;
use crate::error::CoreResult;
use hwsim_common::object::{CommandArgs, CommandId, CommandReject, ObjectId};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Command delivered to a target's `exec_command`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Command {
    /// Unique id; completions refer to it.
    pub id: CommandId,
    /// Submitting object, `None` for external submitters.
    pub source: Option<ObjectId>,
    /// Target object.
    pub target: ObjectId,
    /// Typed sub-command.
    pub args: CommandArgs,
}

/// External completion callback.
pub type CompletionCallback = Arc<dyn Fn(&Completion) + Send + Sync>;

/// Who is told when a command completes or is rejected.
#[derive(Clone, Default)]
pub enum CompletionHandler {
    /// Forward to the core's default completion sink.
    #[default]
    Default,
    /// Delivered to the object's `on_command_complete`.
    Object(ObjectId),
    /// Delivered to a caller-owned callback.
    External(CompletionCallback),
}

impl fmt::Debug for CompletionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionHandler::Default => f.write_str("Default"),
            CompletionHandler::Object(id) => f.debug_tuple("Object").field(id).finish(),
            CompletionHandler::External(_) => f.write_str("External(..)"),
        }
    }
}

/// Cached command record.
#[derive(Debug)]
pub struct CommandRecord {
    /// The command.
    pub command: Command,
    /// Completion handler.
    pub handler: CompletionHandler,
}

/// Pending queue and submitted set.
pub struct CommandQueue {
    cache: ObjectCache<CommandRecord>,
    next_id: AtomicU64,
    pending: Mutex<VecDeque<CacheBox<CommandRecord>>>,
    submitted: Mutex<HashMap<CommandId, CacheBox<CommandRecord>>>,
}

impl CommandQueue {
    /// Queue allocating records from `cache`.
    pub fn new(cache: ObjectCache<CommandRecord>) -> Self {
        Self {
            cache,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(VecDeque::new()),
            submitted: Mutex::new(HashMap::new()),
        }
    }

    fn next_id(&self) -> CommandId {
        let raw = self.next_id.fetch_add(1, Ordering::Relaxed) & !CommandId::ERROR_FLAG;
        CommandId::from_raw(raw)
    }

    fn record(
        &self,
        source: Option<ObjectId>,
        target: ObjectId,
        args: CommandArgs,
        handler: CompletionHandler,
    ) -> CoreResult<CacheBox<CommandRecord>> {
        self.cache.alloc(CommandRecord {
            command: Command {
                id: self.next_id(),
                source,
                target,
                args,
            },
            handler,
        })
    }

    /// Queue a command for the worker. Never waits on the target.
    pub fn submit(
        &self,
        source: Option<ObjectId>,
        target: ObjectId,
        args: CommandArgs,
        handler: CompletionHandler,
    ) -> CoreResult<CommandId> {
        let record = self.record(source, target, args, handler)?;
        let id = record.command.id;
        self.pending.lock().push_back(record);
        Ok(id)
    }

    /// Record a command as submitted without queueing it (synchronous path).
    ///
    /// The caller runs `exec_command` itself and calls
    /// [`reject`](Self::reject) if the target refuses.
    pub fn begin(
        &self,
        source: Option<ObjectId>,
        target: ObjectId,
        args: CommandArgs,
        handler: CompletionHandler,
    ) -> CoreResult<Command> {
        let record = self.record(source, target, args, handler)?;
        let command = record.command;
        self.submitted.lock().insert(command.id, record);
        Ok(command)
    }

    /// Remove a rejected command from the submitted set.
    pub fn reject(&self, id: CommandId) -> Option<CompletionHandler> {
        self.submitted.lock().remove(&id).map(|r| r.into_inner().handler)
    }

    /// Dispatch every pending command.
    ///
    /// `exec` runs the target's `exec_command`; `rejected` is told about
    /// each refusal with the command, its handler and the reason.
    pub fn process(
        &self,
        mut exec: impl FnMut(&Command) -> Result<(), CommandReject>,
        mut rejected: impl FnMut(&Command, CompletionHandler, CommandReject),
    ) -> usize {
        let batch: Vec<CacheBox<CommandRecord>> = self.pending.lock().drain(..).collect();
        let count = batch.len();

        for record in batch {
            let command = record.command;
            self.submitted.lock().insert(command.id, record);
            if let Err(reason) = exec(&command) {
                if let Some(handler) = self.reject(command.id) {
                    rejected(&command, handler, reason);
                }
            }
        }
        count
    }

    /// Take the submitted record matching a completion.
    pub fn take_submitted(&self, id: CommandId) -> Option<CommandRecord> {
        self.submitted.lock().remove(&id).map(CacheBox::into_inner)
    }

    /// Ids of every queued or in-flight command aimed at `target`.
    ///
    /// Pending ones move to the submitted set so that a completion posted
    /// for them still reaches their handler.
    pub fn purge_target(&self, target: ObjectId) -> Vec<CommandId> {
        let mut pending = self.pending.lock();
        let mut submitted = self.submitted.lock();

        let mut ids: Vec<CommandId> = submitted
            .values()
            .filter(|r| r.command.target == target)
            .map(|r| r.command.id)
            .collect();

        let mut kept = VecDeque::with_capacity(pending.len());
        for record in pending.drain(..) {
            if record.command.target == target {
                ids.push(record.command.id);
                submitted.insert(record.command.id, record);
            } else {
                kept.push_back(record);
            }
        }
        *pending = kept;
        ids.sort();
        ids
    }

    /// Queued, not yet dispatched commands.
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Dispatched commands awaiting completion.
    pub fn in_flight(&self) -> usize {
        self.submitted.lock().len()
    }

    /// Drop every pending and submitted record.
    pub fn clear(&self) {
        self.pending.lock().clear();
        self.submitted.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hwsim_common::object::{Direction, StepperCommand};
    use std::collections::HashSet;
    use std::thread;

    fn queue() -> Arc<CommandQueue> {
        Arc::new(CommandQueue::new(ObjectCache::new("commands")))
    }

    fn enable() -> CommandArgs {
        CommandArgs::Stepper(StepperCommand::Enable { enable: true })
    }

    #[test]
    fn ids_are_unique_across_threads() {
        let commands = queue();
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let commands = Arc::clone(&commands);
                thread::spawn(move || {
                    (0..500)
                        .map(|_| {
                            commands
                                .submit(None, ObjectId::from_raw(1), enable(), CompletionHandler::Default)
                                .unwrap()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for worker in workers {
            for id in worker.join().unwrap() {
                assert!(!id.is_error());
                assert!(seen.insert(id));
            }
        }
        assert_eq!(seen.len(), 4_000);
        assert_eq!(commands.pending(), 4_000);
    }

    #[test]
    fn record_is_submitted_before_exec() {
        let commands = queue();
        let id = commands
            .submit(None, ObjectId::from_raw(1), enable(), CompletionHandler::Default)
            .unwrap();

        let mut visible = false;
        commands.process(
            |cmd| {
                visible = commands.in_flight() == 1 && cmd.id == id;
                Ok(())
            },
            |_, _, _| panic!("not rejected"),
        );
        assert!(visible);
        assert!(commands.take_submitted(id).is_some());
        assert!(commands.take_submitted(id).is_none());
    }

    #[test]
    fn rejection_removes_record_and_reports() {
        let commands = queue();
        let source = ObjectId::from_raw(5);
        let id = commands
            .submit(
                Some(source),
                ObjectId::from_raw(1),
                CommandArgs::Stepper(StepperCommand::Move {
                    steps: 10,
                    direction: Direction::Forward,
                }),
                CompletionHandler::Object(source),
            )
            .unwrap();

        let mut reports = Vec::new();
        commands.process(
            |_| Err(CommandReject::Busy),
            |cmd, handler, reason| reports.push((cmd.id, format!("{handler:?}"), reason.code())),
        );
        assert_eq!(reports, vec![(id, format!("Object({source:?})"), -16)]);
        assert_eq!(commands.in_flight(), 0);
    }

    #[test]
    fn purge_collects_pending_and_submitted() {
        let commands = queue();
        let doomed = ObjectId::from_raw(2);
        let other = ObjectId::from_raw(3);

        let sent = commands.begin(None, doomed, enable(), CompletionHandler::Default).unwrap();
        let queued = commands.submit(None, doomed, enable(), CompletionHandler::Default).unwrap();
        let survivor = commands.submit(None, other, enable(), CompletionHandler::Default).unwrap();

        let purged = commands.purge_target(doomed);
        assert_eq!(purged, vec![sent.id, queued]);
        assert_eq!(commands.pending(), 1);
        assert_eq!(commands.in_flight(), 2);
        assert!(commands.take_submitted(queued).is_some());
        assert!(commands.take_submitted(survivor).is_none());
    }
}
