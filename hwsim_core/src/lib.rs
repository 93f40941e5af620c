//! # hwsim Core Library
//!
//! Concurrent simulation core of a motion-controller hardware emulator:
//! objects (steppers, axes, heaters, ...) advance in lock-step with a
//! virtual clock and talk to each other and to the outside world through
//! command, event and completion pipelines.
//!
//! # Module Structure
//!
//! - [`core`] - `SimCore`: lifecycle, threads, stepped mode
//! - [`context`] - state shared by all threads, per-call object context
//! - [`registry`] - live objects and the factory table
//! - [`object`] - `SimObject` capability trait
//! - [`objects`] - built-in object models
//! - [`commands`] / [`events`] / [`completion`] - the three pipelines
//! - [`clock`] / [`timers`] / [`threads`] - time and scheduling
//! - [`cache`] - segment allocator for pipeline records
//! - [`notify`] - wake signal for clock waiters
//! - [`logging`] - per-object loggers with glob filter rules
//! - [`error`] - `CoreError`
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                              SimCore                              │
//! │                                                                   │
//! │  clock thread ──publish──► VirtualClock ──wake──► timer thread    │
//! │                                 │                      │          │
//! │                                 ▼                      ▼          │
//! │  object threads ──update──► SimObject ◄──────── TimerWheel        │
//! │        ▲                        │                                 │
//! │        │                  emit / complete                         │
//! │        │                        ▼                                 │
//! │  command worker ◄── pending   EventQueue ──► event worker          │
//! │                               CompletionRing ──► completion worker │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust
//! use hwsim_core::prelude::*;
//!
//! let core = SimCore::with_builtin_objects(CoreConfig::default()).unwrap();
//! let options: toml::Table = "microsteps = 16".parse().unwrap();
//! let motor = core.create_object(ObjectKind::Stepper, "x_motor", &options).unwrap();
//! core.init_all().unwrap();
//!
//! let enable = CommandArgs::Stepper(StepperCommand::Enable { enable: true });
//! core.exec_command(motor, enable, CompletionHandler::Default).unwrap();
//! core.step(1_000).unwrap();
//! ```

#![warn(missing_docs)]

pub mod cache;
pub mod clock;
pub mod commands;
pub mod completion;
pub mod context;
pub mod core;
pub mod error;
pub mod events;
pub mod logging;
pub mod notify;
pub mod object;
pub mod objects;
pub mod registry;
pub mod threads;
pub mod timers;

// Re-export key types for convenience
pub use crate::core::{CoreConfig, ObjectReport, SimCore};
pub use crate::error::{CoreError, CoreResult};
pub use crate::object::SimObject;

/// Common imports for embedding the core.
pub mod prelude {
    pub use crate::clock::{ClockSnapshot, ClockStats, TickMask};
    pub use crate::commands::{Command, CompletionHandler};
    pub use crate::completion::Completion;
    pub use crate::context::{CompletionSink, ObjectContext};
    pub use crate::core::{CoreConfig, ObjectReport, SimCore};
    pub use crate::error::{CoreError, CoreResult};
    pub use crate::events::{EventHandler, EventNotice, SubscriptionId};
    pub use crate::object::SimObject;
    pub use crate::registry::{ObjectFactories, ObjectState};
    pub use crate::timers::TimerHandle;
    pub use hwsim_common::prelude::*;
}
