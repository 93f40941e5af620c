//! hwsim Common Library
//!
//! Shared data model, configuration loading and constants for the hwsim
//! emulator workspace.
//!
//! # Module Structure
//!
//! - [`config`] - Configuration loading traits and types
//! - [`consts`] - Emulator-wide constants and result codes
//! - [`machine`] - Machine description (`machine.toml`)
//! - [`object`] - Object kinds, commands, events, statuses and errors
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use hwsim_common::prelude::*;
//!
//! let args = CommandArgs::Stepper(StepperCommand::Enable { enable: true });
//! assert_eq!(args.target_kind(), ObjectKind::Stepper);
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod consts;
pub mod machine;
pub mod object;
pub mod prelude;
