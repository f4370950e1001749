//! # Device Policy Daemon
//!
//! Host process for the device policy service.
//!
//! ## Philosophy
//!
//! - **Thin host**: All policy logic lives in `services_device_policy`
//! - **Explicit configuration**: A JSON file plus command line overrides
//! - **Ephemeral mode is first-class**: For tests and dry runs
//!
//! ## Responsibilities
//!
//! The daemon:
//! - Loads the configuration and opens the journal
//! - Runs the startup pass (cleanup, overdue removals, enforcement)
//! - Prints the resulting state on request

pub mod runtime;

pub use runtime::{Daemon, DaemonConfig, DaemonError, StoreMode};
