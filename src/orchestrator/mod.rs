//! Application-level lifecycle orchestration.
//!
//! This module owns the supervisor state machine, the shutdown and window
//! coordinators, and the event loop that ties them to the backend plumbing.
//! CLI and window layers only talk to it through `ShellEvent`s.

mod controller;
mod shutdown;
mod state;
mod window;

pub(crate) use controller::{RunSummary, Supervisor};
pub(crate) use state::SupervisorState;
pub(crate) use window::{HeadlessHost, WindowHost, WindowRequest};
