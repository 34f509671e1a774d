//! Backend process plumbing: port selection, launch, stream forwarding and
//! readiness gating. Lifecycle decisions live in `orchestrator`.

mod launcher;
mod output;
mod plan;
mod port;
mod readiness;

pub(crate) use launcher::{BackendHandle, BackendLauncher};
pub(crate) use output::StderrFilter;
pub(crate) use plan::LaunchPlan;
pub(crate) use port::{find_available_port, DEFAULT_SCAN_WINDOW};
pub(crate) use readiness::{wait_until_ready, Readiness};
