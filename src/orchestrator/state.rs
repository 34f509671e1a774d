//! Lifecycle state shared by the launcher, window and shutdown coordinators.
//!
//! Owned by the event loop and lent out by reference; every mutation is a
//! single method call on `&mut self`, so a transition can never be observed
//! half-applied.

use crate::backend::BackendHandle;
use crate::model::{BackendExit, WindowId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Armed,
    ShuttingDown,
}

#[derive(Debug)]
pub(crate) struct SupervisorState {
    lifecycle: Lifecycle,
    port: Option<u16>,
    backend: Option<BackendHandle>,
    ready: bool,
    window: Option<WindowId>,
}

impl SupervisorState {
    pub(crate) fn new() -> Self {
        Self {
            lifecycle: Lifecycle::Armed,
            port: None,
            backend: None,
            ready: false,
            window: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.lifecycle == Lifecycle::ShuttingDown
    }

    /// Move Armed -> ShuttingDown. Returns `false` if shutdown was already armed.
    pub(crate) fn try_begin_shutdown(&mut self) -> bool {
        match self.lifecycle {
            Lifecycle::Armed => {
                self.lifecycle = Lifecycle::ShuttingDown;
                true
            }
            Lifecycle::ShuttingDown => false,
        }
    }

    pub(crate) fn port(&self) -> Option<u16> {
        self.port
    }

    pub(crate) fn record_port(&mut self, port: u16) {
        self.port = Some(port);
    }

    pub(crate) fn backend(&self) -> Option<&BackendHandle> {
        self.backend.as_ref()
    }

    /// Store the backend handle. Hands it back when it must not be kept: a
    /// handle already exists, or shutdown was armed while it was being launched.
    pub(crate) fn attach_backend(&mut self, handle: BackendHandle) -> Option<BackendHandle> {
        if self.is_shutting_down() || self.backend.is_some() {
            return Some(handle);
        }
        debug_assert_eq!(self.port, Some(handle.port()));
        self.backend = Some(handle);
        None
    }

    pub(crate) fn take_backend(&mut self) -> Option<BackendHandle> {
        self.backend.take()
    }

    /// Record an exit for the current handle. Returns `false` for unknown pids.
    pub(crate) fn mark_backend_exited(&mut self, pid: u32, exit: BackendExit) -> bool {
        match self.backend.as_mut() {
            Some(handle) if handle.pid() == pid => {
                handle.mark_exited(exit);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.ready
    }

    pub(crate) fn mark_ready(&mut self) {
        self.ready = true;
    }

    pub(crate) fn window(&self) -> Option<WindowId> {
        self.window
    }

    pub(crate) fn set_window(&mut self, id: WindowId) {
        self.window = Some(id);
    }

    /// Forget `id` if it is the current window. Returns whether it was.
    pub(crate) fn clear_window(&mut self, id: WindowId) -> bool {
        if self.window == Some(id) {
            self.window = None;
            true
        } else {
            false
        }
    }
}

impl Default for SupervisorState {
    fn default() -> Self {
        Self::new()
    }
}
