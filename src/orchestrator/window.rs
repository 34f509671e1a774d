use crate::model::{backend_url, WindowId};
use crate::orchestrator::SupervisorState;
use anyhow::Result;

/// What a window should show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WindowRequest {
    pub id: WindowId,
    pub url: String,
    pub title: String,
}

/// Presentation layer that actually puts a window on screen.
///
/// Hosts report user-initiated closes back to the event loop as
/// `ShellEvent::WindowClosed`.
pub(crate) trait WindowHost {
    fn open(&mut self, request: WindowRequest) -> Result<()>;

    /// Dismiss a window the supervisor no longer wants (shutdown).
    fn close(&mut self, id: WindowId);
}

/// Host for runs without a terminal UI: the "window" is the announced URL.
#[derive(Debug, Default)]
pub(crate) struct HeadlessHost;

impl WindowHost for HeadlessHost {
    fn open(&mut self, request: WindowRequest) -> Result<()> {
        tracing::info!(window = %request.id, url = %request.url, "{} is ready at {}", request.title, request.url);
        Ok(())
    }

    fn close(&mut self, id: WindowId) {
        tracing::debug!(window = %id, "window dismissed");
    }
}

/// Keeps at most one primary window, opened only once the backend is ready.
pub(crate) struct WindowCoordinator<H> {
    host: H,
    title: String,
    next_id: u64,
}

impl<H: WindowHost> WindowCoordinator<H> {
    pub(crate) fn new(host: H, title: String) -> Self {
        Self {
            host,
            title,
            next_id: 1,
        }
    }

    /// Open the primary window against the backend URL.
    ///
    /// Returns `Ok(None)` without touching the host when shutdown is armed, the
    /// backend is not ready yet, or a primary window already exists.
    pub(crate) fn open_primary(&mut self, state: &mut SupervisorState) -> Result<Option<WindowId>> {
        if state.is_shutting_down() {
            tracing::info!("shutdown in progress, not creating a window");
            return Ok(None);
        }
        if !state.is_ready() {
            tracing::debug!("backend not ready yet, window creation postponed");
            return Ok(None);
        }
        if let Some(existing) = state.window() {
            tracing::debug!(window = %existing, "primary window already open");
            return Ok(None);
        }
        let Some(port) = state.port() else {
            tracing::warn!("no backend port recorded, cannot open a window");
            return Ok(None);
        };

        let id = WindowId(self.next_id);
        self.next_id += 1;
        self.host.open(WindowRequest {
            id,
            url: backend_url(port),
            title: self.title.clone(),
        })?;
        state.set_window(id);
        Ok(Some(id))
    }

    /// A window went away. Returns `true` when that left no window open.
    pub(crate) fn window_closed(&mut self, state: &mut SupervisorState, id: WindowId) -> bool {
        if state.clear_window(id) {
            tracing::info!(window = %id, "window closed");
            true
        } else {
            tracing::debug!(window = %id, "close for a window that is not current");
            false
        }
    }

    /// Dismiss the current window, if any.
    pub(crate) fn close_all(&mut self, state: &mut SupervisorState) {
        if let Some(id) = state.window() {
            state.clear_window(id);
            self.host.close(id);
        }
    }

    #[cfg(test)]
    pub(crate) fn host(&self) -> &H {
        &self.host
    }
}
