use crate::backend::BackendHandle;
use crate::model::QuitSource;
use crate::orchestrator::SupervisorState;
use std::time::Duration;

/// Anything that ends the application run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExitTrigger {
    /// The last window closed on a platform where that quits
    AllWindowsClosed,
    /// Explicit quit from a window or a process signal
    QuitRequested(QuitSource),
    /// The window host could not show the primary window
    WindowUnavailable,
}

/// Terminates the backend exactly once, whichever exit trigger arrives first.
#[derive(Debug)]
pub(crate) struct ShutdownCoordinator {
    stop_timeout: Duration,
    awaiting_exit: Option<u32>,
    terminations: u32,
}

impl ShutdownCoordinator {
    pub(crate) fn new(stop_timeout: Duration) -> Self {
        Self {
            stop_timeout,
            awaiting_exit: None,
            terminations: 0,
        }
    }

    /// Handle an exit trigger. Returns `true` only for the trigger that armed
    /// shutdown; every later trigger is a no-op.
    pub(crate) fn trigger(&mut self, state: &mut SupervisorState, trigger: ExitTrigger) -> bool {
        if !state.try_begin_shutdown() {
            tracing::debug!(?trigger, "shutdown already in progress, ignoring exit trigger");
            return false;
        }
        tracing::info!(?trigger, "shutting down");
        match state.take_backend() {
            Some(handle) => self.terminate(handle),
            None => tracing::debug!("no backend handle yet, termination deferred to launch"),
        }
        true
    }

    /// Attach a freshly launched handle, terminating it at once if shutdown
    /// was armed while it was being launched.
    pub(crate) fn adopt(&mut self, state: &mut SupervisorState, handle: BackendHandle) {
        if let Some(late) = state.attach_backend(handle) {
            if state.is_shutting_down() {
                tracing::info!(pid = late.pid(), "backend came up after shutdown was requested");
                self.terminate(late);
            } else {
                // launcher refuses a second launch; reaching this is a bug
                let pid = late.pid();
                match late.terminate(self.stop_timeout) {
                    Some(_) => tracing::error!(pid, "second backend handle rejected, stop requested"),
                    None => tracing::error!(pid, "second backend handle rejected, already gone"),
                }
            }
        }
    }

    fn terminate(&mut self, handle: BackendHandle) {
        self.terminations += 1;
        let pid = handle.pid();
        if let Some(exit) = handle.exit() {
            tracing::debug!(pid, %exit, "backend already exited, nothing to terminate");
            return;
        }
        match handle.terminate(self.stop_timeout) {
            Some(pid) => {
                tracing::info!(pid, "backend termination requested");
                self.awaiting_exit = Some(pid);
            }
            None => tracing::debug!(pid, "backend exited before termination"),
        }
    }

    /// Note a reported backend exit.
    pub(crate) fn observe_exit(&mut self, pid: u32) {
        if self.awaiting_exit == Some(pid) {
            tracing::info!(pid, "backend terminated");
            self.awaiting_exit = None;
        }
    }

    /// Shutdown is armed and no terminated backend is still winding down.
    pub(crate) fn is_complete(&self, state: &SupervisorState) -> bool {
        state.is_shutting_down() && self.awaiting_exit.is_none()
    }

    pub(crate) fn awaiting_exit(&self) -> Option<u32> {
        self.awaiting_exit
    }

    /// How many times a backend handle went through termination.
    pub(crate) fn terminations(&self) -> u32 {
        self.terminations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BackendExit;
    use proptest::prelude::*;

    fn armed_with_backend(pid: u32) -> (SupervisorState, tokio::sync::oneshot::Receiver<Duration>) {
        let mut state = SupervisorState::new();
        state.record_port(5000);
        let (handle, stop_rx) = BackendHandle::detached(pid, 5000);
        assert!(state.attach_backend(handle).is_none());
        (state, stop_rx)
    }

    #[test]
    fn last_window_close_terminates_once() {
        let (mut state, mut stop_rx) = armed_with_backend(42);
        let mut shutdown = ShutdownCoordinator::new(Duration::from_secs(5));

        assert!(shutdown.trigger(&mut state, ExitTrigger::AllWindowsClosed));
        assert_eq!(stop_rx.try_recv().unwrap(), Duration::from_secs(5));
        assert!(state.backend().is_none());
        assert_eq!(shutdown.awaiting_exit(), Some(42));

        // second close right after is a no-op
        assert!(!shutdown.trigger(&mut state, ExitTrigger::AllWindowsClosed));
        assert_eq!(shutdown.terminations(), 1);

        assert!(!shutdown.is_complete(&state));
        shutdown.observe_exit(42);
        assert!(shutdown.is_complete(&state));
    }

    #[test]
    fn already_exited_backend_is_not_signalled() {
        let (mut state, mut stop_rx) = armed_with_backend(42);
        state.mark_backend_exited(42, BackendExit::Code(3));
        let mut shutdown = ShutdownCoordinator::new(Duration::from_secs(5));

        assert!(shutdown.trigger(
            &mut state,
            ExitTrigger::QuitRequested(QuitSource::Interrupt)
        ));
        assert!(stop_rx.try_recv().is_err());
        assert!(shutdown.is_complete(&state));
    }

    #[test]
    fn terminate_against_vanished_watcher_is_absorbed() {
        let (mut state, stop_rx) = armed_with_backend(42);
        drop(stop_rx);
        let mut shutdown = ShutdownCoordinator::new(Duration::from_secs(5));

        assert!(shutdown.trigger(&mut state, ExitTrigger::QuitRequested(QuitSource::Window)));
        assert_eq!(shutdown.awaiting_exit(), None);
        assert!(shutdown.is_complete(&state));
    }

    #[test]
    fn quit_before_handle_exists_still_terminates_late_handle() {
        let mut state = SupervisorState::new();
        state.record_port(5000);
        let mut shutdown = ShutdownCoordinator::new(Duration::from_secs(1));

        assert!(shutdown.trigger(
            &mut state,
            ExitTrigger::QuitRequested(QuitSource::Terminate)
        ));
        assert_eq!(shutdown.terminations(), 0);

        let (handle, mut stop_rx) = BackendHandle::detached(77, 5000);
        shutdown.adopt(&mut state, handle);

        assert_eq!(stop_rx.try_recv().unwrap(), Duration::from_secs(1));
        assert!(state.backend().is_none());
        assert_eq!(shutdown.awaiting_exit(), Some(77));
        assert_eq!(shutdown.terminations(), 1);
    }

    #[test]
    fn rejected_second_handle_is_stopped_without_counting() {
        let (mut state, mut first_rx) = armed_with_backend(42);
        let mut shutdown = ShutdownCoordinator::new(Duration::from_secs(2));

        let (second, mut second_rx) = BackendHandle::detached(43, 5000);
        shutdown.adopt(&mut state, second);

        assert_eq!(second_rx.try_recv().unwrap(), Duration::from_secs(2));
        assert!(first_rx.try_recv().is_err());
        assert_eq!(state.backend().map(BackendHandle::pid), Some(42));
        assert_eq!(shutdown.terminations(), 0);
        assert_eq!(shutdown.awaiting_exit(), None);
    }

    fn any_trigger() -> impl Strategy<Value = ExitTrigger> {
        prop_oneof![
            Just(ExitTrigger::AllWindowsClosed),
            Just(ExitTrigger::WindowUnavailable),
            Just(ExitTrigger::QuitRequested(QuitSource::Window)),
            Just(ExitTrigger::QuitRequested(QuitSource::Interrupt)),
            Just(ExitTrigger::QuitRequested(QuitSource::Terminate)),
        ]
    }

    proptest! {
        #[test]
        fn prop_termination_runs_at_most_once(
            triggers in proptest::collection::vec(any_trigger(), 1..30),
            with_backend in any::<bool>(),
        ) {
            let mut state = SupervisorState::new();
            state.record_port(5000);
            let mut _stop_rx = None;
            if with_backend {
                let (handle, rx) = BackendHandle::detached(9, 5000);
                state.attach_backend(handle);
                _stop_rx = Some(rx);
            }
            let mut shutdown = ShutdownCoordinator::new(Duration::from_millis(10));

            let armed: usize = triggers
                .into_iter()
                .map(|t| shutdown.trigger(&mut state, t))
                .filter(|armed| *armed)
                .count();

            prop_assert_eq!(armed, 1);
            prop_assert_eq!(shutdown.terminations(), u32::from(with_backend));
            prop_assert!(state.is_shutting_down());
            prop_assert!(state.backend().is_none());
        }
    }
}
