use crate::backend::output::{self, StderrFilter};
use crate::backend::plan::LaunchPlan;
use crate::error::SupervisorError;
use crate::model::{BackendExit, ShellEvent};
use crate::orchestrator::SupervisorState;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;

/// The running backend process as seen by the supervisor.
///
/// The child itself is owned by its watcher task; the handle only carries the
/// identity, the port, and the channel used to ask the watcher to stop it.
#[derive(Debug)]
pub(crate) struct BackendHandle {
    pid: u32,
    port: u16,
    exit: Option<BackendExit>,
    stop_tx: Option<oneshot::Sender<Duration>>,
}

impl BackendHandle {
    fn new(pid: u32, port: u16, stop_tx: oneshot::Sender<Duration>) -> Self {
        Self {
            pid,
            port,
            exit: None,
            stop_tx: Some(stop_tx),
        }
    }

    /// Handle with no process behind it; the receiver stands in for the watcher.
    #[cfg(test)]
    pub(crate) fn detached(pid: u32, port: u16) -> (Self, oneshot::Receiver<Duration>) {
        let (stop_tx, stop_rx) = oneshot::channel();
        (Self::new(pid, port, stop_tx), stop_rx)
    }

    pub(crate) fn pid(&self) -> u32 {
        self.pid
    }

    pub(crate) fn port(&self) -> u16 {
        self.port
    }

    pub(crate) fn exit(&self) -> Option<BackendExit> {
        self.exit
    }

    pub(crate) fn is_running(&self) -> bool {
        self.exit.is_none()
    }

    pub(crate) fn mark_exited(&mut self, exit: BackendExit) {
        self.exit = Some(exit);
        self.stop_tx = None;
    }

    /// Ask the watcher to stop the process, allowing `grace` before a hard kill.
    ///
    /// Returns the pid when a stop was actually delivered. A process that has
    /// already exited has no watcher left to receive it; that is not an error.
    pub(crate) fn terminate(mut self, grace: Duration) -> Option<u32> {
        if !self.is_running() {
            return None;
        }
        let stop_tx = self.stop_tx.take()?;
        match stop_tx.send(grace) {
            Ok(()) => Some(self.pid),
            Err(_) => {
                tracing::debug!(pid = self.pid, "backend already gone when termination was sent");
                None
            }
        }
    }
}

/// Starts the backend process and wires its streams and exit observer.
pub(crate) struct BackendLauncher {
    filter: StderrFilter,
    events: UnboundedSender<ShellEvent>,
}

impl BackendLauncher {
    pub(crate) fn new(filter: StderrFilter, events: UnboundedSender<ShellEvent>) -> Self {
        Self { filter, events }
    }

    /// Launch the single backend for this run.
    ///
    /// Rejected without spawning anything when a handle already exists or
    /// shutdown has been armed. The caller attaches the returned handle.
    pub(crate) fn launch(
        &self,
        state: &SupervisorState,
        plan: &LaunchPlan,
        port: u16,
    ) -> Result<BackendHandle, SupervisorError> {
        if state.is_shutting_down() {
            return Err(SupervisorError::ShuttingDown);
        }
        if state.backend().is_some() {
            return Err(SupervisorError::AlreadyRunning);
        }
        self.spawn(plan, port)
    }

    fn spawn(&self, plan: &LaunchPlan, port: u16) -> Result<BackendHandle, SupervisorError> {
        plan.check_program()?;

        tracing::info!(
            program = %plan.display_program(),
            cwd = %plan.cwd.display(),
            port,
            "starting backend"
        );
        let mut command = Command::new(&plan.program);
        command
            .args(&plan.args)
            .current_dir(&plan.cwd)
            .envs(plan.env(port))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group: a terminal Ctrl-C reaches only the supervisor,
        // which then stops the backend itself.
        #[cfg(unix)]
        command.process_group(0);
        let mut child = command
            .spawn()
            .map_err(|source| SupervisorError::Spawn {
                program: plan.display_program(),
                source,
            })?;

        let Some(pid) = child.id() else {
            return Err(SupervisorError::Spawn {
                program: plan.display_program(),
                source: std::io::Error::other("process exited before its pid was known"),
            });
        };

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(async move {
                let stats = output::forward_stdout(stdout).await;
                tracing::debug!(pid, lines = stats.lines, "backend stdout closed");
            });
        }
        if let Some(stderr) = child.stderr.take() {
            let filter = self.filter.clone();
            tokio::spawn(async move {
                let stats = output::forward_stderr(stderr, filter).await;
                tracing::debug!(
                    pid,
                    lines = stats.lines,
                    suppressed = stats.suppressed,
                    "backend stderr closed"
                );
            });
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        tokio::spawn(watch_child(child, pid, stop_rx, self.events.clone()));

        tracing::info!(pid, port, "backend started");
        Ok(BackendHandle::new(pid, port, stop_tx))
    }
}

/// Own the child until it exits, on its own or because a stop was requested,
/// then report the exit to the event loop.
async fn watch_child(
    mut child: Child,
    pid: u32,
    mut stop_rx: oneshot::Receiver<Duration>,
    events: UnboundedSender<ShellEvent>,
) {
    // A dropped sender disables the stop branch; the child is then only awaited.
    let status = tokio::select! {
        status = child.wait() => status,
        Ok(grace) = &mut stop_rx => stop_child(&mut child, pid, grace).await,
    };

    let exit = match status {
        Ok(status) => BackendExit::from_status(status),
        Err(e) => {
            tracing::warn!(pid, "failed to collect backend exit status: {e}");
            BackendExit::Unknown
        }
    };
    let _ = events.send(ShellEvent::BackendExited { pid, exit });
}

async fn stop_child(child: &mut Child, pid: u32, grace: Duration) -> std::io::Result<ExitStatus> {
    if request_graceful_stop(pid) {
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(status) => return status,
            Err(_) => tracing::warn!(pid, ?grace, "backend did not stop in time, killing"),
        }
    }
    if let Err(e) = child.kill().await {
        tracing::debug!(pid, "kill failed, process likely already exited: {e}");
    }
    child.wait().await
}

#[cfg(unix)]
fn request_graceful_stop(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // SAFETY: kill(2) has no memory-safety preconditions; pid is a positive
    // id of a child this process spawned.
    unsafe { libc::kill(pid, libc::SIGTERM) == 0 }
}

#[cfg(not(unix))]
fn request_graceful_stop(_pid: u32) -> bool {
    false
}
