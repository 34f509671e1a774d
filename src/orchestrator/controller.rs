//! Supervisor event loop.
//!
//! Runs port selection, launch, readiness and window creation in order, while
//! exit triggers and backend events are serviced the whole time.

use crate::backend::{
    find_available_port, wait_until_ready, BackendHandle, BackendLauncher, LaunchPlan, Readiness,
    StderrFilter,
};
use crate::model::{app_version, BackendExit, BackendStatus, ShellEvent, SupervisorConfig};
use crate::orchestrator::shutdown::{ExitTrigger, ShutdownCoordinator};
use crate::orchestrator::window::{WindowCoordinator, WindowHost};
use crate::orchestrator::SupervisorState;
use anyhow::Result;
use std::future::Future;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tokio::time::{Duration, Instant};

/// Extra time after the stop grace period for the exit report to arrive.
const EXIT_REPORT_SLACK: Duration = Duration::from_secs(2);

/// What happened during one application run.
#[derive(Debug, Clone, Default)]
pub(crate) struct RunSummary {
    pub port: u16,
    pub pid: Option<u32>,
    pub readiness: Option<Readiness>,
    pub windows_opened: u32,
    pub unexpected_exit: Option<BackendExit>,
    pub terminations: u32,
}

pub(crate) struct Supervisor<H> {
    cfg: SupervisorConfig,
    state: SupervisorState,
    launcher: BackendLauncher,
    shutdown: ShutdownCoordinator,
    windows: WindowCoordinator<H>,
    status_tx: watch::Sender<BackendStatus>,
    shutdown_deadline: Option<Instant>,
    summary: RunSummary,
}

impl<H: WindowHost> Supervisor<H> {
    pub(crate) fn new(
        cfg: SupervisorConfig,
        host: H,
        events: UnboundedSender<ShellEvent>,
        status_tx: watch::Sender<BackendStatus>,
    ) -> Self {
        let filter = StderrFilter::new(cfg.suppressed_stderr.iter().cloned());
        Self {
            launcher: BackendLauncher::new(filter, events),
            shutdown: ShutdownCoordinator::new(cfg.stop_timeout),
            windows: WindowCoordinator::new(host, cfg.title.clone()),
            state: SupervisorState::new(),
            status_tx,
            shutdown_deadline: None,
            summary: RunSummary::default(),
            cfg,
        }
    }

    /// Run the application until shutdown completes.
    ///
    /// Only a launch failure is returned as an error; no window is created in
    /// that case.
    pub(crate) async fn run(
        mut self,
        plan: LaunchPlan,
        mut events: UnboundedReceiver<ShellEvent>,
    ) -> Result<RunSummary> {
        let port = self
            .drive(
                &mut events,
                find_available_port(self.cfg.preferred_port, self.cfg.port_scan_window),
            )
            .await;
        tracing::info!(port, "using port");
        self.state.record_port(port);
        self.summary.port = port;

        if self.state.is_shutting_down() {
            tracing::info!("shutdown requested during port selection, backend not launched");
        } else {
            self.publish(BackendStatus::Starting { port });
            let handle = match self.launcher.launch(&self.state, &plan, port) {
                Ok(handle) => handle,
                Err(e) => {
                    self.publish(BackendStatus::NotStarted);
                    return Err(anyhow::Error::new(e).context("backend failed to start"));
                }
            };
            let pid = handle.pid();
            self.summary.pid = Some(pid);
            self.publish(BackendStatus::Running { pid, port });
            self.shutdown.adopt(&mut self.state, handle);

            let readiness_cfg = self.cfg.readiness.clone();
            let status_rx = self.status_tx.subscribe();
            let readiness = self
                .drive(&mut events, wait_until_ready(&readiness_cfg, port, status_rx))
                .await;
            tracing::info!(?readiness, "backend readiness gate passed");
            self.summary.readiness = Some(readiness);
            self.state.mark_ready();
            self.open_window();
        }

        while !self.shutdown.is_complete(&self.state) {
            tokio::select! {
                ev = events.recv() => match ev {
                    Some(ev) => self.handle_event(ev),
                    None => break,
                },
                _ = deadline_elapsed(self.shutdown_deadline) => {
                    tracing::warn!(
                        pid = ?self.shutdown.awaiting_exit(),
                        "backend exit was never reported, leaving it to kill-on-drop"
                    );
                    break;
                }
            }
        }

        self.summary.terminations = self.shutdown.terminations();
        Ok(self.summary)
    }

    /// Await `fut` while still handling events, so exit triggers are never
    /// held up by a pending phase.
    async fn drive<F: Future>(
        &mut self,
        events: &mut UnboundedReceiver<ShellEvent>,
        fut: F,
    ) -> F::Output {
        tokio::pin!(fut);
        loop {
            tokio::select! {
                out = &mut fut => return out,
                Some(ev) = events.recv() => self.handle_event(ev),
            }
        }
    }

    fn handle_event(&mut self, ev: ShellEvent) {
        match ev {
            ShellEvent::WindowClosed(id) => {
                if !self.windows.window_closed(&mut self.state, id) || self.state.is_shutting_down() {
                    return;
                }
                if self.cfg.quit_on_last_window_closed {
                    self.trigger(ExitTrigger::AllWindowsClosed);
                } else {
                    tracing::info!("all windows closed, staying resident with the backend running");
                }
            }
            ShellEvent::QuitRequested(source) => self.trigger(ExitTrigger::QuitRequested(source)),
            ShellEvent::Reactivate => {
                if !self.state.is_shutting_down() && self.state.window().is_none() {
                    tracing::info!("reactivated, reopening window");
                }
                self.open_window();
            }
            ShellEvent::BackendExited { pid, exit } => self.backend_exited(pid, exit),
            ShellEvent::VersionQuery(reply) => {
                let _ = reply.send(app_version().to_string());
            }
        }
    }

    fn trigger(&mut self, trigger: ExitTrigger) {
        let live_pid = self
            .state
            .backend()
            .filter(|h| h.is_running())
            .map(BackendHandle::pid);
        if !self.shutdown.trigger(&mut self.state, trigger) {
            return;
        }
        self.shutdown_deadline = Some(Instant::now() + self.cfg.stop_timeout + EXIT_REPORT_SLACK);
        if live_pid.is_some() {
            self.publish(BackendStatus::Stopping { pid: live_pid });
        }
        self.windows.close_all(&mut self.state);
    }

    fn backend_exited(&mut self, pid: u32, exit: BackendExit) {
        let current = self.state.mark_backend_exited(pid, exit);
        self.publish(BackendStatus::Exited { pid, exit });
        if self.state.is_shutting_down() {
            self.shutdown.observe_exit(pid);
        } else if current {
            tracing::warn!(pid, %exit, "backend exited unexpectedly and will not be restarted");
            self.summary.unexpected_exit = Some(exit);
        }
    }

    fn open_window(&mut self) {
        match self.windows.open_primary(&mut self.state) {
            Ok(Some(id)) => {
                self.summary.windows_opened += 1;
                tracing::info!(window = %id, "window opened");
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!("failed to open window: {e:#}");
                self.trigger(ExitTrigger::WindowUnavailable);
            }
        }
    }

    fn publish(&self, status: BackendStatus) {
        self.status_tx.send_replace(status);
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => futures::future::pending().await,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::model::{
        backend_url, LaunchConfig, QuitSource, ReadinessConfig, ReadinessMode, WindowId,
    };
    use crate::orchestrator::window::testing::RecordingHost;
    use std::net::Ipv4Addr;
    use std::path::PathBuf;
    use tokio::net::TcpListener;
    use tokio::sync::{mpsc, oneshot};

    fn config(preferred_port: u16, window: u16) -> SupervisorConfig {
        SupervisorConfig {
            preferred_port,
            port_scan_window: window,
            launch: LaunchConfig {
                resources_dir: None,
                backend_exe: None,
                interpreter: None,
                entry_script: None,
                backend_dir: std::env::temp_dir(),
                extra_args: Vec::new(),
            },
            readiness: ReadinessConfig {
                mode: ReadinessMode::Fixed,
                delay: Duration::from_millis(50),
                probe_interval: Duration::from_millis(50),
                probe_timeout: Duration::from_secs(1),
            },
            stop_timeout: Duration::from_secs(2),
            quit_on_last_window_closed: true,
            suppressed_stderr: Vec::new(),
            title: "Test Shell".into(),
        }
    }

    fn sh_plan(script: &str) -> LaunchPlan {
        LaunchPlan {
            program: PathBuf::from("sh"),
            args: vec!["-c".into(), script.into()],
            cwd: std::env::temp_dir(),
            packaged: false,
        }
    }

    struct Harness {
        host: RecordingHost,
        events: mpsc::UnboundedSender<ShellEvent>,
        status: watch::Receiver<BackendStatus>,
    }

    impl Harness {
        async fn wait_for_windows(&self, count: usize) {
            let waited = tokio::time::timeout(Duration::from_secs(10), async {
                while self.host.opened.lock().unwrap().len() < count {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await;
            assert!(waited.is_ok(), "window {count} never opened");
        }

        async fn wait_for_status(&mut self, pred: impl FnMut(&BackendStatus) -> bool) {
            let waited =
                tokio::time::timeout(Duration::from_secs(10), self.status.wait_for(pred)).await;
            assert!(matches!(waited, Ok(Ok(_))), "status never reached");
        }

        fn send(&self, ev: ShellEvent) {
            self.events.send(ev).unwrap();
        }
    }

    fn supervisor(
        cfg: SupervisorConfig,
        host: RecordingHost,
    ) -> (
        Supervisor<RecordingHost>,
        mpsc::UnboundedReceiver<ShellEvent>,
        Harness,
    ) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(BackendStatus::NotStarted);
        let sup = Supervisor::new(cfg, host.clone(), events_tx.clone(), status_tx);
        let harness = Harness {
            host,
            events: events_tx,
            status: status_rx,
        };
        (sup, events_rx, harness)
    }

    async fn free_port() -> Option<u16> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.ok()?;
        listener.local_addr().ok().map(|a| a.port())
    }

    #[tokio::test]
    async fn window_targets_allocated_port_and_quit_terminates_backend() {
        let Some(port) = free_port().await else {
            return;
        };
        let (sup, rx, harness) = supervisor(config(port, 1), RecordingHost::default());

        let (summary, ()) = tokio::join!(sup.run(sh_plan("exec sleep 30"), rx), async {
            harness.wait_for_windows(1).await;
            harness.send(ShellEvent::QuitRequested(QuitSource::Interrupt));
        });
        let summary = summary.unwrap();

        assert_eq!(summary.port, port);
        assert_eq!(harness.host.opened_urls(), vec![backend_url(port)]);
        assert_eq!(summary.readiness, Some(Readiness::Presumed));
        assert_eq!(summary.windows_opened, 1);
        assert_eq!(summary.terminations, 1);
        assert_eq!(summary.unexpected_exit, None);
        assert_eq!(*harness.host.closed.lock().unwrap(), vec![WindowId(1)]);
    }

    #[tokio::test]
    async fn occupied_window_falls_back_and_still_launches() {
        let Ok(held) = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await else {
            return;
        };
        let port = held.local_addr().unwrap().port();
        let (sup, rx, harness) = supervisor(config(port, 1), RecordingHost::default());

        let (summary, ()) = tokio::join!(sup.run(sh_plan("exec sleep 30"), rx), async {
            harness.wait_for_windows(1).await;
            harness.send(ShellEvent::QuitRequested(QuitSource::Window));
        });
        let summary = summary.unwrap();

        assert_eq!(summary.port, port);
        assert!(summary.pid.is_some());
        drop(held);
    }

    #[tokio::test]
    async fn closing_last_window_shuts_down_once() {
        let Some(port) = free_port().await else {
            return;
        };
        let (sup, rx, harness) = supervisor(config(port, 1), RecordingHost::default());

        let (summary, ()) = tokio::join!(sup.run(sh_plan("exec sleep 30"), rx), async {
            harness.wait_for_windows(1).await;
            harness.send(ShellEvent::WindowClosed(WindowId(1)));
            harness.send(ShellEvent::WindowClosed(WindowId(1)));
            harness.send(ShellEvent::QuitRequested(QuitSource::Interrupt));
        });
        let summary = summary.unwrap();

        assert_eq!(summary.terminations, 1);
        assert_eq!(summary.windows_opened, 1);
        // the window closed itself, so the host is not asked to dismiss it
        assert!(harness.host.closed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn resident_mode_reopens_window_against_same_backend() {
        let Some(port) = free_port().await else {
            return;
        };
        let mut cfg = config(port, 1);
        cfg.quit_on_last_window_closed = false;
        let (sup, rx, harness) = supervisor(cfg, RecordingHost::default());

        let (summary, ()) = tokio::join!(sup.run(sh_plan("exec sleep 30"), rx), async {
            harness.wait_for_windows(1).await;
            harness.send(ShellEvent::WindowClosed(WindowId(1)));
            harness.send(ShellEvent::Reactivate);
            harness.wait_for_windows(2).await;
            // already open: no third window
            harness.send(ShellEvent::Reactivate);
            harness.send(ShellEvent::QuitRequested(QuitSource::Terminate));
        });
        let summary = summary.unwrap();

        assert_eq!(summary.windows_opened, 2);
        assert_eq!(summary.terminations, 1);
        assert_eq!(
            harness.host.opened_urls(),
            vec![backend_url(port), backend_url(port)]
        );
    }

    #[tokio::test]
    async fn unexpected_exit_is_logged_not_restarted() {
        let Some(port) = free_port().await else {
            return;
        };
        let (sup, rx, mut harness) = supervisor(config(port, 1), RecordingHost::default());

        let (summary, ()) = tokio::join!(sup.run(sh_plan("sleep 0.3; exit 3"), rx), async {
            harness.wait_for_windows(1).await;
            harness
                .wait_for_status(|s| matches!(s, BackendStatus::Exited { .. }))
                .await;
            // window stays up after the backend died
            assert!(harness.host.closed.lock().unwrap().is_empty());
            harness.send(ShellEvent::QuitRequested(QuitSource::Window));
        });
        let summary = summary.unwrap();

        assert_eq!(summary.unexpected_exit, Some(BackendExit::Code(3)));
        assert_eq!(summary.windows_opened, 1);
        assert!(matches!(
            *harness.status.borrow(),
            BackendStatus::Exited {
                exit: BackendExit::Code(3),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn quit_during_readiness_wait_prevents_window() {
        let Some(port) = free_port().await else {
            return;
        };
        let mut cfg = config(port, 1);
        cfg.readiness.delay = Duration::from_millis(400);
        let (sup, rx, mut harness) = supervisor(cfg, RecordingHost::default());

        let (summary, ()) = tokio::join!(sup.run(sh_plan("exec sleep 30"), rx), async {
            harness
                .wait_for_status(|s| matches!(s, BackendStatus::Running { .. }))
                .await;
            harness.send(ShellEvent::QuitRequested(QuitSource::Interrupt));
        });
        let summary = summary.unwrap();

        assert_eq!(summary.windows_opened, 0);
        assert!(harness.host.opened.lock().unwrap().is_empty());
        assert_eq!(summary.terminations, 1);
        assert_eq!(summary.readiness, Some(Readiness::Presumed));
    }

    #[tokio::test]
    async fn launch_failure_is_fatal_and_opens_no_window() {
        let Some(port) = free_port().await else {
            return;
        };
        let (sup, rx, harness) = supervisor(config(port, 1), RecordingHost::default());
        let plan = LaunchPlan {
            program: PathBuf::from("/nonexistent/backend/python3"),
            args: vec!["web_app.py".into()],
            cwd: std::env::temp_dir(),
            packaged: true,
        };

        let err = sup.run(plan, rx).await.unwrap_err();
        assert!(format!("{err:#}").contains("backend executable not found"));
        assert!(harness.host.opened.lock().unwrap().is_empty());
        assert_eq!(*harness.status.borrow(), BackendStatus::NotStarted);
    }

    #[tokio::test]
    async fn window_host_failure_shuts_down() {
        let Some(port) = free_port().await else {
            return;
        };
        let host = RecordingHost {
            fail_open: true,
            ..Default::default()
        };
        let (sup, rx, _harness) = supervisor(config(port, 1), host);

        let summary = tokio::time::timeout(
            Duration::from_secs(10),
            sup.run(sh_plan("exec sleep 30"), rx),
        )
        .await
        .expect("supervisor did not finish")
        .unwrap();

        assert_eq!(summary.windows_opened, 0);
        assert_eq!(summary.terminations, 1);
    }

    #[tokio::test]
    async fn version_query_is_answered() {
        let Some(port) = free_port().await else {
            return;
        };
        let (sup, rx, harness) = supervisor(config(port, 1), RecordingHost::default());

        let (summary, version) = tokio::join!(sup.run(sh_plan("exec sleep 30"), rx), async {
            let (reply_tx, reply_rx) = oneshot::channel();
            harness.send(ShellEvent::VersionQuery(reply_tx));
            let version = reply_rx.await.unwrap();
            harness.send(ShellEvent::QuitRequested(QuitSource::Window));
            version
        });

        summary.unwrap();
        assert_eq!(version, app_version());
    }
}
