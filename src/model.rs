use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::oneshot;

/// Loopback URL the backend serves on and the window points at.
pub fn backend_url(port: u16) -> String {
    format!("http://127.0.0.1:{port}")
}

/// Version string answered to window-side version queries.
pub fn app_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    pub preferred_port: u16,
    pub port_scan_window: u16,
    pub launch: LaunchConfig,
    pub readiness: ReadinessConfig,
    #[serde(with = "humantime_serde")]
    pub stop_timeout: Duration,
    pub quit_on_last_window_closed: bool,
    #[serde(default)]
    pub suppressed_stderr: Vec<String>,
    pub title: String,
}

/// Where the backend lives. Packaged runs resolve everything under `resources_dir`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchConfig {
    #[serde(default)]
    pub resources_dir: Option<PathBuf>,
    #[serde(default)]
    pub backend_exe: Option<PathBuf>,
    #[serde(default)]
    pub interpreter: Option<PathBuf>,
    #[serde(default)]
    pub entry_script: Option<PathBuf>,
    pub backend_dir: PathBuf,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessMode {
    /// Sleep a fixed delay and presume the backend is up
    Fixed,
    /// Poll the backend over HTTP until it answers or the probe times out
    Probe,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessConfig {
    pub mode: ReadinessMode,
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
    #[serde(with = "humantime_serde")]
    pub probe_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowId(pub u64);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "window-{}", self.0)
    }
}

/// Who asked the application to quit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuitSource {
    /// Quit chosen from inside a window
    Window,
    /// SIGINT / Ctrl-C delivered to the process
    Interrupt,
    /// SIGTERM delivered to the process
    Terminate,
}

/// How the backend process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendExit {
    Code(i32),
    Signal(i32),
    Unknown,
}

impl BackendExit {
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return BackendExit::Code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(sig) = status.signal() {
                return BackendExit::Signal(sig);
            }
        }
        BackendExit::Unknown
    }
}

impl fmt::Display for BackendExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendExit::Code(code) => write!(f, "exit code {code}"),
            BackendExit::Signal(sig) => write!(f, "signal {sig}"),
            BackendExit::Unknown => f.write_str("unknown status"),
        }
    }
}

/// Backend lifecycle as published to windows and the readiness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendStatus {
    NotStarted,
    Starting { port: u16 },
    Running { pid: u32, port: u16 },
    Stopping { pid: Option<u32> },
    Exited { pid: u32, exit: BackendExit },
}

impl BackendStatus {
    pub fn is_exited(&self) -> bool {
        matches!(self, BackendStatus::Exited { .. })
    }

    /// Render a human-readable status line for window layers.
    pub fn to_message(&self) -> String {
        match self {
            BackendStatus::NotStarted => "not started".to_string(),
            BackendStatus::Starting { port } => format!("starting on port {port}"),
            BackendStatus::Running { pid, port } => format!("running (pid {pid}, port {port})"),
            BackendStatus::Stopping { pid: Some(pid) } => format!("stopping (pid {pid})"),
            BackendStatus::Stopping { pid: None } => "stopping".to_string(),
            BackendStatus::Exited { pid, exit } => format!("exited (pid {pid}, {exit})"),
        }
    }
}

/// Everything the supervisor event loop reacts to.
#[derive(Debug)]
pub enum ShellEvent {
    WindowClosed(WindowId),
    QuitRequested(QuitSource),
    /// Platform "activate" while resident with no window open
    Reactivate,
    BackendExited {
        pid: u32,
        exit: BackendExit,
    },
    /// Window-side request for the application version
    VersionQuery(oneshot::Sender<String>),
}
