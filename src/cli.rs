use crate::backend::{LaunchPlan, DEFAULT_SCAN_WINDOW};
use crate::logging::{self, LogTarget};
use crate::model::{
    BackendStatus, LaunchConfig, QuitSource, ReadinessConfig, ReadinessMode, ShellEvent,
    SupervisorConfig,
};
use crate::orchestrator::{HeadlessHost, RunSummary, Supervisor, WindowHost};
use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;

#[derive(Debug, Parser, Clone)]
#[command(
    name = "backend-shell",
    version,
    about = "Launch a local HTTP backend, wait for it, and open a window on it"
)]
pub struct Cli {
    /// First port tried for the backend
    #[arg(long, env = "BACKEND_SHELL_PORT", default_value_t = 5000,
          value_parser = clap::value_parser!(u16).range(1..))]
    pub preferred_port: u16,

    /// How many consecutive ports to try before falling back to the preferred one
    #[arg(long, env = "BACKEND_SHELL_PORT_SCAN_WINDOW", default_value_t = DEFAULT_SCAN_WINDOW)]
    pub port_scan_window: u16,

    /// Packaged resources directory (bundled interpreter under python/, backend under backend/)
    #[arg(long, env = "BACKEND_SHELL_RESOURCES_DIR")]
    pub resources_dir: Option<PathBuf>,

    /// Run a native backend executable instead of interpreter + entry script
    #[arg(long, env = "BACKEND_SHELL_BACKEND_EXE", conflicts_with_all = ["interpreter", "entry_script"])]
    pub backend_exe: Option<PathBuf>,

    /// Interpreter used to run the entry script (default: python3, or the bundled one)
    #[arg(long, env = "BACKEND_SHELL_INTERPRETER")]
    pub interpreter: Option<PathBuf>,

    /// Backend entry script, relative to the backend directory
    #[arg(long, env = "BACKEND_SHELL_ENTRY_SCRIPT")]
    pub entry_script: Option<PathBuf>,

    /// Backend working directory in development runs
    #[arg(long, env = "BACKEND_SHELL_BACKEND_DIR", default_value = ".")]
    pub backend_dir: PathBuf,

    /// Extra argument passed to the backend (repeatable)
    #[arg(long = "backend-arg", allow_hyphen_values = true)]
    pub backend_args: Vec<String>,

    /// How readiness is decided
    #[arg(long, value_enum, env = "BACKEND_SHELL_READINESS", default_value_t = ReadinessMode::Fixed)]
    pub readiness: ReadinessMode,

    /// Fixed delay before the backend is presumed ready
    #[arg(long, env = "BACKEND_SHELL_READY_DELAY", default_value = "2s")]
    pub ready_delay: humantime::Duration,

    /// Interval between readiness probes
    #[arg(long, default_value = "250ms")]
    pub probe_interval: humantime::Duration,

    /// Give up probing after this long and continue anyway
    #[arg(long, default_value = "10s")]
    pub probe_timeout: humantime::Duration,

    /// Grace period between SIGTERM and a forced kill of the backend
    #[arg(long, env = "BACKEND_SHELL_STOP_TIMEOUT", default_value = "5s")]
    pub stop_timeout: humantime::Duration,

    /// Quit when the last window closes; use --quit-on-last-window-closed false to stay resident
    #[arg(long, env = "BACKEND_SHELL_QUIT_ON_LAST_WINDOW_CLOSED",
          default_value_t = !cfg!(target_os = "macos"), action = clap::ArgAction::Set)]
    pub quit_on_last_window_closed: bool,

    /// Additional benign stderr marker kept out of error-level logs (repeatable)
    #[arg(long = "suppress")]
    pub suppress: Vec<String>,

    /// Window title
    #[arg(long, default_value = "Backend Shell")]
    pub title: String,

    /// No terminal window; announce the URL in the log and wait for a quit signal
    #[arg(long, env = "BACKEND_SHELL_HEADLESS")]
    pub headless: bool,

    /// Log file used while the terminal window is open
    #[arg(long, env = "BACKEND_SHELL_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Print the resolved configuration and launch plan as JSON and exit
    #[arg(long)]
    pub print_config: bool,
}

/// Build a `SupervisorConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> SupervisorConfig {
    SupervisorConfig {
        preferred_port: args.preferred_port,
        port_scan_window: args.port_scan_window,
        launch: LaunchConfig {
            resources_dir: args.resources_dir.clone(),
            backend_exe: args.backend_exe.clone(),
            interpreter: args.interpreter.clone(),
            entry_script: args.entry_script.clone(),
            backend_dir: args.backend_dir.clone(),
            extra_args: args.backend_args.clone(),
        },
        readiness: ReadinessConfig {
            mode: args.readiness,
            delay: Duration::from(args.ready_delay),
            probe_interval: Duration::from(args.probe_interval),
            probe_timeout: Duration::from(args.probe_timeout),
        },
        stop_timeout: Duration::from(args.stop_timeout),
        quit_on_last_window_closed: args.quit_on_last_window_closed,
        suppressed_stderr: args.suppress.clone(),
        title: args.title.clone(),
    }
}

#[derive(Serialize)]
struct ResolvedConfig<'a> {
    config: &'a SupervisorConfig,
    plan: &'a LaunchPlan,
}

pub async fn run(args: Cli) -> Result<()> {
    let cfg = build_config(&args);
    let plan = LaunchPlan::resolve(&cfg.launch);

    if args.print_config {
        let out = serde_json::to_string_pretty(&ResolvedConfig {
            config: &cfg,
            plan: &plan,
        })?;
        println!("{out}");
        return Ok(());
    }

    let headless = args.headless || !cfg!(feature = "tui");
    let target = if headless {
        LogTarget::Stderr
    } else {
        LogTarget::File(args.log_file.clone().unwrap_or_else(logging::default_log_file))
    };
    logging::init(&target)?;
    tracing::info!(version = crate::model::app_version(), packaged = plan.packaged, "starting");

    let (events_tx, events_rx) = mpsc::unbounded_channel::<ShellEvent>();
    let (status_tx, status_rx) = watch::channel(BackendStatus::NotStarted);
    spawn_signal_listeners(events_tx.clone()).context("install signal handlers")?;

    #[cfg(feature = "tui")]
    let summary = if headless {
        supervise(cfg, plan, HeadlessHost, events_tx, events_rx, status_tx).await?
    } else {
        let host = crate::tui::TuiHost::new(events_tx.clone(), status_rx);
        supervise(cfg, plan, host, events_tx, events_rx, status_tx).await?
    };
    #[cfg(not(feature = "tui"))]
    let summary = {
        drop(status_rx);
        supervise(cfg, plan, HeadlessHost, events_tx, events_rx, status_tx).await?
    };

    tracing::info!(
        port = summary.port,
        pid = ?summary.pid,
        readiness = ?summary.readiness,
        windows = summary.windows_opened,
        terminations = summary.terminations,
        unexpected_exit = ?summary.unexpected_exit,
        "shell exited"
    );
    Ok(())
}

async fn supervise<H: WindowHost>(
    cfg: SupervisorConfig,
    plan: LaunchPlan,
    host: H,
    events_tx: UnboundedSender<ShellEvent>,
    events_rx: UnboundedReceiver<ShellEvent>,
    status_tx: watch::Sender<BackendStatus>,
) -> Result<RunSummary> {
    Supervisor::new(cfg, host, events_tx, status_tx)
        .run(plan, events_rx)
        .await
}

/// Forward process signals into the event loop. Repeated signals are passed
/// on as-is; the shutdown coordinator ignores duplicates.
fn spawn_signal_listeners(events: UnboundedSender<ShellEvent>) -> Result<()> {
    let interrupt_tx = events.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if interrupt_tx
                .send(ShellEvent::QuitRequested(QuitSource::Interrupt))
                .is_err()
            {
                break;
            }
        }
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        let terminate_tx = events.clone();
        tokio::spawn(async move {
            while terminate.recv().await.is_some() {
                if terminate_tx
                    .send(ShellEvent::QuitRequested(QuitSource::Terminate))
                    .is_err()
                {
                    break;
                }
            }
        });

        let mut activate = signal(SignalKind::user_defined1())?;
        tokio::spawn(async move {
            while activate.recv().await.is_some() {
                if events.send(ShellEvent::Reactivate).is_err() {
                    break;
                }
            }
        });
    }
    #[cfg(not(unix))]
    drop(events);

    Ok(())
}
