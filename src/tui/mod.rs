//! Terminal window host.
//!
//! A "window" is the alternate screen, drawn by a dedicated thread with
//! ratatui. The supervisor event loop never blocks on it except when it
//! dismisses a window, which only waits for the next input poll.

mod clipboard;
mod help;
mod state;

use clipboard::ClipboardWorker;
use crate::error::SupervisorError;
use crate::model::{BackendStatus, QuitSource, ShellEvent, WindowId};
use crate::orchestrator::{WindowHost, WindowRequest};
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Terminal,
};
use state::{key_action, KeyAction, UiState};
use std::io::{self, IsTerminal};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::{oneshot, watch};

type Term = Terminal<CrosstermBackend<io::Stdout>>;

const TICK_RATE: Duration = Duration::from_millis(100);
const INPUT_POLL: Duration = Duration::from_millis(10);

pub(crate) struct TuiHost {
    events: UnboundedSender<ShellEvent>,
    status: watch::Receiver<BackendStatus>,
    active: Option<ActiveWindow>,
}

struct ActiveWindow {
    id: WindowId,
    close: Arc<AtomicBool>,
    thread: JoinHandle<Result<()>>,
}

impl ActiveWindow {
    fn join(self) {
        self.close.store(true, Ordering::Relaxed);
        match self.thread.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(window = %self.id, "window loop failed: {e:#}"),
            Err(_) => tracing::error!(window = %self.id, "window thread panicked"),
        }
    }
}

impl TuiHost {
    pub(crate) fn new(
        events: UnboundedSender<ShellEvent>,
        status: watch::Receiver<BackendStatus>,
    ) -> Self {
        Self {
            events,
            status,
            active: None,
        }
    }

    /// Collect a window thread that already returned on its own.
    fn reap(&mut self) {
        if self
            .active
            .as_ref()
            .is_some_and(|active| active.thread.is_finished())
        {
            if let Some(active) = self.active.take() {
                active.join();
            }
        }
    }
}

impl WindowHost for TuiHost {
    fn open(&mut self, request: WindowRequest) -> Result<()> {
        self.reap();
        if let Some(active) = &self.active {
            return Err(SupervisorError::Window(format!("{} is still on screen", active.id)).into());
        }
        if !io::stdout().is_terminal() {
            return Err(SupervisorError::Window("stdout is not a terminal".into()).into());
        }
        let terminal =
            enter_terminal().map_err(|e| SupervisorError::Window(format!("{e:#}")))?;

        let (version_tx, version_rx) = oneshot::channel();
        if self.events.send(ShellEvent::VersionQuery(version_tx)).is_err() {
            tracing::debug!("event loop gone, version will not be shown");
        }

        let id = request.id;
        let close = Arc::new(AtomicBool::new(false));
        let window = WindowLoop {
            state: UiState::new(&request, *self.status.borrow()),
            status: self.status.clone(),
            events: self.events.clone(),
            close: close.clone(),
            version: Some(version_rx),
            clipboard: None,
        };

        let spawned = std::thread::Builder::new()
            .name(id.to_string())
            .spawn(move || window.run(terminal));
        match spawned {
            Ok(thread) => {
                tracing::debug!(window = %id, url = %request.url, "window opened");
                self.active = Some(ActiveWindow { id, close, thread });
                Ok(())
            }
            Err(e) => {
                leave_terminal();
                Err(SupervisorError::Window(format!("spawn window thread: {e}")).into())
            }
        }
    }

    fn close(&mut self, id: WindowId) {
        if self.active.as_ref().is_some_and(|active| active.id == id) {
            if let Some(active) = self.active.take() {
                active.join();
            }
        }
    }
}

impl Drop for TuiHost {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.join();
        }
    }
}

fn enter_terminal() -> Result<Term> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    if let Err(e) = execute!(stdout, EnterAlternateScreen) {
        leave_terminal();
        return Err(e).context("enter alternate screen");
    }
    match Terminal::new(CrosstermBackend::new(stdout)) {
        Ok(mut terminal) => {
            terminal.clear().ok();
            Ok(terminal)
        }
        Err(e) => {
            leave_terminal();
            Err(e).context("create terminal")
        }
    }
}

fn leave_terminal() {
    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, LeaveAlternateScreen).ok();
}

/// State moved onto the window thread.
struct WindowLoop {
    state: UiState,
    status: watch::Receiver<BackendStatus>,
    events: UnboundedSender<ShellEvent>,
    close: Arc<AtomicBool>,
    version: Option<oneshot::Receiver<String>>,
    clipboard: Option<ClipboardWorker>,
}

impl WindowLoop {
    fn run(mut self, mut terminal: Term) -> Result<()> {
        let res = self.event_loop(&mut terminal);
        leave_terminal();
        terminal.show_cursor().ok();
        if res.is_err() {
            // The supervisor must not keep waiting on a window that is gone.
            self.send(ShellEvent::WindowClosed(self.state.window));
        }
        res
    }

    fn event_loop(&mut self, terminal: &mut Term) -> Result<()> {
        let mut last_draw: Option<Instant> = None;

        loop {
            if self.close.load(Ordering::Relaxed) {
                return Ok(());
            }
            self.poll_version();
            if let Some(outcome) = self.clipboard.as_ref().and_then(ClipboardWorker::poll) {
                self.state.copy_finished(outcome);
                last_draw = None;
            }
            self.state.status = *self.status.borrow();

            if last_draw.map_or(true, |t| t.elapsed() >= TICK_RATE) {
                terminal
                    .draw(|f| draw(f.area(), f, &self.state))
                    .context("draw window")?;
                last_draw = Some(Instant::now());
            }

            if !event::poll(INPUT_POLL).context("poll terminal input")? {
                continue;
            }
            let Event::Key(k) = event::read().context("read terminal input")? else {
                continue;
            };
            if k.kind != KeyEventKind::Press {
                continue;
            }
            match self.state.route(key_action(k.modifiers, k.code)) {
                KeyAction::CloseWindow => {
                    self.send(ShellEvent::WindowClosed(self.state.window));
                    return Ok(());
                }
                KeyAction::Quit => {
                    self.state.info = "Quitting...".into();
                    self.send(ShellEvent::QuitRequested(QuitSource::Window));
                }
                KeyAction::CopyUrl => {
                    self.state.info = match self.copy_url() {
                        Ok(()) => "Copying...".into(),
                        Err(e) => format!("Copy failed: {e:#}"),
                    };
                }
                KeyAction::ToggleHelp | KeyAction::Ignore => {}
            }
            last_draw = None;
        }
    }

    fn copy_url(&mut self) -> Result<()> {
        let worker = match self.clipboard.take() {
            Some(worker) => worker,
            None => ClipboardWorker::spawn()?,
        };
        let sent = worker.copy(&self.state.url);
        self.clipboard = Some(worker);
        sent
    }

    fn poll_version(&mut self) {
        let Some(rx) = self.version.as_mut() else {
            return;
        };
        match rx.try_recv() {
            Ok(v) => {
                self.state.version = Some(v);
                self.version = None;
            }
            Err(oneshot::error::TryRecvError::Empty) => {}
            Err(oneshot::error::TryRecvError::Closed) => self.version = None,
        }
    }

    fn send(&self, ev: ShellEvent) {
        if self.events.send(ev).is_err() {
            tracing::debug!(window = %self.state.window, "event loop gone");
        }
    }
}

fn status_style(status: &BackendStatus) -> Style {
    let color = match status {
        BackendStatus::Running { .. } => Color::Green,
        BackendStatus::Starting { .. } | BackendStatus::Stopping { .. } => Color::Yellow,
        BackendStatus::Exited { .. } => Color::Red,
        BackendStatus::NotStarted => Color::Gray,
    };
    Style::default().fg(color)
}

fn kv(key: &'static str, value: Span<'static>) -> Line<'static> {
    Line::from(vec![
        Span::styled(format!("{key:<10}"), Style::default().fg(Color::Cyan)),
        value,
    ])
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(3)].as_ref())
        .split(area);

    let mut lines = vec![
        kv(
            "URL",
            Span::styled(
                state.url.clone(),
                Style::default().add_modifier(Modifier::BOLD),
            ),
        ),
        kv(
            "Backend",
            Span::styled(state.status.to_message(), status_style(&state.status)),
        ),
        kv("Opened", Span::raw(state.opened_at.clone())),
    ];
    if !state.info.is_empty() {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            state.info.clone(),
            Style::default().fg(Color::Yellow),
        )));
    }
    let body = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title(state.header()),
    );
    f.render_widget(body, chunks[0]);

    let hints = Paragraph::new(Line::from(vec![
        Span::styled("q", Style::default().fg(Color::Magenta)),
        Span::raw(" close  "),
        Span::styled("Ctrl-C", Style::default().fg(Color::Magenta)),
        Span::raw(" quit  "),
        Span::styled("c", Style::default().fg(Color::Magenta)),
        Span::raw(" copy URL  "),
        Span::styled("?", Style::default().fg(Color::Magenta)),
        Span::raw(" help"),
    ]))
    .block(Block::default().borders(Borders::ALL));
    f.render_widget(hints, chunks[1]);

    if state.show_help {
        help::draw_help(area, f);
    }
}
