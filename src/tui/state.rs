use super::clipboard::CopyOutcome;
use crate::model::{BackendStatus, WindowId};
use crate::orchestrator::WindowRequest;
use crossterm::event::{KeyCode, KeyModifiers};
use time::macros::format_description;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum KeyAction {
    Ignore,
    /// Close this window; whether the app quits is up to the supervisor
    CloseWindow,
    /// Quit the whole application
    Quit,
    CopyUrl,
    ToggleHelp,
}

pub(super) fn key_action(modifiers: KeyModifiers, code: KeyCode) -> KeyAction {
    match code {
        KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => KeyAction::Quit,
        KeyCode::Char('q') | KeyCode::Esc => KeyAction::CloseWindow,
        KeyCode::Char('c') | KeyCode::Char('y') => KeyAction::CopyUrl,
        KeyCode::Char('?') => KeyAction::ToggleHelp,
        _ => KeyAction::Ignore,
    }
}

/// Everything the window draws. Owned by the window thread only.
pub(super) struct UiState {
    pub(super) window: WindowId,
    pub(super) title: String,
    pub(super) url: String,
    pub(super) version: Option<String>,
    pub(super) status: BackendStatus,
    pub(super) opened_at: String,
    pub(super) info: String,
    pub(super) show_help: bool,
}

impl UiState {
    pub(super) fn new(request: &WindowRequest, status: BackendStatus) -> Self {
        Self {
            window: request.id,
            title: request.title.clone(),
            url: request.url.clone(),
            version: None,
            status,
            opened_at: local_clock(),
            info: String::new(),
            show_help: false,
        }
    }

    /// Apply keys that only affect the window itself and pass the rest on.
    /// While help is shown, the close key dismisses help instead.
    pub(super) fn route(&mut self, action: KeyAction) -> KeyAction {
        match action {
            KeyAction::ToggleHelp => {
                self.show_help = !self.show_help;
                KeyAction::Ignore
            }
            KeyAction::CloseWindow if self.show_help => {
                self.show_help = false;
                KeyAction::Ignore
            }
            other => other,
        }
    }

    pub(super) fn copy_finished(&mut self, outcome: CopyOutcome) {
        self.info = match outcome {
            Ok(()) => format!("Copied {}", self.url),
            Err(e) => format!("Copy failed: {e}"),
        };
    }

    pub(super) fn header(&self) -> String {
        match &self.version {
            Some(v) => format!("{} v{v}", self.title),
            None => self.title.clone(),
        }
    }
}

fn local_clock() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(format_description!("[hour]:[minute]:[second]"))
        .unwrap_or_default()
}
