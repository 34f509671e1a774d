use anyhow::{Context, Result};
use std::sync::mpsc as std_mpsc;
use std::time::Duration;

/// How long the clipboard instance stays alive after a copy. Linux clipboard
/// managers read the selection from the owning process.
const HOLD: Duration = Duration::from_secs(2);

pub(super) type CopyOutcome = std::result::Result<(), String>;

/// Copies text on a background thread so the window loop never blocks on the
/// system clipboard. Outcomes come back through `poll`.
pub(super) struct ClipboardWorker {
    jobs: std_mpsc::Sender<String>,
    outcomes: std_mpsc::Receiver<CopyOutcome>,
}

impl ClipboardWorker {
    pub(super) fn spawn() -> Result<Self> {
        Self::spawn_with(write_system_clipboard)
    }

    fn spawn_with<W>(mut write: W) -> Result<Self>
    where
        W: FnMut(&str, &std_mpsc::Sender<CopyOutcome>) + Send + 'static,
    {
        let (jobs, job_rx) = std_mpsc::channel::<String>();
        let (outcome_tx, outcomes) = std_mpsc::channel();
        std::thread::Builder::new()
            .name("clipboard".into())
            .spawn(move || {
                // ends once the window drops its worker
                for text in job_rx {
                    write(&text, &outcome_tx);
                }
            })
            .context("spawn clipboard thread")?;
        Ok(Self { jobs, outcomes })
    }

    pub(super) fn copy(&self, text: &str) -> Result<()> {
        self.jobs
            .send(text.to_string())
            .map_err(|_| anyhow::anyhow!("clipboard thread exited"))
    }

    /// Outcome of an earlier `copy`, if one has arrived.
    pub(super) fn poll(&self) -> Option<CopyOutcome> {
        self.outcomes.try_recv().ok()
    }
}

fn write_system_clipboard(text: &str, report: &std_mpsc::Sender<CopyOutcome>) {
    let mut clipboard = match arboard::Clipboard::new() {
        Ok(clipboard) => clipboard,
        Err(e) => {
            tracing::warn!("clipboard unavailable: {e}");
            report.send(Err(e.to_string())).ok();
            return;
        }
    };
    if let Err(e) = clipboard.set_text(text) {
        tracing::warn!("clipboard write failed: {e}");
        report.send(Err(e.to_string())).ok();
        return;
    }
    report.send(Ok(())).ok();
    std::thread::sleep(HOLD);
}
