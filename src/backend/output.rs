//! Forward backend stdout/stderr into the supervisor log.

use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Dependency chatter the backend prints on stderr that is not an error.
pub(crate) const DEFAULT_BENIGN_MARKERS: &[&str] = &["NotOpenSSLWarning", "development server"];

/// Decides which stderr lines are demoted from error level.
#[derive(Debug, Clone)]
pub(crate) struct StderrFilter {
    benign: Arc<[String]>,
}

impl StderrFilter {
    pub(crate) fn new(extra: impl IntoIterator<Item = String>) -> Self {
        let benign: Vec<String> = DEFAULT_BENIGN_MARKERS
            .iter()
            .map(|m| m.to_string())
            .chain(extra.into_iter().filter(|m| !m.is_empty()))
            .collect();
        Self {
            benign: benign.into(),
        }
    }

    pub(crate) fn is_benign(&self, line: &str) -> bool {
        self.benign.iter().any(|marker| line.contains(marker.as_str()))
    }
}

impl Default for StderrFilter {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

/// Line counts reported once a stream reaches EOF.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ForwardStats {
    pub lines: usize,
    pub suppressed: usize,
}

/// Partial lines longer than this are logged without waiting for a line end.
pub(crate) const MAX_LINE_BYTES: usize = 64 * 1024;

/// Call `f` for every line of `reader`. Both `\n` and `\r` end a line, so
/// progress output that rewrites a single terminal line is logged as it comes.
/// Invalid UTF-8 is replaced rather than ending the stream.
async fn for_each_line<R, F>(reader: R, mut f: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut reader = BufReader::new(reader);
    let mut line: Vec<u8> = Vec::new();
    loop {
        let chunk = match reader.fill_buf().await {
            Ok([]) => break,
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::debug!("backend stream read failed: {e}");
                break;
            }
        };
        let (consumed, ended) = match chunk.iter().position(|b| matches!(b, b'\n' | b'\r')) {
            Some(end) => {
                line.extend_from_slice(&chunk[..end]);
                (end + 1, true)
            }
            None => {
                line.extend_from_slice(chunk);
                (chunk.len(), false)
            }
        };
        reader.consume(consumed);

        if ended || line.len() >= MAX_LINE_BYTES {
            emit_line(&mut line, &mut f);
        }
    }
    emit_line(&mut line, &mut f);
}

fn emit_line<F: FnMut(&str)>(line: &mut Vec<u8>, f: &mut F) {
    if !line.is_empty() {
        f(&String::from_utf8_lossy(line));
        line.clear();
    }
}

pub(crate) async fn forward_stdout<R>(reader: R) -> ForwardStats
where
    R: AsyncRead + Unpin,
{
    let mut stats = ForwardStats::default();
    for_each_line(reader, |line| {
        stats.lines += 1;
        tracing::info!(target: "backend::stdout", "{line}");
    })
    .await;
    stats
}

pub(crate) async fn forward_stderr<R>(reader: R, filter: StderrFilter) -> ForwardStats
where
    R: AsyncRead + Unpin,
{
    let mut stats = ForwardStats::default();
    for_each_line(reader, |line| {
        stats.lines += 1;
        if filter.is_benign(line) {
            stats.suppressed += 1;
            tracing::debug!(target: "backend::stderr", "{line}");
        } else {
            tracing::error!(target: "backend::stderr", "{line}");
        }
    })
    .await;
    stats
}
