use crate::model::{backend_url, BackendStatus, ReadinessConfig, ReadinessMode};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

const MIN_PROBE_REQUEST_TIMEOUT: Duration = Duration::from_millis(200);

/// Why the gate opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Readiness {
    /// Fixed delay elapsed; nothing was checked
    Presumed,
    /// The backend answered an HTTP request
    Confirmed,
    /// Probing gave up; proceeding anyway
    TimedOut,
    /// The backend exited while being probed
    BackendExited,
}

/// Wait until the backend on `port` is considered ready.
///
/// Exit triggers are not observed here; the caller keeps servicing them while
/// this future is pending and checks shutdown state afterwards.
pub(crate) async fn wait_until_ready(
    cfg: &ReadinessConfig,
    port: u16,
    status: watch::Receiver<BackendStatus>,
) -> Readiness {
    match cfg.mode {
        ReadinessMode::Fixed => {
            tokio::time::sleep(cfg.delay).await;
            Readiness::Presumed
        }
        ReadinessMode::Probe => {
            let client = match reqwest::Client::builder()
                .no_proxy()
                .timeout(cfg.probe_interval.max(MIN_PROBE_REQUEST_TIMEOUT))
                .build()
            {
                Ok(client) => client,
                Err(e) => {
                    tracing::warn!("readiness probe unavailable ({e}), using fixed delay");
                    tokio::time::sleep(cfg.delay).await;
                    return Readiness::Presumed;
                }
            };
            tokio::select! {
                readiness = probe(&client, port, cfg.probe_interval, cfg.probe_timeout) => readiness,
                _ = backend_gone(status) => Readiness::BackendExited,
            }
        }
    }
}

async fn probe(
    client: &reqwest::Client,
    port: u16,
    interval: Duration,
    timeout: Duration,
) -> Readiness {
    let url = backend_url(port);
    let deadline = Instant::now() + timeout;
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        // Any HTTP answer, even an error status, means the listener is up.
        match client.get(&url).send().await {
            Ok(resp) => {
                tracing::debug!(attempts, status = %resp.status(), "backend answered readiness probe");
                return Readiness::Confirmed;
            }
            Err(e) => tracing::trace!(attempts, "readiness probe failed: {e}"),
        }
        if Instant::now() >= deadline {
            tracing::warn!(attempts, ?timeout, "backend did not answer in time, continuing anyway");
            return Readiness::TimedOut;
        }
        tokio::time::sleep(interval).await;
    }
}

async fn backend_gone(mut status: watch::Receiver<BackendStatus>) {
    if status.wait_for(|s| s.is_exited()).await.is_err() {
        // publisher dropped: the supervisor is going away, never resolve
        futures::future::pending::<()>().await;
    }
}
