use std::net::Ipv4Addr;
use tokio::net::TcpListener;

/// How many consecutive ports are tried after the preferred one.
pub(crate) const DEFAULT_SCAN_WINDOW: u16 = 100;

/// Bind and immediately release a loopback listener on `port`.
pub(crate) async fn is_port_available(port: u16) -> bool {
    match TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await {
        Ok(listener) => {
            drop(listener);
            true
        }
        Err(_) => false,
    }
}

/// Ports probed for a scan, in ascending order. Stops at `u16::MAX`.
fn candidates(preferred: u16, window: u16) -> impl Iterator<Item = u16> {
    (0..window).map_while(move |offset| preferred.checked_add(offset))
}

/// Return the first free loopback port in `[preferred, preferred + window)`.
///
/// When every candidate is taken the preferred port is returned anyway and the
/// launch goes ahead; the backend will report the bind failure itself.
pub(crate) async fn find_available_port(preferred: u16, window: u16) -> u16 {
    for port in candidates(preferred, window) {
        if is_port_available(port).await {
            tracing::debug!(port, "selected free port");
            return port;
        }
        tracing::trace!(port, "port occupied");
    }
    tracing::warn!(
        preferred,
        window,
        "no free port in scan window, falling back to the preferred port"
    );
    preferred
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn ephemeral_port() -> Option<u16> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.ok()?;
        listener.local_addr().ok().map(|addr| addr.port())
    }

    #[test]
    fn candidates_stop_at_port_space_end() {
        assert_eq!(candidates(65530, 100).count(), 6);
        assert_eq!(candidates(5000, 3).collect::<Vec<_>>(), vec![5000, 5001, 5002]);
        assert_eq!(candidates(5000, 0).count(), 0);
    }

    #[tokio::test]
    async fn returns_preferred_port_when_free() {
        let Some(port) = ephemeral_port().await else {
            return;
        };
        assert_eq!(find_available_port(port, 1).await, port);
    }

    #[tokio::test]
    async fn skips_occupied_preferred_port() {
        let Ok(held) = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await else {
            return;
        };
        let port = held.local_addr().unwrap().port();
        if port > u16::MAX - 10 || !is_port_available(port + 1).await {
            return;
        }

        assert!(!is_port_available(port).await);
        assert_eq!(find_available_port(port, 10).await, port + 1);
    }

    #[tokio::test]
    async fn returns_smallest_free_port_after_occupied_run() {
        let Ok(first) = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await else {
            return;
        };
        let port = first.local_addr().unwrap().port();
        if port > u16::MAX - 10 {
            return;
        }
        let Ok(second) = TcpListener::bind((Ipv4Addr::LOCALHOST, port + 1)).await else {
            return;
        };
        if !is_port_available(port + 2).await || !is_port_available(port + 3).await {
            return;
        }

        // P+3 is free as well; the scan must stop at P+2
        assert_eq!(find_available_port(port, 10).await, port + 2);
        drop((first, second));
    }

    #[tokio::test]
    async fn falls_back_to_preferred_when_window_is_full() {
        let Ok(first) = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await else {
            return;
        };
        let start = first.local_addr().unwrap().port();
        if start > u16::MAX - 3 {
            return;
        }
        let mut held = vec![first];
        for port in start + 1..start + 3 {
            // a failed bind means someone else owns it; the window is still full
            if let Ok(listener) = TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await {
                held.push(listener);
            }
        }

        assert_eq!(find_available_port(start, 3).await, start);
        drop(held);
    }
}
