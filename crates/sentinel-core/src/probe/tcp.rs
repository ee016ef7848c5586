use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::monitor::{ProbeOutcome, STATUS_OK};

/// Result of a bounded connect attempt.
#[derive(Debug)]
pub enum ConnectOutcome {
    Connected(Duration),
    TimedOut,
    Failed { elapsed: Duration, error: io::Error },
}

impl ConnectOutcome {
    /// A timeout reports the full budget as its latency.
    pub fn into_probe_outcome(self, budget: Duration) -> ProbeOutcome {
        match self {
            Self::Connected(elapsed) => ProbeOutcome::new(STATUS_OK, elapsed.as_millis() as u64),
            Self::TimedOut => ProbeOutcome::unreachable(budget.as_millis() as u64),
            Self::Failed { elapsed, .. } => ProbeOutcome::unreachable(elapsed.as_millis() as u64),
        }
    }
}

/// Race a connect future against `budget`. The connection, if any, is
/// dropped immediately.
pub async fn connect_with_timeout<F, T>(connect: F, budget: Duration) -> ConnectOutcome
where
    F: Future<Output = io::Result<T>>,
{
    let start = Instant::now();
    match tokio::time::timeout(budget, connect).await {
        Ok(Ok(_conn)) => ConnectOutcome::Connected(start.elapsed()),
        Ok(Err(error)) => ConnectOutcome::Failed {
            elapsed: start.elapsed(),
            error,
        },
        Err(_) => ConnectOutcome::TimedOut,
    }
}

/// Host part of a monitor target.
///
/// Accepts bare hosts as well as URLs: the scheme is stripped, everything
/// from the first path/query/fragment delimiter is cut, a trailing `:port`
/// on a plain host is dropped and IPv6 brackets are removed.
pub fn extract_host(target: &str) -> String {
    let rest = target
        .strip_prefix("https://")
        .or_else(|| target.strip_prefix("http://"))
        .unwrap_or(target);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);

    if let Some(inner) = authority.strip_prefix('[') {
        return inner.split(']').next().unwrap_or(inner).to_string();
    }

    match authority.rsplit_once(':') {
        Some((host, port))
            if !host.contains(':') && !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) =>
        {
            host.to_string()
        }
        _ => authority.to_string(),
    }
}

/// Plain TCP reachability on an explicit port.
#[derive(Debug, Clone)]
pub struct PortProbe {
    timeout: Duration,
}

impl PortProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub async fn probe(&self, target: &str, port: u16) -> ProbeOutcome {
        let host = extract_host(target);
        let outcome =
            connect_with_timeout(TcpStream::connect((host.as_str(), port)), self.timeout).await;
        match &outcome {
            ConnectOutcome::Connected(elapsed) => {
                debug!(host = %host, port, latency_ms = elapsed.as_millis() as u64, "Port open");
            }
            ConnectOutcome::TimedOut => {
                warn!(host = %host, port, timeout_ms = self.timeout.as_millis() as u64, "Port check timed out");
            }
            ConnectOutcome::Failed { error, .. } => {
                warn!(host = %host, port, error = %error, "Port check failed");
            }
        }
        outcome.into_probe_outcome(self.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn extract_host_strips_scheme_and_path() {
        assert_eq!(extract_host("https://example.com/health"), "example.com");
        assert_eq!(extract_host("http://example.com"), "example.com");
        assert_eq!(extract_host("example.com"), "example.com");
        assert_eq!(extract_host("10.0.0.5/"), "10.0.0.5");
        assert_eq!(extract_host("example.com?x=1"), "example.com");
    }

    #[test]
    fn extract_host_drops_port_and_brackets() {
        assert_eq!(extract_host("https://example.com:8443/x"), "example.com");
        assert_eq!(extract_host("http://[::1]:8080/"), "::1");
        assert_eq!(extract_host("[2001:db8::1]"), "2001:db8::1");
        assert_eq!(extract_host("::1"), "::1");
    }

    #[tokio::test]
    async fn open_port_reports_200() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let probe = PortProbe::new(Duration::from_secs(2));
        let outcome = probe.probe("127.0.0.1", port).await;
        assert_eq!(outcome.status, 200);
    }

    #[tokio::test]
    async fn open_port_accepts_url_targets() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let probe = PortProbe::new(Duration::from_secs(2));
        let outcome = probe.probe("http://127.0.0.1/status", port).await;
        assert_eq!(outcome.status, 200);
    }

    #[tokio::test]
    async fn closed_port_reports_zero() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let probe = PortProbe::new(Duration::from_secs(2));
        let outcome = probe.probe("127.0.0.1", port).await;
        assert_eq!(outcome.status, 0);
        assert!(outcome.latency_ms < 2000);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_reports_full_budget() {
        let budget = Duration::from_secs(2);
        let outcome =
            connect_with_timeout(std::future::pending::<io::Result<()>>(), budget).await;
        assert!(matches!(outcome, ConnectOutcome::TimedOut));

        let probe_outcome = outcome.into_probe_outcome(budget);
        assert_eq!(probe_outcome.status, 0);
        assert_eq!(probe_outcome.latency_ms, 2000);
    }

    #[tokio::test]
    async fn failed_connect_reports_elapsed() {
        let outcome = connect_with_timeout(
            async { Err::<(), _>(io::Error::from(io::ErrorKind::ConnectionRefused)) },
            Duration::from_secs(2),
        )
        .await;
        match outcome {
            ConnectOutcome::Failed { elapsed, error } => {
                assert!(elapsed < Duration::from_secs(2));
                assert_eq!(error.kind(), io::ErrorKind::ConnectionRefused);
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }
}
