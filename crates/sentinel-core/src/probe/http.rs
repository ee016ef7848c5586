use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, PRAGMA, USER_AGENT};
use reqwest::Client;
use tracing::warn;

use crate::monitor::{ProbeOutcome, STATUS_KEYWORD_MISSING, STATUS_OK, STATUS_UNREACHABLE};

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const BROWSER_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";

fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
    headers.insert(ACCEPT, HeaderValue::from_static(BROWSER_ACCEPT));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    headers
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Plain reachability probe: the status is whatever the server answered.
///
/// Sends a browser-like header set so naive bot filters answer normally.
///
/// TLS certificate validation is turned off for this probe. Monitored hosts
/// are often self-signed or use internal CAs, and the question asked here is
/// "does it answer", not "is its certificate trusted". Do not reuse this
/// client for anything that sends credentials.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(browser_headers())
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(Self { client })
    }

    pub async fn probe(&self, url: &str) -> ProbeOutcome {
        let start = Instant::now();
        match self.client.get(url).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let latency_ms = elapsed_ms(start);
                if status != STATUS_OK {
                    warn!(url, status, latency_ms, "HTTP check returned non-200 status");
                }
                ProbeOutcome::new(status, latency_ms)
            }
            Err(e) => {
                let latency_ms = elapsed_ms(start);
                let status = e.status().map(|s| s.as_u16()).unwrap_or(STATUS_UNREACHABLE);
                warn!(
                    url,
                    status,
                    latency_ms,
                    timeout = e.is_timeout(),
                    connect = e.is_connect(),
                    error = %e,
                    "HTTP check failed"
                );
                ProbeOutcome::new(status, latency_ms)
            }
        }
    }
}

/// Fetches the page and looks for a substring in the body.
///
/// A 2xx response whose body is not UTF-8 text, or does not contain the
/// keyword, reports [`STATUS_KEYWORD_MISSING`].
#[derive(Debug, Clone)]
pub struct KeywordProbe {
    client: Client,
}

impl KeywordProbe {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    pub async fn probe(&self, url: &str, keyword: &str) -> ProbeOutcome {
        let start = Instant::now();
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                let status = e.status().map(|s| s.as_u16()).unwrap_or(STATUS_UNREACHABLE);
                return ProbeOutcome::new(status, elapsed_ms(start));
            }
        };

        let status = response.status();
        if !status.is_success() {
            return ProbeOutcome::new(status.as_u16(), elapsed_ms(start));
        }

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                warn!(url, error = %e, "Failed to read body for keyword check");
                return ProbeOutcome::unreachable(elapsed_ms(start));
            }
        };
        let latency_ms = elapsed_ms(start);

        match std::str::from_utf8(&body) {
            Ok(text) if text.contains(keyword) => ProbeOutcome::new(STATUS_OK, latency_ms),
            Ok(_) => {
                warn!(url, keyword, "Keyword not found");
                ProbeOutcome::new(STATUS_KEYWORD_MISSING, latency_ms)
            }
            Err(_) => {
                warn!(url, keyword, "Body is not text, keyword cannot match");
                ProbeOutcome::new(STATUS_KEYWORD_MISSING, latency_ms)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn http_probe_reports_200() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
            .mount(&server)
            .await;

        let probe = HttpProbe::new(Duration::from_secs(5)).unwrap();
        let outcome = probe.probe(&format!("{}/", server.uri())).await;
        assert_eq!(outcome.status, 200);
        assert!(outcome.is_up());
    }

    #[tokio::test]
    async fn http_probe_sends_browser_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("cache-control", "no-cache"))
            .and(header("pragma", "no-cache"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let probe = HttpProbe::new(Duration::from_secs(5)).unwrap();
        assert_eq!(probe.probe(&server.uri()).await.status, 200);

        // Comma-bearing values are compared whole, not through header matchers.
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let sent = |name: &str| {
            requests[0]
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        };
        assert_eq!(sent("user-agent").as_deref(), Some(BROWSER_USER_AGENT));
        assert_eq!(sent("accept-language").as_deref(), Some("en-US,en;q=0.5"));
        assert_eq!(sent("accept").as_deref(), Some(BROWSER_ACCEPT));
    }

    #[tokio::test]
    async fn http_probe_reports_error_status_codes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let probe = HttpProbe::new(Duration::from_secs(5)).unwrap();
        let outcome = probe.probe(&server.uri()).await;
        assert_eq!(outcome.status, 503);
        assert!(!outcome.is_up());
    }

    #[tokio::test]
    async fn http_probe_reports_zero_when_unreachable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let probe = HttpProbe::new(Duration::from_secs(5)).unwrap();
        let outcome = probe.probe(&format!("http://{}/", addr)).await;
        assert_eq!(outcome.status, 0);
    }

    #[tokio::test]
    async fn http_probe_reports_zero_on_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let probe = HttpProbe::new(Duration::from_millis(100)).unwrap();
        let outcome = probe.probe(&server.uri()).await;
        assert_eq!(outcome.status, 0);
        assert!(outcome.latency_ms >= 100);
    }

    #[tokio::test]
    async fn keyword_probe_finds_keyword() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<h1>Welcome home</h1>"))
            .mount(&server)
            .await;

        let probe = KeywordProbe::new(Duration::from_secs(5)).unwrap();
        assert_eq!(probe.probe(&server.uri(), "Welcome").await.status, 200);
    }

    #[tokio::test]
    async fn keyword_probe_reports_409_when_missing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<h1>Maintenance</h1>"))
            .mount(&server)
            .await;

        let probe = KeywordProbe::new(Duration::from_secs(5)).unwrap();
        assert_eq!(probe.probe(&server.uri(), "Welcome").await.status, 409);
    }

    #[tokio::test]
    async fn keyword_probe_reports_409_for_binary_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xff, 0xfe, 0x00, 0x9f]))
            .mount(&server)
            .await;

        let probe = KeywordProbe::new(Duration::from_secs(5)).unwrap();
        assert_eq!(probe.probe(&server.uri(), "Welcome").await.status, 409);
    }

    #[tokio::test]
    async fn keyword_probe_passes_through_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Welcome to the 404 page"))
            .mount(&server)
            .await;

        let probe = KeywordProbe::new(Duration::from_secs(5)).unwrap();
        assert_eq!(probe.probe(&server.uri(), "Welcome").await.status, 404);
    }

    #[tokio::test]
    async fn keyword_probe_reports_zero_when_unreachable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let probe = KeywordProbe::new(Duration::from_secs(5)).unwrap();
        assert_eq!(probe.probe(&format!("http://{}/", addr), "x").await.status, 0);
    }
}
