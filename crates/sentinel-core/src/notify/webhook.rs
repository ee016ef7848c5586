//! Generic JSON webhooks.
//!
//! Each alert becomes a versioned [`WebhookPayload`] POSTed to the endpoint,
//! optionally signed with HMAC-SHA256 in the `X-Sentinel-Signature-256`
//! header. Delivery retries transient failures with exponential backoff.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;
use uuid::Uuid;

use super::{AlertChannel, AlertMessage, NotifyError};
use crate::monitor::LinkState;

pub const SIGNATURE_HEADER: &str = "X-Sentinel-Signature-256";

/// Configuration for a single webhook endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,

    /// Which alert types to deliver (`monitor.down`, `monitor.up`). Empty means all.
    #[serde(default)]
    pub events: Vec<String>,

    #[serde(default = "default_webhook_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_webhook_retries")]
    pub max_retries: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

fn default_webhook_timeout_ms() -> u64 {
    5000
}

fn default_webhook_retries() -> u32 {
    2
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            events: Vec::new(),
            timeout_ms: default_webhook_timeout_ms(),
            max_retries: default_webhook_retries(),
            secret: None,
        }
    }

    pub fn accepts(&self, alert_type: &str) -> bool {
        self.events.is_empty() || self.events.iter().any(|e| e == alert_type)
    }
}

fn alert_type(direction: LinkState) -> &'static str {
    match direction {
        LinkState::Down => "monitor.down",
        LinkState::Up => "monitor.up",
    }
}

/// The JSON envelope POSTed to webhook endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
    pub version: u8,
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub alert_type: String,
    pub monitor_id: i64,
    pub data: serde_json::Value,
}

impl WebhookPayload {
    pub fn from_message(message: &AlertMessage) -> Self {
        let event = &message.event;
        Self {
            version: 1,
            id: Uuid::new_v4().to_string(),
            timestamp: event.timestamp,
            alert_type: alert_type(event.direction).to_string(),
            monitor_id: event.monitor_id,
            data: serde_json::json!({
                "name": event.monitor_name,
                "target": event.target,
                "status": event.status,
                "direction": event.direction,
                "summary": message.plain_text(),
            }),
        }
    }
}

pub struct WebhookChannel {
    config: WebhookConfig,
    client: Client,
}

impl WebhookChannel {
    pub fn new(config: WebhookConfig, client: Client) -> Self {
        Self { config, client }
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, message: &AlertMessage) -> Result<(), NotifyError> {
        let kind = alert_type(message.event.direction);
        if !self.config.accepts(kind) {
            debug!(url = %self.config.url, alert_type = kind, "Webhook filtered out alert");
            return Ok(());
        }

        let body = serde_json::to_vec(&WebhookPayload::from_message(message))?;
        deliver(
            &self.client,
            &self.config.url,
            &body,
            self.config.secret.as_deref(),
            Duration::from_millis(self.config.timeout_ms),
            self.config.max_retries,
        )
        .await
    }
}

async fn deliver(
    client: &Client,
    url: &str,
    body: &[u8],
    secret: Option<&str>,
    timeout: Duration,
    max_retries: u32,
) -> Result<(), NotifyError> {
    let signature = secret.map(|s| sign_payload(body, s)).transpose()?;
    let mut last_error = String::new();

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let backoff = Duration::from_millis(500 * 2u64.pow(attempt - 1));
            tokio::time::sleep(backoff).await;
        }

        let mut req = client
            .post(url)
            .header("Content-Type", "application/json")
            .header("User-Agent", concat!("vps-sentinel/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .body(body.to_vec());

        if let Some(signature) = &signature {
            req = req.header(SIGNATURE_HEADER, format!("sha256={signature}"));
        }

        match req.send().await {
            Ok(resp) if resp.status().is_success() => return Ok(()),
            Ok(resp) => {
                let status = resp.status();
                last_error = format!("HTTP {status} from {url}");
                if status.is_client_error() && status.as_u16() != 429 {
                    break;
                }
            }
            Err(e) => {
                last_error = format!("request to {url} failed: {e}");
            }
        }
    }

    Err(NotifyError::Rejected {
        channel: "webhook",
        detail: last_error,
    })
}

fn sign_payload(body: &[u8], secret: &str) -> Result<String, NotifyError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| NotifyError::Config(format!("webhook secret: {e}")))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::tests::event;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn accepts_all_when_empty() {
        let wh = WebhookConfig::new("https://example.com");
        assert!(wh.accepts("monitor.down"));
        assert!(wh.accepts("monitor.up"));
    }

    #[test]
    fn filters_by_alert_type() {
        let mut wh = WebhookConfig::new("https://example.com");
        wh.events = vec!["monitor.down".into()];
        assert!(wh.accepts("monitor.down"));
        assert!(!wh.accepts("monitor.up"));
    }

    #[test]
    fn payload_carries_event_fields() {
        let msg = AlertMessage::new(event(LinkState::Down, 503));
        let payload = WebhookPayload::from_message(&msg);
        assert_eq!(payload.version, 1);
        assert_eq!(payload.alert_type, "monitor.down");
        assert_eq!(payload.monitor_id, 7);
        assert_eq!(payload.data["status"], 503);
        assert_eq!(payload.data["direction"], "down");
        assert_eq!(payload.data["name"], "Shop & Co");

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "monitor.down");
    }

    #[test]
    fn hmac_signature_is_deterministic() {
        let body = b"test payload";
        let sig1 = sign_payload(body, "my-secret").unwrap();
        let sig2 = sign_payload(body, "my-secret").unwrap();
        assert_eq!(sig1, sig2);
        assert_eq!(sig1.len(), 64);
        assert_ne!(sig1, sign_payload(body, "other-secret").unwrap());
    }

    #[tokio::test]
    async fn signed_delivery() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header_exists(SIGNATURE_HEADER))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = WebhookConfig::new(format!("{}/hook", server.uri()));
        config.secret = Some("s3cret".into());
        let channel = WebhookChannel::new(config, Client::new());

        channel
            .send(&AlertMessage::new(event(LinkState::Up, 200)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let channel = WebhookChannel::new(WebhookConfig::new(server.uri()), Client::new());
        let err = channel
            .send(&AlertMessage::new(event(LinkState::Down, 0)))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .expect(2)
            .mount(&server)
            .await;

        let mut config = WebhookConfig::new(server.uri());
        config.max_retries = 1;
        let channel = WebhookChannel::new(config, Client::new());
        assert!(channel
            .send(&AlertMessage::new(event(LinkState::Down, 0)))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn filtered_alert_is_not_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let mut config = WebhookConfig::new(server.uri());
        config.events = vec!["monitor.down".into()];
        let channel = WebhookChannel::new(config, Client::new());
        channel
            .send(&AlertMessage::new(event(LinkState::Up, 200)))
            .await
            .unwrap();
    }
}
