//! Alert delivery.
//!
//! The engine pushes [`AlertEvent`]s into an unbounded channel. The
//! [`AlertDispatcher`] reads from that channel, renders each event once into
//! an [`AlertMessage`] and fans it out to every configured [`AlertChannel`].
//! Channel failures are logged and dropped; they never reach the engine.

mod email;
mod telegram;
mod webhook;

pub use email::{EmailChannel, EmailConfig};
pub use telegram::{TelegramChannel, TelegramConfig};
pub use webhook::{WebhookChannel, WebhookConfig, WebhookPayload};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Local;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::monitor::{AlertEvent, LinkState};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("{channel} rejected the alert: {detail}")]
    Rejected {
        channel: &'static str,
        detail: String,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid email address: {0}")]
    Address(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A rendered alert, shared by every channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertMessage {
    pub event: AlertEvent,
    /// Telegram-flavoured HTML summary.
    pub html: String,
}

impl AlertMessage {
    pub fn new(event: AlertEvent) -> Self {
        let local_time = event.timestamp.with_timezone(&Local).format("%H:%M:%S");
        let html = format!(
            "{emoji} <b>{header}: {name}</b>\n🔗 {url}\n📉 <b>Status:</b> {status}\n🕒 <b>Time:</b> {local_time}",
            emoji = emoji(event.direction),
            header = header(event.direction),
            name = escape_html(&event.monitor_name),
            url = escape_html(&event.target),
            status = event.status,
        );
        Self { event, html }
    }

    pub fn emoji(&self) -> &'static str {
        emoji(self.event.direction)
    }

    pub fn header(&self) -> &'static str {
        header(self.event.direction)
    }

    pub fn subject(&self) -> String {
        format!("{} {}: {}", self.emoji(), self.event.monitor_name, self.header())
    }

    /// The summary with markup removed, for plain-text transports.
    pub fn plain_text(&self) -> String {
        unescape_html(&strip_tags(&self.html))
    }
}

fn emoji(direction: LinkState) -> &'static str {
    match direction {
        LinkState::Up => "✅",
        LinkState::Down => "🔴",
    }
}

fn header(direction: LinkState) -> &'static str {
    match direction {
        LinkState::Up => "RECOVERED",
        LinkState::Down => "DOWN",
    }
}

/// Escape the three characters Telegram's HTML mode treats as markup.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape_html(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Drop everything between `<` and `>`.
pub fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

/// A destination for rendered alerts.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, message: &AlertMessage) -> Result<(), NotifyError>;
}

pub fn alert_channel() -> (
    mpsc::UnboundedSender<AlertEvent>,
    mpsc::UnboundedReceiver<AlertEvent>,
) {
    mpsc::unbounded_channel()
}

/// Background task fanning alerts out to the configured channels.
pub struct AlertDispatcher {
    rx: mpsc::UnboundedReceiver<AlertEvent>,
    channels: Vec<Arc<dyn AlertChannel>>,
}

impl AlertDispatcher {
    pub fn new(
        rx: mpsc::UnboundedReceiver<AlertEvent>,
        channels: Vec<Arc<dyn AlertChannel>>,
    ) -> Self {
        Self { rx, channels }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Run the dispatcher loop. Returns when all senders are dropped.
    pub async fn run(mut self) {
        debug!(channel_count = self.channels.len(), "Alert dispatcher started");

        while let Some(event) = self.rx.recv().await {
            info!(
                monitor_id = event.monitor_id,
                monitor = %event.monitor_name,
                direction = %event.direction,
                status = event.status,
                "Alert"
            );

            let message = AlertMessage::new(event);
            let results = futures::future::join_all(
                self.channels.iter().map(|channel| channel.send(&message)),
            )
            .await;

            for (channel, result) in self.channels.iter().zip(results) {
                match result {
                    Ok(()) => debug!(channel = channel.name(), "Alert delivered"),
                    Err(e) => warn!(
                        channel = channel.name(),
                        monitor_id = message.event.monitor_id,
                        error = %e,
                        "Alert delivery failed"
                    ),
                }
            }
        }

        debug!("Alert dispatcher shutting down");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;
    use std::time::Duration;

    pub(crate) fn event(direction: LinkState, status: u16) -> AlertEvent {
        AlertEvent {
            monitor_id: 7,
            monitor_name: "Shop & Co".into(),
            target: "https://shop.example/?a=1&b=<2>".into(),
            status,
            direction,
            timestamp: Utc.with_ymd_and_hms(2025, 3, 1, 12, 30, 15).unwrap(),
        }
    }

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl AlertChannel for Recording {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn send(&self, message: &AlertMessage) -> Result<(), NotifyError> {
            self.seen.lock().unwrap().push(message.subject());
            if self.fail {
                return Err(NotifyError::Send("boom".into()));
            }
            Ok(())
        }
    }

    #[test]
    fn down_message_layout() {
        let msg = AlertMessage::new(event(LinkState::Down, 0));
        assert!(msg.html.starts_with("🔴 <b>DOWN: Shop &amp; Co</b>\n"));
        assert!(msg.html.contains("🔗 https://shop.example/?a=1&amp;b=&lt;2&gt;\n"));
        assert!(msg.html.contains("📉 <b>Status:</b> 0\n"));
        assert!(msg.html.contains("🕒 <b>Time:</b> "));
        assert_eq!(msg.subject(), "🔴 Shop & Co: DOWN");
    }

    #[test]
    fn recovered_message_layout() {
        let msg = AlertMessage::new(event(LinkState::Up, 200));
        assert!(msg.html.starts_with("✅ <b>RECOVERED: Shop &amp; Co</b>"));
        assert_eq!(msg.subject(), "✅ Shop & Co: RECOVERED");
    }

    #[test]
    fn plain_text_drops_markup() {
        let msg = AlertMessage::new(event(LinkState::Down, 503));
        let text = msg.plain_text();
        assert!(text.starts_with("🔴 DOWN: Shop & Co\n"));
        assert!(text.contains("🔗 https://shop.example/?a=1&b=<2>\n"));
        assert!(text.contains("📉 Status: 503"));
        assert!(!text.contains("<b>"));
    }

    #[test]
    fn strip_tags_keeps_text() {
        assert_eq!(strip_tags("<b>bold</b> and <i>it</i>"), "bold and it");
        assert_eq!(strip_tags("no tags"), "no tags");
    }

    #[tokio::test]
    async fn dispatcher_fans_out_and_survives_failures() {
        let ok = Arc::new(Recording::default());
        let failing = Arc::new(Recording {
            fail: true,
            ..Default::default()
        });
        let (tx, rx) = alert_channel();
        let channels: Vec<Arc<dyn AlertChannel>> = vec![ok.clone(), failing.clone()];
        let dispatcher = AlertDispatcher::new(rx, channels);
        assert_eq!(dispatcher.channel_count(), 2);

        tx.send(event(LinkState::Down, 0)).unwrap();
        tx.send(event(LinkState::Up, 200)).unwrap();
        drop(tx);

        tokio::time::timeout(Duration::from_secs(2), dispatcher.run())
            .await
            .expect("Dispatcher should exit after sender is dropped");

        assert_eq!(ok.seen.lock().unwrap().len(), 2);
        assert_eq!(failing.seen.lock().unwrap().len(), 2);
    }
}
