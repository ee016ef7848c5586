use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};

use super::{AlertChannel, AlertMessage, NotifyError};

/// SMTP settings for the email channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailConfig {
    pub host: String,

    #[serde(default = "default_smtp_port")]
    pub port: u16,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_from")]
    pub from: String,

    pub to: Vec<String>,

    /// STARTTLS. Disable only for local relays.
    #[serde(default = "default_use_tls")]
    pub use_tls: bool,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_from() -> String {
    "VPS Sentinel <alerts@vps-sentinel.com>".to_string()
}

fn default_use_tls() -> bool {
    true
}

/// Sends each alert as a multipart (plain + HTML) email.
pub struct EmailChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl EmailChannel {
    /// Validates addresses and builds the transport. No connection is made
    /// until the first alert.
    #[tracing::instrument(
        name = "email_channel_new",
        skip(config),
        fields(host = %config.host, port = config.port, use_tls = config.use_tls)
    )]
    pub fn new(config: EmailConfig) -> Result<Self, NotifyError> {
        let from: Mailbox = config
            .from
            .parse()
            .map_err(|e| NotifyError::Address(format!("{}: {e}", config.from)))?;

        if config.to.is_empty() {
            return Err(NotifyError::Config("email channel needs at least one recipient".into()));
        }
        let to = config
            .to
            .iter()
            .map(|addr| {
                addr.parse::<Mailbox>()
                    .map_err(|e| NotifyError::Address(format!("{addr}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let builder = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| NotifyError::Config(format!("SMTP relay {}: {e}", config.host)))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };

        let mut builder = builder.port(config.port);
        match (config.username, config.password) {
            (Some(username), Some(password)) => {
                builder = builder.credentials(Credentials::new(username, password));
            }
            (None, None) => {}
            _ => {
                return Err(NotifyError::Config(
                    "SMTP username and password must be set together".into(),
                ));
            }
        }

        tracing::debug!(recipients = to.len(), "Email channel initialized");

        Ok(Self {
            transport: builder.build(),
            from,
            to,
        })
    }

    fn build_message(&self, message: &AlertMessage) -> Result<Message, NotifyError> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(message.subject());
        for to in &self.to {
            builder = builder.to(to.clone());
        }

        let html = format!(
            "<p>{}</p>",
            message
                .html
                .lines()
                .collect::<Vec<_>>()
                .join("<br>\n")
        );
        builder
            .multipart(MultiPart::alternative_plain_html(message.plain_text(), html))
            .map_err(|e| NotifyError::Send(format!("failed to build email: {e}")))
    }
}

#[async_trait]
impl AlertChannel for EmailChannel {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn send(&self, message: &AlertMessage) -> Result<(), NotifyError> {
        let email = self.build_message(message)?;
        self.transport
            .send(email)
            .await
            .map_err(|e| NotifyError::Send(e.to_string()))?;
        Ok(())
    }
}
