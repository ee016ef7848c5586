//! TOML configuration file schema and parsing.
//!
//! Example config file:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:3000"
//! log_format = "json"
//!
//! [database]
//! url = "sqlite:/var/lib/vps-sentinel/sentinel.db"
//!
//! [probe]
//! http_timeout_ms = 15000
//! max_retries = 2
//!
//! [telegram]
//! bot_token = "123456:ABC"
//! chat_id = "-100123"
//!
//! [email]
//! host = "smtp.example.com"
//! username = "alerts"
//! password = "secret"
//! to = ["ops@example.com"]
//!
//! [[webhook]]
//! url = "https://hooks.example.com/uptime"
//! events = ["monitor.down"]
//! secret = "shared-key"
//!
//! [[monitor]]
//! name = "Shop"
//! url = "https://shop.example.com"
//!
//! [[monitor]]
//! name = "Postgres"
//! url = "db.internal"
//! kind = "port"
//! port = 5432
//! ```

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;

use serde::Deserialize;

use sentinel_core::{EmailConfig, EngineConfig, NewMonitor, ProbeKind, TelegramConfig, WebhookConfig};

pub const DEFAULT_LISTEN: &str = "0.0.0.0:3000";
pub const DEFAULT_DATABASE_URL: &str = "sqlite:./vps-sentinel.db";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub probe: ProbeOverrides,

    #[serde(default)]
    pub telegram: Option<TelegramConfig>,

    #[serde(default)]
    pub email: Option<EmailConfig>,

    #[serde(default)]
    pub webhook: Vec<WebhookConfig>,

    /// Monitors added on startup when no monitor with the same URL exists.
    #[serde(default)]
    pub monitor: Vec<MonitorDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// When absent, `PORT` from the environment decides the port.
    #[serde(default)]
    pub listen: Option<SocketAddr>,

    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: None,
            log_format: default_log_format(),
        }
    }
}

fn default_log_format() -> String {
    "pretty".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

fn default_database_url() -> String {
    DEFAULT_DATABASE_URL.into()
}

/// Optional overrides on top of [`EngineConfig::default`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeOverrides {
    pub http_timeout_ms: Option<u64>,
    pub keyword_timeout_ms: Option<u64>,
    pub port_timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_backoff_ms: Option<u64>,
    pub history_limit: Option<usize>,
}

impl ProbeOverrides {
    pub fn to_engine_config(&self) -> EngineConfig {
        let mut c = EngineConfig::default();
        if let Some(ms) = self.http_timeout_ms {
            c = c.with_http_timeout(ms);
        }
        if let Some(ms) = self.keyword_timeout_ms {
            c = c.with_keyword_timeout(ms);
        }
        if let Some(ms) = self.port_timeout_ms {
            c = c.with_port_timeout(ms);
        }
        if let Some(n) = self.max_retries {
            c = c.with_max_retries(n);
        }
        if let Some(ms) = self.retry_backoff_ms {
            c = c.with_retry_backoff(ms);
        }
        if let Some(n) = self.history_limit {
            c = c.with_history_limit(n);
        }
        c
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorDef {
    pub name: String,
    pub url: String,

    #[serde(default = "default_kind")]
    pub kind: String,

    pub keyword: Option<String>,
    pub port: Option<i64>,

    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_kind() -> String {
    "http".into()
}

fn default_active() -> bool {
    true
}

impl MonitorDef {
    pub fn to_new_monitor(&self) -> Result<NewMonitor, String> {
        let kind = ProbeKind::from_parts(&self.kind, self.keyword.clone(), self.port)
            .map_err(|e| format!("Monitor '{}': {}", self.name, e))?;
        let monitor = NewMonitor::http(self.name.trim(), self.url.trim())
            .with_kind(kind)
            .with_active(self.active);
        monitor
            .validate()
            .map_err(|e| format!("Monitor '{}': {}", self.name, e))?;
        Ok(monitor)
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;

        let config: AppConfig = toml::from_str(&content)
            .map_err(|e| format!("Failed to parse config file {}: {}", path.display(), e))?;

        config.validate()?;
        Ok(config)
    }

    /// Telegram settings from the file, falling back to the environment.
    pub fn telegram_config(&self) -> Option<TelegramConfig> {
        self.telegram.clone().or_else(TelegramConfig::from_env)
    }

    fn validate(&self) -> Result<(), String> {
        match self.server.log_format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(format!(
                    "Invalid log_format '{}': must be 'pretty' or 'json'",
                    other
                ));
            }
        }

        if !self.database.url.starts_with("sqlite:") {
            return Err(format!(
                "Invalid database url '{}': must start with 'sqlite:'",
                self.database.url
            ));
        }

        if let Some(tg) = &self.telegram {
            if tg.bot_token.is_empty() || tg.chat_id.is_empty() {
                return Err("Telegram bot_token and chat_id must not be empty".into());
            }
        }

        if let Some(email) = &self.email {
            if email.host.is_empty() {
                return Err("Email host must not be empty".into());
            }
            if email.to.is_empty() {
                return Err("Email needs at least one recipient in 'to'".into());
            }
            if email.username.is_some() != email.password.is_some() {
                return Err("Email username and password must be set together".into());
            }
        }

        for (i, wh) in self.webhook.iter().enumerate() {
            url::Url::parse(&wh.url)
                .map_err(|e| format!("Invalid webhook URL at index {}: {} ({})", i, wh.url, e))?;
            for event in &wh.events {
                if event != "monitor.down" && event != "monitor.up" {
                    return Err(format!(
                        "Invalid webhook event '{}' at index {}: must be 'monitor.down' or 'monitor.up'",
                        event, i
                    ));
                }
            }
        }

        let mut urls = HashSet::new();
        for m in &self.monitor {
            let new = m.to_new_monitor()?;
            if !matches!(new.kind, ProbeKind::Port { .. }) {
                let parsed = url::Url::parse(&new.url)
                    .map_err(|e| format!("Invalid URL in monitor '{}': {} ({})", m.name, m.url, e))?;
                if parsed.scheme() != "http" && parsed.scheme() != "https" {
                    return Err(format!(
                        "Monitor URL must use http or https in monitor '{}': {}",
                        m.name, m.url
                    ));
                }
            }
            if !urls.insert(new.url) {
                return Err(format!("Duplicate monitor URL: {}", m.url));
            }
        }

        Ok(())
    }
}
