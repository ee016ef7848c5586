use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status reported for a transport failure (DNS, connect, timeout, TLS).
pub const STATUS_UNREACHABLE: u16 = 0;
/// The only status classified as "up".
pub const STATUS_OK: u16 = 200;
/// Reachable, but the configured keyword was not in the body.
pub const STATUS_KEYWORD_MISSING: u16 = 409;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidMonitor {
    #[error("keyword monitors need a non-empty keyword")]
    EmptyKeyword,
    #[error("port monitors need a TCP port between 1 and 65535, got {0}")]
    InvalidPort(i64),
    #[error("{0} monitors need a {1}")]
    MissingField(&'static str, &'static str),
    #[error("unknown monitor kind '{0}'")]
    UnknownKind(String),
    #[error("monitor name must not be empty")]
    EmptyName,
    #[error("monitor url must not be empty")]
    EmptyUrl,
}

/// What a monitor probes, carrying only the fields that kind needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeKind {
    Http,
    Keyword { keyword: String },
    Port { port: u16 },
}

impl ProbeKind {
    pub fn keyword(keyword: impl Into<String>) -> Result<Self, InvalidMonitor> {
        let keyword = keyword.into();
        if keyword.is_empty() {
            return Err(InvalidMonitor::EmptyKeyword);
        }
        Ok(Self::Keyword { keyword })
    }

    pub fn port(port: i64) -> Result<Self, InvalidMonitor> {
        match u16::try_from(port) {
            Ok(p) if p > 0 => Ok(Self::Port { port: p }),
            _ => Err(InvalidMonitor::InvalidPort(port)),
        }
    }

    /// Rebuild a kind from its flattened storage/request form.
    pub fn from_parts(
        kind: &str,
        keyword: Option<String>,
        port: Option<i64>,
    ) -> Result<Self, InvalidMonitor> {
        match kind {
            "http" => Ok(Self::Http),
            "keyword" => {
                let keyword = keyword.ok_or(InvalidMonitor::MissingField("keyword", "keyword"))?;
                Self::keyword(keyword)
            }
            "port" => {
                let port = port.ok_or(InvalidMonitor::MissingField("port", "port"))?;
                Self::port(port)
            }
            other => Err(InvalidMonitor::UnknownKind(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Keyword { .. } => "keyword",
            Self::Port { .. } => "port",
        }
    }

    pub fn keyword_value(&self) -> Option<&str> {
        match self {
            Self::Keyword { keyword } => Some(keyword),
            _ => None,
        }
    }

    pub fn port_value(&self) -> Option<u16> {
        match self {
            Self::Port { port } => Some(*port),
            _ => None,
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single probe attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub status: u16,
    pub latency_ms: u64,
}

impl ProbeOutcome {
    pub fn new(status: u16, latency_ms: u64) -> Self {
        Self { status, latency_ms }
    }

    pub fn unreachable(latency_ms: u64) -> Self {
        Self::new(STATUS_UNREACHABLE, latency_ms)
    }

    pub fn is_up(&self) -> bool {
        self.status == STATUS_OK
    }
}

/// Final result of one cycle, as persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub status: u16,
    pub latency_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl CheckResult {
    pub fn from_outcome(outcome: ProbeOutcome, timestamp: DateTime<Utc>) -> Self {
        Self {
            status: outcome.status,
            latency_ms: outcome.latency_ms,
            timestamp,
        }
    }
}

/// Last observed state of a monitor. Absent until the first cycle completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastCheck {
    pub status: u16,
    pub latency_ms: u64,
    pub checked_at: DateTime<Utc>,
}

impl From<&CheckResult> for LastCheck {
    fn from(result: &CheckResult) -> Self {
        Self {
            status: result.status,
            latency_ms: result.latency_ms,
            checked_at: result.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Monitor {
    pub id: i64,
    pub name: String,
    pub url: String,
    #[serde(flatten)]
    pub kind: ProbeKind,
    pub active: bool,
    pub last_check: Option<LastCheck>,
}

impl Monitor {
    pub fn last_status(&self) -> Option<u16> {
        self.last_check.map(|c| c.status)
    }
}

/// Input for the add-monitor operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMonitor {
    pub name: String,
    pub url: String,
    pub kind: ProbeKind,
    pub active: bool,
}

impl NewMonitor {
    /// An active plain-HTTP monitor.
    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            kind: ProbeKind::Http,
            active: true,
        }
    }

    pub fn with_kind(mut self, kind: ProbeKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    pub fn validate(&self) -> Result<(), InvalidMonitor> {
        if self.name.trim().is_empty() {
            return Err(InvalidMonitor::EmptyName);
        }
        if self.url.trim().is_empty() {
            return Err(InvalidMonitor::EmptyUrl);
        }
        Ok(())
    }
}
