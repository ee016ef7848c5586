use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Fixed cadence of the scheduler. Not configurable.
pub const TICK_INTERVAL: Duration = Duration::from_secs(60);

/// Tunables for the probes and the retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Request timeout for plain HTTP probes (default: 30s).
    pub http_timeout: Duration,
    /// Request timeout for keyword probes (default: 10s).
    pub keyword_timeout: Duration,
    /// Connect timeout for TCP port probes (default: 2s).
    pub port_timeout: Duration,
    /// Additional attempts after a failed first attempt (default: 2).
    pub max_retries: u32,
    /// Linear backoff step; retry `n` waits `n * retry_backoff` (default: 2000ms).
    pub retry_backoff: Duration,
    /// Number of recent checks returned with each monitor by the read path.
    pub history_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            http_timeout: Duration::from_secs(30),
            keyword_timeout: Duration::from_secs(10),
            port_timeout: Duration::from_secs(2),
            max_retries: 2,
            retry_backoff: Duration::from_millis(2000),
            history_limit: 20,
        }
    }
}

impl EngineConfig {
    pub fn with_http_timeout(mut self, ms: u64) -> Self {
        self.http_timeout = Duration::from_millis(ms);
        self
    }

    pub fn with_keyword_timeout(mut self, ms: u64) -> Self {
        self.keyword_timeout = Duration::from_millis(ms);
        self
    }

    pub fn with_port_timeout(mut self, ms: u64) -> Self {
        self.port_timeout = Duration::from_millis(ms);
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_retry_backoff(mut self, ms: u64) -> Self {
        self.retry_backoff = Duration::from_millis(ms);
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }
}
