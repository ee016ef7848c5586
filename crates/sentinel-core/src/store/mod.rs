mod migrations;
mod sqlite;

pub use migrations::{run_migrations, SCHEMA_VERSION};
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::monitor::{CheckResult, InvalidMonitor, Monitor, NewMonitor};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("invalid database URL: {0}")]
    InvalidUrl(String),

    #[error("failed to prepare database directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("monitor {0} not found")]
    NotFound(i64),

    #[error(transparent)]
    Invalid(#[from] InvalidMonitor),

    #[error("corrupt row for monitor {id}: {reason}")]
    Corrupt { id: i64, reason: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A persisted check row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRecord {
    pub id: i64,
    pub monitor_id: i64,
    pub status: u16,
    pub latency_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Persistence for monitors and their check history.
///
/// The engine only needs `list_active` and `record_check`; the rest serves the
/// management API.
#[async_trait]
pub trait MonitorStore: Send + Sync {
    async fn list_active(&self) -> Result<Vec<Monitor>>;

    /// Append a check row. Returns its id.
    async fn insert_check(&self, monitor_id: i64, result: &CheckResult) -> Result<i64>;

    async fn update_monitor_state(&self, monitor_id: i64, result: &CheckResult) -> Result<()>;

    /// Insert the check row and update the monitor's last state.
    ///
    /// Backends that support it should make the pair atomic.
    async fn record_check(&self, monitor_id: i64, result: &CheckResult) -> Result<i64> {
        let id = self.insert_check(monitor_id, result).await?;
        self.update_monitor_state(monitor_id, result).await?;
        Ok(id)
    }

    async fn add_monitor(&self, monitor: NewMonitor) -> Result<Monitor>;

    async fn get_monitor(&self, id: i64) -> Result<Option<Monitor>>;

    async fn list_monitors(&self) -> Result<Vec<Monitor>>;

    /// Delete a monitor and its history. Returns false if it did not exist.
    async fn delete_monitor(&self, id: i64) -> Result<bool>;

    /// The newest `limit` checks for a monitor, ordered oldest to newest.
    async fn recent_checks(&self, monitor_id: i64, limit: usize) -> Result<Vec<CheckRecord>>;
}
