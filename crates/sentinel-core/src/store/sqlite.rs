use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Executor, Sqlite};
use tracing::{debug, info};

use super::{run_migrations, CheckRecord, MonitorStore, Result, StoreError};
use crate::monitor::{CheckResult, LastCheck, Monitor, NewMonitor, ProbeKind};

const MONITOR_COLUMNS: &str =
    "id, name, url, kind, keyword, port, active, last_status, last_latency, last_checked";

type MonitorRow = (
    i64,
    String,
    String,
    String,
    Option<String>,
    Option<i64>,
    bool,
    Option<i64>,
    Option<i64>,
    Option<String>,
);

type CheckRow = (i64, i64, i64, i64, String);

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(id: i64, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            id,
            reason: format!("bad timestamp '{raw}': {e}"),
        })
}

fn status_from_db(id: i64, status: i64) -> Result<u16> {
    u16::try_from(status).map_err(|_| StoreError::Corrupt {
        id,
        reason: format!("status {status} out of range"),
    })
}

fn monitor_from_row(row: MonitorRow) -> Result<Monitor> {
    let (id, name, url, kind, keyword, port, active, last_status, last_latency, last_checked) = row;

    let kind = ProbeKind::from_parts(&kind, keyword, port).map_err(|e| StoreError::Corrupt {
        id,
        reason: e.to_string(),
    })?;

    let last_check = match (last_status, last_latency, last_checked) {
        (Some(status), Some(latency), Some(checked_at)) => Some(LastCheck {
            status: status_from_db(id, status)?,
            latency_ms: latency.max(0) as u64,
            checked_at: parse_ts(id, &checked_at)?,
        }),
        _ => None,
    };

    Ok(Monitor {
        id,
        name,
        url,
        kind,
        active,
        last_check,
    })
}

fn check_from_row(row: CheckRow) -> Result<CheckRecord> {
    let (id, monitor_id, status, latency, timestamp) = row;
    Ok(CheckRecord {
        id,
        monitor_id,
        status: status_from_db(monitor_id, status)?,
        latency_ms: latency.max(0) as u64,
        timestamp: parse_ts(monitor_id, &timestamp)?,
    })
}

async fn insert_check_with<'e, E>(exec: E, monitor_id: i64, result: &CheckResult) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let done = sqlx::query(
        "INSERT INTO checks (monitor_id, status, latency, timestamp) VALUES (?, ?, ?, ?)",
    )
    .bind(monitor_id)
    .bind(i64::from(result.status))
    .bind(result.latency_ms as i64)
    .bind(format_ts(&result.timestamp))
    .execute(exec)
    .await?;
    Ok(done.last_insert_rowid())
}

async fn update_state_with<'e, E>(exec: E, monitor_id: i64, result: &CheckResult) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let done = sqlx::query(
        "UPDATE monitors SET last_status = ?, last_latency = ?, last_checked = ? WHERE id = ?",
    )
    .bind(i64::from(result.status))
    .bind(result.latency_ms as i64)
    .bind(format_ts(&result.timestamp))
    .bind(monitor_id)
    .execute(exec)
    .await?;

    if done.rows_affected() == 0 {
        return Err(StoreError::NotFound(monitor_id));
    }
    Ok(())
}

/// [`MonitorStore`] over a SQLite pool (WAL, foreign keys enforced).
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `database_url` and migrate it.
    ///
    /// `database_url` is a SQLite connection string such as
    /// `sqlite:./vps-sentinel.db`.
    #[tracing::instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| StoreError::InvalidUrl(format!("{database_url}: {e}")))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .create_if_missing(true);

        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let pool = SqlitePool::connect_with(options).await?;
        run_migrations(&pool).await?;

        info!(url = database_url, "Database ready");
        Ok(Self { pool })
    }

    /// A private in-memory database, migrated. One connection, never recycled,
    /// so the data lives as long as the store.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StoreError::InvalidUrl(e.to_string()))?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        run_migrations(&pool).await?;

        debug!("In-memory database ready");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl MonitorStore for SqliteStore {
    async fn list_active(&self) -> Result<Vec<Monitor>> {
        let rows: Vec<MonitorRow> = sqlx::query_as(&format!(
            "SELECT {MONITOR_COLUMNS} FROM monitors WHERE active = 1 ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(monitor_from_row).collect()
    }

    async fn insert_check(&self, monitor_id: i64, result: &CheckResult) -> Result<i64> {
        insert_check_with(&self.pool, monitor_id, result).await
    }

    async fn update_monitor_state(&self, monitor_id: i64, result: &CheckResult) -> Result<()> {
        update_state_with(&self.pool, monitor_id, result).await
    }

    #[tracing::instrument(skip(self, result), fields(status = result.status))]
    async fn record_check(&self, monitor_id: i64, result: &CheckResult) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        let id = insert_check_with(&mut *tx, monitor_id, result).await?;
        update_state_with(&mut *tx, monitor_id, result).await?;
        tx.commit().await?;
        Ok(id)
    }

    #[tracing::instrument(skip(self, monitor), fields(name = %monitor.name))]
    async fn add_monitor(&self, monitor: NewMonitor) -> Result<Monitor> {
        monitor.validate()?;

        let done = sqlx::query(
            r#"
            INSERT INTO monitors (name, url, kind, keyword, port, active, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&monitor.name)
        .bind(&monitor.url)
        .bind(monitor.kind.as_str())
        .bind(monitor.kind.keyword_value())
        .bind(monitor.kind.port_value().map(i64::from))
        .bind(monitor.active)
        .bind(format_ts(&Utc::now()))
        .execute(&self.pool)
        .await?;

        let id = done.last_insert_rowid();
        info!(monitor_id = id, kind = %monitor.kind, "Monitor added");

        Ok(Monitor {
            id,
            name: monitor.name,
            url: monitor.url,
            kind: monitor.kind,
            active: monitor.active,
            last_check: None,
        })
    }

    async fn get_monitor(&self, id: i64) -> Result<Option<Monitor>> {
        let row: Option<MonitorRow> =
            sqlx::query_as(&format!("SELECT {MONITOR_COLUMNS} FROM monitors WHERE id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(monitor_from_row).transpose()
    }

    async fn list_monitors(&self) -> Result<Vec<Monitor>> {
        let rows: Vec<MonitorRow> =
            sqlx::query_as(&format!("SELECT {MONITOR_COLUMNS} FROM monitors ORDER BY id"))
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(monitor_from_row).collect()
    }

    #[tracing::instrument(skip(self))]
    async fn delete_monitor(&self, id: i64) -> Result<bool> {
        let done = sqlx::query("DELETE FROM monitors WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        let deleted = done.rows_affected() > 0;
        if deleted {
            info!(monitor_id = id, "Monitor deleted");
        }
        Ok(deleted)
    }

    async fn recent_checks(&self, monitor_id: i64, limit: usize) -> Result<Vec<CheckRecord>> {
        let rows: Vec<CheckRow> = sqlx::query_as(
            r#"
            SELECT id, monitor_id, status, latency, timestamp
            FROM checks
            WHERE monitor_id = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(monitor_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut checks = rows
            .into_iter()
            .map(check_from_row)
            .collect::<Result<Vec<_>>>()?;
        checks.reverse();
        Ok(checks)
    }
}
