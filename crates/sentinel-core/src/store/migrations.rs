use chrono::{SecondsFormat, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info};

use super::Result;

/// Latest schema version known to this build.
pub const SCHEMA_VERSION: i64 = 2;

struct Migration {
    version: i64,
    description: &'static str,
    statements: &'static [&'static str],
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema",
        statements: &[
            r#"
            CREATE TABLE IF NOT EXISTS monitors (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                url TEXT NOT NULL,
                kind TEXT NOT NULL DEFAULT 'http' CHECK (kind IN ('http', 'keyword', 'port')),
                keyword TEXT,
                port INTEGER,
                active INTEGER NOT NULL DEFAULT 1,
                last_status INTEGER,
                last_latency INTEGER,
                last_checked TEXT,
                created_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS checks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                monitor_id INTEGER NOT NULL REFERENCES monitors(id) ON DELETE CASCADE,
                status INTEGER NOT NULL,
                latency INTEGER NOT NULL,
                timestamp TEXT NOT NULL
            )
            "#,
        ],
    },
    Migration {
        version: 2,
        description: "Index check history by monitor",
        statements: &[
            "CREATE INDEX IF NOT EXISTS idx_checks_monitor_id ON checks (monitor_id, id)",
            "CREATE INDEX IF NOT EXISTS idx_monitors_active ON monitors (active)",
        ],
    },
];

/// Bring the schema up to [`SCHEMA_VERSION`]. Each migration runs in its own
/// transaction together with its `schema_migrations` row.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL,
            description TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    let current = current_version(pool).await?;
    if current >= SCHEMA_VERSION {
        debug!(version = current, "Database schema is up to date");
        return Ok(());
    }

    info!(from = current, to = SCHEMA_VERSION, "Running database migrations");

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let mut tx = pool.begin().await?;
        for statement in migration.statements {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        sqlx::query(
            "INSERT INTO schema_migrations (version, applied_at, description) VALUES (?, ?, ?)",
        )
        .bind(migration.version)
        .bind(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true))
        .bind(migration.description)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        info!(
            version = migration.version,
            description = migration.description,
            "Applied migration"
        );
    }

    Ok(())
}

async fn current_version(pool: &SqlitePool) -> Result<i64> {
    let (version,): (Option<i64>,) = sqlx::query_as("SELECT MAX(version) FROM schema_migrations")
        .fetch_one(pool)
        .await?;
    Ok(version.unwrap_or(0))
}
