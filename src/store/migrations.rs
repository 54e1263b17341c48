//! Version-tracked database migrations for the libSQL backend.
//!
//! Applied versions live in `_migrations`. Databases written by earlier
//! releases already carry `emails` and `rule_executions` but no version rows;
//! they are recorded at V1 and only later migrations run against them.

use libsql::Connection;

use crate::error::DatabaseError;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// Ordered; append new versions at the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS emails (
                id TEXT PRIMARY KEY,
                thread_id TEXT NOT NULL,
                from_address TEXT NOT NULL,
                to_address TEXT,
                subject TEXT,
                message_body TEXT,
                received_date TEXT NOT NULL,
                is_read INTEGER NOT NULL DEFAULT 0,
                labels TEXT,
                snippet TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS rule_executions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                rule_name TEXT NOT NULL,
                email_id TEXT NOT NULL,
                executed_at TEXT NOT NULL,
                actions_taken TEXT,
                success INTEGER NOT NULL DEFAULT 1
            );
        "#,
    },
    Migration {
        version: 2,
        name: "lookup_indexes",
        sql: r#"
            CREATE INDEX IF NOT EXISTS idx_emails_received ON emails(received_date);
            CREATE INDEX IF NOT EXISTS idx_rule_executions_email ON rule_executions(email_id);
            CREATE INDEX IF NOT EXISTS idx_rule_executions_rule ON rule_executions(rule_name);
        "#,
    },
];

const VERSION_TABLE: &str = "CREATE TABLE IF NOT EXISTS _migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
)";

/// Bring the schema up to the newest version.
///
/// Returns the number of migrations applied by this call; zero for a
/// database that was already current.
pub async fn run_migrations(conn: &Connection) -> Result<usize, DatabaseError> {
    conn.execute(VERSION_TABLE, ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("version table: {e}")))?;

    let mut version = schema_version(conn).await?;
    if version == 0 && has_unversioned_schema(conn).await? {
        mark_applied(conn, &MIGRATIONS[0]).await?;
        version = MIGRATIONS[0].version;
        tracing::info!("Adopted unversioned mail database at V1");
    }

    let mut applied = 0;
    for migration in MIGRATIONS.iter().filter(|m| m.version > version) {
        tracing::info!(version = migration.version, name = migration.name, "Applying migration");
        conn.execute_batch(migration.sql).await.map_err(|e| {
            DatabaseError::Migration(format!("V{} {}: {e}", migration.version, migration.name))
        })?;
        mark_applied(conn, migration).await?;
        applied += 1;
    }

    if applied > 0 {
        tracing::info!(applied, "Mail schema up to date");
    }
    Ok(applied)
}

/// Highest recorded version, 0 for a fresh database.
async fn schema_version(conn: &Connection) -> Result<i64, DatabaseError> {
    scalar(conn, "SELECT COALESCE(MAX(version), 0) FROM _migrations").await
}

/// Both mail tables present without any version rows.
async fn has_unversioned_schema(conn: &Connection) -> Result<bool, DatabaseError> {
    let tables = scalar(
        conn,
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
         AND name IN ('emails', 'rule_executions')",
    )
    .await?;
    Ok(tables == 2)
}

async fn scalar(conn: &Connection, sql: &str) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query(sql, ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("{sql}: {e}")))?;
    match rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("{sql}: {e}")))?
    {
        Some(row) => row
            .get::<i64>(0)
            .map_err(|e| DatabaseError::Migration(format!("{sql}: {e}"))),
        None => Ok(0),
    }
}

async fn mark_applied(conn: &Connection, migration: &Migration) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![migration.version, migration.name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("record V{}: {e}", migration.version)))?;
    Ok(())
}

/// Tables as created by releases before `_migrations` existed.
#[cfg(test)]
pub(crate) const UNVERSIONED_SCHEMA: &str = "
    CREATE TABLE emails (
        id VARCHAR NOT NULL PRIMARY KEY,
        thread_id VARCHAR NOT NULL,
        from_address VARCHAR NOT NULL,
        to_address VARCHAR,
        subject VARCHAR,
        message_body TEXT,
        received_date DATETIME NOT NULL,
        is_read BOOLEAN,
        labels VARCHAR,
        snippet TEXT,
        created_at DATETIME,
        updated_at DATETIME
    );
    CREATE TABLE rule_executions (
        id INTEGER NOT NULL PRIMARY KEY,
        rule_name VARCHAR NOT NULL,
        email_id VARCHAR NOT NULL,
        executed_at DATETIME,
        actions_taken TEXT,
        success BOOLEAN
    );";
