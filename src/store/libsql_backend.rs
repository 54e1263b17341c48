//! libSQL backend: local mirror of the mailbox plus the audit log.
//!
//! Implements [`RecordSource`], [`MailActions`] and [`AuditStore`] against a
//! local file or in-memory database.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{DatabaseError, MailActionError};
use crate::rules::types::{
    Action, ActionOutcome, EmailRecord, LABEL_SEPARATOR, RuleExecutionRecord,
};
use crate::store::migrations;
use crate::store::traits::{AuditStore, MailActions, RecordSource};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    fetch_limit: Option<usize>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
            fetch_limit: None,
        };
        migrations::run_migrations(backend.conn()).await?;
        Ok(backend)
    }

    /// Cap the number of emails returned by `fetch_pending` (newest first).
    pub fn with_fetch_limit(mut self, limit: Option<usize>) -> Self {
        self.fetch_limit = limit;
        self
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Store an email. Returns false if an email with the same ID already exists.
    pub async fn insert_email(&self, email: &EmailRecord) -> Result<bool, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let inserted = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO emails (id, thread_id, from_address, to_address, subject,
                    message_body, received_date, is_read, labels, snippet, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
                params![
                    email.id.clone(),
                    email.thread_id.clone(),
                    email.sender.clone(),
                    opt_text(email.recipient.as_deref()),
                    opt_text(email.subject.as_deref()),
                    opt_text(email.body.as_deref()),
                    email.received_at.to_rfc3339(),
                    i64::from(email.is_read),
                    join_labels(&email.labels),
                    opt_text(email.snippet.as_deref()),
                    now,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_email: {e}")))?;

        debug!(id = %email.id, inserted = inserted > 0, "Email stored");
        Ok(inserted > 0)
    }

    /// Look up a stored email by ID.
    pub async fn get_email(&self, id: &str) -> Result<Option<EmailRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {EMAIL_COLUMNS} FROM emails WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_email: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let email = row_to_email(&row)
                    .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
                Ok(Some(email))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_email: {e}"))),
        }
    }

    /// Audit records for one email, oldest first.
    pub async fn executions_for_email(
        &self,
        email_id: &str,
    ) -> Result<Vec<RuleExecutionRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT rule_name, email_id, executed_at, actions_taken, success
                 FROM rule_executions WHERE email_id = ?1 ORDER BY id ASC",
                params![email_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("executions_for_email: {e}")))?;

        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("executions_for_email: {e}")))?
        {
            records.push(row_to_execution(&row)?);
        }
        Ok(records)
    }

    /// Total number of audit records.
    pub async fn execution_count(&self) -> Result<usize, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT COUNT(*) FROM rule_executions", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("execution_count: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
                Ok(count.max(0) as usize)
            }
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("execution_count: {e}"))),
        }
    }

    /// Current labels of a stored email, or `None` if it does not exist.
    async fn stored_labels(&self, email_id: &str) -> Result<Option<Vec<String>>, libsql::Error> {
        let mut rows = self
            .conn()
            .query("SELECT labels FROM emails WHERE id = ?1", params![email_id])
            .await?;
        match rows.next().await? {
            Some(row) => {
                let labels: Option<String> = row.get(0).ok();
                Ok(Some(split_labels(labels.as_deref())))
            }
            None => Ok(None),
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

const EMAIL_COLUMNS: &str = "id, thread_id, from_address, to_address, subject, message_body, received_date, is_read, labels, snippet";

/// Stored dates mix RFC 3339 and SQLite `YYYY-MM-DD HH:MM:SS` text, which do
/// not sort lexically against each other.
const NEWEST_FIRST: &str = "ORDER BY julianday(received_date) DESC, id ASC";

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    // SQLite datetime output with fractional seconds
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Labels are stored as one `LABEL_SEPARATOR`-joined column.
fn split_labels(s: Option<&str>) -> Vec<String> {
    s.unwrap_or_default()
        .split(LABEL_SEPARATOR)
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

fn join_labels(labels: &[String]) -> String {
    labels.join(LABEL_SEPARATOR)
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Map a libsql Row to an EmailRecord. Column order matches EMAIL_COLUMNS.
fn row_to_email(row: &libsql::Row) -> Result<EmailRecord, libsql::Error> {
    let received_str: String = row.get(6)?;
    let is_read: i64 = row.get(7).unwrap_or(0);
    let labels: Option<String> = row.get(8).ok();

    Ok(EmailRecord {
        id: row.get(0)?,
        thread_id: row.get(1)?,
        sender: row.get(2)?,
        recipient: row.get(3).ok(),
        subject: row.get(4).ok(),
        body: row.get(5).ok(),
        received_at: parse_datetime(&received_str),
        is_read: is_read != 0,
        labels: split_labels(labels.as_deref()),
        snippet: row.get(9).ok(),
    })
}

/// `actions_taken` as written now, or as a list of performed-action strings
/// by databases adopted at V1.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredActions {
    Outcomes(Vec<ActionOutcome>),
    Performed(Vec<String>),
}

fn parse_actions(json: &str) -> Result<Vec<ActionOutcome>, DatabaseError> {
    let stored: StoredActions = serde_json::from_str(json)
        .map_err(|e| DatabaseError::Serialization(format!("actions_taken: {e}")))?;
    Ok(match stored {
        StoredActions::Outcomes(outcomes) => outcomes,
        StoredActions::Performed(lines) => lines
            .into_iter()
            .filter_map(|line| {
                let outcome = performed_outcome(&line);
                if outcome.is_none() {
                    warn!(entry = %line, "Skipping unrecognised stored action");
                }
                outcome
            })
            .collect(),
    })
}

/// Only performed actions were stored in that format, so each one succeeded.
fn performed_outcome(line: &str) -> Option<ActionOutcome> {
    let action = if line.starts_with("Marked as read: ") {
        Action::MarkRead
    } else if line.starts_with("Marked as unread: ") {
        Action::MarkUnread
    } else {
        let (label, _id) = line.strip_prefix("Moved to ")?.rsplit_once(": ")?;
        Action::Move(label.to_string())
    };
    Some(ActionOutcome::succeeded(action, line))
}

fn row_to_execution(row: &libsql::Row) -> Result<RuleExecutionRecord, DatabaseError> {
    let parse = |e: libsql::Error| DatabaseError::Query(format!("row parse: {e}"));
    let executed_str: Option<String> = row.get(2).ok();
    let actions_json: Option<String> = row.get(3).ok();
    // Column default is 1.
    let success: i64 = row.get(4).unwrap_or(1);

    let actions = match actions_json.as_deref() {
        Some(json) if !json.is_empty() => parse_actions(json)?,
        _ => Vec::new(),
    };

    Ok(RuleExecutionRecord {
        rule_name: row.get(0).map_err(parse)?,
        email_id: row.get(1).map_err(parse)?,
        executed_at: parse_datetime(executed_str.as_deref().unwrap_or_default()),
        actions,
        success: success != 0,
    })
}

// ── Trait implementations ───────────────────────────────────────────

#[async_trait]
impl RecordSource for LibSqlBackend {
    async fn fetch_pending(&self) -> Result<Vec<EmailRecord>, DatabaseError> {
        let sql = match self.fetch_limit {
            Some(limit) => format!("SELECT {EMAIL_COLUMNS} FROM emails {NEWEST_FIRST} LIMIT {limit}"),
            None => format!("SELECT {EMAIL_COLUMNS} FROM emails {NEWEST_FIRST}"),
        };
        let mut rows = self
            .conn()
            .query(&sql, ())
            .await
            .map_err(|e| DatabaseError::Query(format!("fetch_pending: {e}")))?;

        let mut emails = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("fetch_pending: {e}")))?
        {
            let email =
                row_to_email(&row).map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
            emails.push(email);
        }
        debug!(count = emails.len(), "Fetched pending emails");
        Ok(emails)
    }
}

#[async_trait]
impl MailActions for LibSqlBackend {
    async fn set_read_state(&self, email_id: &str, read: bool) -> Result<(), MailActionError> {
        let updated = self
            .conn()
            .execute(
                "UPDATE emails SET is_read = ?1, updated_at = ?2 WHERE id = ?3",
                params![i64::from(read), Utc::now().to_rfc3339(), email_id],
            )
            .await
            .map_err(|e| MailActionError::Other(format!("set_read_state: {e}")))?;

        if updated == 0 {
            return Err(MailActionError::NotFound {
                email_id: email_id.to_string(),
            });
        }
        Ok(())
    }

    async fn add_label(&self, email_id: &str, label: &str) -> Result<(), MailActionError> {
        if label.contains(LABEL_SEPARATOR) {
            return Err(MailActionError::Other(format!(
                "label '{label}' contains '{LABEL_SEPARATOR}'"
            )));
        }
        let mut labels = self
            .stored_labels(email_id)
            .await
            .map_err(|e| MailActionError::Other(format!("add_label: {e}")))?
            .ok_or_else(|| MailActionError::NotFound {
                email_id: email_id.to_string(),
            })?;

        if labels.iter().any(|l| l == label) {
            return Ok(());
        }
        labels.push(label.to_string());

        self.conn()
            .execute(
                "UPDATE emails SET labels = ?1, updated_at = ?2 WHERE id = ?3",
                params![join_labels(&labels), Utc::now().to_rfc3339(), email_id],
            )
            .await
            .map_err(|e| MailActionError::Other(format!("add_label: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl AuditStore for LibSqlBackend {
    async fn append(&self, record: &RuleExecutionRecord) -> Result<(), DatabaseError> {
        let actions_json = serde_json::to_string(&record.actions)
            .map_err(|e| DatabaseError::Serialization(format!("actions_taken: {e}")))?;

        self.conn()
            .execute(
                "INSERT INTO rule_executions (rule_name, email_id, executed_at, actions_taken, success)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.rule_name.clone(),
                    record.email_id.clone(),
                    record.executed_at.to_rfc3339(),
                    actions_json,
                    i64::from(record.success),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("append rule execution: {e}")))?;
        Ok(())
    }
}
