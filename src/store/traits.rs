//! Collaborator traits the rule engine consumes.
//!
//! The engine never talks to a concrete backend. It is handed a record
//! source, a mail-action collaborator and an audit store, any of which may be
//! the libSQL backend or a test double.

use async_trait::async_trait;

use crate::error::{ConfigError, DatabaseError, MailActionError};
use crate::rules::types::{EmailRecord, Rule, RuleExecutionRecord};

/// Supplies the emails for one processing pass.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Snapshot of the records to process.
    async fn fetch_pending(&self) -> Result<Vec<EmailRecord>, DatabaseError>;
}

/// Applies mutations through the mail provider (or its local mirror).
///
/// Implementations own retry and timeout policy; a returned error is final
/// for that action.
#[async_trait]
pub trait MailActions: Send + Sync {
    /// Set the read flag of an email.
    async fn set_read_state(&self, email_id: &str, read: bool) -> Result<(), MailActionError>;

    /// Add a label to an email, keeping existing labels.
    async fn add_label(&self, email_id: &str, label: &str) -> Result<(), MailActionError>;
}

/// Supplies validated rules.
pub trait RuleSource {
    /// Ordered rule list. Invalid definitions fail here, never during evaluation.
    fn load_rules(&self) -> Result<Vec<Rule>, ConfigError>;
}

/// Append-only sink for execution records.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Persist one record. Records are never updated or removed.
    async fn append(&self, record: &RuleExecutionRecord) -> Result<(), DatabaseError>;
}
