//! Persistence layer and collaborator interfaces.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{AuditStore, MailActions, RecordSource, RuleSource};
