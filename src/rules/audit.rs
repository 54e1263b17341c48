//! Execution auditing: one append-only record per matched rule per email.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

use crate::error::DatabaseError;
use crate::rules::types::RuleExecutionRecord;
use crate::store::traits::AuditStore;

/// Hands execution records to the injected audit store.
///
/// Lives for one processing pass; the caller owns the store and closes it.
pub struct ExecutionAuditor {
    store: Arc<dyn AuditStore>,
}

impl ExecutionAuditor {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    /// Append one record. An error means the store is unreachable.
    pub async fn record(&self, record: &RuleExecutionRecord) -> Result<(), DatabaseError> {
        self.store.append(record).await?;
        info!(
            rule = %record.rule_name,
            email_id = %record.email_id,
            actions = record.actions.len(),
            success = record.success,
            "Rule execution recorded"
        );
        Ok(())
    }
}

/// In-memory append-only audit store.
///
/// Safe to share between tasks; appends are serialized by the lock.
#[derive(Default)]
pub struct MemoryAuditStore {
    records: RwLock<Vec<RuleExecutionRecord>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all records in append order.
    pub async fn records(&self) -> Vec<RuleExecutionRecord> {
        self.records.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append(&self, record: &RuleExecutionRecord) -> Result<(), DatabaseError> {
        self.records.write().await.push(record.clone());
        Ok(())
    }
}
