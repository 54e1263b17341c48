//! Rule engine: evaluates rules against emails and drives their actions.
//!
//! For each email, rules run in list order. A matched rule executes all of
//! its actions in order, even after a failure, and produces exactly one
//! execution record. Action failures never stop the pass; an unreachable
//! record source or audit store does.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{Instrument, debug, info, info_span};
use uuid::Uuid;

use crate::error::{DatabaseError, EngineError};
use crate::rules::actions::ActionExecutor;
use crate::rules::audit::ExecutionAuditor;
use crate::rules::conditions::ConditionEvaluator;
use crate::rules::types::{EmailRecord, Rule, RuleExecutionRecord};
use crate::store::traits::{AuditStore, MailActions, RecordSource};

/// Counts reported at the end of a pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub emails_processed: usize,
    pub rules_matched: usize,
    pub actions_succeeded: usize,
    pub actions_failed: usize,
}

impl RunSummary {
    /// Tally a finished pass over `emails_processed` emails.
    pub fn tally(emails_processed: usize, records: &[RuleExecutionRecord]) -> Self {
        let attempted: usize = records.iter().map(|r| r.actions.len()).sum();
        let actions_failed: usize = records.iter().map(|r| r.failed_actions()).sum();
        Self {
            emails_processed,
            rules_matched: records.len(),
            actions_succeeded: attempted - actions_failed,
            actions_failed,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.actions_failed > 0
    }

    /// 0 for a clean pass, 2 when some actions failed.
    pub fn exit_code(&self) -> u8 {
        if self.has_failures() { 2 } else { 0 }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "emails processed: {}, rules matched: {}, actions succeeded: {}, actions failed: {}",
            self.emails_processed, self.rules_matched, self.actions_succeeded, self.actions_failed
        )
    }
}

/// Outcome of a full pass driven by [`RuleEngine::run`].
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub summary: RunSummary,
    pub records: Vec<RuleExecutionRecord>,
}

/// Orchestrates evaluation, action execution and auditing.
pub struct RuleEngine {
    executor: ActionExecutor,
    auditor: ExecutionAuditor,
}

impl RuleEngine {
    pub fn new(mail: Arc<dyn MailActions>, audit: Arc<dyn AuditStore>) -> Self {
        Self {
            executor: ActionExecutor::new(mail),
            auditor: ExecutionAuditor::new(audit),
        }
    }

    /// Fetch pending emails from `source` and process them.
    pub async fn run(
        &self,
        source: &dyn RecordSource,
        rules: &[Rule],
    ) -> Result<RunReport, EngineError> {
        let run_id = Uuid::new_v4();
        async {
            let mut emails = source
                .fetch_pending()
                .await
                .map_err(unavailable("record source"))?;
            info!(emails = emails.len(), rules = rules.len(), "Starting rule pass");

            let records = self.process(&mut emails, rules).await?;
            let summary = RunSummary::tally(emails.len(), &records);
            info!(
                emails_processed = summary.emails_processed,
                rules_matched = summary.rules_matched,
                actions_succeeded = summary.actions_succeeded,
                actions_failed = summary.actions_failed,
                "Rule pass complete"
            );

            Ok::<_, EngineError>(RunReport {
                run_id,
                summary,
                records,
            })
        }
        .instrument(info_span!("rule_pass", %run_id))
        .await
    }

    /// Process every email against every rule, sampling `now` once.
    pub async fn process(
        &self,
        emails: &mut [EmailRecord],
        rules: &[Rule],
    ) -> Result<Vec<RuleExecutionRecord>, EngineError> {
        self.process_at(emails, rules, Utc::now()).await
    }

    /// Like [`process`](Self::process) with an explicit reference instant for
    /// relative-date conditions.
    pub async fn process_at(
        &self,
        emails: &mut [EmailRecord],
        rules: &[Rule],
        now: DateTime<Utc>,
    ) -> Result<Vec<RuleExecutionRecord>, EngineError> {
        let evaluator = ConditionEvaluator::at(now);
        let mut records = Vec::new();
        for email in emails.iter_mut() {
            let email_records = self.process_email(&evaluator, email, rules).await?;
            records.extend(email_records);
        }
        Ok(records)
    }

    /// Run every rule against one email, mutating it in place.
    pub async fn process_email(
        &self,
        evaluator: &ConditionEvaluator,
        email: &mut EmailRecord,
        rules: &[Rule],
    ) -> Result<Vec<RuleExecutionRecord>, EngineError> {
        let mut records = Vec::new();
        for rule in rules {
            if !evaluator.matches(rule, email) {
                continue;
            }
            debug!(rule = %rule.name, email_id = %email.id, "Rule matched");

            let mut outcomes = Vec::with_capacity(rule.actions.len());
            for action in &rule.actions {
                outcomes.push(self.executor.execute(action, email).await);
            }

            let record = RuleExecutionRecord::new(&rule.name, &email.id, Utc::now(), outcomes);
            self.auditor
                .record(&record)
                .await
                .map_err(unavailable("audit store"))?;
            records.push(record);
        }
        Ok(records)
    }
}

fn unavailable(collaborator: &'static str) -> impl Fn(DatabaseError) -> EngineError {
    move |e| EngineError::CollaboratorUnavailable {
        collaborator,
        reason: e.to_string(),
    }
}
