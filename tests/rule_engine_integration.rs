//! Integration tests for the rule engine.
//!
//! Each test drives `RuleEngine` with stub collaborators (or the in-memory
//! libSQL backend) and checks the execution records and resulting email state.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use mail_rules::error::{DatabaseError, EngineError, MailActionError};
use mail_rules::rules::{
    Action, AgePredicate, Condition, EmailRecord, MatchMode, MemoryAuditStore, RelativeAge, Rule,
    RuleEngine, RuleExecutionRecord, TextField, TextPredicate, parse_rules,
};
use mail_rules::store::{AuditStore, LibSqlBackend, MailActions, RecordSource};

/// Mail collaborator that records every call and rejects configured labels.
#[derive(Default)]
struct StubMail {
    calls: Mutex<Vec<String>>,
    rejected_labels: HashSet<String>,
}

impl StubMail {
    fn rejecting(label: &str) -> Self {
        Self {
            rejected_labels: HashSet::from([label.to_string()]),
            ..Default::default()
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailActions for StubMail {
    async fn set_read_state(&self, email_id: &str, read: bool) -> Result<(), MailActionError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{email_id}:read={read}"));
        Ok(())
    }

    async fn add_label(&self, email_id: &str, label: &str) -> Result<(), MailActionError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{email_id}:label={label}"));
        if self.rejected_labels.contains(label) {
            return Err(MailActionError::AuthFailed(format!(
                "permission denied for label {label}"
            )));
        }
        Ok(())
    }
}

/// Audit store that goes away after a fixed number of appends.
struct FlakyAudit {
    inner: MemoryAuditStore,
    capacity: usize,
}

#[async_trait]
impl AuditStore for FlakyAudit {
    async fn append(&self, record: &RuleExecutionRecord) -> Result<(), DatabaseError> {
        if self.inner.len().await >= self.capacity {
            return Err(DatabaseError::Pool("connection reset".into()));
        }
        self.inner.append(record).await
    }
}

struct UnreachableSource;

#[async_trait]
impl RecordSource for UnreachableSource {
    async fn fetch_pending(&self) -> Result<Vec<EmailRecord>, DatabaseError> {
        Err(DatabaseError::Pool("connection refused".into()))
    }
}

struct FixedSource(Vec<EmailRecord>);

#[async_trait]
impl RecordSource for FixedSource {
    async fn fetch_pending(&self) -> Result<Vec<EmailRecord>, DatabaseError> {
        Ok(self.0.clone())
    }
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 15, 9, 30, 0).unwrap()
}

fn email(id: &str, sender: &str, subject: &str, received_at: DateTime<Utc>) -> EmailRecord {
    EmailRecord {
        id: id.into(),
        thread_id: format!("thread-{id}"),
        sender: sender.into(),
        recipient: Some("user@example.com".into()),
        subject: Some(subject.into()),
        body: Some(format!("Body of {subject}")),
        received_at,
        is_read: false,
        labels: Vec::new(),
        snippet: None,
    }
}

fn from_contains(value: &str) -> Condition {
    Condition::text(TextField::Sender, TextPredicate::Contains, value)
}

fn engine_with(mail: Arc<StubMail>) -> (RuleEngine, Arc<MemoryAuditStore>) {
    let audit = Arc::new(MemoryAuditStore::new());
    (RuleEngine::new(mail, audit.clone()), audit)
}

#[tokio::test]
async fn actions_run_in_order_and_mutate_the_email() {
    let mail = Arc::new(StubMail::default());
    let (engine, audit) = engine_with(mail.clone());
    let rule = Rule::new("archive", MatchMode::All)
        .with_action(Action::MarkRead)
        .with_action(Action::Move("Archive".into()));
    let mut emails = vec![email("m1", "a@example.com", "Hi", now())];

    let records = engine.process_at(&mut emails, &[rule], now()).await.unwrap();

    assert_eq!(records.len(), 1);
    let actions: Vec<_> = records[0].actions.iter().map(|o| o.action.clone()).collect();
    assert_eq!(actions, vec![Action::MarkRead, Action::Move("Archive".into())]);
    assert!(records[0].success);
    assert!(emails[0].is_read);
    assert_eq!(emails[0].labels, vec!["Archive"]);
    assert_eq!(mail.calls(), vec!["m1:read=true", "m1:label=Archive"]);
    assert_eq!(audit.records().await, records);
}

#[tokio::test]
async fn partial_failure_keeps_earlier_effects_and_detail() {
    let mail = Arc::new(StubMail::rejecting("X"));
    let (engine, _audit) = engine_with(mail);
    let rule = Rule::new("partial", MatchMode::All)
        .with_action(Action::MarkRead)
        .with_action(Action::Move("X".into()))
        .with_action(Action::Move("Y".into()));
    let mut emails = vec![email("m1", "a@example.com", "Hi", now())];

    let records = engine.process_at(&mut emails, &[rule], now()).await.unwrap();

    let record = &records[0];
    assert!(!record.success);
    assert_eq!(record.actions.len(), 3, "all actions attempted");
    assert!(record.actions[0].success);
    assert!(!record.actions[1].success);
    assert!(
        record.actions[1].detail.contains("permission denied for label X"),
        "{}",
        record.actions[1].detail
    );
    assert!(record.actions[2].success);
    assert!(emails[0].is_read);
    assert_eq!(emails[0].labels, vec!["Y"]);
}

#[tokio::test]
async fn failure_does_not_stop_later_rules() {
    let mail = Arc::new(StubMail::rejecting("X"));
    let (engine, audit) = engine_with(mail);
    let rules = vec![
        Rule::new("fails", MatchMode::All).with_action(Action::Move("X".into())),
        Rule::new("succeeds", MatchMode::All).with_action(Action::MarkRead),
    ];
    let mut emails = vec![email("m1", "a@example.com", "Hi", now())];

    let records = engine.process_at(&mut emails, &rules, now()).await.unwrap();

    assert_eq!(records.len(), 2);
    assert!(!records[0].success);
    assert!(records[1].success);
    assert_eq!(audit.len().await, 2);
}

#[tokio::test]
async fn independent_rules_each_get_a_record() {
    let (engine, _audit) = engine_with(Arc::new(StubMail::default()));
    let rules = vec![
        Rule::new("by sender", MatchMode::All)
            .with_condition(from_contains("newsletter"))
            .with_action(Action::MarkRead),
        Rule::new("by subject", MatchMode::Any)
            .with_condition(Condition::text(TextField::Subject, TextPredicate::Contains, "weekly"))
            .with_action(Action::Move("Newsletters".into())),
    ];
    let mut emails = vec![email("m1", "newsletter@co.com", "Weekly digest", now())];

    let records = engine.process_at(&mut emails, &rules, now()).await.unwrap();

    let names: Vec<_> = records.iter().map(|r| r.rule_name.as_str()).collect();
    assert_eq!(names, vec!["by sender", "by subject"]);
    assert!(records.iter().all(|r| r.email_id == "m1" && r.actions.len() == 1));
}

#[tokio::test]
async fn zero_conditions_all_matches_every_email_any_matches_none() {
    let (engine, _audit) = engine_with(Arc::new(StubMail::default()));
    let rules = vec![
        Rule::new("all", MatchMode::All).with_action(Action::MarkRead),
        Rule::new("any", MatchMode::Any).with_action(Action::MarkUnread),
    ];
    let mut emails = vec![
        email("m1", "a@example.com", "One", now()),
        email("m2", "b@example.com", "Two", now() - Duration::days(400)),
    ];

    let records = engine.process_at(&mut emails, &rules, now()).await.unwrap();

    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.rule_name == "all"));
    assert!(emails.iter().all(|e| e.is_read));
}

#[tokio::test]
async fn non_matching_rules_produce_no_records() {
    let mail = Arc::new(StubMail::default());
    let (engine, audit) = engine_with(mail.clone());
    let rule = Rule::new("facebook", MatchMode::All)
        .with_condition(from_contains("facebook"))
        .with_action(Action::MarkRead);
    let mut emails = vec![email("m1", "boss@company.com", "Deadline", now())];

    let records = engine.process_at(&mut emails, &[rule], now()).await.unwrap();

    assert!(records.is_empty());
    assert!(audit.is_empty().await);
    assert!(mail.calls().is_empty());
    assert!(!emails[0].is_read);
}

#[tokio::test]
async fn relative_date_conditions_use_the_pass_instant() {
    let (engine, _audit) = engine_with(Arc::new(StubMail::default()));
    let older = |age: &str| {
        Rule::new(format!("older than {age}"), MatchMode::All)
            .with_condition(Condition::received(AgePredicate::OlderThan, age.parse().unwrap()))
    };
    let rules = vec![
        older("7 days"),
        older("30 days"),
        Rule::new("newer than 7 days", MatchMode::All).with_condition(Condition::received(
            AgePredicate::NewerThan,
            RelativeAge::days(7),
        )),
    ];
    let mut emails = vec![email("m1", "a@example.com", "Old", now() - Duration::days(10))];

    let records = engine.process_at(&mut emails, &rules, now()).await.unwrap();

    let names: Vec<_> = records.iter().map(|r| r.rule_name.as_str()).collect();
    assert_eq!(names, vec!["older than 7 days"]);
}

#[tokio::test]
async fn audit_outage_aborts_but_keeps_earlier_records() {
    let audit = Arc::new(FlakyAudit {
        inner: MemoryAuditStore::new(),
        capacity: 1,
    });
    let engine = RuleEngine::new(Arc::new(StubMail::default()), audit.clone());
    let rule = Rule::new("all", MatchMode::All).with_action(Action::MarkRead);
    let mut emails = vec![
        email("m1", "a@example.com", "One", now()),
        email("m2", "b@example.com", "Two", now()),
    ];

    let err = engine.process_at(&mut emails, &[rule], now()).await.unwrap_err();

    let EngineError::CollaboratorUnavailable { collaborator, .. } = err;
    assert_eq!(collaborator, "audit store");
    let kept = audit.inner.records().await;
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].email_id, "m1");
}

#[tokio::test]
async fn unreachable_source_aborts_the_run() {
    let (engine, audit) = engine_with(Arc::new(StubMail::default()));
    let rule = Rule::new("all", MatchMode::All).with_action(Action::MarkRead);

    let err = engine.run(&UnreachableSource, &[rule]).await.unwrap_err();

    assert!(err.to_string().starts_with("record source unavailable"), "{err}");
    assert!(audit.is_empty().await);
}

#[tokio::test]
async fn run_reports_summary() {
    let mail = Arc::new(StubMail::rejecting("Blocked"));
    let (engine, _audit) = engine_with(mail);
    let source = FixedSource(vec![
        email("m1", "newsletter@co.com", "Weekly", Utc::now()),
        email("m2", "friend@example.com", "Hello", Utc::now()),
        email("m3", "newsletter@other.com", "Monthly", Utc::now()),
    ]);
    let rules = vec![
        Rule::new("newsletters", MatchMode::All)
            .with_condition(from_contains("newsletter"))
            .with_action(Action::MarkRead)
            .with_action(Action::Move("Blocked".into())),
    ];

    let report = engine.run(&source, &rules).await.unwrap();

    assert_eq!(report.summary.emails_processed, 3);
    assert_eq!(report.summary.rules_matched, 2);
    assert_eq!(report.summary.actions_succeeded, 2);
    assert_eq!(report.summary.actions_failed, 2);
    assert_eq!(report.summary.exit_code(), 2);
}

#[tokio::test]
async fn end_to_end_with_libsql_backend() {
    let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let stamp = Utc::now();
    let mut newsletter = email("newsletter_1", "newsletter@techcompany.com", "Weekly Tech Newsletter", stamp);
    newsletter.labels = vec!["INBOX".into()];
    let old = email("old_1", "oldfriend@example.com", "Remember me?", stamp - Duration::days(35));
    let urgent = email("urgent_1", "boss@company.com", "URGENT: Project Deadline", stamp);
    for e in [&newsletter, &old, &urgent] {
        db.insert_email(e).await.unwrap();
    }

    let rules = parse_rules(
        r#"{"rules": [
            {
                "name": "Newsletter Auto-Archive",
                "predicate": "All",
                "conditions": [
                    {"field": "From", "predicate": "contains", "value": "newsletter"},
                    {"field": "Subject", "predicate": "contains", "value": "newsletter"}
                ],
                "actions": [
                    {"type": "mark as read", "value": ""},
                    {"type": "move message", "value": "Newsletters"}
                ]
            },
            {
                "name": "Old Unread Emails",
                "predicate": "Any",
                "conditions": [
                    {"field": "Received Date/Time", "predicate": "less than", "value": "30 days"}
                ],
                "actions": [{"type": "mark as read", "value": ""}]
            },
            {
                "name": "Important Emails",
                "predicate": "Any",
                "conditions": [
                    {"field": "Subject", "predicate": "contains", "value": "urgent"},
                    {"field": "Message", "predicate": "contains", "value": "urgent"}
                ],
                "actions": [
                    {"type": "mark as unread", "value": ""},
                    {"type": "move message", "value": "Important"}
                ]
            }
        ]}"#,
    )
    .unwrap();

    let engine = RuleEngine::new(db.clone(), db.clone());
    let report = engine.run(db.as_ref(), &rules).await.unwrap();

    assert_eq!(report.summary.emails_processed, 3);
    assert_eq!(report.summary.rules_matched, 3);
    assert_eq!(report.summary.actions_failed, 0);

    let stored = db.get_email("newsletter_1").await.unwrap().unwrap();
    assert!(stored.is_read);
    assert_eq!(stored.labels, vec!["INBOX", "Newsletters"]);

    let stored = db.get_email("old_1").await.unwrap().unwrap();
    assert!(stored.is_read);

    let stored = db.get_email("urgent_1").await.unwrap().unwrap();
    assert!(!stored.is_read);
    assert_eq!(stored.labels, vec!["Important"]);

    let history = db.executions_for_email("newsletter_1").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].rule_name, "Newsletter Auto-Archive");
    assert_eq!(history[0].actions.len(), 2);
    assert!(history[0].success);
    assert_eq!(db.execution_count().await.unwrap(), 3);
}

#[tokio::test]
async fn libsql_actions_fail_for_vanished_email() {
    let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let engine = RuleEngine::new(db.clone(), db.clone());
    let rule = Rule::new("all", MatchMode::All).with_action(Action::Move("Archive".into()));
    // Never stored, so the backend reports it missing.
    let mut emails = vec![email("ghost", "a@example.com", "Boo", now())];

    let records = engine.process_at(&mut emails, &[rule], now()).await.unwrap();

    assert!(!records[0].success);
    assert!(records[0].actions[0].detail.contains("not found"));
    assert!(emails[0].labels.is_empty());
    assert_eq!(db.executions_for_email("ghost").await.unwrap().len(), 1);
}

#[test]
fn bundled_rule_file_is_valid() {
    let rules = parse_rules(include_str!("../config/rules.json")).unwrap();
    let names: Vec<_> = rules.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["Newsletter Auto-Archive", "Old Unread Emails", "Important Emails"]
    );
}

#[test]
fn demo_emails_deserialize() {
    let emails: Vec<EmailRecord> =
        serde_json::from_str(include_str!("../demos/emails.json")).unwrap();
    assert_eq!(emails.len(), 3);
    assert!(emails.iter().all(|e| e.labels == vec!["INBOX"]));
}

#[tokio::test]
async fn separator_label_never_reaches_the_store() {
    let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let mut inbox = email("m1", "a@example.com", "Hi", Utc::now());
    inbox.labels = vec!["INBOX".into()];
    db.insert_email(&inbox).await.unwrap();

    let engine = RuleEngine::new(db.clone(), db.clone());
    let rules = vec![Rule::new("split", MatchMode::All).with_action(Action::Move("Work,Urgent".into()))];

    for _ in 0..3 {
        let report = engine.run(db.as_ref(), &rules).await.unwrap();
        assert_eq!(report.summary.actions_failed, 1);
    }

    let stored = db.get_email("m1").await.unwrap().unwrap();
    assert_eq!(stored.labels, vec!["INBOX"]);
    assert!(
        parse_rules(
            r#"{"rules": [{"name": "split", "actions": [{"type": "move message", "value": "Work,Urgent"}]}]}"#
        )
        .is_err()
    );
}
