//! Shared types for rule evaluation and execution.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

// ── Email record ────────────────────────────────────────────────────

/// A stored email as seen by the rule engine.
///
/// Identity (`id`, `thread_id`) never changes. Only `is_read` and `labels`
/// are mutated, and only by successful actions during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailRecord {
    /// Provider message ID.
    pub id: String,
    pub thread_id: String,
    pub sender: String,
    #[serde(default)]
    pub recipient: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub snippet: Option<String>,
}

impl EmailRecord {
    /// Current value of a text field. Unset optional fields read as "".
    pub fn text(&self, field: TextField) -> &str {
        match field {
            TextField::Sender => &self.sender,
            TextField::Recipient => self.recipient.as_deref().unwrap_or(""),
            TextField::Subject => self.subject.as_deref().unwrap_or(""),
            TextField::Body => self.body.as_deref().unwrap_or(""),
        }
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// Add a label if not already present. Returns true if it was added.
    pub fn add_label(&mut self, label: &str) -> bool {
        if self.has_label(label) {
            return false;
        }
        self.labels.push(label.to_string());
        true
    }
}

// ── Conditions ──────────────────────────────────────────────────────

/// Email fields that support string predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextField {
    Sender,
    Recipient,
    Subject,
    Body,
}

/// String comparison operators. All comparisons ignore case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextPredicate {
    Contains,
    DoesNotContain,
    Equals,
    DoesNotEqual,
}

/// Relative-date operators on the received timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgePredicate {
    /// Received longer ago than the given age.
    OlderThan,
    /// Received more recently than the given age.
    NewerThan,
}

/// A single test against one field of an email.
///
/// Temporal predicates only exist on the received timestamp and string
/// predicates only on text fields, so an incompatible pairing cannot be built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Text {
        field: TextField,
        predicate: TextPredicate,
        value: String,
    },
    Received {
        predicate: AgePredicate,
        age: RelativeAge,
    },
}

impl Condition {
    pub fn text(field: TextField, predicate: TextPredicate, value: impl Into<String>) -> Self {
        Self::Text {
            field,
            predicate,
            value: value.into(),
        }
    }

    pub fn received(predicate: AgePredicate, age: RelativeAge) -> Self {
        Self::Received { predicate, age }
    }
}

/// Calendar unit of a relative age.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgeUnit {
    Days,
    Weeks,
    Months,
    Years,
}

impl AgeUnit {
    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "day" | "days" => Some(Self::Days),
            "week" | "weeks" => Some(Self::Weeks),
            "month" | "months" => Some(Self::Months),
            "year" | "years" => Some(Self::Years),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Days => "days",
            Self::Weeks => "weeks",
            Self::Months => "months",
            Self::Years => "years",
        }
    }
}

/// A duration literal such as "7 days" or "1 month".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelativeAge {
    pub amount: u32,
    pub unit: AgeUnit,
}

impl RelativeAge {
    pub fn new(amount: u32, unit: AgeUnit) -> Self {
        Self { amount, unit }
    }

    pub fn days(amount: u32) -> Self {
        Self::new(amount, AgeUnit::Days)
    }
}

static AGE_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+)\s*([A-Za-z]+)\s*$").expect("valid age literal regex"));

impl FromStr for RelativeAge {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = AGE_LITERAL
            .captures(s)
            .ok_or_else(|| format!("expected '<number> <unit>', got '{s}'"))?;
        let amount: u32 = caps[1]
            .parse()
            .map_err(|e| format!("invalid amount in '{s}': {e}"))?;
        let unit = AgeUnit::parse(&caps[2])
            .ok_or_else(|| format!("unknown unit '{}' (expected days, weeks, months or years)", &caps[2]))?;
        Ok(Self { amount, unit })
    }
}

impl fmt::Display for RelativeAge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.unit.as_str())
    }
}

// ── Rules and actions ───────────────────────────────────────────────

/// How a rule combines its condition results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMode {
    /// Every condition must match. Zero conditions match everything.
    #[default]
    All,
    /// At least one condition must match. Zero conditions match nothing.
    Any,
}

/// Separator of the stored label list; never valid inside a label.
pub const LABEL_SEPARATOR: &str = ",";

/// Mutation applied to a matched email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Action {
    MarkRead,
    MarkUnread,
    /// Add the label. Existing labels are kept.
    Move(String),
}

impl Action {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::MarkRead => "mark_read",
            Self::MarkUnread => "mark_unread",
            Self::Move(_) => "move",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MarkRead => f.write_str("mark as read"),
            Self::MarkUnread => f.write_str("mark as unread"),
            Self::Move(label) => write!(f, "move to {label}"),
        }
    }
}

/// A named set of conditions paired with an ordered action list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// Unique within a rule set; used as the audit key.
    pub name: String,
    pub description: Option<String>,
    pub mode: MatchMode,
    pub conditions: Vec<Condition>,
    /// Executed in order.
    pub actions: Vec<Action>,
}

impl Rule {
    pub fn new(name: impl Into<String>, mode: MatchMode) -> Self {
        Self {
            name: name.into(),
            description: None,
            mode,
            conditions: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }
}

// ── Outcomes and audit records ──────────────────────────────────────

/// Result of attempting one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub action: Action,
    pub success: bool,
    /// Human-readable description of what was attempted or why it failed.
    pub detail: String,
}

impl ActionOutcome {
    pub fn succeeded(action: Action, detail: impl Into<String>) -> Self {
        Self {
            action,
            success: true,
            detail: detail.into(),
        }
    }

    pub fn failed(action: Action, detail: impl Into<String>) -> Self {
        Self {
            action,
            success: false,
            detail: detail.into(),
        }
    }
}

/// Audit entry for one matched rule against one email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleExecutionRecord {
    pub rule_name: String,
    pub email_id: String,
    pub executed_at: DateTime<Utc>,
    /// Outcomes in execution order.
    pub actions: Vec<ActionOutcome>,
    /// True only if every attempted action succeeded.
    pub success: bool,
}

impl RuleExecutionRecord {
    pub fn new(
        rule_name: impl Into<String>,
        email_id: impl Into<String>,
        executed_at: DateTime<Utc>,
        actions: Vec<ActionOutcome>,
    ) -> Self {
        let success = actions.iter().all(|a| a.success);
        Self {
            rule_name: rule_name.into(),
            email_id: email_id.into(),
            executed_at,
            actions,
            success,
        }
    }

    pub fn failed_actions(&self) -> usize {
        self.actions.iter().filter(|a| !a.success).count()
    }
}
