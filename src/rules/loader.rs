//! Rule file loading and validation.
//!
//! Rule files are JSON: `{"rules": [{"name", "predicate", "conditions", "actions"}]}`.
//! Every name is checked here, so evaluation only ever sees well-formed rules.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;

use crate::error::ConfigError;
use crate::rules::types::{
    Action, AgePredicate, Condition, LABEL_SEPARATOR, MatchMode, RelativeAge, Rule, TextField,
    TextPredicate,
};
use crate::store::traits::RuleSource;

#[derive(Debug, Deserialize)]
struct RuleDocument {
    #[serde(default)]
    rules: Vec<RawRule>,
}

#[derive(Debug, Deserialize)]
struct RawRule {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    predicate: Option<String>,
    #[serde(default)]
    conditions: Vec<RawCondition>,
    #[serde(default)]
    actions: Vec<RawAction>,
}

#[derive(Debug, Deserialize)]
struct RawCondition {
    field: String,
    predicate: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct RawAction {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    value: Option<String>,
}

/// Field named by a condition, before pairing with its predicate.
enum FieldName {
    Text(TextField),
    Received,
}

/// Predicate named by a condition, before pairing with its field.
enum PredicateName {
    Text(TextPredicate),
    Age(AgePredicate),
}

/// Lowercase and fold `-`/`_` into spaces so "does-not-contain" reads as "does not contain".
fn normalize(s: &str) -> String {
    s.trim()
        .to_lowercase()
        .replace(['-', '_'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_mode(s: Option<&str>) -> Option<MatchMode> {
    match s.map(normalize).as_deref() {
        None | Some("all") => Some(MatchMode::All),
        Some("any") => Some(MatchMode::Any),
        _ => None,
    }
}

fn parse_field(s: &str) -> Option<FieldName> {
    match normalize(s).as_str() {
        "from" | "sender" => Some(FieldName::Text(TextField::Sender)),
        "to" | "recipient" => Some(FieldName::Text(TextField::Recipient)),
        "subject" => Some(FieldName::Text(TextField::Subject)),
        "message" | "body" => Some(FieldName::Text(TextField::Body)),
        "received date/time" | "receivedtime" | "received time" | "received" => {
            Some(FieldName::Received)
        }
        _ => None,
    }
}

fn parse_predicate(s: &str) -> Option<PredicateName> {
    match normalize(s).as_str() {
        "contains" => Some(PredicateName::Text(TextPredicate::Contains)),
        "does not contain" => Some(PredicateName::Text(TextPredicate::DoesNotContain)),
        "equals" => Some(PredicateName::Text(TextPredicate::Equals)),
        "does not equal" => Some(PredicateName::Text(TextPredicate::DoesNotEqual)),
        "less than" | "older than" => Some(PredicateName::Age(AgePredicate::OlderThan)),
        "greater than" | "newer than" => Some(PredicateName::Age(AgePredicate::NewerThan)),
        _ => None,
    }
}

fn invalid(rule: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidRule {
        rule: rule.to_string(),
        reason: reason.into(),
    }
}

fn build_condition(rule: &str, raw: RawCondition) -> Result<Condition, ConfigError> {
    let field = parse_field(&raw.field)
        .ok_or_else(|| invalid(rule, format!("unknown field '{}'", raw.field)))?;
    let predicate = parse_predicate(&raw.predicate)
        .ok_or_else(|| invalid(rule, format!("unknown predicate '{}'", raw.predicate)))?;

    match (field, predicate) {
        (FieldName::Text(field), PredicateName::Text(predicate)) => {
            Ok(Condition::text(field, predicate, raw.value))
        }
        (FieldName::Received, PredicateName::Age(predicate)) => {
            let age: RelativeAge = raw
                .value
                .parse()
                .map_err(|e: String| invalid(rule, format!("bad duration: {e}")))?;
            Ok(Condition::received(predicate, age))
        }
        _ => Err(invalid(
            rule,
            format!(
                "predicate '{}' cannot be used with field '{}'",
                raw.predicate, raw.field
            ),
        )),
    }
}

fn build_action(rule: &str, raw: RawAction) -> Result<Action, ConfigError> {
    match normalize(&raw.kind).as_str() {
        "mark as read" => Ok(Action::MarkRead),
        "mark as unread" => Ok(Action::MarkUnread),
        "move message" | "move" => {
            let label = raw.value.as_deref().map(str::trim).unwrap_or_default();
            if label.is_empty() {
                return Err(invalid(rule, "'move message' needs a target label"));
            }
            if label.contains(LABEL_SEPARATOR) {
                return Err(invalid(
                    rule,
                    format!("label '{label}' must not contain '{LABEL_SEPARATOR}'"),
                ));
            }
            Ok(Action::Move(label.to_string()))
        }
        _ => Err(invalid(rule, format!("unknown action type '{}'", raw.kind))),
    }
}

fn build_rule(raw: RawRule) -> Result<Rule, ConfigError> {
    let name = raw.name.trim().to_string();
    if name.is_empty() {
        return Err(invalid("<unnamed>", "rule name must not be empty"));
    }
    let mode = parse_mode(raw.predicate.as_deref()).ok_or_else(|| {
        invalid(
            &name,
            format!(
                "predicate must be 'All' or 'Any', got '{}'",
                raw.predicate.as_deref().unwrap_or_default()
            ),
        )
    })?;

    let conditions = raw
        .conditions
        .into_iter()
        .map(|c| build_condition(&name, c))
        .collect::<Result<Vec<_>, _>>()?;
    let actions = raw
        .actions
        .into_iter()
        .map(|a| build_action(&name, a))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Rule {
        name,
        description: raw.description,
        mode,
        conditions,
        actions,
    })
}

/// Parse and validate a rule document.
pub fn parse_rules(json: &str) -> Result<Vec<Rule>, ConfigError> {
    let document: RuleDocument = serde_json::from_str(json)
        .map_err(|e| ConfigError::ParseError(format!("rule file: {e}")))?;

    let mut seen = HashSet::new();
    let mut rules = Vec::with_capacity(document.rules.len());
    for raw in document.rules {
        let rule = build_rule(raw)?;
        if !seen.insert(rule.name.clone()) {
            return Err(ConfigError::DuplicateRule(rule.name));
        }
        rules.push(rule);
    }
    Ok(rules)
}

/// Rules read from a JSON file on disk.
#[derive(Debug, Clone)]
pub struct RuleFile {
    path: PathBuf,
}

impl RuleFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RuleSource for RuleFile {
    fn load_rules(&self) -> Result<Vec<Rule>, ConfigError> {
        let json = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::InvalidValue {
            key: "rules_file".into(),
            message: format!("cannot read {}: {e}", self.path.display()),
        })?;
        let rules = parse_rules(&json)?;
        info!(path = %self.path.display(), rules = rules.len(), "Rules loaded");
        Ok(rules)
    }
}
