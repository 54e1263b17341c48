//! Rule evaluation and action execution.
//!
//! A processing pass flows through:
//! 1. `RuleSource::load_rules()`: validated rule list (config errors stop here)
//! 2. `RecordSource::fetch_pending()`: emails for this pass
//! 3. `ConditionEvaluator` + `predicate::combine`: match decision per rule
//! 4. `ActionExecutor`: ordered actions on matched emails
//! 5. `ExecutionAuditor`: one append-only record per matched rule

pub mod actions;
pub mod audit;
pub mod conditions;
pub mod engine;
pub mod loader;
pub mod predicate;
pub mod types;

pub use actions::ActionExecutor;
pub use audit::{ExecutionAuditor, MemoryAuditStore};
pub use conditions::ConditionEvaluator;
pub use engine::{RuleEngine, RunReport, RunSummary};
pub use loader::{RuleFile, parse_rules};
pub use types::{
    Action, ActionOutcome, AgePredicate, AgeUnit, Condition, EmailRecord, LABEL_SEPARATOR, MatchMode,
    RelativeAge, Rule, RuleExecutionRecord, TextField, TextPredicate,
};
