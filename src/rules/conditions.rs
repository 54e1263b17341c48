//! Condition evaluation against a single email.

use chrono::{DateTime, Duration, Months, Utc};

use crate::rules::predicate;
use crate::rules::types::{
    AgePredicate, AgeUnit, Condition, EmailRecord, RelativeAge, Rule, TextPredicate,
};

/// Evaluates conditions relative to a fixed `now`.
///
/// One evaluator is built per processing pass so every temporal comparison in
/// the pass uses the same reference instant.
#[derive(Debug, Clone, Copy)]
pub struct ConditionEvaluator {
    now: DateTime<Utc>,
}

impl ConditionEvaluator {
    /// Evaluator anchored at the given instant.
    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Test one condition against one email.
    pub fn evaluate(&self, condition: &Condition, email: &EmailRecord) -> bool {
        match condition {
            Condition::Text {
                field,
                predicate,
                value,
            } => {
                let field_value = email.text(*field).to_lowercase();
                let search_value = value.to_lowercase();
                match predicate {
                    TextPredicate::Contains => field_value.contains(&search_value),
                    TextPredicate::DoesNotContain => !field_value.contains(&search_value),
                    TextPredicate::Equals => field_value == search_value,
                    TextPredicate::DoesNotEqual => field_value != search_value,
                }
            }
            Condition::Received { predicate, age } => {
                let received = email.received_at;
                match (predicate, threshold(self.now, age)) {
                    (AgePredicate::OlderThan, Some(cutoff)) => received < cutoff,
                    (AgePredicate::NewerThan, Some(cutoff)) => received > cutoff,
                    // Cutoff before the representable past: nothing is that old.
                    (AgePredicate::OlderThan, None) => false,
                    (AgePredicate::NewerThan, None) => true,
                }
            }
        }
    }

    /// Whether `email` satisfies every (All) or some (Any) condition of `rule`.
    pub fn matches(&self, rule: &Rule, email: &EmailRecord) -> bool {
        predicate::combine(
            rule.mode,
            rule.conditions.iter().map(|c| self.evaluate(c, email)),
        )
    }
}

/// The instant `age` before `now`.
///
/// Months and years use calendar arithmetic, so "1 month" before March 31 is
/// the last day of February rather than a fixed 30 days.
pub fn threshold(now: DateTime<Utc>, age: &RelativeAge) -> Option<DateTime<Utc>> {
    let amount = age.amount;
    match age.unit {
        AgeUnit::Days => now.checked_sub_signed(Duration::try_days(i64::from(amount))?),
        AgeUnit::Weeks => now.checked_sub_signed(Duration::try_weeks(i64::from(amount))?),
        AgeUnit::Months => now.checked_sub_months(Months::new(amount)),
        AgeUnit::Years => now.checked_sub_months(Months::new(amount.checked_mul(12)?)),
    }
}
