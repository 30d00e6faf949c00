//! Rule-based task-type classification.
//!
//! A record (for instance the original INCAR of a calculation) is scored
//! against every rule; the label of the best rule wins. This is independent of
//! the stability engine and shares no data with it.

use std::collections::BTreeMap;

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A flat key/value record to classify.
pub type Record = BTreeMap<String, Value>;

/// Stand-ins used by [`MissingKeyPolicy::Legacy`].
const LEGACY_MISSING_GREATER: f64 = 1e10;
const LEGACY_MISSING_LESS: f64 = 0.0;

/// One weighted condition of a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Condition {
    /// Satisfied when the record value equals `value`.
    Exact { key: String, value: Value, weight: f64 },
    /// Satisfied when the record value is `>= threshold`.
    Greater { key: String, threshold: f64, weight: f64 },
    /// Satisfied when the record value is `<= threshold`.
    Less { key: String, threshold: f64, weight: f64 },
}

impl Condition {
    pub fn key(&self) -> &str {
        match self {
            Condition::Exact { key, .. }
            | Condition::Greater { key, .. }
            | Condition::Less { key, .. } => key,
        }
    }

    pub fn weight(&self) -> f64 {
        match self {
            Condition::Exact { weight, .. }
            | Condition::Greater { weight, .. }
            | Condition::Less { weight, .. } => *weight,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagRule {
    pub task_type: String,
    pub conditions: Vec<Condition>,
}

/// How a condition on a key absent from the record is scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MissingKeyPolicy {
    /// Absent keys contribute nothing.
    #[default]
    Ignore,
    /// Absent keys read as 1e10 for `Greater` and 0 for `Less`; `Exact` fails.
    Legacy,
}

#[derive(Debug, Clone, Default)]
pub struct TaskTagger {
    rules: Vec<TagRule>,
    missing: MissingKeyPolicy,
}

impl TaskTagger {
    pub fn new(rules: Vec<TagRule>) -> Self {
        Self {
            rules,
            missing: MissingKeyPolicy::default(),
        }
    }

    pub fn with_missing_policy(mut self, policy: MissingKeyPolicy) -> Self {
        self.missing = policy;
        self
    }

    pub fn rules(&self) -> &[TagRule] {
        &self.rules
    }

    /// Sum of the weights of the conditions `record` satisfies.
    pub fn score(&self, record: &Record, rule: &TagRule) -> f64 {
        rule.conditions
            .iter()
            .filter(|c| self.satisfied(record, c))
            .map(Condition::weight)
            .sum()
    }

    /// Label of the highest-scoring rule; the first rule wins ties.
    /// `None` if no rule scores above zero.
    pub fn classify(&self, record: &Record) -> Option<&str> {
        let mut best: Option<(&TagRule, f64)> = None;
        for rule in &self.rules {
            let s = self.score(record, rule);
            debug!("Rule {} scored {}", rule.task_type, s);
            if best.map_or(true, |(_, b)| s > b) {
                best = Some((rule, s));
            }
        }
        best.filter(|(_, s)| *s > 0.0).map(|(r, _)| r.task_type.as_str())
    }

    fn satisfied(&self, record: &Record, condition: &Condition) -> bool {
        let value = record.get(condition.key());
        match condition {
            Condition::Exact { value: want, .. } => value == Some(want),
            Condition::Greater { threshold, .. } => self
                .numeric(value, LEGACY_MISSING_GREATER)
                .is_some_and(|v| v >= *threshold),
            Condition::Less { threshold, .. } => self
                .numeric(value, LEGACY_MISSING_LESS)
                .is_some_and(|v| v <= *threshold),
        }
    }

    fn numeric(&self, value: Option<&Value>, legacy_default: f64) -> Option<f64> {
        match (value, self.missing) {
            (Some(v), _) => v.as_f64(),
            (None, MissingKeyPolicy::Legacy) => Some(legacy_default),
            (None, MissingKeyPolicy::Ignore) => None,
        }
    }
}
