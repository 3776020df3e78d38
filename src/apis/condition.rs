//! # Conditions
//!
//! Status conditions and the "Ready" aggregation shared by every resource.
//!
//! A [`ConditionSet`] names one happy condition (`Ready`) and the ordered
//! dependent conditions it is derived from. [`ConditionManager`] mutates a
//! status' condition list in place and recomputes the happy condition after
//! every change:
//!
//! - all dependents True: Ready is True
//! - any dependent False: Ready is False with the first False dependent's reason and message
//! - otherwise: Ready is Unknown with the first non-True dependent's reason and message

use chrono::{SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Type of the aggregate condition on every resource
pub const READY: &str = "Ready";

/// Tri-state condition status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

/// A single status condition
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub r#type: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Condition {
    pub fn new(condition_type: &str, status: ConditionStatus) -> Self {
        Self {
            r#type: condition_type.to_string(),
            status,
            last_transition_time: None,
            reason: None,
            message: None,
        }
    }

    #[must_use]
    pub fn with_reason(mut self, reason: &str, message: &str) -> Self {
        self.reason = non_empty(reason);
        self.message = non_empty(message);
        self
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }

    pub fn is_false(&self) -> bool {
        self.status == ConditionStatus::False
    }

    /// Same status, reason and message; transition time is ignored
    pub fn same_state(&self, other: &Condition) -> bool {
        self.r#type == other.r#type
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// Look up a condition by type
pub fn find_condition<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == condition_type)
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Happy condition plus the dependents it aggregates
#[derive(Debug)]
pub struct ConditionSet {
    happy: &'static str,
    dependents: &'static [&'static str],
}

impl ConditionSet {
    pub const fn new(happy: &'static str, dependents: &'static [&'static str]) -> Self {
        Self { happy, dependents }
    }

    pub fn happy(&self) -> &'static str {
        self.happy
    }

    pub fn dependents(&self) -> &'static [&'static str] {
        self.dependents
    }

    /// Borrow a condition list for mutation under this set's rules
    pub fn manage<'a>(&'a self, conditions: &'a mut Vec<Condition>) -> ConditionManager<'a> {
        ConditionManager {
            set: self,
            conditions,
        }
    }
}

/// Mutates a condition list in place, keeping the happy condition current
#[derive(Debug)]
pub struct ConditionManager<'a> {
    set: &'a ConditionSet,
    conditions: &'a mut Vec<Condition>,
}

impl ConditionManager<'_> {
    /// Seed every condition of the set as Unknown, leaving existing ones untouched
    pub fn initialize_conditions(&mut self) {
        let happy = self.set.happy;
        let mut seeded = false;
        for condition_type in std::iter::once(&happy).chain(self.set.dependents.iter()) {
            if find_condition(self.conditions.as_slice(), condition_type).is_none() {
                let mut condition = Condition::new(condition_type, ConditionStatus::Unknown);
                condition.last_transition_time = Some(now());
                self.conditions.push(condition);
                seeded = true;
            }
        }
        if seeded {
            self.conditions.sort_by(|a, b| a.r#type.cmp(&b.r#type));
        }
    }

    pub fn get_condition(&self, condition_type: &str) -> Option<&Condition> {
        find_condition(self.conditions.as_slice(), condition_type)
    }

    pub fn is_happy(&self) -> bool {
        self.get_condition(self.set.happy)
            .is_some_and(Condition::is_true)
    }

    pub fn mark_true(&mut self, condition_type: &str) {
        self.set_condition(Condition::new(condition_type, ConditionStatus::True));
        self.recompute_happy(condition_type);
    }

    pub fn mark_false(&mut self, condition_type: &str, reason: &str, message: &str) {
        self.set_condition(
            Condition::new(condition_type, ConditionStatus::False).with_reason(reason, message),
        );
        self.recompute_happy(condition_type);
    }

    pub fn mark_unknown(&mut self, condition_type: &str, reason: &str, message: &str) {
        self.set_condition(
            Condition::new(condition_type, ConditionStatus::Unknown).with_reason(reason, message),
        );
        self.recompute_happy(condition_type);
    }

    /// Copy another resource's condition into `condition_type`, Unknown when absent
    pub fn propagate(&mut self, condition_type: &str, source: Option<&Condition>) {
        match source {
            Some(c) if c.is_true() => self.mark_true(condition_type),
            Some(c) if c.is_false() => self.mark_false(
                condition_type,
                c.reason.as_deref().unwrap_or_default(),
                c.message.as_deref().unwrap_or_default(),
            ),
            Some(c) => self.mark_unknown(
                condition_type,
                c.reason.as_deref().unwrap_or_default(),
                c.message.as_deref().unwrap_or_default(),
            ),
            None => self.mark_unknown(condition_type, "", ""),
        }
    }

    /// Replace a condition, keeping its transition time unless the status flipped
    fn set_condition(&mut self, mut condition: Condition) {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.r#type == condition.r#type)
        {
            Some(existing) if existing.same_state(&condition) => {}
            Some(existing) => {
                condition.last_transition_time = if existing.status == condition.status {
                    existing.last_transition_time.clone()
                } else {
                    Some(now())
                };
                *existing = condition;
            }
            None => {
                condition.last_transition_time = Some(now());
                self.conditions.push(condition);
                self.conditions.sort_by(|a, b| a.r#type.cmp(&b.r#type));
            }
        }
    }

    fn recompute_happy(&mut self, changed: &str) {
        if changed == self.set.happy || !self.set.dependents.iter().any(|d| *d == changed) {
            return;
        }

        let mut first_false: Option<Condition> = None;
        let mut first_unknown: Option<Condition> = None;
        for dependent in self.set.dependents {
            match find_condition(self.conditions.as_slice(), dependent) {
                Some(c) if c.is_true() => {}
                Some(c) if c.is_false() => {
                    first_false = Some(c.clone());
                    break;
                }
                Some(c) => {
                    first_unknown.get_or_insert_with(|| c.clone());
                }
                None => {
                    first_unknown
                        .get_or_insert_with(|| Condition::new(dependent, ConditionStatus::Unknown));
                }
            }
        }

        let happy = match (first_false, first_unknown) {
            (Some(c), _) => Condition {
                r#type: self.set.happy.to_string(),
                ..c
            },
            (None, Some(c)) => Condition {
                r#type: self.set.happy.to_string(),
                ..c
            },
            (None, None) => Condition::new(self.set.happy, ConditionStatus::True),
        };
        self.set_condition(Condition {
            last_transition_time: None,
            ..happy
        });
    }
}
