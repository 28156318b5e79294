//! Status conditions
//!
//! Conditions summarize lifecycle progress of a `PostgresqlInstance`. Each
//! condition type appears at most once in the status list, and its
//! `lastTransitionTime` moves only when its status actually changes, so
//! clients can watch for edges (e.g. `Ready` flipping back to `True`).
//!
//! Allowed transitions:
//!
//! ```text
//! Unknown ──> True | False
//! True <────> False
//! ```
//!
//! Setting a condition to the status it already has is a no-op for the
//! timestamp; the reason and message are still refreshed.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Condition types reported on a `PostgresqlInstance`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum ConditionType {
    /// The provider instance exists
    Created,
    /// The provider instance matches the spec and can be connected to
    Ready,
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => f.write_str("Created"),
            Self::Ready => f.write_str("Ready"),
        }
    }
}

/// Condition status following Kubernetes conventions
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl ConditionStatus {
    /// Whether a condition currently in `self` may move to `next`.
    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (from, to) if from == to => true,
            (Self::Unknown, Self::True | Self::False) => true,
            (Self::True, Self::False) | (Self::False, Self::True) => true,
            (Self::True | Self::False, Self::Unknown) => false,
            _ => false,
        }
    }
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::True => f.write_str("True"),
            Self::False => f.write_str("False"),
            Self::Unknown => f.write_str("Unknown"),
        }
    }
}

/// Kubernetes-style condition
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    #[serde(rename = "type")]
    pub condition_type: ConditionType,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Last time the status changed
    pub last_transition_time: DateTime<Utc>,

    /// Machine-readable reason for the current status
    #[serde(default)]
    pub reason: String,

    /// Human-readable message
    #[serde(default)]
    pub message: String,
}

/// Outcome of [`set_condition`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The condition did not exist and was added
    Added,
    /// The status changed and the transition time was refreshed
    Changed,
    /// Same status; only reason and message were updated
    Unchanged,
    /// The transition is not allowed; the condition was left untouched
    Rejected,
}

/// Sets the status of `condition_type`, enforcing the transition rules.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    condition_type: ConditionType,
    status: ConditionStatus,
    reason: &str,
    message: &str,
    now: DateTime<Utc>,
) -> Transition {
    let Some(existing) = conditions.iter_mut().find(|c| c.condition_type == condition_type) else {
        conditions.push(Condition {
            condition_type,
            status,
            last_transition_time: now,
            reason: reason.to_string(),
            message: message.to_string(),
        });
        return Transition::Added;
    };

    if !existing.status.can_transition_to(status) {
        return Transition::Rejected;
    }

    let transition = if existing.status == status {
        Transition::Unchanged
    } else {
        existing.status = status;
        existing.last_transition_time = now;
        Transition::Changed
    };
    existing.reason = reason.to_string();
    existing.message = message.to_string();
    transition
}

/// Finds the condition of the given type.
pub fn find_condition(conditions: &[Condition], condition_type: ConditionType) -> Option<&Condition> {
    conditions.iter().find(|c| c.condition_type == condition_type)
}

/// Whether the condition of the given type exists and is `True`.
pub fn is_condition_true(conditions: &[Condition], condition_type: ConditionType) -> bool {
    find_condition(conditions, condition_type).is_some_and(|c| c.status == ConditionStatus::True)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    #[test]
    fn test_add_condition() {
        let mut conditions = Vec::new();

        let transition = set_condition(&mut conditions, ConditionType::Created, ConditionStatus::Unknown, "Creating", "", at(0));

        assert_eq!(transition, Transition::Added);
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, at(0));
    }

    #[test]
    fn test_timestamp_moves_only_on_status_change() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, ConditionType::Ready, ConditionStatus::False, "Creating", "", at(0));

        let transition = set_condition(&mut conditions, ConditionType::Ready, ConditionStatus::False, "Updating", "patching", at(10));
        assert_eq!(transition, Transition::Unchanged);
        let ready = find_condition(&conditions, ConditionType::Ready).unwrap();
        assert_eq!(ready.last_transition_time, at(0));
        assert_eq!(ready.reason, "Updating");
        assert_eq!(ready.message, "patching");

        let transition = set_condition(&mut conditions, ConditionType::Ready, ConditionStatus::True, "Ready", "", at(20));
        assert_eq!(transition, Transition::Changed);
        let ready = find_condition(&conditions, ConditionType::Ready).unwrap();
        assert_eq!(ready.last_transition_time, at(20));
        assert!(is_condition_true(&conditions, ConditionType::Ready));
    }

    #[test]
    fn test_true_false_flip_flop() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, ConditionType::Ready, ConditionStatus::Unknown, "", "", at(0));

        assert_eq!(
            set_condition(&mut conditions, ConditionType::Ready, ConditionStatus::True, "", "", at(1)),
            Transition::Changed
        );
        assert_eq!(
            set_condition(&mut conditions, ConditionType::Ready, ConditionStatus::False, "", "", at(2)),
            Transition::Changed
        );
        assert_eq!(
            set_condition(&mut conditions, ConditionType::Ready, ConditionStatus::True, "", "", at(3)),
            Transition::Changed
        );
        assert_eq!(find_condition(&conditions, ConditionType::Ready).unwrap().last_transition_time, at(3));
    }

    #[test]
    fn test_back_to_unknown_is_rejected() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, ConditionType::Created, ConditionStatus::True, "Created", "ok", at(0));

        let transition = set_condition(&mut conditions, ConditionType::Created, ConditionStatus::Unknown, "Creating", "", at(5));

        assert_eq!(transition, Transition::Rejected);
        let created = find_condition(&conditions, ConditionType::Created).unwrap();
        assert_eq!(created.status, ConditionStatus::True);
        assert_eq!(created.reason, "Created");
        assert_eq!(created.last_transition_time, at(0));
    }

    #[test]
    fn test_one_condition_per_type() {
        let mut conditions = Vec::new();
        for (i, status) in [ConditionStatus::Unknown, ConditionStatus::False, ConditionStatus::True].into_iter().enumerate() {
            set_condition(&mut conditions, ConditionType::Created, status, "", "", at(i as i64));
            set_condition(&mut conditions, ConditionType::Ready, status, "", "", at(i as i64));
        }
        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[0].condition_type, ConditionType::Created);
        assert_eq!(conditions[1].condition_type, ConditionType::Ready);
    }

    #[test]
    fn test_serialized_form() {
        let condition = Condition {
            condition_type: ConditionType::Ready,
            status: ConditionStatus::True,
            last_transition_time: at(0),
            reason: "InstanceReady".to_string(),
            message: String::new(),
        };
        let value = serde_json::to_value(&condition).unwrap();
        assert_eq!(value["type"], "Ready");
        assert_eq!(value["status"], "True");
        assert_eq!(value["lastTransitionTime"], "2023-11-14T22:13:20Z");
    }
}
