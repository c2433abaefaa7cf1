//! Condition history helpers
//!
//! The history is append-only: a new entry is added only when its
//! (type, reason, message) differs from the last one, and only the most
//! recent [`MAX_CONDITIONS`] entries are kept.

use crate::crd::{Condition, ConditionType, FailureReason};

/// Number of condition entries kept in the status
pub const MAX_CONDITIONS: usize = 10;

pub const REASON_REPLICAS_READY: &str = "ReplicasReady";
pub const REASON_AWAITING_REPLICAS: &str = "AwaitingReplicas";
pub const REASON_AWAITING_IMAGE: &str = "AwaitingImage";
pub const REASON_SCALED_DOWN: &str = "ScaledDown";

/// Append a condition unless it repeats the last one
///
/// Returns whether the history changed.
pub fn append_condition(conditions: &mut Vec<Condition>, condition: Condition) -> bool {
    if conditions
        .last()
        .map(|last| last.same_state(&condition))
        .unwrap_or(false)
    {
        return false;
    }
    conditions.push(condition);
    if conditions.len() > MAX_CONDITIONS {
        let excess = conditions.len() - MAX_CONDITIONS;
        conditions.drain(..excess);
    }
    true
}

/// Find the most recent condition of a type
pub fn find_last<'a>(conditions: &'a [Condition], type_: ConditionType) -> Option<&'a Condition> {
    conditions.iter().rev().find(|c| c.type_ == type_)
}

/// Whether the latest entry has the given type
pub fn is_current(conditions: &[Condition], type_: ConditionType) -> bool {
    conditions.last().map(|c| c.type_ == type_).unwrap_or(false)
}

/// Create a Provisioning condition
pub fn provisioning_condition(reason: &str, message: &str) -> Condition {
    Condition::new(ConditionType::Provisioning, reason, message)
}

/// Create a Deployed condition
pub fn deployed_condition(ready: i32) -> Condition {
    Condition::new(
        ConditionType::Deployed,
        REASON_REPLICAS_READY,
        &format!("{ready} replica(s) ready"),
    )
}

/// Create a Failed condition
pub fn failed_condition(reason: FailureReason, message: &str) -> Condition {
    Condition::new(ConditionType::Failed, reason.as_str(), message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_adds_new() {
        let mut conditions = Vec::new();
        assert!(append_condition(
            &mut conditions,
            provisioning_condition(REASON_AWAITING_REPLICAS, "0/1 replicas ready")
        ));

        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].type_, ConditionType::Provisioning);
    }

    #[test]
    fn test_append_skips_repeat_of_last() {
        let mut conditions = vec![Condition {
            type_: ConditionType::Deployed,
            reason: REASON_REPLICAS_READY.to_string(),
            message: "1 replica(s) ready".to_string(),
            last_transition_time: "2024-01-01T00:00:00Z".to_string(),
        }];

        assert!(!append_condition(&mut conditions, deployed_condition(1)));
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, "2024-01-01T00:00:00Z");
    }

    #[test]
    fn test_same_triple_after_different_entry_is_appended() {
        let mut conditions = Vec::new();
        append_condition(&mut conditions, deployed_condition(1));
        append_condition(
            &mut conditions,
            failed_condition(FailureReason::MessagingFailure, "bus down"),
        );
        assert!(append_condition(&mut conditions, deployed_condition(1)));
        assert_eq!(conditions.len(), 3);
        assert!(is_current(&conditions, ConditionType::Deployed));
    }

    #[test]
    fn test_history_is_capped() {
        let mut conditions = Vec::new();
        for i in 0..15 {
            append_condition(
                &mut conditions,
                provisioning_condition(REASON_AWAITING_REPLICAS, &format!("{i}/15 replicas ready")),
            );
        }
        assert_eq!(conditions.len(), MAX_CONDITIONS);
        assert_eq!(conditions[0].message, "5/15 replicas ready");
        assert_eq!(conditions[9].message, "14/15 replicas ready");
    }

    #[test]
    fn test_find_last() {
        let conditions = vec![
            failed_condition(FailureReason::InfraNotReady, "first"),
            deployed_condition(2),
            failed_condition(FailureReason::InfraNotReady, "second"),
        ];
        assert_eq!(
            find_last(&conditions, ConditionType::Failed).map(|c| c.message.as_str()),
            Some("second")
        );
        assert!(find_last(&conditions, ConditionType::Provisioning).is_none());
    }
}
