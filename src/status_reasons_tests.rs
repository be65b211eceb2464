// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `status_reasons` module

#[cfg(test)]
mod tests {
    use crate::status_reasons::*;

    #[test]
    fn test_condition_types_are_distinct() {
        let types = [
            CONDITION_UPGRADE_IN_PROGRESS,
            CONDITION_OFFLINE_UPGRADE_IN_PROGRESS,
            CONDITION_ONLINE_UPGRADE_IN_PROGRESS,
            CONDITION_TLS_CERT_ROLLBACK_NEEDED,
        ];
        let unique: std::collections::BTreeSet<_> = types.iter().collect();
        assert_eq!(unique.len(), types.len(), "condition types must not collide");
    }

    #[test]
    fn test_condition_status_strings() {
        assert_eq!(CONDITION_TRUE, "True");
        assert_eq!(CONDITION_FALSE, "False");
    }

    /// Reasons are CamelCase with no spaces so they can be matched programmatically
    #[test]
    fn test_event_reasons_are_camel_case() {
        for reason in [
            EVENT_UPGRADE_START,
            EVENT_UPGRADE_SUCCEEDED,
            EVENT_CLUSTER_SHUTDOWN_STARTED,
            EVENT_CLUSTER_WILL_LOSE_QUORUM,
            EVENT_INCOMPATIBLE_ONLINE_UPGRADE,
            EVENT_RENAME_SUBCLUSTER_FAILED,
        ] {
            assert!(!reason.contains(' '), "{reason} contains a space");
            assert!(
                reason.chars().next().is_some_and(char::is_uppercase),
                "{reason} must start uppercase"
            );
        }
    }
}
