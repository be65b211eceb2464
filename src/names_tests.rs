// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `names` module

#[cfg(test)]
mod tests {
    use crate::errors::OperatorError;
    use crate::names::*;
    use std::collections::BTreeSet;

    fn taken(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_mirror_name_prefers_sb_suffix() {
        let existing = taken(&["pri1", "sec1"]);
        let name = mirror_subcluster_name("pri1", |n| existing.contains(n)).unwrap();
        assert_eq!(name, "pri1-sb");
    }

    /// A previous mirror inherited the `-sb` name; the original name is free again
    #[test]
    fn test_mirror_name_oscillates_back_to_base() {
        let existing = taken(&["pri2-sb"]);
        let name = mirror_subcluster_name("pri2", |n| existing.contains(n)).unwrap();
        assert_eq!(name, "pri2");
    }

    #[test]
    fn test_mirror_name_random_only_when_both_taken() {
        let existing = taken(&["pri2", "pri2-sb"]);
        let name = mirror_subcluster_name("pri2", |n| existing.contains(n)).unwrap();
        assert!(name.starts_with("pri2-"), "got {name}");
        assert_ne!(name, "pri2-sb");
        assert_eq!(name.len(), "pri2-".len() + 5, "five character suffix");
    }

    /// The mirror of an existing mirror keeps its full name as prefix
    #[test]
    fn test_mirror_of_sb_subcluster() {
        let existing = taken(&["sc1", "sc1-sb"]);
        let name = mirror_subcluster_name("sc1-sb", |n| existing.contains(n)).unwrap();
        assert_eq!(name, "sc1-sb-sb");
    }

    #[test]
    fn test_sts_name_tiers() {
        let none = taken(&[]);
        assert_eq!(
            mirror_sts_name("vdb", "pri1-sb", |n| none.contains(n)).unwrap(),
            "vdb-pri1-sb"
        );

        let preferred_taken = taken(&["vdb-pri2-sb"]);
        assert_eq!(
            mirror_sts_name("vdb", "pri2-sb", |n| preferred_taken.contains(n)).unwrap(),
            "vdb-pri2"
        );

        let both_taken = taken(&["vdb-pri3-sb", "vdb-pri3"]);
        let name = mirror_sts_name("vdb", "pri3-sb", |n| both_taken.contains(n)).unwrap();
        assert!(name.starts_with("vdb-pri3-sb-"), "got {name}");
    }

    #[test]
    fn test_sandbox_name_fallbacks() {
        assert_eq!(sandbox_name(|_| false).unwrap(), "replica-group-b");
        assert_eq!(
            sandbox_name(|n| n == "replica-group-b").unwrap(),
            "replica-group-a"
        );
        let name = sandbox_name(|n| n == "replica-group-b" || n == "replica-group-a").unwrap();
        assert!(name.starts_with("replica-group-b-"), "got {name}");
    }

    #[test]
    fn test_exhaustion_is_an_error() {
        let err = gen_unique_name("a", Some("b"), "a", |_| true).unwrap_err();
        assert!(matches!(
            err,
            OperatorError::NameGenerationExhausted { attempts: 100, .. }
        ));
    }
}
