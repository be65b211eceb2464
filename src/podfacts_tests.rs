// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `podfacts.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::crd::{SandboxStatus, SubclusterType};
    use crate::fake::{test_vdb, FakeCluster, TEST_NAMESPACE};

    fn fact(name: &str, subcluster: &str, primary: bool, up: bool) -> PodFact {
        PodFact {
            name: name.to_string(),
            subcluster: subcluster.to_string(),
            is_primary: primary,
            exists: true,
            is_running: true,
            is_installed: Some(true),
            db_exists: Some(true),
            up_node: up,
            image: "img".to_string(),
            ..Default::default()
        }
    }

    fn table(facts: Vec<PodFact>) -> PodFacts {
        let fake = FakeCluster::new();
        let mut pfacts = fake.pod_facts(None);
        pfacts.detail = facts.into_iter().map(|pf| (pf.name.clone(), pf)).collect();
        pfacts.mark_collected();
        pfacts
    }

    #[test]
    fn test_parse_node_state() {
        let state = parse_node_state("UP|45035996273704980|f\n");
        assert!(state.up);
        assert!(!state.read_only);
        assert_eq!(state.subcluster_oid, "45035996273704980");

        assert!(parse_node_state("UP|123|t").read_only);
        assert!(!parse_node_state("DOWN|123").up);
        assert_eq!(state.subcluster_name, None);
    }

    #[test]
    fn test_parse_node_state_reads_catalog_subcluster() {
        let state = parse_node_state("UP|123|f|pri1\n");
        assert_eq!(state.subcluster_name.as_deref(), Some("pri1"));
        assert_eq!(parse_node_state("UP|123|f|").subcluster_name, None);
    }

    #[test]
    fn test_parse_node_state_malformed_is_down() {
        assert_eq!(parse_node_state(""), NodeState::default());
        assert_eq!(parse_node_state("UP"), NodeState::default());
        assert_eq!(parse_node_state("UP||f"), NodeState::default());
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("\n 7 \n"), 7);
        assert_eq!(parse_count("garbage"), 0);
        assert_eq!(parse_count(""), 0);
    }

    /// 3 of 5 primaries up survives losing none, not one
    #[test]
    fn test_quorum() {
        let pfacts = table(vec![
            fact("p0", "pri", true, true),
            fact("p1", "pri", true, true),
            fact("p2", "pri", true, true),
            fact("p3", "pri", true, false),
            fact("p4", "pri", true, false),
            fact("s0", "sec", false, true),
        ]);
        assert_eq!(pfacts.count_primary_nodes(), 5);
        assert_eq!(pfacts.count_up_primary_nodes(), 3);
        assert!(pfacts.does_db_have_quorum(0));
        assert!(!pfacts.does_db_have_quorum(1));
        assert!(!pfacts.does_db_have_quorum(4));
    }

    #[test]
    fn test_find_first_up_pod() {
        let mut ro = fact("a0", "sec", false, true);
        ro.read_only = true;
        let pfacts = table(vec![
            ro,
            fact("b0", "pri", true, false),
            fact("c0", "pri", true, true),
        ]);
        assert_eq!(pfacts.find_first_up_pod(false, None).map(|p| p.name.as_str()), Some("c0"));
        assert_eq!(pfacts.find_first_up_pod(true, None).map(|p| p.name.as_str()), Some("a0"));
        assert!(pfacts.find_first_up_pod(true, Some("missing")).is_none());
    }

    #[test]
    fn test_find_pod_to_run_admin_cmd_falls_back_to_installed() {
        let pfacts = table(vec![fact("a0", "pri", true, false)]);
        assert_eq!(
            pfacts.find_pod_to_run_admin_cmd().map(|p| p.name.as_str()),
            Some("a0")
        );
    }

    #[test]
    fn test_restart_and_add_lists() {
        let mut fresh = fact("n0", "sec", false, false);
        fresh.db_exists = Some(false);
        let pfacts = table(vec![
            fact("d0", "pri", true, false),
            fact("u0", "pri", true, true),
            fresh,
        ]);
        let restart: Vec<&str> = pfacts
            .find_restartable_pods()
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(restart, vec!["d0"]);
        let add: Vec<&str> = pfacts
            .find_pods_to_add_to_db()
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(add, vec!["n0"]);
    }

    #[test]
    fn test_image_queries() {
        let mut new = fact("n0", "pri", true, true);
        new.image = "new".to_string();
        let pfacts = table(vec![fact("o0", "pri", true, true), new]);
        assert_eq!(pfacts.find_pods_with_old_image("new").len(), 1);
        assert!(pfacts.any_pod_running_image("new"));
        assert!(pfacts.any_up_pod_with_old_image("new"));
        assert!(pfacts.any_up_pod_with_old_image("img"));
    }

    #[tokio::test]
    async fn test_collect_running_database() {
        let fake = FakeCluster::new();
        let vdb = fake.seed_vdb(test_vdb(
            "v",
            "img",
            vec![
                Subcluster::new("pri1", 2, SubclusterType::Primary),
                Subcluster::new("sec1", 1, SubclusterType::Secondary),
            ],
        ));
        let vdb = fake.start_database(&vdb);
        fake.set_node("v-sec1-0", |n| n.up = false);

        let mut pfacts = fake.pod_facts(None);
        pfacts.collect(&vdb).await.unwrap();
        assert!(!pfacts.needs_collection());
        assert_eq!(pfacts.detail.len(), 3);

        let pri = &pfacts.detail["v-pri1-0"];
        assert!(pri.exists && pri.is_running && pri.up_node && pri.is_primary);
        assert_eq!(pri.image, "img");
        assert_eq!(pri.shard_subscriptions, 1);
        assert_eq!(pri.dns_name, format!("v-pri1-0.v.{TEST_NAMESPACE}"));
        assert_eq!(pri.db_subcluster.as_deref(), Some("pri1"));
        assert_eq!(pfacts.detail["v-pri1-1"].db_subcluster.as_deref(), Some("pri1"));

        let sec = &pfacts.detail["v-sec1-0"];
        assert!(sec.is_running && !sec.up_node);
        assert_eq!(sec.db_exists, Some(true));
        assert_eq!(sec.db_subcluster, None);
    }

    #[tokio::test]
    async fn test_collect_missing_pods() {
        let fake = FakeCluster::new();
        let vdb = fake.seed_vdb(test_vdb(
            "v",
            "img",
            vec![Subcluster::new("pri1", 2, SubclusterType::Primary)],
        ));
        let mut pfacts = fake.pod_facts(None);
        pfacts.collect(&vdb).await.unwrap();
        assert_eq!(pfacts.detail.len(), 2);
        assert!(pfacts.detail.values().all(|pf| !pf.exists && !pf.up_node));
    }

    #[tokio::test]
    async fn test_collect_is_cached_until_invalidated() {
        let fake = FakeCluster::new();
        let vdb = fake.seed_vdb(test_vdb(
            "v",
            "img",
            vec![Subcluster::new("pri1", 1, SubclusterType::Primary)],
        ));
        let vdb = fake.start_database(&vdb);
        let mut pfacts = fake.pod_facts(None);
        pfacts.collect(&vdb).await.unwrap();
        fake.set_node("v-pri1-0", |n| n.up = false);

        pfacts.collect(&vdb).await.unwrap();
        assert!(pfacts.detail["v-pri1-0"].up_node);

        pfacts.invalidate();
        pfacts.collect(&vdb).await.unwrap();
        assert!(!pfacts.detail["v-pri1-0"].up_node);
    }

    /// Sandbox tables hold the realized sandbox members, the main table the rest
    #[tokio::test]
    async fn test_collect_splits_by_realized_sandbox() {
        let fake = FakeCluster::new();
        let vdb = fake.seed_vdb(test_vdb(
            "v",
            "img",
            vec![
                Subcluster::new("pri1", 1, SubclusterType::Primary),
                Subcluster::new("sec1", 1, SubclusterType::Secondary),
            ],
        ));
        fake.start_database(&vdb);
        let vdb = fake.edit_vdb(TEST_NAMESPACE, "v", |v| {
            v.status.get_or_insert_with(Default::default).sandboxes = vec![SandboxStatus {
                name: "sb".to_string(),
                subclusters: vec!["sec1".to_string()],
            }];
        });

        let mut main = fake.pod_facts(None);
        main.collect(&vdb).await.unwrap();
        assert_eq!(main.detail.keys().collect::<Vec<_>>(), vec!["v-pri1-0"]);

        let mut sandbox = main.for_sandbox("sb");
        assert_eq!(sandbox.sandbox(), Some("sb"));
        sandbox.collect(&vdb).await.unwrap();
        assert_eq!(sandbox.detail.keys().collect::<Vec<_>>(), vec!["v-sec1-0"]);
        assert_eq!(sandbox.detail["v-sec1-0"].sandbox.as_deref(), Some("sb"));
    }

    #[test]
    fn test_vsql_command() {
        let cmd = vsql_command("select 1");
        assert_eq!(cmd[0], VSQL_BIN);
        assert_eq!(cmd.last().map(String::as_str), Some("select 1"));
    }
}
