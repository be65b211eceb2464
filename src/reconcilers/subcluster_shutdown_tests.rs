// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `subcluster_shutdown.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::crd::{Subcluster, SubclusterType};
    use crate::fake::{test_vdb, FakeCluster, TEST_NAMESPACE};

    /// pri1 has 4 of the 7 primary nodes, pri2 has 3
    fn running_db(fake: &FakeCluster, shutdown: &str) -> VerticaDB {
        let vdb = fake.seed_vdb(test_vdb(
            "v",
            "img",
            vec![
                Subcluster::new("pri1", 4, SubclusterType::Primary),
                Subcluster::new("pri2", 3, SubclusterType::Primary),
                Subcluster::new("sec1", 1, SubclusterType::Secondary),
            ],
        ));
        fake.start_database(&vdb);
        let shutdown = shutdown.to_string();
        fake.edit_vdb(TEST_NAMESPACE, "v", move |v| {
            if let Some(sc) = v.find_subcluster_mut(&shutdown) {
                sc.shutdown = true;
            }
        })
    }

    #[tokio::test]
    async fn test_shutdown_losing_quorum_is_refused() {
        let fake = FakeCluster::new();
        let mut vdb = running_db(&fake, "pri1");
        let mut pfacts = fake.pod_facts(None);

        let err = SubclusterShutdownReconciler::new(fake.context())
            .reconcile(&mut vdb, &mut pfacts)
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<OperatorError>(),
            Some(&OperatorError::QuorumLoss {
                up_after: 3,
                total: 7
            })
        );
        assert!(fake.calls_to("stop_subcluster").is_empty());
        assert!(fake
            .events()
            .iter()
            .any(|e| e.warning && e.reason == EVENT_CLUSTER_WILL_LOSE_QUORUM));
    }

    #[tokio::test]
    async fn test_shutdown_keeping_quorum() {
        let fake = FakeCluster::new();
        let mut vdb = running_db(&fake, "pri2");
        let mut pfacts = fake.pod_facts(None);

        let res = SubclusterShutdownReconciler::new(fake.context())
            .reconcile(&mut vdb, &mut pfacts)
            .await
            .unwrap();
        assert_eq!(res, ReconcileResult::done());
        assert_eq!(fake.calls_to("stop_subcluster"), vec!["stop_subcluster pri2"]);
        assert!(!fake.node("v-pri2-0").up);
        assert!(fake.node("v-pri1-0").up);
    }

    /// Secondaries never count toward quorum
    #[tokio::test]
    async fn test_shutdown_secondary() {
        let fake = FakeCluster::new();
        let mut vdb = running_db(&fake, "sec1");
        let mut pfacts = fake.pod_facts(None);
        SubclusterShutdownReconciler::new(fake.context())
            .reconcile(&mut vdb, &mut pfacts)
            .await
            .unwrap();
        assert_eq!(fake.calls_to("stop_subcluster"), vec!["stop_subcluster sec1"]);
    }

    #[tokio::test]
    async fn test_already_down_is_noop() {
        let fake = FakeCluster::new();
        let mut vdb = running_db(&fake, "sec1");
        fake.set_node("v-sec1-0", |n| n.up = false);
        let mut pfacts = fake.pod_facts(None);
        SubclusterShutdownReconciler::new(fake.context())
            .reconcile(&mut vdb, &mut pfacts)
            .await
            .unwrap();
        assert!(fake.calls().is_empty());
    }
}
