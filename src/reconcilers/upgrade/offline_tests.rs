// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `offline.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::crd::{SubclusterType, UpgradePolicy};
    use crate::fake::{sts_image, test_vdb, FakeCluster, TEST_NAMESPACE};
    use crate::labels::CLIENT_ROUTING;
    use crate::status_reasons::{
        CONDITION_OFFLINE_UPGRADE_IN_PROGRESS, CONDITION_ONLINE_UPGRADE_IN_PROGRESS,
        CONDITION_TRUE, CONDITION_UPGRADE_IN_PROGRESS, EVENT_UPGRADE_START,
        EVENT_UPGRADE_SUCCEEDED, REASON_UPGRADE_STARTED,
    };
    use crate::reconcilers::status::{create_condition, set_condition};

    /// Two primaries: too few for an online upgrade
    fn running_db(fake: &FakeCluster, policy: UpgradePolicy) -> VerticaDB {
        let mut vdb = test_vdb(
            "v",
            "old",
            vec![Subcluster::new("pri1", 2, SubclusterType::Primary)],
        );
        vdb.spec.upgrade_policy = policy;
        let vdb = fake.seed_vdb(vdb);
        fake.start_database(&vdb);
        fake.edit_vdb(TEST_NAMESPACE, "v", |v| v.spec.image = "new".to_string())
    }

    #[tokio::test]
    async fn test_offline_upgrade() {
        let fake = FakeCluster::new();
        let mut vdb = running_db(&fake, UpgradePolicy::Auto);
        let mut pfacts = fake.pod_facts(None);

        let res = OfflineUpgradeReconciler::new(fake.context())
            .reconcile(&mut vdb, &mut pfacts)
            .await
            .unwrap();
        assert_eq!(res, ReconcileResult::done());

        let calls = fake.calls();
        assert_eq!(calls.first().map(String::as_str), Some("stop_db"));
        assert!(calls.contains(&"restart_nodes v-pri1-0,v-pri1-1".to_string()));
        assert_eq!(calls.last().map(String::as_str), Some("install_packages"));

        let pri1 = vdb.find_subcluster("pri1").unwrap().clone();
        assert_eq!(sts_image(&fake, &vdb, &pri1).as_deref(), Some("new"));
        assert!(fake.node("v-pri1-0").up);
        assert_eq!(
            fake.pod_label(TEST_NAMESPACE, "v-pri1-1", CLIENT_ROUTING).as_deref(),
            Some("true")
        );
        assert!(!vdb.is_condition_true(CONDITION_UPGRADE_IN_PROGRESS));
        assert!(!vdb.is_condition_true(CONDITION_OFFLINE_UPGRADE_IN_PROGRESS));
        assert!(vdb.upgrade_status().is_empty());

        let reasons = fake.event_reasons();
        for reason in [
            EVENT_UPGRADE_START,
            EVENT_CLUSTER_SHUTDOWN_STARTED,
            EVENT_CLUSTER_SHUTDOWN_SUCCEEDED,
            EVENT_UPGRADE_SUCCEEDED,
        ] {
            assert!(reasons.contains(&reason.to_string()), "{reason}");
        }
        assert!(!reasons.contains(&EVENT_INCOMPATIBLE_ONLINE_UPGRADE.to_string()));

        // Nothing left to do.
        let res = OfflineUpgradeReconciler::new(fake.context())
            .reconcile(&mut vdb, &mut fake.pod_facts(None))
            .await
            .unwrap();
        assert_eq!(res, ReconcileResult::done());
        assert_eq!(fake.calls_to("stop_db").len(), 1);
    }

    #[tokio::test]
    async fn test_online_request_falls_back_with_warning() {
        let fake = FakeCluster::new();
        let mut vdb = running_db(&fake, UpgradePolicy::Online);
        let mut pfacts = fake.pod_facts(None);
        OfflineUpgradeReconciler::new(fake.context())
            .reconcile(&mut vdb, &mut pfacts)
            .await
            .unwrap();
        assert!(fake
            .events()
            .iter()
            .any(|e| e.warning && e.reason == EVENT_INCOMPATIBLE_ONLINE_UPGRADE));
    }

    /// A cluster that is already down is not stopped again
    #[tokio::test]
    async fn test_shutdown_skipped_when_down() {
        let fake = FakeCluster::new();
        let mut vdb = running_db(&fake, UpgradePolicy::Offline);
        for pod in ["v-pri1-0", "v-pri1-1"] {
            fake.set_node(pod, |n| n.up = false);
        }
        let mut pfacts = fake.pod_facts(None);
        OfflineUpgradeReconciler::new(fake.context())
            .reconcile(&mut vdb, &mut pfacts)
            .await
            .unwrap();
        assert!(fake.calls_to("stop_db").is_empty());
        assert!(!fake
            .event_reasons()
            .contains(&EVENT_CLUSTER_SHUTDOWN_STARTED.to_string()));
        assert!(fake.node("v-pri1-0").up);
    }

    #[tokio::test]
    async fn test_shutdown_failure() {
        let fake = FakeCluster::new();
        let mut vdb = running_db(&fake, UpgradePolicy::Offline);
        fake.fail_command("stop_db");
        let mut pfacts = fake.pod_facts(None);
        let res = OfflineUpgradeReconciler::new(fake.context())
            .reconcile(&mut vdb, &mut pfacts)
            .await;
        assert!(res.is_err());
        assert!(fake
            .events()
            .iter()
            .any(|e| e.warning && e.reason == EVENT_CLUSTER_SHUTDOWN_FAILED));
        assert!(vdb.is_condition_true(CONDITION_OFFLINE_UPGRADE_IN_PROGRESS));
        assert_eq!(vdb.upgrade_status(), OFFLINE_UPGRADE_STATUS_MSGS[0]);
        let pri1 = vdb.find_subcluster("pri1").unwrap().clone();
        assert_eq!(sts_image(&fake, &vdb, &pri1).as_deref(), Some("old"));
    }

    #[tokio::test]
    async fn test_blocked_by_online_upgrade() {
        let fake = FakeCluster::new();
        running_db(&fake, UpgradePolicy::Offline);
        let mut vdb = fake.edit_vdb(TEST_NAMESPACE, "v", |v| {
            let status = v.status.get_or_insert_with(Default::default);
            set_condition(
                &mut status.conditions,
                create_condition(
                    CONDITION_ONLINE_UPGRADE_IN_PROGRESS,
                    CONDITION_TRUE,
                    REASON_UPGRADE_STARTED,
                    "",
                ),
            );
        });
        let mut pfacts = fake.pod_facts(None);
        let res = OfflineUpgradeReconciler::new(fake.context())
            .reconcile(&mut vdb, &mut pfacts)
            .await
            .unwrap();
        assert_eq!(res, ReconcileResult::done());
        assert!(fake.calls().is_empty());
    }
}
