// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Offline upgrade: stop the whole main cluster, reimage it and start it again.
//!
//! Used when the upgrade policy is `Offline`, or `Auto`/`Online` with too few
//! primary nodes to keep the database up while half of it is rebuilt.

use super::{resolve_upgrade_style, UpgradeManager, UpgradeStyle};
use crate::constants::MIN_PRIMARY_NODES_FOR_ONLINE_UPGRADE;
use crate::context::Context;
use crate::crd::{Subcluster, VerticaDB};
use crate::dispatcher::StopDbOptions;
use crate::podfacts::{PodFact, PodFacts};
use crate::reconcilers::client_routing::{ClientRoutingReconciler, RoutingMode};
use crate::reconcilers::restart::RestartReconciler;
use crate::reconcilers::{is_reconcile_aborted, Actor, ReconcileResult};
use crate::status_reasons::{
    EVENT_CLUSTER_SHUTDOWN_FAILED, EVENT_CLUSTER_SHUTDOWN_STARTED,
    EVENT_CLUSTER_SHUTDOWN_SUCCEEDED, EVENT_INCOMPATIBLE_ONLINE_UPGRADE,
};
use anyhow::Result;
use async_trait::async_trait;
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// Progress messages posted to `status.upgradeStatus`, in order.
pub const OFFLINE_UPGRADE_STATUS_MSGS: [&str; 4] = [
    "Shutting down cluster",
    "Rescheduling pods with new image",
    "Restarting cluster with new image",
    "Reinstalling default packages",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum OfflineStep {
    Start,
    StopCluster,
    Reschedule,
    WaitForNewPods,
    Restart,
    InstallPackages,
    AddClientRouting,
    Finish,
}

impl OfflineStep {
    const ALL: [Self; 8] = [
        Self::Start,
        Self::StopCluster,
        Self::Reschedule,
        Self::WaitForNewPods,
        Self::Restart,
        Self::InstallPackages,
        Self::AddClientRouting,
        Self::Finish,
    ];

    fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::StopCluster => "stop_cluster",
            Self::Reschedule => "reschedule",
            Self::WaitForNewPods => "wait_for_new_pods",
            Self::Restart => "restart",
            Self::InstallPackages => "install_packages",
            Self::AddClientRouting => "add_client_routing",
            Self::Finish => "finish",
        }
    }

    fn status_msg_index(self) -> Option<usize> {
        match self {
            Self::StopCluster => Some(0),
            Self::Reschedule => Some(1),
            Self::Restart => Some(2),
            Self::InstallPackages => Some(3),
            _ => None,
        }
    }
}

/// Shutdown, reimage, restart.
pub struct OfflineUpgradeReconciler {
    ctx: Arc<Context>,
    manager: UpgradeManager,
}

impl OfflineUpgradeReconciler {
    #[must_use]
    pub fn new(ctx: Arc<Context>) -> Self {
        Self {
            manager: UpgradeManager::new(ctx.clone(), UpgradeStyle::Offline),
            ctx,
        }
    }

    async fn run_step(
        &mut self,
        step: OfflineStep,
        vdb: &mut VerticaDB,
        pfacts: &mut PodFacts,
    ) -> Result<ReconcileResult> {
        if let Some(index) = step.status_msg_index() {
            self.manager
                .post_next_status_msg(vdb, &OFFLINE_UPGRADE_STATUS_MSGS, index)
                .await?;
        }
        match step {
            OfflineStep::Start => self.start(vdb).await,
            OfflineStep::StopCluster => self.stop_cluster(vdb, pfacts).await,
            OfflineStep::Reschedule => self.reschedule(vdb, pfacts).await,
            OfflineStep::WaitForNewPods => {
                pfacts.collect(vdb).await?;
                if pfacts.any_pod_running_image(&vdb.spec.image) {
                    return Ok(ReconcileResult::done());
                }
                info!(vdb = %vdb.name_any(), image = %vdb.spec.image, "Waiting for a pod with the new image");
                Ok(ReconcileResult::requeue())
            }
            OfflineStep::Restart => {
                RestartReconciler::new(self.ctx.clone())
                    .reconcile(vdb, pfacts)
                    .await
            }
            OfflineStep::InstallPackages => self.install_packages(vdb, pfacts).await,
            OfflineStep::AddClientRouting => {
                let all = vdb.spec.subclusters.iter().map(|sc| sc.name.clone()).collect();
                ClientRoutingReconciler::for_subclusters(self.ctx.clone(), RoutingMode::Add, all)
                    .reconcile(vdb, pfacts)
                    .await
            }
            OfflineStep::Finish => self.manager.finish_upgrade(vdb).await,
        }
    }

    async fn start(&mut self, vdb: &mut VerticaDB) -> Result<ReconcileResult> {
        let was_continuing = self.manager.is_continuing();
        let res = self.manager.start_upgrade(vdb).await?;
        if !was_continuing && resolve_upgrade_style(vdb).1 {
            self.ctx
                .publish_warning_event(
                    vdb,
                    EVENT_INCOMPATIBLE_ONLINE_UPGRADE,
                    &format!(
                        "Online upgrade was requested but the cluster has fewer than \
                         {MIN_PRIMARY_NODES_FOR_ONLINE_UPGRADE} primary nodes. Falling back to offline upgrade"
                    ),
                )
                .await;
        }
        Ok(res)
    }

    async fn stop_cluster(&self, vdb: &VerticaDB, pfacts: &mut PodFacts) -> Result<ReconcileResult> {
        pfacts.collect(vdb).await?;
        if pfacts.find_running_pod().is_none() {
            debug!(vdb = %vdb.name_any(), "No pods running, skipping shutdown");
            return Ok(ReconcileResult::done());
        }
        if pfacts.up_node_count() == 0 {
            debug!(vdb = %vdb.name_any(), "No nodes up, skipping shutdown");
            return Ok(ReconcileResult::done());
        }
        if !pfacts.any_up_pod_with_old_image(&vdb.spec.image) {
            debug!(vdb = %vdb.name_any(), "No up pod runs the old image, skipping shutdown");
            return Ok(ReconcileResult::done());
        }
        let Some(initiator) = pfacts.find_first_up_pod(true, None).map(PodFact::target) else {
            return Ok(ReconcileResult::requeue());
        };

        self.ctx
            .publish_normal_event(
                vdb,
                EVENT_CLUSTER_SHUTDOWN_STARTED,
                "Starting stop database for the upgrade",
            )
            .await;
        let started = Instant::now();
        if let Err(e) = self
            .ctx
            .dispatcher
            .stop_db(vdb, &initiator, &StopDbOptions::default())
            .await
        {
            self.ctx
                .publish_warning_event(
                    vdb,
                    EVENT_CLUSTER_SHUTDOWN_FAILED,
                    &format!("Failed to stop the database: {e}"),
                )
                .await;
            return Err(e);
        }
        self.ctx
            .publish_normal_event(
                vdb,
                EVENT_CLUSTER_SHUTDOWN_SUCCEEDED,
                &format!(
                    "Successfully shut down the database and it took {:.1}s",
                    started.elapsed().as_secs_f64()
                ),
            )
            .await;
        pfacts.invalidate();
        Ok(ReconcileResult::done())
    }

    async fn reschedule(&self, vdb: &VerticaDB, pfacts: &mut PodFacts) -> Result<ReconcileResult> {
        let image = vdb.spec.image.clone();
        let main: Vec<&Subcluster> = vdb
            .spec
            .subclusters
            .iter()
            .filter(|sc| vdb.realized_sandbox_of(&sc.name).is_none())
            .collect();
        if self
            .manager
            .update_image_in_statefulsets(vdb, &main, &image)
            .await?
            > 0
        {
            pfacts.invalidate();
        }

        pfacts.collect(vdb).await?;
        if self
            .manager
            .delete_pods_running_old_image(vdb, pfacts, &image, None)
            .await?
            > 0
        {
            pfacts.invalidate();
        }
        Ok(ReconcileResult::done())
    }

    async fn install_packages(&self, vdb: &VerticaDB, pfacts: &mut PodFacts) -> Result<ReconcileResult> {
        pfacts.collect(vdb).await?;
        let Some(initiator) = pfacts.find_first_up_pod(true, None).map(PodFact::target) else {
            info!(vdb = %vdb.name_any(), "No up pod to install packages from, requeueing");
            return Ok(ReconcileResult::requeue());
        };
        self.ctx.dispatcher.install_packages(vdb, &initiator).await?;
        Ok(ReconcileResult::done())
    }
}

#[async_trait]
impl Actor for OfflineUpgradeReconciler {
    fn name(&self) -> &'static str {
        "offline_upgrade"
    }

    async fn reconcile(
        &mut self,
        vdb: &mut VerticaDB,
        pfacts: &mut PodFacts,
    ) -> Result<ReconcileResult> {
        if !self.manager.is_upgrade_needed(vdb).await? {
            return Ok(ReconcileResult::done());
        }

        for step in OfflineStep::ALL {
            debug!(vdb = %vdb.name_any(), step = step.as_str(), "Running offline upgrade step");
            let res = self.run_step(step, vdb, pfacts).await;
            let outcome = match &res {
                Ok(r) if r.is_requeue() => "requeue",
                Ok(_) => "done",
                Err(_) => "error",
            };
            crate::metrics::record_upgrade_step(UpgradeStyle::Offline.as_str(), step.as_str(), outcome);

            if is_reconcile_aborted(&res) {
                if let Err(e) = &res {
                    error!(vdb = %vdb.name_any(), step = step.as_str(), error = %e, "Offline upgrade step failed");
                } else {
                    info!(vdb = %vdb.name_any(), step = step.as_str(), "Offline upgrade step requested a requeue");
                }
                let requeue_time = vdb.upgrade_requeue_duration();
                return res.map(|r| {
                    if r.requeue_after.is_none() {
                        ReconcileResult::requeue_after(requeue_time)
                    } else {
                        r
                    }
                });
            }
        }
        Ok(ReconcileResult::done())
    }
}

#[cfg(test)]
#[path = "offline_tests.rs"]
mod offline_tests;
