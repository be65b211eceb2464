// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Sandboxes: carving subclusters out of the main cluster and reimaging them.
//!
//! A sandbox is desired when it appears in `spec.sandboxes` and realized once
//! `status.sandboxes` lists its members. [`SandboxSubclusterReconciler`] moves
//! desired members into the sandbox. [`SandboxUpgradeReconciler`] brings a
//! realized sandbox onto its image.

use super::restart::RestartReconciler;
use super::retry::update_vdb_status_with_retry;
use super::upgrade::{UpgradeManager, UpgradeStyle};
use super::{Actor, ReconcileResult};
use crate::context::Context;
use crate::crd::{SandboxStatus, Subcluster, VerticaDB};
use crate::dispatcher::StopDbOptions;
use crate::podfacts::{PodFact, PodFacts};
use crate::status_reasons::{EVENT_SANDBOX_SUBCLUSTER_FAILED, EVENT_SUBCLUSTER_SANDBOXED};
use anyhow::Result;
use async_trait::async_trait;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, info};

/// Moves the spec members of each sandbox into that sandbox.
pub struct SandboxSubclusterReconciler {
    ctx: Arc<Context>,
}

impl SandboxSubclusterReconciler {
    #[must_use]
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Restart down nodes of `members` so they can be sandboxed. Returns true
    /// when every pod of every member is up.
    async fn ensure_members_up(
        &self,
        vdb: &VerticaDB,
        pfacts: &mut PodFacts,
        members: &[String],
    ) -> Result<bool> {
        let is_member = |pf: &&PodFact| members.contains(&pf.subcluster);
        if pfacts.detail.values().filter(is_member).all(|pf| pf.up_node) {
            return Ok(true);
        }
        let nodes: Vec<_> = pfacts
            .find_restartable_pods()
            .into_iter()
            .filter(is_member)
            .map(PodFact::target)
            .collect();
        if nodes.is_empty() {
            return Ok(false);
        }
        let Some(initiator) = pfacts.find_pod_to_run_admin_cmd().map(PodFact::target) else {
            return Ok(false);
        };
        info!(vdb = %vdb.name_any(), nodes = nodes.len(), "Restarting nodes before sandboxing");
        self.ctx
            .dispatcher
            .restart_nodes(vdb, &initiator, &nodes, None)
            .await?;
        pfacts.invalidate();
        pfacts.collect(vdb).await?;
        Ok(pfacts.detail.values().filter(is_member).all(|pf| pf.up_node))
    }
}

#[async_trait]
impl Actor for SandboxSubclusterReconciler {
    fn name(&self) -> &'static str {
        "sandbox_subcluster"
    }

    async fn reconcile(
        &mut self,
        vdb: &mut VerticaDB,
        pfacts: &mut PodFacts,
    ) -> Result<ReconcileResult> {
        let sandboxes = vdb.spec.sandboxes.clone();
        for sb in &sandboxes {
            let realized: Vec<String> = vdb
                .get_sandbox_status(&sb.name)
                .map(|st| st.subclusters.clone())
                .unwrap_or_default();
            let pending: Vec<String> = sb
                .subclusters
                .iter()
                .map(|s| s.name.clone())
                .filter(|name| !realized.contains(name))
                .collect();
            if pending.is_empty() {
                continue;
            }
            let in_db = vdb.status_subcluster_names();
            if let Some(missing) = pending.iter().find(|name| !in_db.contains(&name.as_str())) {
                debug!(sandbox = %sb.name, subcluster = %missing, "Subcluster not in database yet, requeueing");
                return Ok(ReconcileResult::requeue());
            }

            pfacts.collect(vdb).await?;
            if !self.ensure_members_up(vdb, pfacts, &pending).await? {
                info!(sandbox = %sb.name, "Waiting for subclusters to come up before sandboxing");
                return Ok(ReconcileResult::requeue());
            }
            let Some(initiator) = pfacts
                .detail
                .values()
                .find(|pf| pf.up_node && !pending.contains(&pf.subcluster))
                .map(PodFact::target)
            else {
                info!(sandbox = %sb.name, "No up pod outside the sandbox, requeueing");
                return Ok(ReconcileResult::requeue());
            };

            for member in &pending {
                info!(sandbox = %sb.name, subcluster = %member, "Sandboxing subcluster");
                if let Err(e) = self
                    .ctx
                    .dispatcher
                    .sandbox_subcluster(vdb, &initiator, &sb.name, member)
                    .await
                {
                    self.ctx
                        .publish_warning_event(
                            vdb,
                            EVENT_SANDBOX_SUBCLUSTER_FAILED,
                            &format!("Failed to add subcluster '{member}' to sandbox '{}': {e}", sb.name),
                        )
                        .await;
                    return Err(e);
                }
                self.ctx
                    .publish_normal_event(
                        vdb,
                        EVENT_SUBCLUSTER_SANDBOXED,
                        &format!("Subcluster '{member}' was added to sandbox '{}'", sb.name),
                    )
                    .await;
                update_vdb_status_with_retry(self.ctx.client.as_ref(), vdb, |latest| {
                    let status = latest.status.get_or_insert_with(Default::default);
                    let entry = match status.sandboxes.iter().position(|s| s.name == sb.name) {
                        Some(i) => &mut status.sandboxes[i],
                        None => {
                            status.sandboxes.push(SandboxStatus {
                                name: sb.name.clone(),
                                subclusters: Vec::new(),
                            });
                            let last = status.sandboxes.len() - 1;
                            &mut status.sandboxes[last]
                        }
                    };
                    if entry.subclusters.contains(member) {
                        return Ok(false);
                    }
                    entry.subclusters.push(member.clone());
                    Ok(true)
                })
                .await?;
            }
            pfacts.invalidate();
        }
        Ok(ReconcileResult::done())
    }
}

/// Brings realized sandboxes onto the image their spec names.
///
/// A sandbox still running an old image is stopped, its statefulsets are
/// reimaged, pods with the old image are deleted and the nodes are restarted.
pub struct SandboxUpgradeReconciler {
    ctx: Arc<Context>,
    /// Only upgrade this sandbox. `None` means every sandbox.
    only: Option<String>,
}

impl SandboxUpgradeReconciler {
    #[must_use]
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx, only: None }
    }

    #[must_use]
    pub fn for_sandbox(ctx: Arc<Context>, sandbox: &str) -> Self {
        Self {
            ctx,
            only: Some(sandbox.to_string()),
        }
    }

    async fn upgrade_sandbox(
        &self,
        vdb: &mut VerticaDB,
        sbfacts: &mut PodFacts,
        sandbox: &str,
        image: &str,
    ) -> Result<ReconcileResult> {
        let helper = UpgradeManager::new(self.ctx.clone(), UpgradeStyle::Online);
        sbfacts.collect(vdb).await?;

        if sbfacts.any_up_pod_with_old_image(image) {
            if let Some(initiator) = sbfacts.find_first_up_pod(true, None).map(PodFact::target) {
                info!(sandbox, image, "Stopping sandbox to change its image");
                self.ctx
                    .dispatcher
                    .stop_db(
                        vdb,
                        &initiator,
                        &StopDbOptions {
                            sandbox: Some(sandbox.to_string()),
                        },
                    )
                    .await?;
                sbfacts.invalidate();
            }
        }

        let members: Vec<&Subcluster> = vdb
            .spec
            .subclusters
            .iter()
            .filter(|sc| vdb.realized_sandbox_of(&sc.name) == Some(sandbox))
            .collect();
        if helper.update_image_in_statefulsets(vdb, &members, image).await? > 0 {
            sbfacts.invalidate();
        }

        sbfacts.collect(vdb).await?;
        if helper
            .delete_pods_running_old_image(vdb, sbfacts, image, None)
            .await?
            > 0
        {
            sbfacts.invalidate();
        }

        RestartReconciler::new(self.ctx.clone())
            .reconcile(vdb, sbfacts)
            .await
    }
}

#[async_trait]
impl Actor for SandboxUpgradeReconciler {
    fn name(&self) -> &'static str {
        "sandbox_upgrade"
    }

    async fn reconcile(
        &mut self,
        vdb: &mut VerticaDB,
        pfacts: &mut PodFacts,
    ) -> Result<ReconcileResult> {
        let sandboxes: Vec<(String, String)> = vdb
            .spec
            .sandboxes
            .iter()
            .filter(|sb| self.only.as_ref().is_none_or(|only| *only == sb.name))
            .filter(|sb| vdb.get_sandbox_status(&sb.name).is_some())
            .map(|sb| {
                let image = if sb.image.is_empty() {
                    vdb.spec.image.clone()
                } else {
                    sb.image.clone()
                };
                (sb.name.clone(), image)
            })
            .collect();

        for (name, image) in sandboxes {
            let mut sbfacts = pfacts.for_sandbox(&name);
            let res = self.upgrade_sandbox(vdb, &mut sbfacts, &name, &image).await?;
            if res.is_requeue() {
                return Ok(res);
            }
        }
        Ok(ReconcileResult::done())
    }
}

#[cfg(test)]
#[path = "sandbox_tests.rs"]
mod sandbox_tests;
