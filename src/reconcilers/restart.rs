// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Restart database nodes whose pod is running but whose node is down.

use super::{Actor, ReconcileResult};
use crate::context::Context;
use crate::crd::VerticaDB;
use crate::dispatcher::PodTarget;
use crate::podfacts::{PodFact, PodFacts};
use anyhow::Result;
use async_trait::async_trait;
use kube::ResourceExt;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Restarts down nodes of the segment `pfacts` describes.
///
/// Subclusters that are not in the database yet or are meant to stay shut down
/// are left alone. Pods that exist but are not running yet cause a requeue, so
/// the caller waits until the whole segment can be brought up.
pub struct RestartReconciler {
    ctx: Arc<Context>,
}

impl RestartReconciler {
    #[must_use]
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }
}

fn managed_subclusters(vdb: &VerticaDB) -> BTreeSet<String> {
    let in_db: BTreeSet<&str> = vdb.status_subcluster_names().into_iter().collect();
    vdb.spec
        .subclusters
        .iter()
        .filter(|sc| !sc.shutdown && in_db.contains(sc.name.as_str()))
        .map(|sc| sc.name.clone())
        .collect()
}

#[async_trait]
impl Actor for RestartReconciler {
    fn name(&self) -> &'static str {
        "restart"
    }

    async fn reconcile(
        &mut self,
        vdb: &mut VerticaDB,
        pfacts: &mut PodFacts,
    ) -> Result<ReconcileResult> {
        pfacts.collect(vdb).await?;
        let managed = managed_subclusters(vdb);
        let in_scope = |pf: &&PodFact| managed.contains(&pf.subcluster);

        let nodes: Vec<PodTarget> = pfacts
            .find_restartable_pods()
            .into_iter()
            .filter(in_scope)
            .map(PodFact::target)
            .collect();
        if !nodes.is_empty() {
            let Some(initiator) = pfacts.find_pod_to_run_admin_cmd().map(PodFact::target) else {
                info!(vdb = %vdb.name_any(), "No pod available to restart nodes from, requeueing");
                return Ok(ReconcileResult::requeue());
            };
            info!(
                vdb = %vdb.name_any(),
                sandbox = ?pfacts.sandbox(),
                nodes = nodes.len(),
                "Restarting down nodes"
            );
            self.ctx
                .dispatcher
                .restart_nodes(vdb, &initiator, &nodes, pfacts.sandbox())
                .await?;
            pfacts.invalidate();
        }

        let pending = pfacts
            .detail
            .values()
            .filter(in_scope)
            .any(|pf| !pf.is_running);
        if pending {
            debug!(vdb = %vdb.name_any(), "Some pods are not running yet, requeueing");
            return Ok(ReconcileResult::requeue());
        }
        Ok(ReconcileResult::done())
    }
}

#[cfg(test)]
#[path = "restart_tests.rs"]
mod restart_tests;
