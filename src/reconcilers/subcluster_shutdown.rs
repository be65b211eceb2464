// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Stop the nodes of subclusters marked `shutdown: true`.
//!
//! Stopping primaries is refused when the primaries left up would no longer
//! form a strict majority of all primaries.

use super::{Actor, ReconcileResult};
use crate::context::Context;
use crate::crd::VerticaDB;
use crate::errors::OperatorError;
use crate::podfacts::{PodFact, PodFacts};
use crate::status_reasons::EVENT_CLUSTER_WILL_LOSE_QUORUM;
use anyhow::Result;
use async_trait::async_trait;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{info, warn};

pub struct SubclusterShutdownReconciler {
    ctx: Arc<Context>,
}

impl SubclusterShutdownReconciler {
    #[must_use]
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Actor for SubclusterShutdownReconciler {
    fn name(&self) -> &'static str {
        "subcluster_shutdown"
    }

    async fn reconcile(
        &mut self,
        vdb: &mut VerticaDB,
        pfacts: &mut PodFacts,
    ) -> Result<ReconcileResult> {
        if !vdb.spec.subclusters.iter().any(|sc| sc.shutdown) {
            return Ok(ReconcileResult::done());
        }
        pfacts.collect(vdb).await?;

        let targets: Vec<(String, bool)> = vdb
            .spec
            .subclusters
            .iter()
            .filter(|sc| sc.shutdown && vdb.realized_sandbox_of(&sc.name).is_none())
            .filter(|sc| pfacts.subcluster_up_node_count(&sc.name) > 0)
            .map(|sc| (sc.name.clone(), sc.is_primary()))
            .collect();
        if targets.is_empty() {
            return Ok(ReconcileResult::done());
        }

        let offset: usize = targets
            .iter()
            .filter(|(_, primary)| *primary)
            .map(|(name, _)| pfacts.subcluster_up_node_count(name))
            .sum();
        if offset > 0 && !pfacts.does_db_have_quorum(offset) {
            let up = pfacts.count_up_primary_nodes();
            let total = pfacts.count_primary_nodes();
            warn!(
                vdb = %vdb.name_any(),
                up_primaries = up,
                stopping = offset,
                total_primaries = total,
                "Refusing subcluster shutdown, cluster would lose quorum"
            );
            self.ctx
                .publish_warning_event(
                    vdb,
                    EVENT_CLUSTER_WILL_LOSE_QUORUM,
                    &format!(
                        "Shutting down the requested subclusters would leave {} of {total} primary nodes up",
                        up.saturating_sub(offset)
                    ),
                )
                .await;
            return Err(OperatorError::QuorumLoss {
                up_after: up.saturating_sub(offset),
                total,
            }
            .into());
        }

        let Some(initiator) = pfacts
            .detail
            .values()
            .find(|pf| pf.up_node && !targets.iter().any(|(name, _)| *name == pf.subcluster))
            .or_else(|| pfacts.find_first_up_pod(true, None))
            .map(PodFact::target)
        else {
            return Ok(ReconcileResult::requeue());
        };

        for (name, _) in &targets {
            info!(vdb = %vdb.name_any(), subcluster = %name, "Stopping subcluster");
            self.ctx
                .dispatcher
                .stop_subcluster(vdb, &initiator, name)
                .await?;
        }
        pfacts.invalidate();
        Ok(ReconcileResult::done())
    }
}

#[cfg(test)]
#[path = "subcluster_shutdown_tests.rs"]
mod subcluster_shutdown_tests;
