// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Database membership of subclusters and nodes.
//!
//! Kubernetes objects existing for a subcluster does not make it part of the
//! database. These actors close the gap in both directions:
//!
//! - [`AddSubclusterReconciler`] adds spec subclusters the database lacks
//! - [`AddNodeReconciler`] adds pods whose node was never created, then rebalances shards
//! - [`RemoveSubclusterReconciler`] removes subclusters that left the spec
//!
//! `status.subclusters` records what the database contains.

use super::retry::update_vdb_status_with_retry;
use super::{Actor, ReconcileResult};
use crate::context::Context;
use crate::crd::{SubclusterStatus, SubclusterType, VerticaDB};
use crate::dispatcher::PodTarget;
use crate::podfacts::PodFacts;
use crate::status_reasons::{EVENT_REMOVE_SUBCLUSTER_FAILED, EVENT_SUBCLUSTER_REMOVED};
use anyhow::Result;
use async_trait::async_trait;
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

fn status_names(vdb: &VerticaDB) -> BTreeSet<String> {
    vdb.status_subcluster_names()
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Adds main-cluster spec subclusters that are missing from the database.
pub struct AddSubclusterReconciler {
    ctx: Arc<Context>,
}

impl AddSubclusterReconciler {
    #[must_use]
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Actor for AddSubclusterReconciler {
    fn name(&self) -> &'static str {
        "add_subcluster"
    }

    async fn reconcile(
        &mut self,
        vdb: &mut VerticaDB,
        pfacts: &mut PodFacts,
    ) -> Result<ReconcileResult> {
        let in_db = status_names(vdb);
        if in_db.is_empty() {
            debug!(vdb = %vdb.name_any(), "Database has no subclusters yet, nothing to add to");
            return Ok(ReconcileResult::done());
        }
        let missing: Vec<(String, SubclusterType)> = vdb
            .spec
            .subclusters
            .iter()
            .filter(|sc| !in_db.contains(&sc.name) && vdb.desired_sandbox_of(&sc.name).is_none())
            .map(|sc| (sc.name.clone(), sc.r#type))
            .collect();
        if missing.is_empty() {
            return Ok(ReconcileResult::done());
        }

        pfacts.collect(vdb).await?;
        let Some(initiator) = pfacts.find_first_up_pod(false, None).map(|pf| pf.target()) else {
            info!(vdb = %vdb.name_any(), "No up pod to add subclusters from, requeueing");
            return Ok(ReconcileResult::requeue());
        };

        for (name, subcluster_type) in missing {
            info!(subcluster = %name, r#type = subcluster_type.as_str(), "Adding subcluster to database");
            self.ctx
                .dispatcher
                .add_subcluster(vdb, &initiator, &name, subcluster_type)
                .await?;
            update_vdb_status_with_retry(self.ctx.client.as_ref(), vdb, |latest| {
                let status = latest.status.get_or_insert_with(Default::default);
                if status.subclusters.iter().any(|s| s.name == name) {
                    return Ok(false);
                }
                status.subclusters.push(SubclusterStatus {
                    name: name.clone(),
                    added_to_db: true,
                    up_node_count: 0,
                });
                Ok(true)
            })
            .await?;
        }
        pfacts.invalidate();
        Ok(ReconcileResult::done())
    }
}

/// Creates database nodes for running pods whose node does not exist yet.
pub struct AddNodeReconciler {
    ctx: Arc<Context>,
}

impl AddNodeReconciler {
    #[must_use]
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Actor for AddNodeReconciler {
    fn name(&self) -> &'static str {
        "add_node"
    }

    async fn reconcile(
        &mut self,
        vdb: &mut VerticaDB,
        pfacts: &mut PodFacts,
    ) -> Result<ReconcileResult> {
        pfacts.collect(vdb).await?;
        let in_db = status_names(vdb);
        let mut by_subcluster: BTreeMap<String, Vec<PodTarget>> = BTreeMap::new();
        for pf in pfacts.find_pods_to_add_to_db() {
            if in_db.contains(&pf.subcluster) {
                by_subcluster
                    .entry(pf.subcluster.clone())
                    .or_default()
                    .push(pf.target());
            }
        }
        if by_subcluster.is_empty() {
            return Ok(ReconcileResult::done());
        }

        let Some(initiator) = pfacts.find_first_up_pod(false, None).map(|pf| pf.target()) else {
            info!(vdb = %vdb.name_any(), "No up pod to add nodes from, requeueing");
            return Ok(ReconcileResult::requeue());
        };
        for (subcluster, nodes) in &by_subcluster {
            info!(subcluster = %subcluster, nodes = nodes.len(), "Adding nodes to database");
            self.ctx
                .dispatcher
                .add_node(vdb, &initiator, subcluster, nodes)
                .await?;
            self.ctx
                .dispatcher
                .rebalance_shards(vdb, &initiator, subcluster)
                .await?;
        }
        pfacts.invalidate();
        Ok(ReconcileResult::done())
    }
}

/// Removes subclusters from the database once they are gone from the spec.
pub struct RemoveSubclusterReconciler {
    ctx: Arc<Context>,
}

impl RemoveSubclusterReconciler {
    #[must_use]
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Actor for RemoveSubclusterReconciler {
    fn name(&self) -> &'static str {
        "remove_subcluster"
    }

    async fn reconcile(
        &mut self,
        vdb: &mut VerticaDB,
        pfacts: &mut PodFacts,
    ) -> Result<ReconcileResult> {
        let to_remove: Vec<String> = vdb
            .status_subcluster_names()
            .into_iter()
            .filter(|name| vdb.find_subcluster(name).is_none() && vdb.realized_sandbox_of(name).is_none())
            .map(str::to_string)
            .collect();
        if to_remove.is_empty() {
            return Ok(ReconcileResult::done());
        }

        pfacts.collect(vdb).await?;
        let Some(initiator) = pfacts
            .detail
            .values()
            .find(|pf| pf.up_node && !pf.read_only && !to_remove.contains(&pf.subcluster))
            .map(|pf| pf.target())
        else {
            info!(vdb = %vdb.name_any(), "No up pod outside the removed subclusters, requeueing");
            return Ok(ReconcileResult::requeue());
        };

        for name in &to_remove {
            info!(subcluster = %name, "Removing subcluster from database");
            if let Err(e) = self
                .ctx
                .dispatcher
                .remove_subcluster(vdb, &initiator, name)
                .await
            {
                self.ctx
                    .publish_warning_event(
                        vdb,
                        EVENT_REMOVE_SUBCLUSTER_FAILED,
                        &format!("Failed to remove subcluster '{name}': {e}"),
                    )
                    .await;
                return Err(e);
            }
            self.ctx
                .publish_normal_event(
                    vdb,
                    EVENT_SUBCLUSTER_REMOVED,
                    &format!("Subcluster '{name}' was removed from the database"),
                )
                .await;
            update_vdb_status_with_retry(self.ctx.client.as_ref(), vdb, |latest| {
                Ok(latest.status.as_mut().is_some_and(|st| {
                    let before = st.subclusters.len();
                    st.subclusters.retain(|s| s.name != *name);
                    before != st.subclusters.len()
                }))
            })
            .await?;
        }
        pfacts.invalidate();
        Ok(ReconcileResult::done())
    }
}

#[cfg(test)]
#[path = "membership_tests.rs"]
mod membership_tests;
