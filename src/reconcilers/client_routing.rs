// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Client-routing labels and service redirection.
//!
//! External services select pods carrying `vertica.com/client-routing=true`.
//! Adding the label to a pod lets it receive client connections, removing it
//! drains the pod of new ones. [`redirect_service`] points a subcluster's service
//! at the pods of another service name.

use super::{Actor, ReconcileResult};
use crate::cluster::ClusterClient;
use crate::context::{vdb_namespace, Context};
use crate::crd::{Subcluster, VerticaDB};
use crate::labels::{CLIENT_ROUTING, CLIENT_ROUTING_TRUE, SUBCLUSTER_SVC_NAME};
use crate::podfacts::PodFacts;
use crate::reconcilers::objects::build_service;
use crate::status_reasons::CONDITION_UPGRADE_IN_PROGRESS;
use anyhow::Result;
use async_trait::async_trait;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Whether the label is added or removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoutingMode {
    /// Label up pods so they receive client traffic.
    Add,
    /// Remove the label so no new client traffic arrives.
    Drain,
}

/// Adds or removes the client-routing label on pods.
pub struct ClientRoutingReconciler {
    ctx: Arc<Context>,
    mode: RoutingMode,
    /// Limit to these subclusters. `None` means every pod of the segment.
    subclusters: Option<Vec<String>>,
}

impl ClientRoutingReconciler {
    #[must_use]
    pub fn new(ctx: Arc<Context>, mode: RoutingMode) -> Self {
        Self {
            ctx,
            mode,
            subclusters: None,
        }
    }

    #[must_use]
    pub fn for_subclusters(ctx: Arc<Context>, mode: RoutingMode, subclusters: Vec<String>) -> Self {
        Self {
            ctx,
            mode,
            subclusters: Some(subclusters),
        }
    }

    fn selects(&self, subcluster: &str) -> bool {
        self.subclusters
            .as_ref()
            .is_none_or(|names| names.iter().any(|n| n == subcluster))
    }
}

#[async_trait]
impl Actor for ClientRoutingReconciler {
    fn name(&self) -> &'static str {
        match self.mode {
            RoutingMode::Add => "client_routing_add",
            RoutingMode::Drain => "client_routing_drain",
        }
    }

    async fn reconcile(
        &mut self,
        vdb: &mut VerticaDB,
        pfacts: &mut PodFacts,
    ) -> Result<ReconcileResult> {
        // Upgrades decide for themselves which pods take traffic.
        if self.mode == RoutingMode::Add
            && self.subclusters.is_none()
            && vdb.is_condition_true(CONDITION_UPGRADE_IN_PROGRESS)
        {
            debug!(vdb = %vdb.name_any(), "Upgrade in progress, leaving client routing alone");
            return Ok(ReconcileResult::done());
        }

        pfacts.collect(vdb).await?;
        let namespace = vdb_namespace(vdb)?;
        let targets: Vec<String> = pfacts
            .detail
            .values()
            .filter(|pf| self.selects(&pf.subcluster))
            .filter(|pf| match self.mode {
                RoutingMode::Add => pf.up_node && !pf.has_client_routing_label,
                RoutingMode::Drain => pf.exists && pf.has_client_routing_label,
            })
            .map(|pf| pf.name.clone())
            .collect();

        let value = match self.mode {
            RoutingMode::Add => Some(CLIENT_ROUTING_TRUE.to_string()),
            RoutingMode::Drain => None,
        };
        let patch = BTreeMap::from([(CLIENT_ROUTING.to_string(), value)]);
        for pod in targets {
            info!(pod = %pod, mode = ?self.mode, "Updating client routing label");
            self.ctx
                .client
                .patch_pod_labels(&namespace, &pod, &patch)
                .await?;
            if let Some(pf) = pfacts.detail.get_mut(&pod) {
                pf.has_client_routing_label = self.mode == RoutingMode::Add;
            }
        }
        Ok(ReconcileResult::done())
    }
}

/// Point the external service of `source` at the pods of `target_service_name`.
///
/// Returns whether the service changed. A service that does not exist is left
/// for the object reconciler.
///
/// # Errors
///
/// Returns an error if the service cannot be read or applied.
pub async fn redirect_service(
    client: &dyn ClusterClient,
    vdb: &VerticaDB,
    source: &Subcluster,
    target_service_name: &str,
) -> Result<bool> {
    let namespace = vdb_namespace(vdb)?;
    let svc_name = source.service_object_name(&vdb.name_any());
    let Some(existing) = client.get_service(&namespace, &svc_name).await? else {
        debug!(service = %svc_name, "Service not found, skipping redirect");
        return Ok(false);
    };
    let current = existing
        .spec
        .as_ref()
        .and_then(|s| s.selector.as_ref())
        .and_then(|sel| sel.get(SUBCLUSTER_SVC_NAME))
        .cloned();
    if current.as_deref() == Some(target_service_name) {
        return Ok(false);
    }
    info!(
        service = %svc_name,
        from = ?current,
        to = target_service_name,
        "Redirecting service"
    );
    client
        .apply_service(&build_service(vdb, source, &namespace, target_service_name))
        .await?;
    Ok(true)
}

#[cfg(test)]
#[path = "client_routing_tests.rs"]
mod client_routing_tests;
