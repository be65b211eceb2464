// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Top-level `VerticaDB` reconcile: the actor chain and its outcome.

use super::cert_rotation::NmaCertRotationReconciler;
use super::client_routing::{ClientRoutingReconciler, RoutingMode};
use super::membership::{AddNodeReconciler, AddSubclusterReconciler, RemoveSubclusterReconciler};
use super::objects::ObjectReconciler;
use super::restart::RestartReconciler;
use super::retry::update_vdb_status_with_retry;
use super::sandbox::{SandboxSubclusterReconciler, SandboxUpgradeReconciler};
use super::subcluster_shutdown::SubclusterShutdownReconciler;
use super::upgrade::offline::OfflineUpgradeReconciler;
use super::upgrade::online::OnlineUpgradeReconciler;
use super::{is_reconcile_aborted, should_reconcile, Actor, ReconcileResult};
use crate::constants::KIND_VERTICA_DB;
use crate::context::{vdb_namespace, Context};
use crate::crd::VerticaDB;
use crate::errors::{is_conflict, is_not_found, OperatorError};
use crate::metrics;
use crate::podfacts::PodFacts;
use anyhow::Result;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// The actors of one pass, in the order they run.
#[must_use]
pub fn build_actors(ctx: &Arc<Context>) -> Vec<Box<dyn Actor>> {
    vec![
        Box::new(OfflineUpgradeReconciler::new(ctx.clone())),
        Box::new(OnlineUpgradeReconciler::new(ctx.clone())),
        Box::new(ObjectReconciler::new(ctx.clone())),
        Box::new(RestartReconciler::new(ctx.clone())),
        Box::new(AddSubclusterReconciler::new(ctx.clone())),
        Box::new(AddNodeReconciler::new(ctx.clone())),
        Box::new(SandboxSubclusterReconciler::new(ctx.clone())),
        Box::new(SandboxUpgradeReconciler::new(ctx.clone())),
        Box::new(RemoveSubclusterReconciler::new(ctx.clone())),
        Box::new(SubclusterShutdownReconciler::new(ctx.clone())),
        Box::new(ClientRoutingReconciler::new(ctx.clone(), RoutingMode::Add)),
        Box::new(NmaCertRotationReconciler::new(ctx.clone())),
    ]
}

/// Run every actor against `vdb`, stopping at the first requeue or error.
///
/// # Errors
///
/// Returns the error of the first failing actor.
pub async fn run_actor_chain(ctx: &Arc<Context>, vdb: &mut VerticaDB) -> Result<ReconcileResult> {
    let mut pfacts = PodFacts::new(ctx.client.clone(), ctx.runner.clone(), None);
    for mut actor in build_actors(ctx) {
        debug!(vdb = %vdb.name_any(), actor = actor.name(), "Running actor");
        let res = actor.reconcile(vdb, &mut pfacts).await;
        if is_reconcile_aborted(&res) {
            if let Err(e) = &res {
                error!(vdb = %vdb.name_any(), actor = actor.name(), error = %e, "Actor failed");
            } else {
                info!(vdb = %vdb.name_any(), actor = actor.name(), "Actor requested a requeue");
            }
            return res;
        }
    }
    Ok(ReconcileResult::done())
}

/// Delay before the next pass after a pass that returned `res`.
#[must_use]
pub fn requeue_interval(res: ReconcileResult, vdb: &VerticaDB, steady_state: Duration) -> Duration {
    match res.requeue_after {
        Some(after) => after,
        None if res.requeue => vdb.upgrade_requeue_duration(),
        None => steady_state,
    }
}

/// Metric label for an error that ended a pass.
#[must_use]
pub fn error_category(err: &anyhow::Error) -> &'static str {
    if is_conflict(err) {
        return "conflict";
    }
    if is_not_found(err) {
        return "not_found";
    }
    match err.downcast_ref::<OperatorError>() {
        Some(OperatorError::CommandFailed { .. }) => "command_failed",
        Some(OperatorError::QuorumLoss { .. }) => "quorum_loss",
        Some(_) => "operator",
        None => "other",
    }
}

async fn update_observed_generation(ctx: &Context, vdb: &mut VerticaDB) -> Result<()> {
    let generation = vdb.metadata.generation;
    let observed = vdb.status.as_ref().and_then(|st| st.observed_generation);
    if !should_reconcile(generation, observed) {
        return Ok(());
    }
    update_vdb_status_with_retry(ctx.client.as_ref(), vdb, |latest| {
        let status = latest.status.get_or_insert_with(Default::default);
        if status.observed_generation == generation {
            return Ok(false);
        }
        status.observed_generation = generation;
        Ok(true)
    })
    .await?;
    Ok(())
}

/// Reconcile one `VerticaDB`.
///
/// # Errors
///
/// Returns an error if an actor fails or the status cannot be written.
pub async fn reconcile_verticadb(vdb: Arc<VerticaDB>, ctx: Arc<Context>) -> Result<Action> {
    let start = Instant::now();
    let mut vdb = (*vdb).clone();
    let namespace = vdb_namespace(&vdb)?;
    info!(vdb = %vdb.name_any(), namespace = %namespace, "Reconciling VerticaDB");

    let res = match run_actor_chain(&ctx, &mut vdb).await {
        Ok(res) => res,
        Err(e) => {
            metrics::record_reconciliation_error(KIND_VERTICA_DB, start.elapsed());
            metrics::record_error(KIND_VERTICA_DB, error_category(&e));
            return Err(e);
        }
    };
    update_observed_generation(&ctx, &mut vdb).await?;

    let interval = requeue_interval(res, &vdb, ctx.settings.requeue_after);
    if res.is_requeue() {
        let reason = if res.requeue_after.is_some() {
            "upgrade_poll"
        } else {
            "actor"
        };
        metrics::record_reconciliation_requeue(KIND_VERTICA_DB, reason);
        debug!(vdb = %vdb.name_any(), requeue_secs = interval.as_secs(), "Requeueing VerticaDB");
    } else {
        metrics::record_reconciliation_success(KIND_VERTICA_DB, start.elapsed());
    }
    Ok(Action::requeue(interval))
}

#[cfg(test)]
#[path = "verticadb_tests.rs"]
mod verticadb_tests;
