// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Reconciliation logic for `VerticaDB` resources.
//!
//! A reconcile pass runs a fixed chain of [`Actor`]s against one `VerticaDB`.
//! Each actor compares desired state (spec) with realized state (status and pod
//! facts), performs at most a bounded amount of work, and returns a
//! [`ReconcileResult`]. The chain stops at the first actor that asks for a
//! requeue or fails; see [`is_reconcile_aborted`].
//!
//! # Available actors
//!
//! ## Upgrades
//!
//! - [`upgrade::offline::OfflineUpgradeReconciler`] - shutdown, reimage, restart
//! - [`upgrade::online::OnlineUpgradeReconciler`] - replica-group based upgrade without downtime
//!
//! ## Topology
//!
//! - [`objects::ObjectReconciler`] - statefulsets and services per subcluster
//! - [`restart::RestartReconciler`] - restart down nodes
//! - [`membership::AddSubclusterReconciler`], [`membership::AddNodeReconciler`],
//!   [`membership::RemoveSubclusterReconciler`] - database membership
//! - [`sandbox::SandboxSubclusterReconciler`], [`sandbox::SandboxUpgradeReconciler`]
//! - [`subcluster_shutdown::SubclusterShutdownReconciler`] - quorum-gated shutdown
//! - [`client_routing::ClientRoutingReconciler`] - client-routing pod labels
//! - [`cert_rotation::NmaCertRotationReconciler`] - NMA TLS secret rotation
//!
//! [`verticadb::reconcile_verticadb`] drives the chain.

pub mod cert_rotation;
pub mod client_routing;
pub mod membership;
pub mod objects;
pub mod restart;
pub mod retry;
pub mod sandbox;
pub mod status;
pub mod subcluster_shutdown;
pub mod upgrade;
pub mod verticadb;

use crate::crd::VerticaDB;
use crate::podfacts::PodFacts;
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

pub use verticadb::reconcile_verticadb;

/// Outcome of one actor or step.
///
/// `requeue` asks to run again after the caller's fixed polling interval.
/// `requeue_after` asks to run again after a specific delay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileResult {
    pub requeue: bool,
    pub requeue_after: Option<Duration>,
}

impl ReconcileResult {
    /// Nothing left to do in this pass.
    #[must_use]
    pub fn done() -> Self {
        Self::default()
    }

    /// Come back after the fixed polling interval.
    #[must_use]
    pub fn requeue() -> Self {
        Self {
            requeue: true,
            requeue_after: None,
        }
    }

    #[must_use]
    pub fn requeue_after(after: Duration) -> Self {
        Self {
            requeue: false,
            requeue_after: Some(after),
        }
    }

    #[must_use]
    pub fn is_requeue(&self) -> bool {
        self.requeue || self.requeue_after.is_some()
    }
}

/// True when the surrounding sequence must stop: an error, or a requeue request.
#[must_use]
pub fn is_reconcile_aborted(result: &Result<ReconcileResult>) -> bool {
    match result {
        Ok(res) => res.is_requeue(),
        Err(_) => true,
    }
}

/// One link of the reconcile chain.
#[async_trait]
pub trait Actor: Send {
    /// Short name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Drive `vdb` one step closer to its spec.
    ///
    /// `vdb` is updated in place whenever the actor persists a change, so later
    /// actors see the latest resource version.
    async fn reconcile(
        &mut self,
        vdb: &mut VerticaDB,
        pfacts: &mut PodFacts,
    ) -> Result<ReconcileResult>;
}

/// Whether the spec changed since the controller last recorded `observed_generation`.
#[must_use]
pub fn should_reconcile(current_generation: Option<i64>, observed_generation: Option<i64>) -> bool {
    match (current_generation, observed_generation) {
        (Some(current), Some(observed)) => current != observed,
        (Some(_), None) => true,
        _ => false,
    }
}
