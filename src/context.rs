// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared context for the `VerticaDB` controller.
//!
//! Every reconcile receives an `Arc<Context>` that contains:
//! - the [`ClusterClient`] for the persisted resources and their workloads
//! - the [`PodRunner`] used by fact collection and session queries
//! - the [`Dispatcher`] for administrative commands
//! - controller settings taken from the command line

use crate::cluster::{ClusterClient, KubeClusterClient};
use crate::constants::DEFAULT_REQUEUE_SECS;
use crate::crd::VerticaDB;
use crate::dispatcher::{Dispatcher, VclusterDispatcher};
use crate::errors::OperatorError;
use crate::pod_runner::{KubePodRunner, PodRunner};
use kube::runtime::events::EventType;
use kube::{Client, ResourceExt};
use std::sync::Arc;
use std::time::Duration;

/// Controller-wide settings.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Requeue interval once a `VerticaDB` is in steady state
    pub requeue_after: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            requeue_after: Duration::from_secs(DEFAULT_REQUEUE_SECS),
        }
    }
}

/// Shared context passed to the controller.
#[derive(Clone)]
pub struct Context {
    /// Persisted resources and workloads
    pub client: Arc<dyn ClusterClient>,

    /// Command execution inside pods
    pub runner: Arc<dyn PodRunner>,

    /// Administrative commands against the database
    pub dispatcher: Arc<dyn Dispatcher>,

    pub settings: Settings,
}

impl Context {
    /// Build a context backed by the Kubernetes API.
    #[must_use]
    pub fn new(client: Client, settings: Settings) -> Self {
        let runner: Arc<dyn PodRunner> = Arc::new(KubePodRunner::new(client.clone()));
        Self {
            client: Arc::new(KubeClusterClient::new(client)),
            dispatcher: Arc::new(VclusterDispatcher::new(runner.clone())),
            runner,
            settings,
        }
    }

    /// Publish a normal event on `vdb`.
    pub async fn publish_normal_event(&self, vdb: &VerticaDB, reason: &str, note: &str) {
        self.client
            .publish_event(vdb, EventType::Normal, reason, note)
            .await;
    }

    /// Publish a warning event on `vdb`.
    pub async fn publish_warning_event(&self, vdb: &VerticaDB, reason: &str, note: &str) {
        self.client
            .publish_event(vdb, EventType::Warning, reason, note)
            .await;
    }
}

/// Namespace of `vdb`.
///
/// # Errors
///
/// Returns [`OperatorError::NamespaceMissing`] for an object without namespace.
pub fn vdb_namespace(vdb: &VerticaDB) -> Result<String, OperatorError> {
    vdb.namespace().ok_or_else(|| OperatorError::NamespaceMissing {
        kind: "VerticaDB".to_string(),
        name: vdb.name_any(),
    })
}
