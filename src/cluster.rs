// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Access to the persisted `VerticaDB` and the workloads backing it.
//!
//! [`ClusterClient`] is the seam between reconcilers and the Kubernetes API.
//! [`KubeClusterClient`] implements it with `kube::Api`; tests substitute an
//! in-memory implementation.
//!
//! Spec updates use `replace`, so the `resourceVersion` carried by the object
//! guards against lost updates. Status updates are merge patches that include
//! `metadata.resourceVersion` for the same reason. Conflicts surface as HTTP 409
//! errors; see [`crate::errors::is_conflict`].

use crate::constants::OPERATOR_NAME;
use crate::crd::{VerticaDB, VerticaReplicator};
use crate::reconcilers::retry::retry_api_call;
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource, ResourceExt};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Kubernetes operations the reconcilers depend on. All objects are namespaced.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn get_vdb(&self, namespace: &str, name: &str) -> Result<VerticaDB>;

    /// Replace the spec and metadata. Fails with 409 if `vdb` is stale.
    async fn update_vdb(&self, vdb: &VerticaDB) -> Result<VerticaDB>;

    /// Write `vdb.status`. Fails with 409 if `vdb` is stale.
    async fn update_vdb_status(&self, vdb: &VerticaDB) -> Result<VerticaDB>;

    async fn get_statefulset(&self, namespace: &str, name: &str) -> Result<Option<StatefulSet>>;
    async fn list_statefulsets(&self, namespace: &str, selector: &str)
        -> Result<Vec<StatefulSet>>;
    async fn apply_statefulset(&self, sts: &StatefulSet) -> Result<()>;
    async fn delete_statefulset(&self, namespace: &str, name: &str) -> Result<()>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>>;
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;

    /// Merge labels into a pod. A `None` value removes the label.
    async fn patch_pod_labels(
        &self,
        namespace: &str,
        name: &str,
        labels: &BTreeMap<String, Option<String>>,
    ) -> Result<()>;

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>>;
    async fn list_services(&self, namespace: &str, selector: &str) -> Result<Vec<Service>>;
    async fn apply_service(&self, svc: &Service) -> Result<()>;
    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()>;

    /// Create a replicator. The returned object carries the server-assigned name.
    async fn create_replicator(&self, vrep: &VerticaReplicator) -> Result<VerticaReplicator>;
    async fn get_replicator(&self, namespace: &str, name: &str)
        -> Result<Option<VerticaReplicator>>;
    async fn delete_replicator(&self, namespace: &str, name: &str) -> Result<()>;

    /// Publish an event on `vdb`. Failures are logged, never returned.
    async fn publish_event(&self, vdb: &VerticaDB, type_: EventType, reason: &str, note: &str);
}

/// [`ClusterClient`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
    reporter: Reporter,
}

impl KubeClusterClient {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: OPERATOR_NAME.into(),
                instance: std::env::var("POD_NAME").ok(),
            },
        }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn namespace_of<K: Resource>(obj: &K) -> Result<String> {
    obj.meta()
        .namespace
        .clone()
        .with_context(|| format!("object '{}' has no namespace", obj.name_any()))
}

async fn delete_ignoring_missing<K>(api: &Api<K>, name: &str, kind: &str) -> Result<()>
where
    K: Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => {
            debug!(kind, name, "Deleted object");
            Ok(())
        }
        Err(kube::Error::Api(err)) if err.code == 404 => Ok(()),
        Err(e) => Err(e).with_context(|| format!("delete {kind} {name}")),
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get_vdb(&self, namespace: &str, name: &str) -> Result<VerticaDB> {
        let api: Api<VerticaDB> = self.api(namespace);
        retry_api_call(|| api.get(name), &format!("get VerticaDB {namespace}/{name}")).await
    }

    async fn update_vdb(&self, vdb: &VerticaDB) -> Result<VerticaDB> {
        let namespace = namespace_of(vdb)?;
        let api: Api<VerticaDB> = self.api(&namespace);
        let name = vdb.name_any();
        let pp = PostParams::default();
        retry_api_call(
            || api.replace(&name, &pp, vdb),
            &format!("replace VerticaDB {namespace}/{name}"),
        )
        .await
    }

    async fn update_vdb_status(&self, vdb: &VerticaDB) -> Result<VerticaDB> {
        let namespace = namespace_of(vdb)?;
        let api: Api<VerticaDB> = self.api(&namespace);
        let name = vdb.name_any();
        let body = json!({
            "metadata": { "resourceVersion": vdb.resource_version() },
            "status": vdb.status,
        });
        let params = PatchParams::default();
        let patch = Patch::Merge(&body);
        retry_api_call(
            || api.patch_status(&name, &params, &patch),
            &format!("patch VerticaDB status {namespace}/{name}"),
        )
        .await
    }

    async fn get_statefulset(&self, namespace: &str, name: &str) -> Result<Option<StatefulSet>> {
        let api: Api<StatefulSet> = self.api(namespace);
        retry_api_call(|| api.get_opt(name), &format!("get StatefulSet {name}")).await
    }

    async fn list_statefulsets(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<StatefulSet>> {
        let api: Api<StatefulSet> = self.api(namespace);
        let lp = ListParams::default().labels(selector);
        let list = retry_api_call(|| api.list(&lp), "list StatefulSets").await?;
        Ok(list.items)
    }

    async fn apply_statefulset(&self, sts: &StatefulSet) -> Result<()> {
        let namespace = namespace_of(sts)?;
        let api: Api<StatefulSet> = self.api(&namespace);
        let name = sts.name_any();
        let params = PatchParams::apply(OPERATOR_NAME).force();
        let patch = Patch::Apply(sts);
        retry_api_call(
            || api.patch(&name, &params, &patch),
            &format!("apply StatefulSet {name}"),
        )
        .await?;
        Ok(())
    }

    async fn delete_statefulset(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<StatefulSet> = self.api(namespace);
        delete_ignoring_missing(&api, name, "StatefulSet").await
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        let api: Api<Pod> = self.api(namespace);
        retry_api_call(|| api.get_opt(name), &format!("get Pod {name}")).await
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Pod> = self.api(namespace);
        delete_ignoring_missing(&api, name, "Pod").await
    }

    async fn patch_pod_labels(
        &self,
        namespace: &str,
        name: &str,
        labels: &BTreeMap<String, Option<String>>,
    ) -> Result<()> {
        let api: Api<Pod> = self.api(namespace);
        let body = json!({ "metadata": { "labels": labels } });
        let params = PatchParams::default();
        let patch = Patch::Merge(&body);
        retry_api_call(
            || api.patch(name, &params, &patch),
            &format!("patch labels of Pod {name}"),
        )
        .await?;
        Ok(())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        let api: Api<Service> = self.api(namespace);
        retry_api_call(|| api.get_opt(name), &format!("get Service {name}")).await
    }

    async fn list_services(&self, namespace: &str, selector: &str) -> Result<Vec<Service>> {
        let api: Api<Service> = self.api(namespace);
        let lp = ListParams::default().labels(selector);
        let list = retry_api_call(|| api.list(&lp), "list Services").await?;
        Ok(list.items)
    }

    async fn apply_service(&self, svc: &Service) -> Result<()> {
        let namespace = namespace_of(svc)?;
        let api: Api<Service> = self.api(&namespace);
        let name = svc.name_any();
        let params = PatchParams::apply(OPERATOR_NAME).force();
        let patch = Patch::Apply(svc);
        retry_api_call(
            || api.patch(&name, &params, &patch),
            &format!("apply Service {name}"),
        )
        .await?;
        Ok(())
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Service> = self.api(namespace);
        delete_ignoring_missing(&api, name, "Service").await
    }

    async fn create_replicator(&self, vrep: &VerticaReplicator) -> Result<VerticaReplicator> {
        let namespace = namespace_of(vrep)?;
        let api: Api<VerticaReplicator> = self.api(&namespace);
        let pp = PostParams::default();
        retry_api_call(
            || api.create(&pp, vrep),
            "create VerticaReplicator",
        )
        .await
    }

    async fn get_replicator(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VerticaReplicator>> {
        let api: Api<VerticaReplicator> = self.api(namespace);
        retry_api_call(
            || api.get_opt(name),
            &format!("get VerticaReplicator {name}"),
        )
        .await
    }

    async fn delete_replicator(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<VerticaReplicator> = self.api(namespace);
        delete_ignoring_missing(&api, name, "VerticaReplicator").await
    }

    async fn publish_event(&self, vdb: &VerticaDB, type_: EventType, reason: &str, note: &str) {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone());
        let object_ref = vdb.object_ref(&());
        if let Err(e) = recorder
            .publish(
                &Event {
                    type_,
                    reason: reason.into(),
                    note: Some(note.into()),
                    action: reason.into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            warn!(reason = %reason, error = %e, "Failed to publish event");
        }
    }
}
