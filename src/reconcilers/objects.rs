// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Kubernetes objects backing each subcluster.
//!
//! Every spec subcluster gets a `StatefulSet` and an external `Service`. Objects
//! labelled for the `VerticaDB` whose subcluster left the spec are deleted once
//! the subcluster is also gone from the database (status).
//!
//! The pod template is deliberately minimal: one `server` container with the
//! client and HTTPS ports. The update strategy is `OnDelete`, so an image change
//! only takes effect when the upgrade logic deletes a pod.

use super::{Actor, ReconcileResult};
use crate::constants::{
    API_GROUP, API_VERSION_V1, CLIENT_PORT, HTTP_PORT, KIND_VERTICA_DB, SERVER_CONTAINER,
};
use crate::context::{vdb_namespace, Context};
use crate::crd::{Subcluster, VerticaDB};
use crate::labels::{
    CLIENT_ROUTING, CLIENT_ROUTING_TRUE, K8S_INSTANCE, K8S_MANAGED_BY, MANAGED_BY_OPERATOR,
    STATEFULSET_NAME, SUBCLUSTER_NAME, SUBCLUSTER_SVC_NAME, SUBCLUSTER_TYPE, VERTICA_DATABASE,
};
use crate::meta::SubclusterUpgradeMeta;
use crate::podfacts::PodFacts;
use crate::status_reasons::CONDITION_UPGRADE_IN_PROGRESS;
use anyhow::Result;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec, StatefulSetUpdateStrategy};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Labels carried by every object of database `vdb_name`.
#[must_use]
pub fn base_labels(vdb_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (K8S_INSTANCE.to_string(), vdb_name.to_string()),
        (K8S_MANAGED_BY.to_string(), MANAGED_BY_OPERATOR.to_string()),
        (VERTICA_DATABASE.to_string(), vdb_name.to_string()),
    ])
}

/// Label selector string matching every object of database `vdb_name`.
#[must_use]
pub fn base_selector(vdb_name: &str) -> String {
    format!("{K8S_INSTANCE}={vdb_name},{K8S_MANAGED_BY}={MANAGED_BY_OPERATOR}")
}

/// Labels for pods of `sc`.
#[must_use]
pub fn pod_labels(vdb_name: &str, sc: &Subcluster) -> BTreeMap<String, String> {
    let mut labels = base_labels(vdb_name);
    labels.insert(SUBCLUSTER_NAME.to_string(), sc.name.clone());
    labels.insert(SUBCLUSTER_TYPE.to_string(), sc.r#type.as_str().to_string());
    labels.insert(SUBCLUSTER_SVC_NAME.to_string(), sc.service_name().to_string());
    labels.insert(STATEFULSET_NAME.to_string(), sc.sts_name(vdb_name));
    labels
}

/// Selector that routes a service to the client-ready pods of `service_name`.
#[must_use]
pub fn service_selector(vdb_name: &str, service_name: &str) -> BTreeMap<String, String> {
    let mut selector = base_labels(vdb_name);
    selector.insert(SUBCLUSTER_SVC_NAME.to_string(), service_name.to_string());
    selector.insert(CLIENT_ROUTING.to_string(), CLIENT_ROUTING_TRUE.to_string());
    selector
}

/// Owner reference making `vdb` the controller of an object.
pub fn owner_references(vdb: &VerticaDB) -> Vec<OwnerReference> {
    vec![OwnerReference {
        api_version: format!("{API_GROUP}/{API_VERSION_V1}"),
        kind: KIND_VERTICA_DB.to_string(),
        name: vdb.name_any(),
        uid: vdb.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }]
}

/// Statefulset for `sc` running `image`.
#[must_use]
pub fn build_statefulset(vdb: &VerticaDB, sc: &Subcluster, namespace: &str, image: &str) -> StatefulSet {
    let vdb_name = vdb.name_any();
    let labels = pod_labels(&vdb_name, sc);
    let mut selector = base_labels(&vdb_name);
    selector.insert(STATEFULSET_NAME.to_string(), sc.sts_name(&vdb_name));

    StatefulSet {
        metadata: ObjectMeta {
            name: Some(sc.sts_name(&vdb_name)),
            namespace: Some(namespace.to_string()),
            labels: Some(labels.clone()),
            owner_references: Some(owner_references(vdb)),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(sc.size),
            service_name: Some(vdb_name.clone()),
            pod_management_policy: Some("Parallel".to_string()),
            selector: LabelSelector {
                match_labels: Some(selector),
                ..Default::default()
            },
            update_strategy: Some(StatefulSetUpdateStrategy {
                type_: Some("OnDelete".to_string()),
                ..Default::default()
            }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: SERVER_CONTAINER.to_string(),
                        image: Some(image.to_string()),
                        ports: Some(vec![
                            ContainerPort {
                                name: Some("vertica".to_string()),
                                container_port: CLIENT_PORT,
                                ..Default::default()
                            },
                            ContainerPort {
                                name: Some("vertica-http".to_string()),
                                container_port: HTTP_PORT,
                                ..Default::default()
                            },
                        ]),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// External service for `sc`, routing to pods of `target_service_name`.
#[must_use]
pub fn build_service(
    vdb: &VerticaDB,
    sc: &Subcluster,
    namespace: &str,
    target_service_name: &str,
) -> Service {
    let vdb_name = vdb.name_any();
    let mut labels = base_labels(&vdb_name);
    labels.insert(SUBCLUSTER_SVC_NAME.to_string(), sc.service_name().to_string());

    let node_port = |port: Option<i32>| port.filter(|_| sc.service_type.as_deref() == Some("NodePort"));

    Service {
        metadata: ObjectMeta {
            name: Some(sc.service_object_name(&vdb_name)),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            annotations: (!sc.service_annotations.is_empty())
                .then(|| sc.service_annotations.clone()),
            owner_references: Some(owner_references(vdb)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(service_selector(&vdb_name, target_service_name)),
            type_: Some(
                sc.service_type
                    .clone()
                    .unwrap_or_else(|| "ClusterIP".to_string()),
            ),
            load_balancer_ip: sc.load_balancer_ip.clone(),
            external_ips: (!sc.external_ips.is_empty()).then(|| sc.external_ips.clone()),
            ports: Some(vec![
                ServicePort {
                    name: Some("vertica".to_string()),
                    port: CLIENT_PORT,
                    target_port: Some(IntOrString::Int(CLIENT_PORT)),
                    node_port: node_port(sc.client_node_port),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                },
                ServicePort {
                    name: Some("vertica-http".to_string()),
                    port: HTTP_PORT,
                    target_port: Some(IntOrString::Int(HTTP_PORT)),
                    node_port: node_port(sc.vertica_http_node_port),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Image currently set on a statefulset's server container.
#[must_use]
pub fn statefulset_image(sts: &StatefulSet) -> Option<String> {
    sts.spec
        .as_ref()?
        .template
        .spec
        .as_ref()?
        .containers
        .iter()
        .find(|c| c.name == SERVER_CONTAINER)
        .and_then(|c| c.image.clone())
}

/// Mirrors created for an online upgrade share their parent's service.
fn owns_external_service(sc: &Subcluster) -> bool {
    SubclusterUpgradeMeta::read(sc).parent.is_none()
}

/// Ensures statefulsets and services exist for every spec subcluster and
/// removes those of subclusters that are gone.
pub struct ObjectReconciler {
    ctx: Arc<Context>,
}

impl ObjectReconciler {
    #[must_use]
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    async fn reconcile_statefulsets(&self, vdb: &VerticaDB, namespace: &str) -> Result<usize> {
        let vdb_name = vdb.name_any();
        let upgrading = vdb.is_condition_true(CONDITION_UPGRADE_IN_PROGRESS);
        let mut applied = 0;
        for sc in &vdb.spec.subclusters {
            let sts_name = sc.sts_name(&vdb_name);
            let existing = self.ctx.client.get_statefulset(namespace, &sts_name).await?;
            // The upgrade logic owns image changes while an upgrade runs.
            let image = match existing.as_ref().and_then(statefulset_image) {
                Some(current) if upgrading => current,
                _ => vdb.desired_image(sc),
            };
            let sts = build_statefulset(vdb, sc, namespace, &image);
            let unchanged = existing.as_ref().is_some_and(|cur| {
                statefulset_image(cur).as_deref() == Some(image.as_str())
                    && cur.spec.as_ref().and_then(|s| s.replicas) == Some(sc.size)
                    && cur.metadata.labels == sts.metadata.labels
            });
            if unchanged {
                continue;
            }
            debug!(statefulset = %sts_name, image = %image, replicas = sc.size, "Applying StatefulSet");
            self.ctx.client.apply_statefulset(&sts).await?;
            applied += 1;
        }
        Ok(applied)
    }

    async fn reconcile_services(&self, vdb: &VerticaDB, namespace: &str) -> Result<()> {
        let vdb_name = vdb.name_any();
        for sc in vdb.spec.subclusters.iter().filter(|sc| owns_external_service(sc)) {
            let svc_name = sc.service_object_name(&vdb_name);
            // Keep whatever pods a redirect pointed the service at.
            let target = self
                .ctx
                .client
                .get_service(namespace, &svc_name)
                .await?
                .and_then(|svc| svc.spec?.selector?.get(SUBCLUSTER_SVC_NAME).cloned())
                .unwrap_or_else(|| sc.service_name().to_string());
            let svc = build_service(vdb, sc, namespace, &target);
            self.ctx.client.apply_service(&svc).await?;
        }
        Ok(())
    }

    async fn delete_orphans(&self, vdb: &VerticaDB, namespace: &str) -> Result<()> {
        let vdb_name = vdb.name_any();
        let selector = base_selector(&vdb_name);
        let in_db: BTreeSet<&str> = vdb.status_subcluster_names().into_iter().collect();

        let expected_sts: BTreeSet<String> = vdb.sts_names().into_iter().collect();
        for sts in self.ctx.client.list_statefulsets(namespace, &selector).await? {
            let name = sts.name_any();
            if expected_sts.contains(&name) {
                continue;
            }
            let subcluster = sts.labels().get(SUBCLUSTER_NAME).cloned().unwrap_or_default();
            if in_db.contains(subcluster.as_str()) {
                debug!(statefulset = %name, subcluster = %subcluster, "Subcluster still in database, keeping StatefulSet");
                continue;
            }
            info!(statefulset = %name, "Deleting StatefulSet of removed subcluster");
            self.ctx.client.delete_statefulset(namespace, &name).await?;
        }

        let expected_svc: BTreeSet<String> = vdb
            .spec
            .subclusters
            .iter()
            .map(|sc| sc.service_object_name(&vdb_name))
            .collect();
        for svc in self.ctx.client.list_services(namespace, &selector).await? {
            let name = svc.name_any();
            if !expected_svc.contains(&name) {
                info!(service = %name, "Deleting Service of removed subcluster");
                self.ctx.client.delete_service(namespace, &name).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Actor for ObjectReconciler {
    fn name(&self) -> &'static str {
        "objects"
    }

    async fn reconcile(
        &mut self,
        vdb: &mut VerticaDB,
        pfacts: &mut PodFacts,
    ) -> Result<ReconcileResult> {
        let namespace = vdb_namespace(vdb)?;
        let applied = self.reconcile_statefulsets(vdb, &namespace).await?;
        self.reconcile_services(vdb, &namespace).await?;
        self.delete_orphans(vdb, &namespace).await?;
        if applied > 0 {
            pfacts.invalidate();
        }
        Ok(ReconcileResult::done())
    }
}

#[cfg(test)]
#[path = "objects_tests.rs"]
mod objects_tests;
