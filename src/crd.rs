// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Custom Resource Definitions (CRDs) for Vertica clusters.
//!
//! This module defines the Kubernetes Custom Resource Definitions the operator
//! reconciles.
//!
//! # Resource Types
//!
//! - [`VerticaDB`] - A database cluster made of subclusters and optional sandboxes
//! - [`VerticaReplicator`] - A one-shot request to copy data from a database into a sandbox
//!
//! # Example: Two-subcluster database
//!
//! ```rust,no_run
//! use verticadb_operator::crd::{Subcluster, SubclusterType, VerticaDBSpec};
//!
//! let spec = VerticaDBSpec {
//!     image: "vertica/vertica-k8s:24.1.0".to_string(),
//!     subclusters: vec![
//!         Subcluster::new("pri1", 3, SubclusterType::Primary),
//!         Subcluster::new("sec1", 2, SubclusterType::Secondary),
//!     ],
//!     ..Default::default()
//! };
//! ```

use crate::constants::{DEFAULT_REPLICATION_TIMEOUT_SECS, DEFAULT_UPGRADE_REQUEUE_SECS};
use crate::labels::STS_NAME_OVERRIDE;
use crate::status_reasons::CONDITION_TRUE;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Condition represents an observation of a resource's current state.
///
/// Conditions are used in status subresources to communicate the state of
/// a resource to users and controllers.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition, e.g. `UpgradeInProgress`.
    pub r#type: String,

    /// Status of the condition: True, False, or Unknown.
    pub status: String,

    /// Brief CamelCase reason for the condition's last transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message indicating details about the transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time the condition transitioned from one status to another (RFC3339 format).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

/// How the operator moves a running database to a new image.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum UpgradePolicy {
    /// Online when the cluster can tolerate it, offline otherwise.
    #[default]
    Auto,
    /// Stop the whole database, reimage it, and start it again.
    Offline,
    /// Keep serving clients by upgrading a sandboxed copy and cutting over.
    Online,
}

/// Role of a subcluster in the database.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SubclusterType {
    /// Primary subclusters count toward quorum.
    #[default]
    Primary,
    /// Secondary subclusters serve queries only.
    Secondary,
}

impl SubclusterType {
    /// String form used in labels and annotations.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }

    /// Parse the label/annotation form. Unknown values yield `None`.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "primary" => Some(Self::Primary),
            "secondary" => Some(Self::Secondary),
            _ => None,
        }
    }
}

/// A named, independently scalable group of database nodes sharing a service.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Subcluster {
    /// Subcluster name, unique within the database.
    pub name: String,

    /// Number of pods in the subcluster.
    pub size: i32,

    /// Primary or secondary.
    #[serde(default)]
    pub r#type: SubclusterType,

    /// Name of the external service. Defaults to the subcluster name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,

    /// Kubernetes service type of the external service (`ClusterIP`, `NodePort`, `LoadBalancer`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,

    /// Node port for the client port when `serviceType` is `NodePort`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_node_port: Option<i32>,

    /// Node port for the HTTPS port when `serviceType` is `NodePort`.
    #[serde(
        default,
        rename = "verticaHTTPNodePort",
        skip_serializing_if = "Option::is_none"
    )]
    pub vertica_http_node_port: Option<i32>,

    /// Load balancer IP when `serviceType` is `LoadBalancer`.
    #[serde(
        default,
        rename = "loadBalancerIP",
        skip_serializing_if = "Option::is_none"
    )]
    pub load_balancer_ip: Option<String>,

    /// External IPs for the external service.
    #[serde(default, rename = "externalIPs", skip_serializing_if = "Vec::is_empty")]
    pub external_ips: Vec<String>,

    /// Annotations applied to the external service.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub service_annotations: BTreeMap<String, String>,

    /// Image to run instead of `spec.image` for this subcluster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_override: Option<String>,

    /// Free-form annotations. The operator keeps upgrade bookkeeping here.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Stop the subcluster's nodes while keeping its pods.
    #[serde(default)]
    pub shutdown: bool,
}

impl Subcluster {
    /// Build a subcluster with only the required fields set.
    #[must_use]
    pub fn new(name: &str, size: i32, r#type: SubclusterType) -> Self {
        Self {
            name: name.to_string(),
            size,
            r#type,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.r#type == SubclusterType::Primary
    }

    /// Service name, falling back to the subcluster name.
    #[must_use]
    pub fn service_name(&self) -> &str {
        self.service_name
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.name)
    }

    /// Statefulset name for this subcluster within database `vdb_name`.
    #[must_use]
    pub fn sts_name(&self, vdb_name: &str) -> String {
        match self.annotations.get(STS_NAME_OVERRIDE) {
            Some(name) if !name.is_empty() => name.clone(),
            _ => format!("{vdb_name}-{}", self.name),
        }
    }

    /// Name of the external service object within database `vdb_name`.
    #[must_use]
    pub fn service_object_name(&self, vdb_name: &str) -> String {
        format!("{vdb_name}-{}", self.service_name())
    }
}

/// A subcluster reference inside a sandbox.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct SandboxSubcluster {
    pub name: String,
}

/// An isolated sub-database running its own image.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Sandbox {
    /// Sandbox name.
    pub name: String,

    /// Image the sandbox runs. Empty means `spec.image`.
    #[serde(default)]
    pub image: String,

    /// Member subclusters. A subcluster is in at most one sandbox.
    #[serde(default)]
    pub subclusters: Vec<SandboxSubcluster>,
}

impl Sandbox {
    #[must_use]
    pub fn contains(&self, subcluster: &str) -> bool {
        self.subclusters.iter().any(|s| s.name == subcluster)
    }
}

/// `VerticaDB` describes a database cluster made of subclusters.
///
/// # Example
///
/// ```yaml
/// apiVersion: vertica.com/v1
/// kind: VerticaDB
/// metadata:
///   name: vertdb
/// spec:
///   image: vertica/vertica-k8s:24.1.0
///   upgradePolicy: Online
///   subclusters:
///     - name: pri1
///       size: 3
///       type: primary
///     - name: sec1
///       size: 2
///       type: secondary
/// ```
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "vertica.com",
    version = "v1",
    kind = "VerticaDB",
    namespaced,
    shortname = "vdb",
    doc = "VerticaDB is a Vertica database cluster made of primary and secondary subclusters, optionally split into sandboxes that run a different image."
)]
#[kube(status = "VerticaDBStatus")]
#[serde(rename_all = "camelCase")]
pub struct VerticaDBSpec {
    /// Image every subcluster runs unless overridden.
    pub image: String,

    /// How image changes are rolled out.
    #[serde(default)]
    pub upgrade_policy: UpgradePolicy,

    /// Seconds between polls while an upgrade waits on the cluster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade_requeue_time: Option<u64>,

    /// Seconds a replicator created by an online upgrade may run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_timeout: Option<u64>,

    /// Ordered list of subclusters.
    #[serde(default)]
    pub subclusters: Vec<Subcluster>,

    /// Sandboxes carved out of the subclusters.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sandboxes: Vec<Sandbox>,

    /// Secret holding the node management agent's TLS certificate.
    #[serde(
        default,
        rename = "nmaTLSSecret",
        skip_serializing_if = "Option::is_none"
    )]
    pub nma_tls_secret: Option<String>,
}

/// Realized membership of a sandbox.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct SandboxStatus {
    pub name: String,
    #[serde(default)]
    pub subclusters: Vec<String>,
}

/// Per-subcluster observed state.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubclusterStatus {
    pub name: String,
    /// The subcluster was added to the database catalog.
    #[serde(default, rename = "addedToDB")]
    pub added_to_db: bool,
    #[serde(default)]
    pub up_node_count: i32,
}

/// `VerticaDB` status
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VerticaDBStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Human-readable upgrade progress message.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub upgrade_status: String,

    #[serde(default)]
    pub sandboxes: Vec<SandboxStatus>,

    #[serde(default)]
    pub subclusters: Vec<SubclusterStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// NMA TLS secret the running cluster was last rotated to.
    #[serde(
        default,
        rename = "nmaTLSSecretInUse",
        skip_serializing_if = "Option::is_none"
    )]
    pub nma_tls_secret_in_use: Option<String>,
}

impl VerticaDB {
    /// Polling interval used while an upgrade waits on the cluster.
    #[must_use]
    pub fn upgrade_requeue_duration(&self) -> Duration {
        Duration::from_secs(
            self.spec
                .upgrade_requeue_time
                .filter(|secs| *secs > 0)
                .unwrap_or(DEFAULT_UPGRADE_REQUEUE_SECS),
        )
    }

    #[must_use]
    pub fn replication_timeout_secs(&self) -> u64 {
        self.spec
            .replication_timeout
            .unwrap_or(DEFAULT_REPLICATION_TIMEOUT_SECS)
    }

    /// Subclusters keyed by name.
    #[must_use]
    pub fn subcluster_map(&self) -> BTreeMap<&str, &Subcluster> {
        self.spec
            .subclusters
            .iter()
            .map(|sc| (sc.name.as_str(), sc))
            .collect()
    }

    #[must_use]
    pub fn find_subcluster(&self, name: &str) -> Option<&Subcluster> {
        self.spec.subclusters.iter().find(|sc| sc.name == name)
    }

    pub fn find_subcluster_mut(&mut self, name: &str) -> Option<&mut Subcluster> {
        self.spec.subclusters.iter_mut().find(|sc| sc.name == name)
    }

    #[must_use]
    pub fn get_sandbox(&self, name: &str) -> Option<&Sandbox> {
        self.spec.sandboxes.iter().find(|sb| sb.name == name)
    }

    #[must_use]
    pub fn get_sandbox_status(&self, name: &str) -> Option<&SandboxStatus> {
        self.status
            .as_ref()
            .and_then(|st| st.sandboxes.iter().find(|sb| sb.name == name))
    }

    /// Sandbox that the status reports `subcluster` as a member of.
    #[must_use]
    pub fn realized_sandbox_of(&self, subcluster: &str) -> Option<&str> {
        self.status.as_ref().and_then(|st| {
            st.sandboxes
                .iter()
                .find(|sb| sb.subclusters.iter().any(|s| s == subcluster))
                .map(|sb| sb.name.as_str())
        })
    }

    /// Sandbox that the spec places `subcluster` in.
    #[must_use]
    pub fn desired_sandbox_of(&self, subcluster: &str) -> Option<&Sandbox> {
        self.spec.sandboxes.iter().find(|sb| sb.contains(subcluster))
    }

    /// Image a subcluster's statefulset should run.
    #[must_use]
    pub fn desired_image(&self, sc: &Subcluster) -> String {
        if let Some(sb) = self.desired_sandbox_of(&sc.name) {
            if !sb.image.is_empty() {
                return sb.image.clone();
            }
        }
        match &sc.image_override {
            Some(image) if !image.is_empty() => image.clone(),
            _ => self.spec.image.clone(),
        }
    }

    /// Statefulset names of every subcluster in the spec.
    #[must_use]
    pub fn sts_names(&self) -> Vec<String> {
        let vdb_name = self.name_any();
        self.spec
            .subclusters
            .iter()
            .map(|sc| sc.sts_name(&vdb_name))
            .collect()
    }

    #[must_use]
    pub fn primary_node_count(&self) -> i32 {
        self.spec
            .subclusters
            .iter()
            .filter(|sc| sc.is_primary())
            .map(|sc| sc.size)
            .sum()
    }

    #[must_use]
    pub fn find_condition(&self, condition_type: &str) -> Option<&Condition> {
        self.status
            .as_ref()
            .and_then(|st| st.conditions.iter().find(|c| c.r#type == condition_type))
    }

    #[must_use]
    pub fn is_condition_true(&self, condition_type: &str) -> bool {
        self.find_condition(condition_type)
            .is_some_and(|c| c.status == CONDITION_TRUE)
    }

    #[must_use]
    pub fn upgrade_status(&self) -> &str {
        self.status
            .as_ref()
            .map_or("", |st| st.upgrade_status.as_str())
    }

    /// Subcluster names recorded in status.
    #[must_use]
    pub fn status_subcluster_names(&self) -> Vec<&str> {
        self.status.as_ref().map_or_else(Vec::new, |st| {
            st.subclusters.iter().map(|s| s.name.as_str()).collect()
        })
    }
}

/// Source of a replication.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationEndpoint {
    /// Name of the `VerticaDB`.
    #[serde(rename = "verticaDB")]
    pub vertica_db: String,

    /// Sandbox inside the database. Empty or absent means the main cluster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox_name: Option<String>,
}

/// `VerticaReplicator` copies data from one database (or sandbox) into another.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "vertica.com",
    version = "v1beta1",
    kind = "VerticaReplicator",
    namespaced,
    shortname = "vrep",
    doc = "VerticaReplicator requests a one-shot replication of data from a source database to a target database or sandbox."
)]
#[kube(status = "VerticaReplicatorStatus")]
#[serde(rename_all = "camelCase")]
pub struct VerticaReplicatorSpec {
    pub source: ReplicationEndpoint,
    pub target: ReplicationEndpoint,

    /// Seconds the replication may run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// `VerticaReplicator` status
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VerticaReplicatorStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub state: String,
}

impl VerticaReplicator {
    #[must_use]
    pub fn is_condition_true(&self, condition_type: &str) -> bool {
        self.status.as_ref().is_some_and(|st| {
            st.conditions
                .iter()
                .any(|c| c.r#type == condition_type && c.status == CONDITION_TRUE)
        })
    }
}

#[cfg(test)]
#[path = "crd_tests.rs"]
mod crd_tests;
