// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Common label and annotation constants used across all reconcilers.
//!
//! This module defines standard Kubernetes labels and Vertica-specific labels/annotations
//! to ensure consistency across all resources created by the controller.

// ============================================================================
// Kubernetes Standard Labels
// https://kubernetes.io/docs/concepts/overview/working-with-objects/common-labels/
// ============================================================================

/// Standard label for the tool being used to manage the operation of an application
pub const K8S_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Standard label for a unique name identifying the instance of an application
pub const K8S_INSTANCE: &str = "app.kubernetes.io/instance";

/// Value for `app.kubernetes.io/managed-by` on every object this operator creates
pub const MANAGED_BY_OPERATOR: &str = "verticadb-operator";

// ============================================================================
// Vertica-Specific Labels
// ============================================================================

/// Name of the `VerticaDB` that owns the object
pub const VERTICA_DATABASE: &str = "vertica.com/database";

/// Name of the subcluster a pod or statefulset belongs to
pub const SUBCLUSTER_NAME: &str = "vertica.com/subcluster-name";

/// Type (`primary`/`secondary`) of the subcluster a pod belongs to
pub const SUBCLUSTER_TYPE: &str = "vertica.com/subcluster-type";

/// Service name a pod is selected by
pub const SUBCLUSTER_SVC_NAME: &str = "vertica.com/subcluster-svc";

/// Statefulset a pod belongs to. Stable across subcluster renames, so it is
/// the statefulset selector.
pub const STATEFULSET_NAME: &str = "vertica.com/statefulset-name";

/// Set on pods that may receive client connections
pub const CLIENT_ROUTING: &str = "vertica.com/client-routing";

/// Value of [`CLIENT_ROUTING`] on pods that accept client traffic
pub const CLIENT_ROUTING_TRUE: &str = "true";

// ============================================================================
// Subcluster Annotations (online upgrade bookkeeping)
// ============================================================================

/// Replica group a subcluster belongs to during an online upgrade (`a` or `b`)
pub const REPLICA_GROUP: &str = "vertica.com/replica-group";

/// Value of [`REPLICA_GROUP`] for the original subclusters
pub const REPLICA_GROUP_A: &str = "a";

/// Value of [`REPLICA_GROUP`] for the mirror subclusters
pub const REPLICA_GROUP_B: &str = "b";

/// On a mirror: name of the subcluster it was created from
pub const PARENT_SUBCLUSTER: &str = "vertica.com/parent-subcluster";

/// On a mirror: type the parent subcluster had when the mirror was created
pub const PARENT_SUBCLUSTER_TYPE: &str = "vertica.com/parent-subcluster-type";

/// On an original subcluster: name of its mirror
pub const CHILD_SUBCLUSTER: &str = "vertica.com/child-subcluster";

/// Desired statefulset name when it differs from `<vdb>-<subcluster>`
pub const STS_NAME_OVERRIDE: &str = "vertica.com/statefulset-name-override";

// ============================================================================
// VerticaDB Annotations (online upgrade markers)
// ============================================================================

/// Name of the sandbox replica group B was placed in
pub const ONLINE_UPGRADE_SANDBOX: &str = "vertica.com/online-upgrade-sandbox";

/// Name of the replicator created to copy data into the sandbox
pub const ONLINE_UPGRADE_REPLICATOR: &str = "vertica.com/online-upgrade-replicator";

/// Set once the sandbox was promoted to the main cluster
pub const ONLINE_UPGRADE_SANDBOX_PROMOTED: &str = "vertica.com/online-upgrade-sandbox-promoted";

/// Set once replica group A was removed from the spec
pub const ONLINE_UPGRADE_REPLICA_A_REMOVED: &str = "vertica.com/online-upgrade-replica-a-removed";

/// Value stored in boolean marker annotations
pub const ANNOTATION_TRUE: &str = "true";
