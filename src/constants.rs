// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the VerticaDB operator.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// API Constants
// ============================================================================

/// API group for all Vertica CRDs
pub const API_GROUP: &str = "vertica.com";

/// API version of the `VerticaDB` CRD
pub const API_VERSION_V1: &str = "v1";

/// API version of the `VerticaReplicator` CRD
pub const API_VERSION_V1BETA1: &str = "v1beta1";

/// Kind name for `VerticaDB` resource
pub const KIND_VERTICA_DB: &str = "VerticaDB";

/// Kind name for `VerticaReplicator` resource
pub const KIND_VERTICA_REPLICATOR: &str = "VerticaReplicator";

/// Field manager and event reporter name
pub const OPERATOR_NAME: &str = "verticadb-operator";

// ============================================================================
// Workload Constants
// ============================================================================

/// Name of the database server container in every pod
pub const SERVER_CONTAINER: &str = "server";

/// Client port of the database
pub const CLIENT_PORT: i32 = 5433;

/// HTTPS port of the node management agent
pub const HTTP_PORT: i32 = 8443;

/// Path of the administrative command line inside the server container
pub const VCLUSTER_BIN: &str = "/opt/vertica/bin/vcluster";

/// Path of the SQL client inside the server container
pub const VSQL_BIN: &str = "/opt/vertica/bin/vsql";

/// File whose presence indicates the software install completed in the pod
pub const INSTALL_INDICATOR_PATH: &str = "/opt/vertica/config/admintools.conf";

/// Directory that exists once the pod hosts a database node
pub const DB_DATA_PATH: &str = "/data";

/// Pod phase string for a running pod
pub const POD_PHASE_RUNNING: &str = "Running";

// ============================================================================
// Upgrade Constants
// ============================================================================

/// Suffix appended to a subcluster name to build its mirror's name
pub const MIRROR_SUFFIX: &str = "-sb";

/// Preferred sandbox name for the replica group B sandbox
pub const PREFERRED_SANDBOX_NAME: &str = "replica-group-b";

/// Fallback sandbox name used when the preferred one is taken
pub const REVERSE_SANDBOX_NAME: &str = "replica-group-a";

/// Length of the random suffix used when preferred names collide
pub const RANDOM_SUFFIX_LEN: usize = 5;

/// Attempts at a random-suffixed name before giving up
pub const MAX_NAME_GEN_ATTEMPTS: usize = 100;

/// Attempts for a read-modify-write of the `VerticaDB` before giving up
pub const MAX_UPDATE_ATTEMPTS: usize = 10;

/// Primary node count below which an online upgrade is not possible
pub const MIN_PRIMARY_NODES_FOR_ONLINE_UPGRADE: usize = 3;

/// Default polling interval while an upgrade waits on the cluster (30 seconds)
pub const DEFAULT_UPGRADE_REQUEUE_SECS: u64 = 30;

/// Default timeout handed to a replicator (1 hour)
pub const DEFAULT_REPLICATION_TIMEOUT_SECS: u64 = 3600;

// ============================================================================
// Controller Constants
// ============================================================================

/// Requeue interval once a cluster is in steady state (5 minutes)
pub const DEFAULT_REQUEUE_SECS: u64 = 300;

/// Requeue interval after a reconcile error (30 seconds)
pub const ERROR_REQUEUE_DURATION_SECS: u64 = 30;

/// Default Tokio worker thread count
pub const DEFAULT_WORKER_THREADS: usize = 4;

/// Default bind address of the metrics and health server
pub const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:8080";
