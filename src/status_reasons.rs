// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Condition types, condition reasons and event reasons for `VerticaDB` resources.
//!
//! Reasons are programmatic identifiers in CamelCase that explain why a condition has
//! a particular status, or why an event was emitted.
//!
//! # Example Status
//!
//! ```yaml
//! status:
//!   upgradeStatus: "Sandbox subclusters"
//!   conditions:
//!     - type: UpgradeInProgress
//!       status: "True"
//!       reason: UpgradeStarted
//!     - type: OnlineUpgradeInProgress
//!       status: "True"
//!       reason: UpgradeStarted
//! ```

// ============================================================================
// Condition Types
// ============================================================================

/// Set while any style of upgrade is running
pub const CONDITION_UPGRADE_IN_PROGRESS: &str = "UpgradeInProgress";

/// Set while an offline upgrade is running
pub const CONDITION_OFFLINE_UPGRADE_IN_PROGRESS: &str = "OfflineUpgradeInProgress";

/// Set while an online upgrade is running
pub const CONDITION_ONLINE_UPGRADE_IN_PROGRESS: &str = "OnlineUpgradeInProgress";

/// Set when a failed NMA certificate rotation must be rolled back
pub const CONDITION_TLS_CERT_ROLLBACK_NEEDED: &str = "TLSCertRollbackNeeded";

/// Condition on a `VerticaReplicator` that turns true once data was copied
pub const CONDITION_REPLICATION_COMPLETE: &str = "ReplicationComplete";

/// Condition status strings
pub const CONDITION_TRUE: &str = "True";
pub const CONDITION_FALSE: &str = "False";

// ============================================================================
// Condition Reasons
// ============================================================================

/// Upgrade conditions were set by the operator
pub const REASON_UPGRADE_STARTED: &str = "UpgradeStarted";

/// Upgrade conditions were cleared after success
pub const REASON_UPGRADE_FINISHED: &str = "UpgradeFinished";

/// Certificate rotation failed and must be rolled back
pub const REASON_CERT_ROTATION_FAILED: &str = "NMACertRotationFailed";

/// Rollback of a failed certificate rotation completed
pub const REASON_CERT_ROTATION_ROLLED_BACK: &str = "NMACertRotationRolledBack";

// ============================================================================
// Event Reasons - Normal
// ============================================================================

pub const EVENT_UPGRADE_START: &str = "UpgradeStart";
pub const EVENT_UPGRADE_SUCCEEDED: &str = "UpgradeSucceeded";
pub const EVENT_CLUSTER_SHUTDOWN_STARTED: &str = "ClusterShutdownStarted";
pub const EVENT_CLUSTER_SHUTDOWN_SUCCEEDED: &str = "ClusterShutdownSucceeded";
pub const EVENT_SUBCLUSTER_SANDBOXED: &str = "SubclusterSandboxed";
pub const EVENT_SANDBOX_PROMOTED: &str = "SandboxPromoted";
pub const EVENT_SUBCLUSTER_RENAMED: &str = "SubclusterRenamed";
pub const EVENT_SUBCLUSTER_REMOVED: &str = "SubclusterRemoved";
pub const EVENT_REPLICATION_STARTED: &str = "ReplicationStarted";
pub const EVENT_NMA_CERT_ROTATION_SUCCEEDED: &str = "NMACertRotationSucceeded";

// ============================================================================
// Event Reasons - Warning
// ============================================================================

pub const EVENT_CLUSTER_SHUTDOWN_FAILED: &str = "ClusterShutdownFailed";
pub const EVENT_CLUSTER_WILL_LOSE_QUORUM: &str = "ClusterWillLoseQuorum";
pub const EVENT_INCOMPATIBLE_ONLINE_UPGRADE: &str = "IncompatibleOnlineUpgrade";
pub const EVENT_SANDBOX_SUBCLUSTER_FAILED: &str = "SandboxSubclusterFailed";
pub const EVENT_PROMOTE_SANDBOX_FAILED: &str = "PromoteSandboxFailed";
pub const EVENT_RENAME_SUBCLUSTER_FAILED: &str = "RenameSubclusterFailed";
pub const EVENT_REMOVE_SUBCLUSTER_FAILED: &str = "RemoveSubclusterFailed";
pub const EVENT_REPLICATION_FAILED: &str = "ReplicationFailed";
pub const EVENT_NMA_CERT_ROTATION_FAILED: &str = "NMACertRotationFailed";
pub const EVENT_NMA_CERT_ROTATION_ROLLED_BACK: &str = "NMACertRotationRolledBack";

#[cfg(test)]
#[path = "status_reasons_tests.rs"]
mod status_reasons_tests;
