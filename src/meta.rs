// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Typed view over the annotations that carry online upgrade bookkeeping.
//!
//! Replica group membership, parent/child linkage and statefulset name overrides
//! are persisted in each subcluster's free-form annotation map, and the step
//! markers of an online upgrade live on the `VerticaDB`'s own annotations. The
//! CRD schema stays unchanged while callers work with plain structs.
//!
//! Reads are lenient: a missing or unrecognised value reads as `None`/`false`.
//! Writes remove keys whose field is unset so annotation maps never carry
//! empty values.

use crate::crd::{Subcluster, SubclusterType, VerticaDB};
use crate::labels::{
    ANNOTATION_TRUE, CHILD_SUBCLUSTER, ONLINE_UPGRADE_REPLICATOR, ONLINE_UPGRADE_REPLICA_A_REMOVED,
    ONLINE_UPGRADE_SANDBOX, ONLINE_UPGRADE_SANDBOX_PROMOTED, PARENT_SUBCLUSTER,
    PARENT_SUBCLUSTER_TYPE, REPLICA_GROUP, REPLICA_GROUP_A, REPLICA_GROUP_B, STS_NAME_OVERRIDE,
};
use kube::ResourceExt;
use std::collections::BTreeMap;

/// Half of the cluster a subcluster belongs to during an online upgrade.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplicaGroup {
    /// The original subclusters running the old image.
    A,
    /// The mirrors that get sandboxed and upgraded.
    B,
}

impl ReplicaGroup {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => REPLICA_GROUP_A,
            Self::B => REPLICA_GROUP_B,
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            REPLICA_GROUP_A => Some(Self::A),
            REPLICA_GROUP_B => Some(Self::B),
            _ => None,
        }
    }
}

/// Upgrade bookkeeping attached to one subcluster.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubclusterUpgradeMeta {
    pub replica_group: Option<ReplicaGroup>,
    /// On a mirror, the subcluster it was created from.
    pub parent: Option<String>,
    /// On a mirror, the type its parent had.
    pub parent_type: Option<SubclusterType>,
    /// On an original, the mirror created from it.
    pub child: Option<String>,
    pub sts_name_override: Option<String>,
}

impl SubclusterUpgradeMeta {
    #[must_use]
    pub fn read(sc: &Subcluster) -> Self {
        let get = |key: &str| {
            sc.annotations
                .get(key)
                .filter(|v| !v.is_empty())
                .cloned()
        };
        Self {
            replica_group: get(REPLICA_GROUP).and_then(|v| ReplicaGroup::parse(&v)),
            parent: get(PARENT_SUBCLUSTER),
            parent_type: get(PARENT_SUBCLUSTER_TYPE).and_then(|v| SubclusterType::parse(&v)),
            child: get(CHILD_SUBCLUSTER),
            sts_name_override: get(STS_NAME_OVERRIDE),
        }
    }

    /// Store this metadata back into `sc`'s annotations.
    pub fn write(&self, sc: &mut Subcluster) {
        let annotations = &mut sc.annotations;
        put(
            annotations,
            REPLICA_GROUP,
            self.replica_group.map(|g| g.as_str().to_string()),
        );
        put(annotations, PARENT_SUBCLUSTER, self.parent.clone());
        put(
            annotations,
            PARENT_SUBCLUSTER_TYPE,
            self.parent_type.map(|t| t.as_str().to_string()),
        );
        put(annotations, CHILD_SUBCLUSTER, self.child.clone());
        put(annotations, STS_NAME_OVERRIDE, self.sts_name_override.clone());
    }

    /// Drop the group and linkage fields, keeping the statefulset override.
    pub fn clear_linkage(&mut self) {
        self.replica_group = None;
        self.parent = None;
        self.parent_type = None;
        self.child = None;
    }
}

/// Replica group of `sc`, if tagged.
#[must_use]
pub fn replica_group(sc: &Subcluster) -> Option<ReplicaGroup> {
    sc.annotations
        .get(REPLICA_GROUP)
        .and_then(|v| ReplicaGroup::parse(v))
}

/// Subclusters tagged with `group`, in spec order.
#[must_use]
pub fn subclusters_in_group(vdb: &VerticaDB, group: ReplicaGroup) -> Vec<&Subcluster> {
    vdb.spec
        .subclusters
        .iter()
        .filter(|sc| replica_group(sc) == Some(group))
        .collect()
}

/// Step markers of an online upgrade, stored on the `VerticaDB`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OnlineUpgradeMarkers {
    pub sandbox: Option<String>,
    pub replicator: Option<String>,
    pub sandbox_promoted: bool,
    pub replica_a_removed: bool,
}

impl OnlineUpgradeMarkers {
    #[must_use]
    pub fn read(vdb: &VerticaDB) -> Self {
        let annotations = vdb.annotations();
        let get = |key: &str| annotations.get(key).filter(|v| !v.is_empty()).cloned();
        let flag = |key: &str| annotations.get(key).is_some_and(|v| v == ANNOTATION_TRUE);
        Self {
            sandbox: get(ONLINE_UPGRADE_SANDBOX),
            replicator: get(ONLINE_UPGRADE_REPLICATOR),
            sandbox_promoted: flag(ONLINE_UPGRADE_SANDBOX_PROMOTED),
            replica_a_removed: flag(ONLINE_UPGRADE_REPLICA_A_REMOVED),
        }
    }

    pub fn write(&self, vdb: &mut VerticaDB) {
        let annotations = vdb.annotations_mut();
        put(annotations, ONLINE_UPGRADE_SANDBOX, self.sandbox.clone());
        put(annotations, ONLINE_UPGRADE_REPLICATOR, self.replicator.clone());
        put(
            annotations,
            ONLINE_UPGRADE_SANDBOX_PROMOTED,
            self.sandbox_promoted.then(|| ANNOTATION_TRUE.to_string()),
        );
        put(
            annotations,
            ONLINE_UPGRADE_REPLICA_A_REMOVED,
            self.replica_a_removed.then(|| ANNOTATION_TRUE.to_string()),
        );
    }

    /// Remove every marker from `vdb`. Returns true if anything changed.
    pub fn clear(vdb: &mut VerticaDB) -> bool {
        let before = Self::read(vdb);
        if before == Self::default() {
            return false;
        }
        Self::default().write(vdb);
        true
    }
}

fn put(annotations: &mut BTreeMap<String, String>, key: &str, value: Option<String>) {
    match value {
        Some(v) => {
            annotations.insert(key.to_string(), v);
        }
        None => {
            annotations.remove(key);
        }
    }
}

#[cfg(test)]
#[path = "meta_tests.rs"]
mod meta_tests;
