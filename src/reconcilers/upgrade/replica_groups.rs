// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Replica group topology changes made during an online upgrade.
//!
//! Everything here is a pure function over a `VerticaDB` that reports whether it
//! changed anything. The functions are meant to run inside the
//! `update_vdb_with_retry` closures, so they are reapplied to the latest copy
//! after a conflict and must be idempotent.

use crate::crd::{Sandbox, SandboxSubcluster, Subcluster, SubclusterType, VerticaDB};
use crate::errors::OperatorError;
use crate::meta::{
    replica_group, subclusters_in_group, OnlineUpgradeMarkers, ReplicaGroup,
    SubclusterUpgradeMeta,
};
use crate::names::{mirror_sts_name, mirror_subcluster_name, sandbox_name};
use kube::ResourceExt;
use std::collections::BTreeSet;

/// Tag every main-cluster subcluster that has no replica group yet as group A.
pub fn assign_replica_group_a(vdb: &mut VerticaDB) -> bool {
    let sandboxed: BTreeSet<String> = vdb
        .spec
        .sandboxes
        .iter()
        .flat_map(|sb| sb.subclusters.iter().map(|s| s.name.clone()))
        .collect();
    let mut changed = false;
    for sc in &mut vdb.spec.subclusters {
        if sandboxed.contains(&sc.name) {
            continue;
        }
        let mut meta = SubclusterUpgradeMeta::read(sc);
        if meta.replica_group.is_none() {
            meta.replica_group = Some(ReplicaGroup::A);
            meta.write(sc);
            changed = true;
        }
    }
    changed
}

/// Whether every main-cluster subcluster carries a replica group.
#[must_use]
pub fn all_main_subclusters_tagged(vdb: &VerticaDB) -> bool {
    vdb.spec
        .subclusters
        .iter()
        .filter(|sc| vdb.desired_sandbox_of(&sc.name).is_none())
        .all(|sc| replica_group(sc).is_some())
}

/// Mirror of `parent` named `name`, backed by statefulset `sts_name`.
fn build_mirror(parent: &Subcluster, name: &str, sts_name: &str, old_image: &str) -> Subcluster {
    let mut mirror = Subcluster {
        name: name.to_string(),
        size: parent.size,
        r#type: SubclusterType::Secondary,
        service_name: Some(parent.service_name().to_string()),
        service_type: parent.service_type.clone(),
        client_node_port: parent.client_node_port,
        vertica_http_node_port: parent.vertica_http_node_port,
        load_balancer_ip: parent.load_balancer_ip.clone(),
        external_ips: parent.external_ips.clone(),
        service_annotations: parent.service_annotations.clone(),
        image_override: Some(old_image.to_string()),
        ..Default::default()
    };
    SubclusterUpgradeMeta {
        replica_group: Some(ReplicaGroup::B),
        parent: Some(parent.name.clone()),
        parent_type: Some(parent.r#type),
        child: None,
        sts_name_override: Some(sts_name.to_string()),
    }
    .write(&mut mirror);
    mirror
}

/// Add a group B mirror for every group A subcluster that has no child yet.
///
/// Mirrors are secondaries pinned to `old_image`. They take over their parent's
/// client-facing service attributes so they can serve the same clients later.
///
/// # Errors
///
/// Returns [`OperatorError::NameGenerationExhausted`] if no free name is found.
pub fn add_mirror_subclusters(vdb: &mut VerticaDB, old_image: &str) -> Result<bool, OperatorError> {
    let vdb_name = vdb.name_any();
    let parents: Vec<Subcluster> = subclusters_in_group(vdb, ReplicaGroup::A)
        .into_iter()
        .filter(|sc| SubclusterUpgradeMeta::read(sc).child.is_none())
        .cloned()
        .collect();

    for parent in &parents {
        let name = mirror_subcluster_name(&parent.name, |n| vdb.find_subcluster(n).is_some())?;
        let taken_sts = vdb.sts_names();
        let sts_name = mirror_sts_name(&vdb_name, &name, |n| taken_sts.iter().any(|t| t == n))?;
        let mirror = build_mirror(parent, &name, &sts_name, old_image);

        if let Some(sc) = vdb.find_subcluster_mut(&parent.name) {
            let mut meta = SubclusterUpgradeMeta::read(sc);
            meta.child = Some(name);
            meta.write(sc);
        }
        vdb.spec.subclusters.push(mirror);
    }
    Ok(!parents.is_empty())
}

/// Place every group B subcluster in a new spec sandbox running `old_image` and
/// record the sandbox name in the markers.
///
/// A no-op once the sandbox name is recorded.
///
/// # Errors
///
/// Returns [`OperatorError::ReplicaGroupEmpty`] when there are no group B
/// subclusters, [`OperatorError::SubclusterAlreadySandboxed`] when one of them
/// is already in another spec sandbox, or a name generation error.
pub fn place_group_b_in_sandbox(vdb: &mut VerticaDB, old_image: &str) -> Result<bool, OperatorError> {
    let mut markers = OnlineUpgradeMarkers::read(vdb);
    if markers.sandbox.is_some() {
        return Ok(false);
    }
    let members: Vec<SandboxSubcluster> = subclusters_in_group(vdb, ReplicaGroup::B)
        .into_iter()
        .map(|sc| SandboxSubcluster {
            name: sc.name.clone(),
        })
        .collect();
    if members.is_empty() {
        return Err(OperatorError::ReplicaGroupEmpty {
            group: ReplicaGroup::B.as_str().to_string(),
            vdb: vdb.name_any(),
        });
    }
    for member in &members {
        if let Some(sb) = vdb.spec.sandboxes.iter().find(|sb| sb.contains(&member.name)) {
            return Err(OperatorError::SubclusterAlreadySandboxed {
                subcluster: member.name.clone(),
                sandbox: sb.name.clone(),
                vdb: vdb.name_any(),
            });
        }
    }

    let mut taken: BTreeSet<String> = vdb.spec.sandboxes.iter().map(|sb| sb.name.clone()).collect();
    if let Some(status) = &vdb.status {
        taken.extend(status.sandboxes.iter().map(|sb| sb.name.clone()));
    }
    let name = sandbox_name(|n| taken.contains(n))?;

    vdb.spec.sandboxes.push(Sandbox {
        name: name.clone(),
        image: old_image.to_string(),
        subclusters: members,
    });
    markers.sandbox = Some(name);
    markers.write(vdb);
    Ok(true)
}

/// Whether the recorded sandbox exists in status with every group B member.
#[must_use]
pub fn is_sandbox_realized(vdb: &VerticaDB) -> bool {
    let Some(name) = OnlineUpgradeMarkers::read(vdb).sandbox else {
        return false;
    };
    let Some(status) = vdb.get_sandbox_status(&name) else {
        return false;
    };
    let members = subclusters_in_group(vdb, ReplicaGroup::B);
    !members.is_empty()
        && members
            .iter()
            .all(|sc| status.subclusters.iter().any(|s| *s == sc.name))
}

/// Mirrors still secondary whose parent was primary.
#[must_use]
pub fn mirrors_to_promote(vdb: &VerticaDB) -> Vec<String> {
    subclusters_in_group(vdb, ReplicaGroup::B)
        .into_iter()
        .filter(|sc| {
            sc.r#type == SubclusterType::Secondary
                && SubclusterUpgradeMeta::read(sc).parent_type == Some(SubclusterType::Primary)
        })
        .map(|sc| sc.name.clone())
        .collect()
}

/// Record in the spec that `sandbox` became the main cluster.
///
/// Removes the sandbox, lets group B follow `spec.image` again and sets the
/// `sandbox-promoted` marker.
pub fn promote_sandbox_in_spec(vdb: &mut VerticaDB, sandbox: &str) -> bool {
    let before = vdb.spec.sandboxes.len();
    vdb.spec.sandboxes.retain(|sb| sb.name != sandbox);
    let mut changed = before != vdb.spec.sandboxes.len();

    for sc in &mut vdb.spec.subclusters {
        if replica_group(sc) == Some(ReplicaGroup::B) && sc.image_override.take().is_some() {
            changed = true;
        }
    }

    let mut markers = OnlineUpgradeMarkers::read(vdb);
    if !markers.sandbox_promoted {
        markers.sandbox_promoted = true;
        markers.write(vdb);
        changed = true;
    }
    changed
}

/// Remove group A from the spec and set the `replica-a-removed` marker.
pub fn remove_group_a_from_spec(vdb: &mut VerticaDB) -> bool {
    let before = vdb.spec.subclusters.len();
    vdb.spec
        .subclusters
        .retain(|sc| replica_group(sc) != Some(ReplicaGroup::A));
    let mut changed = before != vdb.spec.subclusters.len();

    let mut markers = OnlineUpgradeMarkers::read(vdb);
    if !markers.replica_a_removed {
        markers.replica_a_removed = true;
        markers.write(vdb);
        changed = true;
    }
    changed
}

/// Rename subcluster `old` to `new` in the spec.
///
/// The renamed subcluster keeps its statefulset override, so its pods survive,
/// and loses its replica group and linkage. Sandbox membership follows the
/// rename. Renaming to a name that already replaced `old` is a no-op.
///
/// # Errors
///
/// Returns [`OperatorError::DuplicateSubclusterName`] when both names exist and
/// [`OperatorError::SubclusterNotFound`] when neither does.
pub fn update_subcluster_name_in_vdb(
    vdb: &mut VerticaDB,
    old: &str,
    new: &str,
) -> Result<bool, OperatorError> {
    if old == new {
        return Ok(false);
    }
    let has_old = vdb.find_subcluster(old).is_some();
    let has_new = vdb.find_subcluster(new).is_some();
    match (has_old, has_new) {
        (false, true) => return Ok(false),
        (true, true) => {
            return Err(OperatorError::DuplicateSubclusterName {
                from: old.to_string(),
                to: new.to_string(),
            })
        }
        (false, false) => {
            return Err(OperatorError::SubclusterNotFound {
                name: old.to_string(),
                vdb: vdb.name_any(),
            })
        }
        (true, false) => {}
    }

    let vdb_name = vdb.name_any();
    if let Some(sc) = vdb.find_subcluster_mut(old) {
        let mut meta = SubclusterUpgradeMeta::read(sc);
        // Pin the statefulset so the rename does not orphan the running pods.
        if meta.sts_name_override.is_none() {
            meta.sts_name_override = Some(sc.sts_name(&vdb_name));
        }
        meta.clear_linkage();
        meta.write(sc);
        sc.name = new.to_string();
    }
    for sb in &mut vdb.spec.sandboxes {
        for member in &mut sb.subclusters {
            if member.name == old {
                member.name = new.to_string();
            }
        }
    }
    Ok(true)
}

/// Rename subcluster `old` to `new` in `status.subclusters` and status sandboxes.
pub fn rename_subcluster_in_status(vdb: &mut VerticaDB, old: &str, new: &str) -> bool {
    let Some(status) = vdb.status.as_mut() else {
        return false;
    };
    if status.subclusters.iter().any(|s| s.name == new) {
        return false;
    }
    let mut changed = false;
    for sc in &mut status.subclusters {
        if sc.name == old {
            sc.name = new.to_string();
            changed = true;
        }
    }
    for sb in &mut status.sandboxes {
        for member in &mut sb.subclusters {
            if member == old {
                *member = new.to_string();
                changed = true;
            }
        }
    }
    changed
}

/// Mirrors in the spec with the name of the subcluster each was created from.
#[must_use]
pub fn mirror_parents(vdb: &VerticaDB) -> Vec<(String, String)> {
    vdb.spec
        .subclusters
        .iter()
        .filter_map(|sc| {
            SubclusterUpgradeMeta::read(sc)
                .parent
                .map(|parent| (sc.name.clone(), parent))
        })
        .collect()
}

/// Whether group A still exists, in the spec or in the database.
///
/// In the database, a mirror's parent that still sits in status next to the
/// mirror means the original subcluster has not been removed yet.
#[must_use]
pub fn group_a_footprint(vdb: &VerticaDB) -> bool {
    if !subclusters_in_group(vdb, ReplicaGroup::A).is_empty() {
        return true;
    }
    let in_db: BTreeSet<&str> = vdb.status_subcluster_names().into_iter().collect();
    mirror_parents(vdb)
        .iter()
        .any(|(mirror, parent)| in_db.contains(parent.as_str()) && in_db.contains(mirror.as_str()))
}

#[cfg(test)]
#[path = "replica_groups_tests.rs"]
mod replica_groups_tests;
