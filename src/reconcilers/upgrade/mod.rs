// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Upgrade orchestration shared by the offline and online styles.
//!
//! [`UpgradeManager`] owns the pieces both styles need:
//!
//! - deciding whether an upgrade is needed, or already in flight
//! - the `UpgradeInProgress` condition and its per-style sibling
//! - forward-only progress messages in `status.upgradeStatus`
//! - reimaging statefulsets and deleting pods that run the old image
//! - remembering the image the primaries ran before the upgrade
//! - session draining: idle detection and forced session close
//!
//! The style-specific workflows live in [`offline`] and [`online`]. Replica group
//! topology changes used by the online style live in [`replica_groups`].

pub mod offline;
pub mod online;
pub mod replica_groups;

use super::retry::{update_vdb_status_with_retry, update_vdb_with_retry};
use super::status::{create_condition, set_condition};
use super::ReconcileResult;
use crate::constants::{MIN_PRIMARY_NODES_FOR_ONLINE_UPGRADE, SERVER_CONTAINER};
use crate::context::{vdb_namespace, Context};
use crate::crd::{Subcluster, UpgradePolicy, VerticaDB};
use crate::meta::{OnlineUpgradeMarkers, SubclusterUpgradeMeta};
use crate::podfacts::{parse_count, vsql_command, PodFacts};
use crate::reconcilers::objects::{build_statefulset, statefulset_image};
use crate::status_reasons::{
    CONDITION_FALSE, CONDITION_OFFLINE_UPGRADE_IN_PROGRESS, CONDITION_ONLINE_UPGRADE_IN_PROGRESS,
    CONDITION_TRUE, CONDITION_UPGRADE_IN_PROGRESS, EVENT_UPGRADE_START, EVENT_UPGRADE_SUCCEEDED,
    REASON_UPGRADE_FINISHED, REASON_UPGRADE_STARTED,
};
use anyhow::{bail, Result};
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Prefix of the query counting client sessions on one subcluster. The quoted
/// subcluster name is appended.
pub const SESSION_COUNT_SQL: &str = "select count(*) from v_monitor.sessions s \
     join v_catalog.subclusters c using (node_name) where c.subcluster_name = ";

/// Closes every client session in the database the pod belongs to.
pub const CLOSE_SESSIONS_SQL: &str = "select close_all_sessions()";

/// How a new image is rolled out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpgradeStyle {
    Offline,
    Online,
}

impl UpgradeStyle {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Online => "online",
        }
    }

    /// Condition that is true while an upgrade of this style runs.
    #[must_use]
    pub fn condition(self) -> &'static str {
        match self {
            Self::Offline => CONDITION_OFFLINE_UPGRADE_IN_PROGRESS,
            Self::Online => CONDITION_ONLINE_UPGRADE_IN_PROGRESS,
        }
    }

    #[must_use]
    pub fn other(self) -> Self {
        match self {
            Self::Offline => Self::Online,
            Self::Online => Self::Offline,
        }
    }
}

/// Style the upgrade policy selects for `vdb`.
///
/// The second value is true when `Online` was requested but the cluster has too
/// few primary nodes, so the offline style is used instead.
#[must_use]
pub fn resolve_upgrade_style(vdb: &VerticaDB) -> (UpgradeStyle, bool) {
    let enough_primaries = usize::try_from(vdb.primary_node_count())
        .is_ok_and(|n| n >= MIN_PRIMARY_NODES_FOR_ONLINE_UPGRADE);
    match vdb.spec.upgrade_policy {
        UpgradePolicy::Offline => (UpgradeStyle::Offline, false),
        UpgradePolicy::Auto if enough_primaries => (UpgradeStyle::Online, false),
        UpgradePolicy::Auto => (UpgradeStyle::Offline, false),
        UpgradePolicy::Online if enough_primaries => (UpgradeStyle::Online, false),
        UpgradePolicy::Online => (UpgradeStyle::Offline, true),
    }
}

/// Main-cluster primary subclusters, the ones whose image tells whether an upgrade is due.
fn main_primaries(vdb: &VerticaDB) -> impl Iterator<Item = &Subcluster> {
    vdb.spec
        .subclusters
        .iter()
        .filter(|sc| sc.is_primary() && vdb.desired_sandbox_of(&sc.name).is_none())
}

/// Shared state and helpers for one upgrade reconcile pass.
pub struct UpgradeManager {
    ctx: Arc<Context>,
    style: UpgradeStyle,
    /// The style condition was already true when the pass began.
    continuing: bool,
    /// Images the main-cluster primaries ran when the pass began.
    primary_images: Vec<String>,
}

impl UpgradeManager {
    #[must_use]
    pub fn new(ctx: Arc<Context>, style: UpgradeStyle) -> Self {
        Self {
            ctx,
            style,
            continuing: false,
            primary_images: Vec::new(),
        }
    }

    #[must_use]
    pub fn style(&self) -> UpgradeStyle {
        self.style
    }

    #[must_use]
    pub fn is_continuing(&self) -> bool {
        self.continuing
    }

    /// Whether this style of upgrade should run.
    ///
    /// An upgrade already in flight (its condition is true) always continues.
    /// An upgrade of the other style blocks this one. Otherwise the policy must
    /// select this style and some main-cluster primary statefulset must run an
    /// image other than `spec.image`.
    ///
    /// # Errors
    ///
    /// Returns an error if statefulsets cannot be read.
    pub async fn is_upgrade_needed(&mut self, vdb: &VerticaDB) -> Result<bool> {
        if vdb.is_condition_true(self.style.condition()) {
            self.continuing = true;
            return Ok(true);
        }
        if vdb.is_condition_true(self.style.other().condition()) {
            debug!(
                vdb = %vdb.name_any(),
                style = self.style.as_str(),
                "Upgrade of the other style is in progress"
            );
            return Ok(false);
        }
        if resolve_upgrade_style(vdb).0 != self.style {
            return Ok(false);
        }
        self.is_vdb_image_different(vdb).await
    }

    async fn is_vdb_image_different(&self, vdb: &VerticaDB) -> Result<bool> {
        let namespace = vdb_namespace(vdb)?;
        let vdb_name = vdb.name_any();
        for sc in main_primaries(vdb) {
            let sts = self
                .ctx
                .client
                .get_statefulset(&namespace, &sc.sts_name(&vdb_name))
                .await?;
            if let Some(image) = sts.as_ref().and_then(statefulset_image) {
                if image != vdb.spec.image {
                    info!(
                        vdb = %vdb_name,
                        subcluster = %sc.name,
                        current = %image,
                        desired = %vdb.spec.image,
                        "Image change detected"
                    );
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Set `UpgradeInProgress` and the style condition.
    ///
    /// The `UpgradeStart` event is only emitted when the upgrade was not already in flight.
    ///
    /// # Errors
    ///
    /// Returns an error if the status cannot be written.
    pub async fn start_upgrade(&mut self, vdb: &mut VerticaDB) -> Result<ReconcileResult> {
        info!(
            vdb = %vdb.name_any(),
            style = self.style.as_str(),
            continuing = self.continuing,
            image = %vdb.spec.image,
            "Starting upgrade for reconcile pass"
        );
        let style_condition = self.style.condition();
        update_vdb_status_with_retry(self.ctx.client.as_ref(), vdb, |latest| {
            let status = latest.status.get_or_insert_with(Default::default);
            let a = set_condition(
                &mut status.conditions,
                create_condition(
                    CONDITION_UPGRADE_IN_PROGRESS,
                    CONDITION_TRUE,
                    REASON_UPGRADE_STARTED,
                    "",
                ),
            );
            let b = set_condition(
                &mut status.conditions,
                create_condition(style_condition, CONDITION_TRUE, REASON_UPGRADE_STARTED, ""),
            );
            Ok(a || b)
        })
        .await?;

        if !self.continuing {
            self.ctx
                .publish_normal_event(
                    vdb,
                    EVENT_UPGRADE_START,
                    &format!(
                        "Vertica server {} upgrade has started. New image is '{}'",
                        self.style.as_str(),
                        vdb.spec.image
                    ),
                )
                .await;
            crate::metrics::record_upgrade_started(self.style.as_str());
            self.continuing = true;
        }
        Ok(ReconcileResult::done())
    }

    /// Clear the upgrade conditions, the progress message and the online upgrade bookkeeping.
    ///
    /// # Errors
    ///
    /// Returns an error if the spec or status cannot be written.
    pub async fn finish_upgrade(&mut self, vdb: &mut VerticaDB) -> Result<ReconcileResult> {
        let was_in_progress = vdb.is_condition_true(self.style.condition());
        let style_condition = self.style.condition();

        update_vdb_with_retry(self.ctx.client.as_ref(), vdb, |latest| {
            let mut changed = OnlineUpgradeMarkers::clear(latest);
            for sc in &mut latest.spec.subclusters {
                let mut meta = SubclusterUpgradeMeta::read(sc);
                if meta.replica_group.is_some()
                    || meta.parent.is_some()
                    || meta.child.is_some()
                    || meta.parent_type.is_some()
                {
                    meta.clear_linkage();
                    meta.write(sc);
                    changed = true;
                }
            }
            Ok(changed)
        })
        .await?;

        update_vdb_status_with_retry(self.ctx.client.as_ref(), vdb, |latest| {
            let status = latest.status.get_or_insert_with(Default::default);
            let mut changed = !status.upgrade_status.is_empty();
            status.upgrade_status.clear();
            for condition_type in [CONDITION_UPGRADE_IN_PROGRESS, style_condition] {
                changed |= set_condition(
                    &mut status.conditions,
                    create_condition(
                        condition_type,
                        CONDITION_FALSE,
                        REASON_UPGRADE_FINISHED,
                        "",
                    ),
                );
            }
            Ok(changed)
        })
        .await?;

        if was_in_progress {
            info!(vdb = %vdb.name_any(), style = self.style.as_str(), "The upgrade has completed successfully");
            self.ctx
                .publish_normal_event(
                    vdb,
                    EVENT_UPGRADE_SUCCEEDED,
                    &format!(
                        "Vertica server upgrade has completed successfully. New image is '{}'",
                        vdb.spec.image
                    ),
                )
                .await;
            crate::metrics::record_upgrade_finished(self.style.as_str());
        }
        Ok(ReconcileResult::done())
    }

    /// Post `msgs[index]` as the progress message unless a later message is already posted.
    ///
    /// The stored message is looked up by value in `msgs`. A message that is not
    /// in the list (including the empty one) counts as earlier than every entry.
    ///
    /// # Errors
    ///
    /// Returns an error if `index` is out of bounds or the status cannot be written.
    pub async fn post_next_status_msg(
        &self,
        vdb: &mut VerticaDB,
        msgs: &[&str],
        index: usize,
    ) -> Result<()> {
        let Some(next) = msgs.get(index).copied() else {
            bail!(
                "status message index {index} out of bounds, must be below {}",
                msgs.len()
            );
        };
        let posted = update_vdb_status_with_retry(self.ctx.client.as_ref(), vdb, |latest| {
            let current = latest.upgrade_status();
            if msgs.iter().position(|m| *m == current).is_some_and(|cur| cur >= index) {
                return Ok(false);
            }
            latest
                .status
                .get_or_insert_with(Default::default)
                .upgrade_status = next.to_string();
            Ok(true)
        })
        .await?;
        if posted {
            info!(vdb = %vdb.name_any(), index, message = next, "Posted upgrade status");
        }
        Ok(())
    }

    /// Point the statefulsets of `subclusters` at `image`. Returns how many changed.
    ///
    /// Statefulsets that do not exist yet are left to the object reconciler.
    ///
    /// # Errors
    ///
    /// Returns an error if a statefulset cannot be read or applied.
    pub async fn update_image_in_statefulsets(
        &self,
        vdb: &VerticaDB,
        subclusters: &[&Subcluster],
        image: &str,
    ) -> Result<usize> {
        let namespace = vdb_namespace(vdb)?;
        let vdb_name = vdb.name_any();
        let mut changed = 0;
        for sc in subclusters {
            let sts_name = sc.sts_name(&vdb_name);
            let Some(sts) = self.ctx.client.get_statefulset(&namespace, &sts_name).await? else {
                continue;
            };
            if statefulset_image(&sts).as_deref() == Some(image) {
                continue;
            }
            info!(statefulset = %sts_name, image, "Updating image in statefulset");
            self.ctx
                .client
                .apply_statefulset(&build_statefulset(vdb, sc, &namespace, image))
                .await?;
            changed += 1;
        }
        Ok(changed)
    }

    /// Delete pods that run an image other than `image`, optionally only in one subcluster.
    /// Returns how many were deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if a pod cannot be deleted.
    pub async fn delete_pods_running_old_image(
        &self,
        vdb: &VerticaDB,
        pfacts: &PodFacts,
        image: &str,
        subcluster: Option<&str>,
    ) -> Result<usize> {
        let namespace = vdb_namespace(vdb)?;
        let mut deleted = 0;
        for pf in pfacts.find_pods_with_old_image(image) {
            if subcluster.is_some_and(|sc| sc != pf.subcluster) {
                continue;
            }
            info!(pod = %pf.name, old_image = %pf.image, "Deleting pod that had old image");
            self.ctx.client.delete_pod(&namespace, &pf.name).await?;
            deleted += 1;
        }
        Ok(deleted)
    }

    /// Remember the images the main-cluster primaries run right now.
    ///
    /// # Errors
    ///
    /// Returns an error if statefulsets cannot be read.
    pub async fn cache_primary_images(&mut self, vdb: &VerticaDB) -> Result<()> {
        let namespace = vdb_namespace(vdb)?;
        let vdb_name = vdb.name_any();
        self.primary_images.clear();
        for sc in main_primaries(vdb) {
            let sts = self
                .ctx
                .client
                .get_statefulset(&namespace, &sc.sts_name(&vdb_name))
                .await?;
            if let Some(image) = sts.as_ref().and_then(statefulset_image) {
                if !self.primary_images.contains(&image) {
                    self.primary_images.push(image);
                }
            }
        }
        debug!(vdb = %vdb_name, images = ?self.primary_images, "Cached primary images");
        Ok(())
    }

    /// Image the cluster ran before the upgrade, if any primary still runs it.
    #[must_use]
    pub fn fetch_old_image(&self, vdb: &VerticaDB) -> Option<&str> {
        self.primary_images
            .iter()
            .map(String::as_str)
            .find(|image| *image != vdb.spec.image)
    }

    /// Requeue while clients still have sessions open on `subcluster`.
    ///
    /// A subcluster without up pods has no sessions. A failed count query requeues.
    ///
    /// # Errors
    ///
    /// Returns an error only if the namespace is missing.
    pub async fn is_subcluster_idle(
        &self,
        vdb: &VerticaDB,
        pfacts: &PodFacts,
        subcluster: &str,
    ) -> Result<ReconcileResult> {
        let namespace = vdb_namespace(vdb)?;
        let Some(pf) = pfacts.find_up_pods_in_subcluster(subcluster).into_iter().next() else {
            debug!(subcluster, "No up pods in subcluster, treating it as idle");
            return Ok(ReconcileResult::done());
        };
        let sql = format!("{SESSION_COUNT_SQL}'{subcluster}'");
        match self
            .ctx
            .runner
            .exec(&namespace, &pf.name, SERVER_CONTAINER, &vsql_command(&sql))
            .await
        {
            Ok(out) => {
                let sessions = parse_count(&out.stdout);
                if sessions > 0 {
                    info!(subcluster, sessions, "Subcluster still has active sessions");
                    return Ok(ReconcileResult::requeue());
                }
                Ok(ReconcileResult::done())
            }
            Err(e) => {
                warn!(subcluster, pod = %pf.name, error = %e, "Failed to count sessions");
                Ok(ReconcileResult::requeue())
            }
        }
    }

    /// Forcibly close every client session in the cluster segment of `pfacts`.
    ///
    /// # Errors
    ///
    /// Returns an error if the close command fails.
    pub async fn close_all_sessions(&self, vdb: &VerticaDB, pfacts: &PodFacts) -> Result<()> {
        let namespace = vdb_namespace(vdb)?;
        let Some(pf) = pfacts.find_first_up_pod(true, None) else {
            debug!(vdb = %vdb.name_any(), "No up pods, no sessions to close");
            return Ok(());
        };
        info!(vdb = %vdb.name_any(), pod = %pf.name, "Closing all client sessions");
        self.ctx
            .runner
            .exec(
                &namespace,
                &pf.name,
                SERVER_CONTAINER,
                &vsql_command(CLOSE_SESSIONS_SQL),
            )
            .await?;
        Ok(())
    }
}
