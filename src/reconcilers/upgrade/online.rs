// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Online upgrade: move the database to a new image without taking it down.
//!
//! The current subclusters become replica group A. Each gets a mirror in
//! replica group B, created on the old image and moved into a sandbox. The
//! sandbox is upgraded, caught up by replication and then promoted to be the
//! main cluster. Group A is removed and the mirrors take over the original
//! names.
//!
//! Every step is idempotent. Progress is kept in the `VerticaDB` itself (spec
//! annotations and status), so a pass that stops halfway resumes from the same
//! point on the next reconcile, even in a new operator process.
//!
//! # Steps
//!
//! | Step | Skipped when |
//! |------|--------------|
//! | [`OnlineStep::AssignGroupA`] | sandbox promoted, group A removed, or every main subcluster is tagged |
//! | [`OnlineStep::CreateMirrors`] | sandbox promoted or already realized |
//! | [`OnlineStep::SandboxGroupB`] | sandbox promoted or already realized |
//! | [`OnlineStep::PromoteMirrors`] | sandbox promoted or nothing to promote |
//! | [`OnlineStep::PauseConnections`] | sandbox promoted or replication started |
//! | [`OnlineStep::RemoveGroupA`] | group A removed from spec and database |
//! | [`OnlineStep::RenameGroupB`] | no mirror left to rename |

use super::replica_groups::{
    add_mirror_subclusters, all_main_subclusters_tagged, assign_replica_group_a,
    group_a_footprint, is_sandbox_realized, mirror_parents, mirrors_to_promote,
    place_group_b_in_sandbox, promote_sandbox_in_spec, remove_group_a_from_spec,
    rename_subcluster_in_status, update_subcluster_name_in_vdb,
};
use super::{UpgradeManager, UpgradeStyle};
use crate::context::{vdb_namespace, Context};
use crate::crd::{
    ReplicationEndpoint, Subcluster, SubclusterType, VerticaDB, VerticaReplicator,
    VerticaReplicatorSpec,
};
use crate::errors::OperatorError;
use crate::labels::CHILD_SUBCLUSTER;
use crate::meta::{subclusters_in_group, OnlineUpgradeMarkers, ReplicaGroup, SubclusterUpgradeMeta};
use crate::podfacts::{PodFact, PodFacts};
use crate::reconcilers::client_routing::{redirect_service, ClientRoutingReconciler, RoutingMode};
use crate::reconcilers::membership::{
    AddNodeReconciler, AddSubclusterReconciler, RemoveSubclusterReconciler,
};
use crate::reconcilers::objects::{owner_references, ObjectReconciler};
use crate::reconcilers::retry::{update_vdb_status_with_retry, update_vdb_with_retry};
use crate::reconcilers::sandbox::{SandboxSubclusterReconciler, SandboxUpgradeReconciler};
use crate::reconcilers::{is_reconcile_aborted, Actor, ReconcileResult};
use crate::status_reasons::{
    CONDITION_REPLICATION_COMPLETE, EVENT_PROMOTE_SANDBOX_FAILED, EVENT_RENAME_SUBCLUSTER_FAILED,
    EVENT_REPLICATION_FAILED, EVENT_REPLICATION_STARTED, EVENT_SANDBOX_PROMOTED,
    EVENT_SUBCLUSTER_RENAMED,
};
use anyhow::Result;
use async_trait::async_trait;
use kube::ResourceExt;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Progress messages posted to `status.upgradeStatus`, in order.
pub const ONLINE_UPGRADE_STATUS_MSGS: [&str; 13] = [
    "Starting online upgrade",
    "Requeue to apply the new image",
    "Create new subclusters to mirror the existing subclusters",
    "Sandbox subclusters",
    "Promote secondaries whose parent subcluster is primary",
    "Upgrade sandbox to new version",
    "Pause connections to main cluster",
    "Replicate new data from main cluster to sandbox",
    "Redirect connections to sandbox",
    "Promote sandbox to main cluster",
    "Remove original subclusters",
    "Rename new subclusters to original names",
    "Finalizing upgrade",
];

/// One step of the online upgrade, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OnlineStep {
    Start,
    LoadState,
    AssignGroupA,
    CreateMirrors,
    SandboxGroupB,
    PromoteMirrors,
    UpgradeSandbox,
    PauseConnections,
    Replicate,
    Redirect,
    PromoteSandbox,
    RemoveGroupA,
    RenameGroupB,
    Finish,
}

impl OnlineStep {
    pub const ALL: [Self; 14] = [
        Self::Start,
        Self::LoadState,
        Self::AssignGroupA,
        Self::CreateMirrors,
        Self::SandboxGroupB,
        Self::PromoteMirrors,
        Self::UpgradeSandbox,
        Self::PauseConnections,
        Self::Replicate,
        Self::Redirect,
        Self::PromoteSandbox,
        Self::RemoveGroupA,
        Self::RenameGroupB,
        Self::Finish,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::LoadState => "load_state",
            Self::AssignGroupA => "assign_group_a",
            Self::CreateMirrors => "create_mirrors",
            Self::SandboxGroupB => "sandbox_group_b",
            Self::PromoteMirrors => "promote_mirrors",
            Self::UpgradeSandbox => "upgrade_sandbox",
            Self::PauseConnections => "pause_connections",
            Self::Replicate => "replicate",
            Self::Redirect => "redirect",
            Self::PromoteSandbox => "promote_sandbox",
            Self::RemoveGroupA => "remove_group_a",
            Self::RenameGroupB => "rename_group_b",
            Self::Finish => "finish",
        }
    }

    /// Index into [`ONLINE_UPGRADE_STATUS_MSGS`] posted before the step runs.
    #[must_use]
    pub fn status_msg_index(self) -> Option<usize> {
        match self {
            Self::Start => Some(0),
            Self::LoadState => None,
            Self::AssignGroupA => Some(1),
            Self::CreateMirrors => Some(2),
            Self::SandboxGroupB => Some(3),
            Self::PromoteMirrors => Some(4),
            Self::UpgradeSandbox => Some(5),
            Self::PauseConnections => Some(6),
            Self::Replicate => Some(7),
            Self::Redirect => Some(8),
            Self::PromoteSandbox => Some(9),
            Self::RemoveGroupA => Some(10),
            Self::RenameGroupB => Some(11),
            Self::Finish => Some(12),
        }
    }
}

/// Whether a step has work left, judged from persisted state only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepStatus {
    /// Already done in an earlier pass, or not applicable.
    Skip,
    Proceed,
    /// A prerequisite is not met yet.
    Retry,
}

/// Decide whether `step` should run against `vdb`.
///
/// `old_image` is the image the main-cluster primaries ran when the pass began,
/// `None` once every primary runs `spec.image`.
#[must_use]
pub fn step_status(vdb: &VerticaDB, old_image: Option<&str>, step: OnlineStep) -> StepStatus {
    let markers = OnlineUpgradeMarkers::read(vdb);
    let promoted = markers.sandbox_promoted;
    let skip_if = |cond: bool| {
        if cond {
            StepStatus::Skip
        } else {
            StepStatus::Proceed
        }
    };

    match step {
        OnlineStep::Start | OnlineStep::LoadState | OnlineStep::Finish => StepStatus::Proceed,
        OnlineStep::AssignGroupA => skip_if(
            promoted
                || markers.replica_a_removed
                || old_image.is_none()
                || all_main_subclusters_tagged(vdb),
        ),
        OnlineStep::CreateMirrors => {
            skip_if(promoted || old_image.is_none() || is_sandbox_realized(vdb))
        }
        OnlineStep::SandboxGroupB => skip_if(promoted || is_sandbox_realized(vdb)),
        OnlineStep::PromoteMirrors => {
            if promoted || mirrors_to_promote(vdb).is_empty() {
                StepStatus::Skip
            } else if !is_sandbox_realized(vdb) {
                StepStatus::Retry
            } else {
                StepStatus::Proceed
            }
        }
        OnlineStep::UpgradeSandbox
        | OnlineStep::Replicate
        | OnlineStep::Redirect
        | OnlineStep::PromoteSandbox => skip_if(promoted),
        OnlineStep::PauseConnections => skip_if(promoted || markers.replicator.is_some()),
        OnlineStep::RemoveGroupA => {
            if markers.replica_a_removed && !group_a_footprint(vdb) {
                StepStatus::Skip
            } else if !promoted {
                StepStatus::Retry
            } else {
                StepStatus::Proceed
            }
        }
        OnlineStep::RenameGroupB => {
            if mirror_parents(vdb).is_empty() {
                StepStatus::Skip
            } else if group_a_footprint(vdb) {
                StepStatus::Retry
            } else {
                StepStatus::Proceed
            }
        }
    }
}

fn sandbox_name(vdb: &VerticaDB) -> Result<String> {
    OnlineUpgradeMarkers::read(vdb).sandbox.ok_or_else(|| {
        OperatorError::SandboxNameMissing {
            vdb: vdb.name_any(),
        }
        .into()
    })
}

/// Pod facts for `sandbox`, recreated when the slot holds facts of another segment.
fn segment_facts<'a>(
    slot: &'a mut Option<PodFacts>,
    main: &PodFacts,
    sandbox: &str,
) -> &'a mut PodFacts {
    if slot.as_ref().and_then(PodFacts::sandbox) != Some(sandbox) {
        *slot = None;
    }
    slot.get_or_insert_with(|| main.for_sandbox(sandbox))
}

/// Whether the nodes of `mirror` already carry `parent` as their catalog name.
fn renamed_in_catalog(pfacts: &PodFacts, mirror: &str, parent: &str) -> bool {
    pfacts
        .detail
        .values()
        .any(|pf| pf.subcluster == mirror && pf.db_subcluster.as_deref() == Some(parent))
}

/// Replicator copying the main cluster into `sandbox`.
fn build_replicator(vdb: &VerticaDB, namespace: &str, sandbox: &str) -> VerticaReplicator {
    let vdb_name = vdb.name_any();
    let mut vrep = VerticaReplicator::new(
        "",
        VerticaReplicatorSpec {
            source: ReplicationEndpoint {
                vertica_db: vdb_name.clone(),
                sandbox_name: None,
            },
            target: ReplicationEndpoint {
                vertica_db: vdb_name.clone(),
                sandbox_name: Some(sandbox.to_string()),
            },
            timeout: Some(vdb.replication_timeout_secs()),
        },
    );
    vrep.metadata.name = None;
    vrep.metadata.generate_name = Some(format!("{vdb_name}-"));
    vrep.metadata.namespace = Some(namespace.to_string());
    vrep.metadata.owner_references = Some(owner_references(vdb));
    vrep
}

/// Runs the online upgrade step sequence.
pub struct OnlineUpgradeReconciler {
    ctx: Arc<Context>,
    manager: UpgradeManager,
    /// Facts of the upgrade sandbox, kept across steps of one pass.
    sandbox_facts: Option<PodFacts>,
    loaded: bool,
}

impl OnlineUpgradeReconciler {
    #[must_use]
    pub fn new(ctx: Arc<Context>) -> Self {
        Self {
            manager: UpgradeManager::new(ctx.clone(), UpgradeStyle::Online),
            ctx,
            sandbox_facts: None,
            loaded: false,
        }
    }

    /// Run one step, honoring its [`StepStatus`].
    ///
    /// # Errors
    ///
    /// Returns an error if the step fails.
    pub async fn run_step(
        &mut self,
        step: OnlineStep,
        vdb: &mut VerticaDB,
        pfacts: &mut PodFacts,
    ) -> Result<ReconcileResult> {
        if !self.loaded && step != OnlineStep::LoadState {
            self.load_state(vdb).await?;
        }
        let old_image = self.manager.fetch_old_image(vdb).map(str::to_string);
        match step_status(vdb, old_image.as_deref(), step) {
            StepStatus::Skip => {
                debug!(vdb = %vdb.name_any(), step = step.as_str(), "Skipping online upgrade step");
                return Ok(ReconcileResult::done());
            }
            StepStatus::Retry => {
                info!(vdb = %vdb.name_any(), step = step.as_str(), "Online upgrade step not ready yet");
                return Ok(ReconcileResult::requeue());
            }
            StepStatus::Proceed => {}
        }
        if let Some(index) = step.status_msg_index() {
            self.manager
                .post_next_status_msg(vdb, &ONLINE_UPGRADE_STATUS_MSGS, index)
                .await?;
        }

        match step {
            OnlineStep::Start => self.manager.start_upgrade(vdb).await,
            OnlineStep::LoadState => self.load_state(vdb).await,
            OnlineStep::AssignGroupA => self.assign_group_a(vdb).await,
            OnlineStep::CreateMirrors => self.create_mirrors(vdb, pfacts, old_image).await,
            OnlineStep::SandboxGroupB => self.sandbox_group_b(vdb, pfacts, old_image).await,
            OnlineStep::PromoteMirrors => self.promote_mirrors(vdb, pfacts).await,
            OnlineStep::UpgradeSandbox => self.upgrade_sandbox(vdb, pfacts).await,
            OnlineStep::PauseConnections => self.pause_connections(vdb, pfacts).await,
            OnlineStep::Replicate => self.replicate(vdb).await,
            OnlineStep::Redirect => self.redirect(vdb, pfacts).await,
            OnlineStep::PromoteSandbox => self.promote_sandbox(vdb, pfacts).await,
            OnlineStep::RemoveGroupA => self.remove_group_a(vdb, pfacts).await,
            OnlineStep::RenameGroupB => self.rename_group_b(vdb, pfacts).await,
            OnlineStep::Finish => {
                self.sandbox_facts = None;
                self.manager.finish_upgrade(vdb).await
            }
        }
    }

    async fn load_state(&mut self, vdb: &VerticaDB) -> Result<ReconcileResult> {
        self.manager.cache_primary_images(vdb).await?;
        self.loaded = true;
        debug!(
            vdb = %vdb.name_any(),
            old_image = ?self.manager.fetch_old_image(vdb),
            markers = ?OnlineUpgradeMarkers::read(vdb),
            "Loaded online upgrade state"
        );
        Ok(ReconcileResult::done())
    }

    async fn assign_group_a(&self, vdb: &mut VerticaDB) -> Result<ReconcileResult> {
        update_vdb_with_retry(self.ctx.client.as_ref(), vdb, |latest| {
            Ok(assign_replica_group_a(latest))
        })
        .await?;
        Ok(ReconcileResult::done())
    }

    /// Run `actors` in order on the main cluster facts, stopping at the first abort.
    async fn run_actors(
        vdb: &mut VerticaDB,
        pfacts: &mut PodFacts,
        actors: Vec<Box<dyn Actor>>,
    ) -> Result<ReconcileResult> {
        for mut actor in actors {
            debug!(actor = actor.name(), "Running actor for online upgrade");
            let res = actor.reconcile(vdb, pfacts).await;
            if is_reconcile_aborted(&res) {
                return res;
            }
            pfacts.invalidate();
        }
        Ok(ReconcileResult::done())
    }

    async fn create_mirrors(
        &self,
        vdb: &mut VerticaDB,
        pfacts: &mut PodFacts,
        old_image: Option<String>,
    ) -> Result<ReconcileResult> {
        let old_image = old_image.ok_or_else(|| OperatorError::OldImageUnknown {
            vdb: vdb.name_any(),
        })?;
        update_vdb_with_retry(self.ctx.client.as_ref(), vdb, |latest| {
            add_mirror_subclusters(latest, &old_image).map_err(Into::into)
        })
        .await?;

        Self::run_actors(
            vdb,
            pfacts,
            vec![
                Box::new(ObjectReconciler::new(self.ctx.clone())),
                Box::new(AddSubclusterReconciler::new(self.ctx.clone())),
                Box::new(AddNodeReconciler::new(self.ctx.clone())),
            ],
        )
        .await
    }

    async fn sandbox_group_b(
        &self,
        vdb: &mut VerticaDB,
        pfacts: &mut PodFacts,
        old_image: Option<String>,
    ) -> Result<ReconcileResult> {
        if OnlineUpgradeMarkers::read(vdb).sandbox.is_none() {
            let old_image = old_image.ok_or_else(|| OperatorError::OldImageUnknown {
                vdb: vdb.name_any(),
            })?;
            update_vdb_with_retry(self.ctx.client.as_ref(), vdb, |latest| {
                place_group_b_in_sandbox(latest, &old_image).map_err(Into::into)
            })
            .await?;
        }

        let res = SandboxSubclusterReconciler::new(self.ctx.clone())
            .reconcile(vdb, pfacts)
            .await;
        if is_reconcile_aborted(&res) {
            return res;
        }
        pfacts.invalidate();
        if !is_sandbox_realized(vdb) {
            info!(vdb = %vdb.name_any(), "Sandbox not realized yet, requeueing");
            return Ok(ReconcileResult::requeue());
        }
        Ok(ReconcileResult::done())
    }

    async fn promote_mirrors(
        &mut self,
        vdb: &mut VerticaDB,
        pfacts: &PodFacts,
    ) -> Result<ReconcileResult> {
        let sandbox = sandbox_name(vdb)?;
        let to_promote = mirrors_to_promote(vdb);
        let sbfacts = segment_facts(&mut self.sandbox_facts, pfacts, &sandbox);
        sbfacts.collect(vdb).await?;
        let Some(initiator) = sbfacts.find_first_up_pod(true, None).map(PodFact::target) else {
            info!(sandbox = %sandbox, "No up pod in sandbox to promote subclusters from, requeueing");
            return Ok(ReconcileResult::requeue());
        };

        for name in &to_promote {
            info!(sandbox = %sandbox, subcluster = %name, "Promoting mirror to primary");
            self.ctx
                .dispatcher
                .alter_subcluster_type(vdb, &initiator, name, SubclusterType::Primary, Some(&sandbox))
                .await?;
            update_vdb_with_retry(self.ctx.client.as_ref(), vdb, |latest| {
                Ok(match latest.find_subcluster_mut(name) {
                    Some(sc) if sc.r#type != SubclusterType::Primary => {
                        sc.r#type = SubclusterType::Primary;
                        true
                    }
                    _ => false,
                })
            })
            .await?;
        }
        sbfacts.invalidate();
        Ok(ReconcileResult::done())
    }

    async fn upgrade_sandbox(
        &mut self,
        vdb: &mut VerticaDB,
        pfacts: &mut PodFacts,
    ) -> Result<ReconcileResult> {
        let sandbox = sandbox_name(vdb)?;
        let image = vdb.spec.image.clone();
        update_vdb_with_retry(self.ctx.client.as_ref(), vdb, |latest| {
            Ok(match latest.spec.sandboxes.iter_mut().find(|sb| sb.name == sandbox) {
                Some(sb) if sb.image != image => {
                    sb.image.clone_from(&image);
                    true
                }
                _ => false,
            })
        })
        .await?;

        let res = SandboxUpgradeReconciler::for_sandbox(self.ctx.clone(), &sandbox)
            .reconcile(vdb, pfacts)
            .await;
        if is_reconcile_aborted(&res) {
            return res;
        }

        let sbfacts = segment_facts(&mut self.sandbox_facts, pfacts, &sandbox);
        sbfacts.invalidate();
        sbfacts.collect(vdb).await?;
        let upgraded = !sbfacts.detail.is_empty()
            && sbfacts
                .detail
                .values()
                .all(|pf| pf.exists && pf.image == image && pf.up_node);
        if !upgraded {
            info!(sandbox = %sandbox, image = %image, "Waiting for sandbox to come up on the new image");
            return Ok(ReconcileResult::requeue());
        }
        Ok(ReconcileResult::done())
    }

    async fn pause_connections(
        &self,
        vdb: &mut VerticaDB,
        pfacts: &mut PodFacts,
    ) -> Result<ReconcileResult> {
        let group_a: Vec<String> = subclusters_in_group(vdb, ReplicaGroup::A)
            .iter()
            .map(|sc| sc.name.clone())
            .collect();
        let res = ClientRoutingReconciler::for_subclusters(
            self.ctx.clone(),
            RoutingMode::Drain,
            group_a.clone(),
        )
        .reconcile(vdb, pfacts)
        .await;
        if is_reconcile_aborted(&res) {
            return res;
        }

        pfacts.collect(vdb).await?;
        self.manager.close_all_sessions(vdb, pfacts).await?;
        for name in &group_a {
            let res = self.manager.is_subcluster_idle(vdb, pfacts, name).await?;
            if res.is_requeue() {
                return Ok(res);
            }
        }
        Ok(ReconcileResult::done())
    }

    async fn replicate(&self, vdb: &mut VerticaDB) -> Result<ReconcileResult> {
        let sandbox = sandbox_name(vdb)?;
        let namespace = vdb_namespace(vdb)?;
        let client = self.ctx.client.as_ref();

        let name = match OnlineUpgradeMarkers::read(vdb).replicator {
            Some(name) => name,
            None => {
                let vrep = build_replicator(vdb, &namespace, &sandbox);
                let created = match client.create_replicator(&vrep).await {
                    Ok(created) => created,
                    Err(e) => {
                        self.ctx
                            .publish_warning_event(
                                vdb,
                                EVENT_REPLICATION_FAILED,
                                &format!("Failed to start replication to sandbox '{sandbox}': {e}"),
                            )
                            .await;
                        return Err(e);
                    }
                };
                let name = created.name_any();
                update_vdb_with_retry(client, vdb, |latest| {
                    let mut markers = OnlineUpgradeMarkers::read(latest);
                    if markers.replicator.as_deref() == Some(name.as_str()) {
                        return Ok(false);
                    }
                    markers.replicator = Some(name.clone());
                    markers.write(latest);
                    Ok(true)
                })
                .await?;
                self.ctx
                    .publish_normal_event(
                        vdb,
                        EVENT_REPLICATION_STARTED,
                        &format!("Replication from the main cluster to sandbox '{sandbox}' started"),
                    )
                    .await;
                info!(replicator = %name, sandbox = %sandbox, "Created replicator");
                name
            }
        };

        match client.get_replicator(&namespace, &name).await? {
            None => {
                debug!(replicator = %name, "Replicator is gone, treating replication as done");
                Ok(ReconcileResult::done())
            }
            Some(vrep) if vrep.is_condition_true(CONDITION_REPLICATION_COMPLETE) => {
                info!(replicator = %name, "Replication complete");
                client.delete_replicator(&namespace, &name).await?;
                Ok(ReconcileResult::done())
            }
            Some(_) => {
                info!(replicator = %name, "Replication still running, requeueing");
                Ok(ReconcileResult::requeue())
            }
        }
    }

    async fn redirect(&mut self, vdb: &mut VerticaDB, pfacts: &PodFacts) -> Result<ReconcileResult> {
        let sandbox = sandbox_name(vdb)?;
        let vdb_name = vdb.name_any();
        let mut pairs: Vec<(Subcluster, Subcluster)> = Vec::new();
        for parent in subclusters_in_group(vdb, ReplicaGroup::A) {
            let child_name = SubclusterUpgradeMeta::read(parent).child.ok_or_else(|| {
                OperatorError::AnnotationMissing {
                    annotation: CHILD_SUBCLUSTER.to_string(),
                    subcluster: parent.name.clone(),
                }
            })?;
            let child = vdb.find_subcluster(&child_name).ok_or_else(|| {
                OperatorError::SubclusterNotFound {
                    name: child_name.clone(),
                    vdb: vdb_name.clone(),
                }
            })?;
            pairs.push((parent.clone(), child.clone()));
        }

        let children: Vec<String> = pairs.iter().map(|(_, child)| child.name.clone()).collect();
        let sbfacts = segment_facts(&mut self.sandbox_facts, pfacts, &sandbox);
        let res = ClientRoutingReconciler::for_subclusters(self.ctx.clone(), RoutingMode::Add, children)
            .reconcile(vdb, sbfacts)
            .await;
        if is_reconcile_aborted(&res) {
            return res;
        }

        for (parent, child) in &pairs {
            redirect_service(self.ctx.client.as_ref(), vdb, parent, child.service_name()).await?;
        }
        Ok(ReconcileResult::done())
    }

    async fn promote_sandbox(
        &mut self,
        vdb: &mut VerticaDB,
        pfacts: &mut PodFacts,
    ) -> Result<ReconcileResult> {
        let sandbox = sandbox_name(vdb)?;
        if vdb.get_sandbox_status(&sandbox).is_some() {
            let sbfacts = segment_facts(&mut self.sandbox_facts, pfacts, &sandbox);
            sbfacts.collect(vdb).await?;
            let Some(initiator) = sbfacts.find_first_up_pod(true, None).map(PodFact::target) else {
                info!(sandbox = %sandbox, "No up pod in sandbox to promote from, requeueing");
                return Ok(ReconcileResult::requeue());
            };
            info!(sandbox = %sandbox, "Promoting sandbox to main cluster");
            if let Err(e) = self
                .ctx
                .dispatcher
                .promote_sandbox_to_main(vdb, &initiator, &sandbox)
                .await
            {
                self.ctx
                    .publish_warning_event(
                        vdb,
                        EVENT_PROMOTE_SANDBOX_FAILED,
                        &format!("Failed to promote sandbox '{sandbox}' to main cluster: {e}"),
                    )
                    .await;
                return Err(e);
            }
            self.ctx
                .publish_normal_event(
                    vdb,
                    EVENT_SANDBOX_PROMOTED,
                    &format!("Sandbox '{sandbox}' was promoted to main cluster"),
                )
                .await;
            update_vdb_status_with_retry(self.ctx.client.as_ref(), vdb, |latest| {
                Ok(latest.status.as_mut().is_some_and(|status| {
                    let before = status.sandboxes.len();
                    status.sandboxes.retain(|sb| sb.name != sandbox);
                    before != status.sandboxes.len()
                }))
            })
            .await?;
        }

        update_vdb_with_retry(self.ctx.client.as_ref(), vdb, |latest| {
            Ok(promote_sandbox_in_spec(latest, &sandbox))
        })
        .await?;
        pfacts.invalidate();
        self.sandbox_facts = None;
        Ok(ReconcileResult::done())
    }

    async fn remove_group_a(
        &self,
        vdb: &mut VerticaDB,
        pfacts: &mut PodFacts,
    ) -> Result<ReconcileResult> {
        update_vdb_with_retry(self.ctx.client.as_ref(), vdb, |latest| {
            Ok(remove_group_a_from_spec(latest))
        })
        .await?;
        pfacts.invalidate();

        Self::run_actors(
            vdb,
            pfacts,
            vec![
                Box::new(RemoveSubclusterReconciler::new(self.ctx.clone())),
                Box::new(ObjectReconciler::new(self.ctx.clone())),
            ],
        )
        .await
    }

    async fn rename_group_b(
        &self,
        vdb: &mut VerticaDB,
        pfacts: &mut PodFacts,
    ) -> Result<ReconcileResult> {
        let pairs = mirror_parents(vdb);
        let in_db: BTreeSet<String> = vdb
            .status_subcluster_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        let pending: Vec<&(String, String)> = pairs
            .iter()
            .filter(|(mirror, parent)| in_db.contains(mirror) && !in_db.contains(parent))
            .collect();

        if !pending.is_empty() {
            pfacts.collect(vdb).await?;
            let Some(initiator) = pfacts.find_first_up_pod(true, None).map(PodFact::target) else {
                info!(vdb = %vdb.name_any(), "No up pod to rename subclusters from, requeueing");
                return Ok(ReconcileResult::requeue());
            };
            for (mirror, parent) in pending {
                if renamed_in_catalog(pfacts, mirror, parent) {
                    info!(from = %mirror, to = %parent, "Subcluster already renamed in the database");
                    update_vdb_status_with_retry(self.ctx.client.as_ref(), vdb, |latest| {
                        Ok(rename_subcluster_in_status(latest, mirror, parent))
                    })
                    .await?;
                    continue;
                }
                info!(from = %mirror, to = %parent, "Renaming subcluster");
                if let Err(e) = self
                    .ctx
                    .dispatcher
                    .rename_subcluster(vdb, &initiator, mirror, parent)
                    .await
                {
                    self.ctx
                        .publish_warning_event(
                            vdb,
                            EVENT_RENAME_SUBCLUSTER_FAILED,
                            &format!("Failed to rename subcluster '{mirror}' to '{parent}': {e}"),
                        )
                        .await;
                    return Err(e);
                }
                self.ctx
                    .publish_normal_event(
                        vdb,
                        EVENT_SUBCLUSTER_RENAMED,
                        &format!("Subcluster '{mirror}' was renamed to '{parent}'"),
                    )
                    .await;
                update_vdb_status_with_retry(self.ctx.client.as_ref(), vdb, |latest| {
                    Ok(rename_subcluster_in_status(latest, mirror, parent))
                })
                .await?;
            }
        }

        for (mirror, parent) in &pairs {
            update_vdb_with_retry(self.ctx.client.as_ref(), vdb, |latest| {
                update_subcluster_name_in_vdb(latest, mirror, parent).map_err(Into::into)
            })
            .await?;
        }
        pfacts.invalidate();
        Ok(ReconcileResult::done())
    }
}

#[async_trait]
impl Actor for OnlineUpgradeReconciler {
    fn name(&self) -> &'static str {
        "online_upgrade"
    }

    async fn reconcile(
        &mut self,
        vdb: &mut VerticaDB,
        pfacts: &mut PodFacts,
    ) -> Result<ReconcileResult> {
        if !self.manager.is_upgrade_needed(vdb).await? {
            return Ok(ReconcileResult::done());
        }

        for step in OnlineStep::ALL {
            debug!(vdb = %vdb.name_any(), step = step.as_str(), "Running online upgrade step");
            let res = self.run_step(step, vdb, pfacts).await;
            let outcome = match &res {
                Ok(r) if r.is_requeue() => "requeue",
                Ok(_) => "done",
                Err(_) => "error",
            };
            crate::metrics::record_upgrade_step(UpgradeStyle::Online.as_str(), step.as_str(), outcome);

            if is_reconcile_aborted(&res) {
                match &res {
                    Ok(_) => {
                        info!(vdb = %vdb.name_any(), step = step.as_str(), "Online upgrade step requested a requeue");
                    }
                    Err(e) => {
                        error!(vdb = %vdb.name_any(), step = step.as_str(), error = %e, "Online upgrade step failed");
                    }
                }
                let requeue_time = vdb.upgrade_requeue_duration();
                return res.map(|r| {
                    if r.requeue_after.is_none() {
                        ReconcileResult::requeue_after(requeue_time)
                    } else {
                        r
                    }
                });
            }
        }
        Ok(ReconcileResult::done())
    }
}

#[cfg(test)]
#[path = "online_tests.rs"]
mod online_tests;
