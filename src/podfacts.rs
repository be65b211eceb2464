// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Point-in-time facts about every pod of one cluster segment.
//!
//! A segment is either the main cluster or a single sandbox. [`PodFacts::collect`]
//! builds one [`PodFact`] per pod implied by the spec: one per ordinal of each
//! member subcluster's statefulset. [`PodFacts::invalidate`] marks the table
//! stale after a mutating operation, and the next `collect` rebuilds it.
//!
//! # Collection is best-effort
//!
//! Whether a node is up, whether the software is installed, and how many shards a
//! node subscribes to are all learned by running commands in the pod. A command
//! that fails or prints something unexpected leaves the pod looking down (or the
//! flag unknown). It never aborts collection for the other pods. Only errors
//! reading pods and statefulsets from the API server are returned.
//!
//! # Queries
//!
//! The `find_*` queries return `Option`/`Vec`. Finding nothing is not an error.

use crate::cluster::ClusterClient;
use crate::constants::{DB_DATA_PATH, INSTALL_INDICATOR_PATH, POD_PHASE_RUNNING, SERVER_CONTAINER, VSQL_BIN};
use crate::context::vdb_namespace;
use crate::crd::{Subcluster, VerticaDB};
use crate::dispatcher::PodTarget;
use crate::labels::{CLIENT_ROUTING, CLIENT_ROUTING_TRUE};
use crate::pod_runner::PodRunner;
use anyhow::Result;
use futures::future::try_join_all;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// SQL that reports the state of the node the session is connected to.
pub const NODE_STATE_QUERY: &str = "select node_state, subcluster_oid, is_readonly, subclusters.subcluster_name \
     from nodes join subclusters using (node_name) \
     where node_name = (select node_name from current_session)";

/// SQL that counts the shards the connected node subscribes to.
pub const SHARD_SUBSCRIPTION_QUERY: &str = "select count(*) from v_catalog.node_subscriptions \
     where node_name = (select node_name from current_session) and shard_name != 'replica'";

/// Observations about a single pod.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PodFact {
    pub name: String,
    pub ordinal: i32,
    pub dns_name: String,
    pub pod_ip: String,
    pub subcluster: String,
    /// Sandbox the pod belongs to. `None` for the main cluster.
    pub sandbox: Option<String>,
    pub is_primary: bool,
    /// Image of the server container.
    pub image: String,
    pub exists: bool,
    pub is_running: bool,
    /// `None` when the pod could not be inspected.
    pub is_installed: Option<bool>,
    /// `None` when the pod could not be inspected.
    pub db_exists: Option<bool>,
    pub up_node: bool,
    pub read_only: bool,
    pub subcluster_oid: String,
    /// Subcluster name recorded in the catalog. Differs from `subcluster`
    /// while a rename has reached the database but not the `VerticaDB`.
    pub db_subcluster: Option<String>,
    pub shard_subscriptions: u32,
    pub has_client_routing_label: bool,
}

impl PodFact {
    #[must_use]
    pub fn target(&self) -> PodTarget {
        PodTarget {
            pod: self.name.clone(),
            ip: self.pod_ip.clone(),
        }
    }
}

/// Parsed `STATE|OID[|READONLY[|SUBCLUSTER]]` line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeState {
    pub up: bool,
    pub subcluster_oid: String,
    pub read_only: bool,
    pub subcluster_name: Option<String>,
}

/// Parse the output of [`NODE_STATE_QUERY`].
///
/// Anything that is not a well-formed line reads as a down node.
#[must_use]
pub fn parse_node_state(output: &str) -> NodeState {
    let Some(line) = output.lines().map(str::trim).find(|l| !l.is_empty()) else {
        return NodeState::default();
    };
    let fields: Vec<&str> = line.split('|').map(str::trim).collect();
    if fields.len() < 2 || fields[1].is_empty() {
        return NodeState::default();
    }
    NodeState {
        up: fields[0] == "UP",
        subcluster_oid: fields[1].to_string(),
        read_only: fields.get(2).is_some_and(|ro| *ro == "t"),
        subcluster_name: fields
            .get(3)
            .filter(|name| !name.is_empty())
            .map(|name| (*name).to_string()),
    }
}

/// Parse a single integer printed by a query. Anything else reads as zero.
#[must_use]
pub fn parse_count(output: &str) -> u32 {
    output
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .and_then(|l| l.parse().ok())
        .unwrap_or(0)
}

/// Output of the gather script.
#[derive(Debug, Deserialize)]
struct GatherState {
    installed: bool,
    db_exists: bool,
}

fn gather_command(vdb_name: &str) -> Vec<String> {
    let script = format!(
        "if [ -f {INSTALL_INDICATOR_PATH} ]; then echo 'installed: true'; else echo 'installed: false'; fi; \
         if [ -d {DB_DATA_PATH}/{vdb_name} ]; then echo 'db_exists: true'; else echo 'db_exists: false'; fi"
    );
    vec!["bash".to_string(), "-c".to_string(), script]
}

/// Build a `vsql` invocation for `sql`.
#[must_use]
pub fn vsql_command(sql: &str) -> Vec<String> {
    vec![
        VSQL_BIN.to_string(),
        "-tAc".to_string(),
        sql.to_string(),
    ]
}

/// Fact table for one cluster segment.
pub struct PodFacts {
    client: Arc<dyn ClusterClient>,
    runner: Arc<dyn PodRunner>,
    sandbox: Option<String>,
    /// Facts keyed by pod name.
    pub detail: BTreeMap<String, PodFact>,
    need_collection: bool,
}

impl PodFacts {
    /// Empty, stale table for the main cluster (`sandbox == None`) or a sandbox.
    #[must_use]
    pub fn new(
        client: Arc<dyn ClusterClient>,
        runner: Arc<dyn PodRunner>,
        sandbox: Option<String>,
    ) -> Self {
        Self {
            client,
            runner,
            sandbox,
            detail: BTreeMap::new(),
            need_collection: true,
        }
    }

    /// Empty, stale table for another segment sharing the same collaborators.
    #[must_use]
    pub fn for_sandbox(&self, sandbox: &str) -> Self {
        Self::new(
            self.client.clone(),
            self.runner.clone(),
            Some(sandbox.to_string()),
        )
    }

    #[must_use]
    pub fn sandbox(&self) -> Option<&str> {
        self.sandbox.as_deref()
    }

    /// Mark the table stale. Facts stay readable until the next `collect`.
    pub fn invalidate(&mut self) {
        self.need_collection = true;
    }

    #[must_use]
    pub fn needs_collection(&self) -> bool {
        self.need_collection
    }

    #[cfg(test)]
    pub(crate) fn mark_collected(&mut self) {
        self.need_collection = false;
    }

    /// Rebuild the table if it is stale.
    ///
    /// # Errors
    ///
    /// Returns an error if pods or statefulsets cannot be read from the API server.
    pub async fn collect(&mut self, vdb: &VerticaDB) -> Result<()> {
        if !self.need_collection {
            return Ok(());
        }
        let namespace = vdb_namespace(vdb)?;
        let vdb_name = vdb.name_any();

        let members: Vec<&Subcluster> = vdb
            .spec
            .subclusters
            .iter()
            .filter(|sc| vdb.realized_sandbox_of(&sc.name) == self.sandbox.as_deref())
            .collect();

        let this = &*self;
        let mut pending = Vec::new();
        for sc in members {
            let sts_name = sc.sts_name(&vdb_name);
            let replicas = this
                .client
                .get_statefulset(&namespace, &sts_name)
                .await?
                .and_then(|sts| sts.spec.and_then(|s| s.replicas))
                .unwrap_or(0);
            for ordinal in 0..sc.size.max(replicas) {
                let (namespace, vdb_name, sc, sts_name) =
                    (namespace.clone(), vdb_name.clone(), sc.clone(), sts_name.clone());
                pending.push(async move {
                    this.collect_pod(&namespace, &vdb_name, &sc, &sts_name, ordinal)
                        .await
                });
            }
        }

        let facts = try_join_all(pending).await?;
        self.detail = facts.into_iter().map(|pf| (pf.name.clone(), pf)).collect();
        self.need_collection = false;
        debug!(
            vdb = %vdb_name,
            sandbox = ?self.sandbox,
            pods = self.detail.len(),
            up = self.up_node_count(),
            "Collected pod facts"
        );
        Ok(())
    }

    async fn collect_pod(
        &self,
        namespace: &str,
        vdb_name: &str,
        sc: &Subcluster,
        sts_name: &str,
        ordinal: i32,
    ) -> Result<PodFact> {
        let name = format!("{sts_name}-{ordinal}");
        let mut fact = PodFact {
            name: name.clone(),
            ordinal,
            dns_name: format!("{name}.{vdb_name}.{namespace}"),
            subcluster: sc.name.clone(),
            sandbox: self.sandbox.clone(),
            is_primary: sc.is_primary(),
            ..Default::default()
        };

        let Some(pod) = self.client.get_pod(namespace, &name).await? else {
            return Ok(fact);
        };
        fill_from_pod(&mut fact, &pod);
        if !fact.is_running {
            return Ok(fact);
        }

        match self
            .runner
            .exec(namespace, &name, SERVER_CONTAINER, &gather_command(vdb_name))
            .await
        {
            Ok(out) => match serde_yaml::from_str::<GatherState>(&out.stdout) {
                Ok(state) => {
                    fact.is_installed = Some(state.installed);
                    fact.db_exists = Some(state.db_exists);
                }
                Err(e) => debug!(pod = %name, error = %e, "Unparseable gather output"),
            },
            Err(e) => debug!(pod = %name, error = %e, "Gather command failed"),
        }
        if fact.db_exists == Some(false) {
            return Ok(fact);
        }

        let state = match self
            .runner
            .exec(namespace, &name, SERVER_CONTAINER, &vsql_command(NODE_STATE_QUERY))
            .await
        {
            Ok(out) => parse_node_state(&out.stdout),
            Err(e) => {
                debug!(pod = %name, error = %e, "Node state query failed, treating node as down");
                NodeState::default()
            }
        };
        fact.up_node = state.up;
        fact.read_only = state.read_only;
        fact.subcluster_oid = state.subcluster_oid;
        fact.db_subcluster = state.subcluster_name;

        if fact.up_node {
            fact.shard_subscriptions = match self
                .runner
                .exec(
                    namespace,
                    &name,
                    SERVER_CONTAINER,
                    &vsql_command(SHARD_SUBSCRIPTION_QUERY),
                )
                .await
            {
                Ok(out) => parse_count(&out.stdout),
                Err(_) => 0,
            };
        }
        Ok(fact)
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// First up pod, in pod name order, optionally restricted to a subcluster.
    #[must_use]
    pub fn find_first_up_pod(&self, allow_read_only: bool, subcluster: Option<&str>) -> Option<&PodFact> {
        self.detail.values().find(|pf| {
            pf.up_node
                && (allow_read_only || !pf.read_only)
                && subcluster.is_none_or(|sc| pf.subcluster == sc)
        })
    }

    #[must_use]
    pub fn find_up_pods_in_subcluster(&self, subcluster: &str) -> Vec<&PodFact> {
        self.detail
            .values()
            .filter(|pf| pf.up_node && pf.subcluster == subcluster)
            .collect()
    }

    #[must_use]
    pub fn find_running_pod(&self) -> Option<&PodFact> {
        self.detail.values().find(|pf| pf.is_running)
    }

    /// Pod to run an administrative command from.
    ///
    /// Preference: up and writable, then up, then any running pod with the software installed.
    #[must_use]
    pub fn find_pod_to_run_admin_cmd(&self) -> Option<&PodFact> {
        self.find_first_up_pod(false, None)
            .or_else(|| self.find_first_up_pod(true, None))
            .or_else(|| {
                self.detail
                    .values()
                    .find(|pf| pf.is_running && pf.is_installed == Some(true))
            })
    }

    #[must_use]
    pub fn pods_in_subcluster(&self, subcluster: &str) -> Vec<&PodFact> {
        self.detail
            .values()
            .filter(|pf| pf.subcluster == subcluster)
            .collect()
    }

    #[must_use]
    pub fn up_node_count(&self) -> usize {
        self.detail.values().filter(|pf| pf.up_node).count()
    }

    #[must_use]
    pub fn subcluster_up_node_count(&self, subcluster: &str) -> usize {
        self.find_up_pods_in_subcluster(subcluster).len()
    }

    #[must_use]
    pub fn count_up_primary_nodes(&self) -> usize {
        self.detail
            .values()
            .filter(|pf| pf.is_primary && pf.up_node)
            .count()
    }

    #[must_use]
    pub fn count_primary_nodes(&self) -> usize {
        self.detail.values().filter(|pf| pf.is_primary).count()
    }

    /// Whether a strict majority of primaries stays up after `offset` more go down.
    #[must_use]
    pub fn does_db_have_quorum(&self, offset: usize) -> bool {
        let up = self.count_up_primary_nodes();
        let total = self.count_primary_nodes();
        up >= offset && 2 * (up - offset) > total
    }

    /// Running pods whose database node exists but is down.
    #[must_use]
    pub fn find_restartable_pods(&self) -> Vec<&PodFact> {
        self.detail
            .values()
            .filter(|pf| pf.is_running && pf.db_exists == Some(true) && !pf.up_node)
            .collect()
    }

    /// Running, installed pods that are not yet part of the database.
    #[must_use]
    pub fn find_pods_to_add_to_db(&self) -> Vec<&PodFact> {
        self.detail
            .values()
            .filter(|pf| {
                pf.is_running && pf.is_installed == Some(true) && pf.db_exists == Some(false)
            })
            .collect()
    }

    /// Existing pods whose server container image is not `image`.
    #[must_use]
    pub fn find_pods_with_old_image(&self, image: &str) -> Vec<&PodFact> {
        self.detail
            .values()
            .filter(|pf| pf.exists && pf.image != image)
            .collect()
    }

    #[must_use]
    pub fn any_pod_running_image(&self, image: &str) -> bool {
        self.detail
            .values()
            .any(|pf| pf.is_running && pf.image == image)
    }

    /// Whether some up pod runs an image other than `image`.
    #[must_use]
    pub fn any_up_pod_with_old_image(&self, image: &str) -> bool {
        self.detail
            .values()
            .any(|pf| pf.up_node && pf.image != image)
    }
}

fn fill_from_pod(fact: &mut PodFact, pod: &Pod) {
    fact.exists = true;
    fact.has_client_routing_label = pod
        .labels()
        .get(CLIENT_ROUTING)
        .is_some_and(|v| v == CLIENT_ROUTING_TRUE);
    if let Some(spec) = &pod.spec {
        if let Some(container) = spec
            .containers
            .iter()
            .find(|c| c.name == SERVER_CONTAINER)
        {
            fact.image = container.image.clone().unwrap_or_default();
        }
    }
    if let Some(status) = &pod.status {
        fact.is_running = status.phase.as_deref() == Some(POD_PHASE_RUNNING);
        fact.pod_ip = status.pod_ip.clone().unwrap_or_default();
    }
}

#[cfg(test)]
#[path = "podfacts_tests.rs"]
mod podfacts_tests;
