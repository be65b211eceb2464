// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory cluster used by unit tests.
//!
//! [`FakeCluster`] implements [`ClusterClient`], [`PodRunner`] and [`Dispatcher`]
//! over one shared world:
//!
//! - `VerticaDB` writes check `resourceVersion` and fail with 409 when stale.
//!   Spec and status are written separately, so status lags spec the way it does
//!   against a real API server.
//! - Applying a statefulset creates running pods; deleting a pod recreates it
//!   from the statefulset template with its node down.
//! - Commands run in pods are answered from simulated node state.
//! - Dispatcher calls are recorded and change node state the way the database would.

use crate::cluster::ClusterClient;
use crate::context::{Context, Settings};
use crate::crd::{
    Condition, Subcluster, SubclusterStatus, VerticaDB, VerticaDBSpec, VerticaDBStatus,
    VerticaReplicator, VerticaReplicatorStatus,
};
use crate::dispatcher::{Dispatcher, PodTarget, RotateNmaCertsOptions, StopDbOptions};
use crate::labels::{SUBCLUSTER_NAME, VERTICA_DATABASE};
use crate::pod_runner::{ExecOutput, PodRunner};
use crate::podfacts::{PodFacts, NODE_STATE_QUERY, SHARD_SUBSCRIPTION_QUERY};
use crate::reconcilers::objects::{build_statefulset, statefulset_image};
use crate::reconcilers::upgrade::{CLOSE_SESSIONS_SQL, SESSION_COUNT_SQL};
use crate::status_reasons::{CONDITION_REPLICATION_COMPLETE, CONDITION_TRUE};
use crate::crd::SubclusterType;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Pod, PodSpec, PodStatus, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::events::EventType;
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

pub const TEST_NAMESPACE: &str = "default";

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn api_error(code: u16, reason: &str, message: String) -> anyhow::Error {
    anyhow!(kube::Error::Api(
        kube::core::Status::failure(&message, reason)
            .with_code(code)
            .boxed()
    ))
}

/// Simulated database node behind one pod.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeSim {
    pub up: bool,
    pub read_only: bool,
    pub installed: bool,
    pub db_exists: bool,
    pub sessions: u32,
    pub shards: u32,
    /// Catalog subcluster name after a rename. `None` means the pod label.
    pub catalog_subcluster: Option<String>,
}

/// A recorded event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedEvent {
    pub warning: bool,
    pub reason: String,
    pub note: String,
}

#[derive(Default)]
struct World {
    vdbs: BTreeMap<Key, VerticaDB>,
    statefulsets: BTreeMap<Key, StatefulSet>,
    pods: BTreeMap<Key, Pod>,
    services: BTreeMap<Key, Service>,
    replicators: BTreeMap<Key, VerticaReplicator>,
    nodes: BTreeMap<String, NodeSim>,
    events: Vec<RecordedEvent>,
    calls: Vec<String>,
    failing_commands: BTreeSet<String>,
    pending_conflicts: usize,
    next_version: u64,
    next_ip: u32,
    next_replicator: u32,
}

impl World {
    fn bump_version(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    fn check_write(&mut self, vdb: &VerticaDB) -> Result<Key> {
        let namespace = vdb.namespace().unwrap_or_default();
        let k = key(&namespace, &vdb.name_any());
        let Some(stored) = self.vdbs.get(&k) else {
            return Err(api_error(404, "NotFound", format!("verticadb {} not found", k.1)));
        };
        if self.pending_conflicts > 0 {
            self.pending_conflicts -= 1;
            return Err(api_error(409, "Conflict", "injected conflict".to_string()));
        }
        if stored.metadata.resource_version != vdb.metadata.resource_version {
            return Err(api_error(409, "Conflict", format!("verticadb {} is stale", k.1)));
        }
        Ok(k)
    }

    fn make_pod(&mut self, sts: &StatefulSet, ordinal: i32) -> Pod {
        self.next_ip += 1;
        let template = sts.spec.as_ref().map(|s| s.template.clone()).unwrap_or_default();
        Pod {
            metadata: ObjectMeta {
                name: Some(format!("{}-{ordinal}", sts.name_any())),
                namespace: sts.namespace(),
                labels: template.metadata.and_then(|m| m.labels),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: template.spec.map(|s| s.containers).unwrap_or_default(),
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                pod_ip: Some(format!("10.0.{}.{}", self.next_ip / 250, self.next_ip % 250 + 1)),
                ..Default::default()
            }),
        }
    }

    /// Names of the pods of `vdb` whose subcluster satisfies `pred`.
    fn pods_of<F>(&self, vdb: &VerticaDB, pred: F) -> Vec<String>
    where
        F: Fn(&str) -> bool,
    {
        let vdb_name = vdb.name_any();
        self.pods
            .values()
            .filter(|pod| pod.labels().get(VERTICA_DATABASE) == Some(&vdb_name))
            .filter(|pod| {
                pod.labels()
                    .get(SUBCLUSTER_NAME)
                    .is_some_and(|sc| pred(sc))
            })
            .map(ResourceExt::name_any)
            .collect()
    }

    /// Subcluster the node behind `pod` belongs to in the catalog.
    fn catalog_subcluster(&self, namespace: &str, pod: &str) -> Option<String> {
        self.nodes
            .get(pod)
            .and_then(|n| n.catalog_subcluster.clone())
            .or_else(|| self.pod_subcluster(namespace, pod))
    }

    fn pod_subcluster(&self, namespace: &str, pod: &str) -> Option<String> {
        self.pods
            .get(&key(namespace, pod))
            .and_then(|p| p.labels().get(SUBCLUSTER_NAME).cloned())
    }
}

/// In-memory implementation of every collaborator trait.
#[derive(Default)]
pub struct FakeCluster {
    world: Mutex<World>,
}

impl FakeCluster {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn world(&self) -> MutexGuard<'_, World> {
        self.world.lock().expect("fake world poisoned")
    }

    /// Context whose collaborators all point at this fake.
    #[must_use]
    pub fn context(self: &Arc<Self>) -> Arc<Context> {
        Arc::new(Context {
            client: self.clone(),
            runner: self.clone(),
            dispatcher: self.clone(),
            settings: Settings::default(),
        })
    }

    #[must_use]
    pub fn pod_facts(self: &Arc<Self>, sandbox: Option<&str>) -> PodFacts {
        PodFacts::new(self.clone(), self.clone(), sandbox.map(str::to_string))
    }

    /// Store `vdb` as if a user created it and return the persisted copy.
    pub fn seed_vdb(&self, mut vdb: VerticaDB) -> VerticaDB {
        let mut world = self.world();
        vdb.metadata.resource_version = Some(world.bump_version());
        vdb.metadata.generation = Some(1);
        let k = key(&vdb.namespace().unwrap_or_default(), &vdb.name_any());
        world.vdbs.insert(k, vdb.clone());
        vdb
    }

    /// Persisted copy of a `VerticaDB`.
    #[must_use]
    pub fn vdb(&self, namespace: &str, name: &str) -> VerticaDB {
        self.world()
            .vdbs
            .get(&key(namespace, name))
            .cloned()
            .expect("vdb not seeded")
    }

    /// Change the spec of a stored `VerticaDB` the way a user edit would.
    pub fn edit_vdb<F>(&self, namespace: &str, name: &str, edit: F) -> VerticaDB
    where
        F: FnOnce(&mut VerticaDB),
    {
        let mut world = self.world();
        let version = world.bump_version();
        let vdb = world.vdbs.get_mut(&key(namespace, name)).expect("vdb not seeded");
        edit(vdb);
        vdb.metadata.resource_version = Some(version);
        vdb.metadata.generation = Some(vdb.metadata.generation.unwrap_or(0) + 1);
        vdb.clone()
    }

    /// Make the next `n` `VerticaDB` writes fail with a conflict.
    pub fn inject_conflicts(&self, n: usize) {
        self.world().pending_conflicts = n;
    }

    /// Make dispatcher operation `operation` fail.
    pub fn fail_command(&self, operation: &str) {
        self.world().failing_commands.insert(operation.to_string());
    }

    /// Undo [`FakeCluster::fail_command`].
    pub fn heal_command(&self, operation: &str) {
        self.world().failing_commands.remove(operation);
    }

    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.world().calls.clone()
    }

    /// Recorded dispatcher calls whose operation is `operation`.
    #[must_use]
    pub fn calls_to(&self, operation: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.split(' ').next() == Some(operation))
            .collect()
    }

    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.world().events.clone()
    }

    #[must_use]
    pub fn event_reasons(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.reason).collect()
    }

    #[must_use]
    pub fn node(&self, pod: &str) -> NodeSim {
        self.world().nodes.get(pod).cloned().unwrap_or_default()
    }

    pub fn set_node<F>(&self, pod: &str, change: F)
    where
        F: FnOnce(&mut NodeSim),
    {
        change(self.world().nodes.entry(pod.to_string()).or_default());
    }

    /// Set the phase of a pod, e.g. to simulate a pending reschedule.
    pub fn set_pod_phase(&self, namespace: &str, pod: &str, phase: &str) {
        if let Some(p) = self.world().pods.get_mut(&key(namespace, pod)) {
            p.status.get_or_insert_with(Default::default).phase = Some(phase.to_string());
        }
    }

    #[must_use]
    pub fn pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        self.world().pods.get(&key(namespace, name)).cloned()
    }

    #[must_use]
    pub fn pod_names(&self) -> Vec<String> {
        self.world().pods.keys().map(|(_, n)| n.clone()).collect()
    }

    #[must_use]
    pub fn pod_label(&self, namespace: &str, pod: &str, label: &str) -> Option<String> {
        self.pod(namespace, pod)
            .and_then(|p| p.labels().get(label).cloned())
    }

    #[must_use]
    pub fn statefulset(&self, namespace: &str, name: &str) -> Option<StatefulSet> {
        self.world().statefulsets.get(&key(namespace, name)).cloned()
    }

    #[must_use]
    pub fn service(&self, namespace: &str, name: &str) -> Option<Service> {
        self.world().services.get(&key(namespace, name)).cloned()
    }

    #[must_use]
    pub fn replicators(&self) -> Vec<VerticaReplicator> {
        self.world().replicators.values().cloned().collect()
    }

    /// Mark a replicator's replication as finished.
    pub fn complete_replication(&self, namespace: &str, name: &str) {
        if let Some(vrep) = self.world().replicators.get_mut(&key(namespace, name)) {
            vrep.status = Some(VerticaReplicatorStatus {
                conditions: vec![Condition {
                    r#type: CONDITION_REPLICATION_COMPLETE.to_string(),
                    status: CONDITION_TRUE.to_string(),
                    ..Default::default()
                }],
                state: "Replication successful".to_string(),
            });
        }
    }

    /// Bring up a running database for the seeded `vdb`: statefulsets, pods with
    /// up nodes, and every subcluster recorded in status.
    pub fn start_database(&self, vdb: &VerticaDB) -> VerticaDB {
        let namespace = vdb.namespace().unwrap_or_default();
        {
            let mut world = self.world();
            for sc in &vdb.spec.subclusters {
                let sts = build_statefulset(vdb, sc, &namespace, &vdb.desired_image(sc));
                sync_statefulset(&mut world, sts);
                for ordinal in 0..sc.size {
                    let node = world
                        .nodes
                        .entry(format!("{}-{ordinal}", sc.sts_name(&vdb.name_any())))
                        .or_default();
                    node.up = true;
                    node.db_exists = true;
                    node.installed = true;
                    node.shards = 1;
                }
            }
        }
        let mut world = self.world();
        let version = world.bump_version();
        let stored = world
            .vdbs
            .get_mut(&key(&namespace, &vdb.name_any()))
            .expect("vdb not seeded");
        let status = stored.status.get_or_insert_with(VerticaDBStatus::default);
        status.subclusters = vdb
            .spec
            .subclusters
            .iter()
            .map(|sc| SubclusterStatus {
                name: sc.name.clone(),
                added_to_db: true,
                up_node_count: sc.size,
            })
            .collect();
        stored.metadata.resource_version = Some(version);
        stored.clone()
    }

    /// Rename `old_name` in the simulated catalog. Calling it directly models
    /// a rename the `VerticaDB` never recorded.
    pub fn rename_in_catalog(&self, vdb: &VerticaDB, old_name: &str, new_name: &str) -> Result<()> {
        let namespace = vdb.namespace().unwrap_or_default();
        let mut world = self.world();
        let members: Vec<String> = world
            .pods_of(vdb, |_| true)
            .into_iter()
            .filter(|pod| world.catalog_subcluster(&namespace, pod).as_deref() == Some(old_name))
            .collect();
        if members.is_empty() {
            bail!("subcluster {old_name} does not exist");
        }
        for pod in members {
            world.nodes.entry(pod).or_default().catalog_subcluster = Some(new_name.to_string());
        }
        Ok(())
    }

    fn record(&self, call: String) -> Result<()> {
        let mut world = self.world();
        let operation = call.split(' ').next().unwrap_or_default().to_string();
        world.calls.push(call.clone());
        if world.failing_commands.contains(&operation) {
            bail!("{call}: simulated failure");
        }
        Ok(())
    }
}

/// Store `sts` and reconcile its pods the way the statefulset controller would.
fn sync_statefulset(world: &mut World, sts: StatefulSet) {
    let namespace = sts.namespace().unwrap_or_default();
    let name = sts.name_any();
    let replicas = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0);
    for ordinal in 0..replicas {
        let pod_key = key(&namespace, &format!("{name}-{ordinal}"));
        if !world.pods.contains_key(&pod_key) {
            let pod = world.make_pod(&sts, ordinal);
            let node = world.nodes.entry(pod_key.1.clone()).or_default();
            node.installed = true;
            world.pods.insert(pod_key, pod);
        }
    }
    let prefix = format!("{name}-");
    let extra: Vec<Key> = world
        .pods
        .keys()
        .filter(|(ns, pod)| {
            *ns == namespace
                && pod
                    .strip_prefix(&prefix)
                    .and_then(|o| o.parse::<i32>().ok())
                    .is_some_and(|o| o >= replicas)
        })
        .cloned()
        .collect();
    for k in extra {
        world.pods.remove(&k);
        world.nodes.remove(&k.1);
    }
    world.statefulsets.insert(key(&namespace, &name), sts);
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn get_vdb(&self, namespace: &str, name: &str) -> Result<VerticaDB> {
        self.world()
            .vdbs
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| api_error(404, "NotFound", format!("verticadb {name} not found")))
    }

    async fn update_vdb(&self, vdb: &VerticaDB) -> Result<VerticaDB> {
        let mut world = self.world();
        let k = world.check_write(vdb)?;
        let version = world.bump_version();
        let stored = world.vdbs.get_mut(&k).expect("checked above");
        if stored.spec != vdb.spec {
            stored.metadata.generation = Some(stored.metadata.generation.unwrap_or(0) + 1);
        }
        stored.spec = vdb.spec.clone();
        stored.metadata.annotations.clone_from(&vdb.metadata.annotations);
        stored.metadata.labels.clone_from(&vdb.metadata.labels);
        stored.metadata.resource_version = Some(version);
        Ok(stored.clone())
    }

    async fn update_vdb_status(&self, vdb: &VerticaDB) -> Result<VerticaDB> {
        let mut world = self.world();
        let k = world.check_write(vdb)?;
        let version = world.bump_version();
        let stored = world.vdbs.get_mut(&k).expect("checked above");
        stored.status.clone_from(&vdb.status);
        stored.metadata.resource_version = Some(version);
        Ok(stored.clone())
    }

    async fn get_statefulset(&self, namespace: &str, name: &str) -> Result<Option<StatefulSet>> {
        Ok(self.statefulset(namespace, name))
    }

    async fn list_statefulsets(&self, namespace: &str, selector: &str) -> Result<Vec<StatefulSet>> {
        let wanted = parse_selector(selector);
        Ok(self
            .world()
            .statefulsets
            .iter()
            .filter(|((ns, _), sts)| ns == namespace && matches_selector(sts.labels(), &wanted))
            .map(|(_, sts)| sts.clone())
            .collect())
    }

    async fn apply_statefulset(&self, sts: &StatefulSet) -> Result<()> {
        sync_statefulset(&mut self.world(), sts.clone());
        Ok(())
    }

    async fn delete_statefulset(&self, namespace: &str, name: &str) -> Result<()> {
        let mut world = self.world();
        world.statefulsets.remove(&key(namespace, name));
        let prefix = format!("{name}-");
        let owned: Vec<Key> = world
            .pods
            .keys()
            .filter(|(ns, pod)| {
                ns == namespace
                    && pod
                        .strip_prefix(&prefix)
                        .is_some_and(|ordinal| ordinal.parse::<i32>().is_ok())
            })
            .cloned()
            .collect();
        for k in owned {
            world.pods.remove(&k);
            world.nodes.remove(&k.1);
        }
        Ok(())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        Ok(self.pod(namespace, name))
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let mut world = self.world();
        if world.pods.remove(&key(namespace, name)).is_none() {
            return Ok(());
        }
        if let Some(node) = world.nodes.get_mut(name) {
            node.up = false;
            node.sessions = 0;
        }
        // The statefulset controller recreates the pod from the current template.
        let owner = world
            .statefulsets
            .values()
            .find(|sts| {
                sts.namespace().as_deref() == Some(namespace)
                    && name
                        .strip_prefix(&format!("{}-", sts.name_any()))
                        .is_some_and(|o| o.parse::<i32>().is_ok())
            })
            .cloned();
        if let Some(sts) = owner {
            if let Some(ordinal) = name
                .rsplit('-')
                .next()
                .and_then(|o| o.parse::<i32>().ok())
            {
                let pod = world.make_pod(&sts, ordinal);
                world.pods.insert(key(namespace, name), pod);
            }
        }
        Ok(())
    }

    async fn patch_pod_labels(
        &self,
        namespace: &str,
        name: &str,
        labels: &BTreeMap<String, Option<String>>,
    ) -> Result<()> {
        let mut world = self.world();
        let Some(pod) = world.pods.get_mut(&key(namespace, name)) else {
            return Err(api_error(404, "NotFound", format!("pod {name} not found")));
        };
        let current = pod.metadata.labels.get_or_insert_with(BTreeMap::new);
        for (k, v) in labels {
            match v {
                Some(v) => {
                    current.insert(k.clone(), v.clone());
                }
                None => {
                    current.remove(k);
                }
            }
        }
        Ok(())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        Ok(self.service(namespace, name))
    }

    async fn list_services(&self, namespace: &str, selector: &str) -> Result<Vec<Service>> {
        let wanted = parse_selector(selector);
        Ok(self
            .world()
            .services
            .iter()
            .filter(|((ns, _), svc)| ns == namespace && matches_selector(svc.labels(), &wanted))
            .map(|(_, svc)| svc.clone())
            .collect())
    }

    async fn apply_service(&self, svc: &Service) -> Result<()> {
        let k = key(&svc.namespace().unwrap_or_default(), &svc.name_any());
        self.world().services.insert(k, svc.clone());
        Ok(())
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
        self.world().services.remove(&key(namespace, name));
        Ok(())
    }

    async fn create_replicator(&self, vrep: &VerticaReplicator) -> Result<VerticaReplicator> {
        let mut world = self.world();
        world.next_replicator += 1;
        let mut created = vrep.clone();
        let prefix = vrep.metadata.generate_name.clone().unwrap_or_default();
        created.metadata.name = Some(format!("{prefix}{:05}", world.next_replicator));
        let k = key(&created.namespace().unwrap_or_default(), &created.name_any());
        world.replicators.insert(k, created.clone());
        Ok(created)
    }

    async fn get_replicator(&self, namespace: &str, name: &str) -> Result<Option<VerticaReplicator>> {
        Ok(self.world().replicators.get(&key(namespace, name)).cloned())
    }

    async fn delete_replicator(&self, namespace: &str, name: &str) -> Result<()> {
        self.world().replicators.remove(&key(namespace, name));
        Ok(())
    }

    async fn publish_event(&self, _vdb: &VerticaDB, type_: EventType, reason: &str, note: &str) {
        self.world().events.push(RecordedEvent {
            warning: type_ == EventType::Warning,
            reason: reason.to_string(),
            note: note.to_string(),
        });
    }
}

fn parse_selector(selector: &str) -> Vec<(String, String)> {
    selector
        .split(',')
        .filter_map(|kv| kv.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn matches_selector(labels: &BTreeMap<String, String>, wanted: &[(String, String)]) -> bool {
    wanted.iter().all(|(k, v)| labels.get(k) == Some(v))
}

#[async_trait]
impl PodRunner for FakeCluster {
    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        _container: &str,
        command: &[String],
    ) -> Result<ExecOutput> {
        let mut world = self.world();
        let running = world
            .pods
            .get(&key(namespace, pod))
            .and_then(|p| p.status.as_ref()?.phase.clone())
            .is_some_and(|phase| phase == "Running");
        if !running {
            bail!("pod {pod} is not running");
        }
        let script = command.join(" ");
        let node = world.nodes.get(pod).cloned().unwrap_or_default();

        let stdout = if script.contains("installed:") {
            format!("installed: {}\ndb_exists: {}\n", node.installed, node.db_exists)
        } else if script.contains(NODE_STATE_QUERY) {
            if node.up {
                let ro = if node.read_only { "t" } else { "f" };
                let subcluster = world.catalog_subcluster(namespace, pod).unwrap_or_default();
                format!("UP|45035996273704980|{ro}|{subcluster}\n")
            } else {
                bail!("vsql: could not connect to server");
            }
        } else if script.contains(SHARD_SUBSCRIPTION_QUERY) {
            format!("{}\n", node.shards)
        } else if script.contains(SESSION_COUNT_SQL) {
            let subcluster = world.pod_subcluster(namespace, pod).unwrap_or_default();
            let members: Vec<String> = world
                .pods
                .values()
                .filter(|p| p.labels().get(SUBCLUSTER_NAME) == Some(&subcluster))
                .map(ResourceExt::name_any)
                .collect();
            let total: u32 = members
                .iter()
                .filter_map(|m| world.nodes.get(m))
                .map(|n| n.sessions)
                .sum();
            format!("{total}\n")
        } else if script.contains(CLOSE_SESSIONS_SQL) {
            for node in world.nodes.values_mut() {
                node.sessions = 0;
            }
            "CLOSE_ALL_SESSIONS\n".to_string()
        } else {
            bail!("unexpected command: {script}");
        };
        Ok(ExecOutput {
            stdout,
            stderr: String::new(),
        })
    }
}

#[async_trait]
impl Dispatcher for FakeCluster {
    async fn stop_db(&self, vdb: &VerticaDB, _initiator: &PodTarget, opts: &StopDbOptions) -> Result<()> {
        let sandbox = opts.sandbox.clone();
        self.record(format!("stop_db {}", sandbox.clone().unwrap_or_default()).trim().to_string())?;
        let mut world = self.world();
        for pod in world.pods_of(vdb, |sc| vdb.realized_sandbox_of(sc) == sandbox.as_deref()) {
            if let Some(node) = world.nodes.get_mut(&pod) {
                node.up = false;
                node.sessions = 0;
            }
        }
        Ok(())
    }

    async fn restart_nodes(
        &self,
        _vdb: &VerticaDB,
        _initiator: &PodTarget,
        nodes: &[PodTarget],
        sandbox: Option<&str>,
    ) -> Result<()> {
        let pods: Vec<&str> = nodes.iter().map(|n| n.pod.as_str()).collect();
        self.record(format!("restart_nodes {} {}", pods.join(","), sandbox.unwrap_or("")).trim().to_string())?;
        let mut world = self.world();
        for pod in pods {
            let node = world.nodes.entry(pod.to_string()).or_default();
            node.up = true;
            node.db_exists = true;
        }
        Ok(())
    }

    async fn add_subcluster(
        &self,
        _vdb: &VerticaDB,
        _initiator: &PodTarget,
        subcluster: &str,
        subcluster_type: SubclusterType,
    ) -> Result<()> {
        self.record(format!("add_subcluster {subcluster} {}", subcluster_type.as_str()))
    }

    async fn add_node(
        &self,
        _vdb: &VerticaDB,
        _initiator: &PodTarget,
        subcluster: &str,
        nodes: &[PodTarget],
    ) -> Result<()> {
        let pods: Vec<&str> = nodes.iter().map(|n| n.pod.as_str()).collect();
        self.record(format!("add_node {subcluster} {}", pods.join(",")))?;
        let mut world = self.world();
        for pod in pods {
            let node = world.nodes.entry(pod.to_string()).or_default();
            node.up = true;
            node.db_exists = true;
        }
        Ok(())
    }

    async fn remove_subcluster(&self, vdb: &VerticaDB, _initiator: &PodTarget, subcluster: &str) -> Result<()> {
        self.record(format!("remove_subcluster {subcluster}"))?;
        let mut world = self.world();
        for pod in world.pods_of(vdb, |sc| sc == subcluster) {
            if let Some(node) = world.nodes.get_mut(&pod) {
                node.up = false;
                node.db_exists = false;
            }
        }
        Ok(())
    }

    async fn rebalance_shards(&self, _vdb: &VerticaDB, _initiator: &PodTarget, subcluster: &str) -> Result<()> {
        self.record(format!("rebalance_shards {subcluster}"))
    }

    async fn sandbox_subcluster(
        &self,
        _vdb: &VerticaDB,
        _initiator: &PodTarget,
        sandbox: &str,
        subcluster: &str,
    ) -> Result<()> {
        self.record(format!("sandbox_subcluster {sandbox} {subcluster}"))
    }

    async fn promote_sandbox_to_main(&self, _vdb: &VerticaDB, _initiator: &PodTarget, sandbox: &str) -> Result<()> {
        self.record(format!("promote_sandbox_to_main {sandbox}"))
    }

    async fn rename_subcluster(
        &self,
        vdb: &VerticaDB,
        _initiator: &PodTarget,
        old_name: &str,
        new_name: &str,
    ) -> Result<()> {
        self.record(format!("rename_subcluster {old_name} {new_name}"))?;
        self.rename_in_catalog(vdb, old_name, new_name)
    }

    async fn alter_subcluster_type(
        &self,
        _vdb: &VerticaDB,
        _initiator: &PodTarget,
        subcluster: &str,
        new_type: SubclusterType,
        _sandbox: Option<&str>,
    ) -> Result<()> {
        self.record(format!("alter_subcluster_type {subcluster} {}", new_type.as_str()))
    }

    async fn stop_subcluster(&self, vdb: &VerticaDB, _initiator: &PodTarget, subcluster: &str) -> Result<()> {
        self.record(format!("stop_subcluster {subcluster}"))?;
        let mut world = self.world();
        for pod in world.pods_of(vdb, |sc| sc == subcluster) {
            if let Some(node) = world.nodes.get_mut(&pod) {
                node.up = false;
            }
        }
        Ok(())
    }

    async fn install_packages(&self, _vdb: &VerticaDB, _initiator: &PodTarget) -> Result<()> {
        self.record("install_packages".to_string())
    }

    async fn rotate_nma_certs(
        &self,
        _vdb: &VerticaDB,
        _initiator: &PodTarget,
        opts: &RotateNmaCertsOptions,
    ) -> Result<()> {
        self.record(format!("rotate_nma_certs {}", opts.new_secret))
    }
}

/// A `VerticaDB` in the test namespace.
#[must_use]
pub fn test_vdb(name: &str, image: &str, subclusters: Vec<Subcluster>) -> VerticaDB {
    let mut vdb = VerticaDB::new(
        name,
        VerticaDBSpec {
            image: image.to_string(),
            subclusters,
            ..Default::default()
        },
    );
    vdb.metadata.namespace = Some(TEST_NAMESPACE.to_string());
    vdb.metadata.uid = Some(format!("uid-{name}"));
    vdb
}

/// Image the statefulset of `sc` currently runs.
#[must_use]
pub fn sts_image(fake: &FakeCluster, vdb: &VerticaDB, sc: &Subcluster) -> Option<String> {
    fake.statefulset(TEST_NAMESPACE, &sc.sts_name(&vdb.name_any()))
        .as_ref()
        .and_then(statefulset_image)
}
