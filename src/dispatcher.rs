// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Administrative commands against the running database.
//!
//! The [`Dispatcher`] trait is the surface the reconcilers drive: stop and restart
//! nodes, change topology, sandbox and promote, rename, rotate certificates. It
//! performs no retries of its own; callers decide whether a failure aborts the
//! reconcile.
//!
//! [`VclusterDispatcher`] renders each call to a `vcluster` command line and runs it
//! in the initiator pod through a [`PodRunner`].

use crate::constants::{SERVER_CONTAINER, VCLUSTER_BIN};
use crate::crd::{SubclusterType, VerticaDB};
use crate::errors::OperatorError;
use crate::pod_runner::PodRunner;
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::info;

/// A pod addressed by an administrative command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PodTarget {
    pub pod: String,
    pub ip: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StopDbOptions {
    /// Stop this sandbox instead of the main cluster.
    pub sandbox: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RotateNmaCertsOptions {
    /// Secret holding the new certificate.
    pub new_secret: String,
}

/// Administrative operations on a live database.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn stop_db(&self, vdb: &VerticaDB, initiator: &PodTarget, opts: &StopDbOptions)
        -> Result<()>;

    async fn restart_nodes(
        &self,
        vdb: &VerticaDB,
        initiator: &PodTarget,
        nodes: &[PodTarget],
        sandbox: Option<&str>,
    ) -> Result<()>;

    async fn add_subcluster(
        &self,
        vdb: &VerticaDB,
        initiator: &PodTarget,
        subcluster: &str,
        subcluster_type: SubclusterType,
    ) -> Result<()>;

    async fn add_node(
        &self,
        vdb: &VerticaDB,
        initiator: &PodTarget,
        subcluster: &str,
        nodes: &[PodTarget],
    ) -> Result<()>;

    async fn remove_subcluster(
        &self,
        vdb: &VerticaDB,
        initiator: &PodTarget,
        subcluster: &str,
    ) -> Result<()>;

    async fn rebalance_shards(
        &self,
        vdb: &VerticaDB,
        initiator: &PodTarget,
        subcluster: &str,
    ) -> Result<()>;

    async fn sandbox_subcluster(
        &self,
        vdb: &VerticaDB,
        initiator: &PodTarget,
        sandbox: &str,
        subcluster: &str,
    ) -> Result<()>;

    async fn promote_sandbox_to_main(
        &self,
        vdb: &VerticaDB,
        initiator: &PodTarget,
        sandbox: &str,
    ) -> Result<()>;

    async fn rename_subcluster(
        &self,
        vdb: &VerticaDB,
        initiator: &PodTarget,
        old_name: &str,
        new_name: &str,
    ) -> Result<()>;

    async fn alter_subcluster_type(
        &self,
        vdb: &VerticaDB,
        initiator: &PodTarget,
        subcluster: &str,
        new_type: SubclusterType,
        sandbox: Option<&str>,
    ) -> Result<()>;

    async fn stop_subcluster(
        &self,
        vdb: &VerticaDB,
        initiator: &PodTarget,
        subcluster: &str,
    ) -> Result<()>;

    async fn install_packages(&self, vdb: &VerticaDB, initiator: &PodTarget) -> Result<()>;

    async fn rotate_nma_certs(
        &self,
        vdb: &VerticaDB,
        initiator: &PodTarget,
        opts: &RotateNmaCertsOptions,
    ) -> Result<()>;
}

/// [`Dispatcher`] that runs the `vcluster` command line in the initiator pod.
pub struct VclusterDispatcher {
    runner: Arc<dyn PodRunner>,
}

impl VclusterDispatcher {
    #[must_use]
    pub fn new(runner: Arc<dyn PodRunner>) -> Self {
        Self { runner }
    }

    async fn run(
        &self,
        vdb: &VerticaDB,
        initiator: &PodTarget,
        subcommand: &str,
        args: Vec<String>,
    ) -> Result<()> {
        let namespace = vdb.namespace().ok_or_else(|| OperatorError::NamespaceMissing {
            kind: "VerticaDB".to_string(),
            name: vdb.name_any(),
        })?;
        let mut command = vec![
            VCLUSTER_BIN.to_string(),
            subcommand.to_string(),
            "--db-name".to_string(),
            vdb.name_any(),
            "--hosts".to_string(),
            initiator.ip.clone(),
        ];
        command.extend(args);

        info!(
            vdb = %vdb.name_any(),
            initiator = %initiator.pod,
            subcommand,
            "Dispatching administrative command"
        );
        self.runner
            .exec(&namespace, &initiator.pod, SERVER_CONTAINER, &command)
            .await
            .map_err(|e| OperatorError::CommandFailed {
                command: subcommand.to_string(),
                reason: format!("{e:#}"),
            })
            .with_context(|| format!("vcluster {subcommand} on pod {}", initiator.pod))?;
        Ok(())
    }
}

fn sandbox_args(sandbox: Option<&str>) -> Vec<String> {
    sandbox
        .map(|sb| vec!["--sandbox".to_string(), sb.to_string()])
        .unwrap_or_default()
}

fn host_list(nodes: &[PodTarget]) -> String {
    nodes
        .iter()
        .map(|n| n.ip.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl Dispatcher for VclusterDispatcher {
    async fn stop_db(
        &self,
        vdb: &VerticaDB,
        initiator: &PodTarget,
        opts: &StopDbOptions,
    ) -> Result<()> {
        let args = sandbox_args(opts.sandbox.as_deref());
        self.run(vdb, initiator, "stop_db", args).await
    }

    async fn restart_nodes(
        &self,
        vdb: &VerticaDB,
        initiator: &PodTarget,
        nodes: &[PodTarget],
        sandbox: Option<&str>,
    ) -> Result<()> {
        let mut args = vec!["--start-hosts".to_string(), host_list(nodes)];
        args.extend(sandbox_args(sandbox));
        self.run(vdb, initiator, "start_node", args).await
    }

    async fn add_subcluster(
        &self,
        vdb: &VerticaDB,
        initiator: &PodTarget,
        subcluster: &str,
        subcluster_type: SubclusterType,
    ) -> Result<()> {
        let mut args = vec!["--subcluster".to_string(), subcluster.to_string()];
        if subcluster_type == SubclusterType::Primary {
            args.push("--is-primary".to_string());
        }
        self.run(vdb, initiator, "db_add_subcluster", args).await
    }

    async fn add_node(
        &self,
        vdb: &VerticaDB,
        initiator: &PodTarget,
        subcluster: &str,
        nodes: &[PodTarget],
    ) -> Result<()> {
        let args = vec![
            "--subcluster".to_string(),
            subcluster.to_string(),
            "--new-hosts".to_string(),
            host_list(nodes),
        ];
        self.run(vdb, initiator, "db_add_node", args).await
    }

    async fn remove_subcluster(
        &self,
        vdb: &VerticaDB,
        initiator: &PodTarget,
        subcluster: &str,
    ) -> Result<()> {
        let args = vec!["--subcluster".to_string(), subcluster.to_string()];
        self.run(vdb, initiator, "db_remove_subcluster", args).await
    }

    async fn rebalance_shards(
        &self,
        vdb: &VerticaDB,
        initiator: &PodTarget,
        subcluster: &str,
    ) -> Result<()> {
        let args = vec!["--subcluster".to_string(), subcluster.to_string()];
        self.run(vdb, initiator, "rebalance_shards", args).await
    }

    async fn sandbox_subcluster(
        &self,
        vdb: &VerticaDB,
        initiator: &PodTarget,
        sandbox: &str,
        subcluster: &str,
    ) -> Result<()> {
        let args = vec![
            "--sandbox".to_string(),
            sandbox.to_string(),
            "--subcluster".to_string(),
            subcluster.to_string(),
        ];
        self.run(vdb, initiator, "sandbox_subcluster", args).await
    }

    async fn promote_sandbox_to_main(
        &self,
        vdb: &VerticaDB,
        initiator: &PodTarget,
        sandbox: &str,
    ) -> Result<()> {
        let args = vec!["--sandbox".to_string(), sandbox.to_string()];
        self.run(vdb, initiator, "promote_sandbox", args).await
    }

    async fn rename_subcluster(
        &self,
        vdb: &VerticaDB,
        initiator: &PodTarget,
        old_name: &str,
        new_name: &str,
    ) -> Result<()> {
        let args = vec![
            "--subcluster".to_string(),
            old_name.to_string(),
            "--new-name".to_string(),
            new_name.to_string(),
        ];
        self.run(vdb, initiator, "rename_subcluster", args).await
    }

    async fn alter_subcluster_type(
        &self,
        vdb: &VerticaDB,
        initiator: &PodTarget,
        subcluster: &str,
        new_type: SubclusterType,
        sandbox: Option<&str>,
    ) -> Result<()> {
        let mut args = vec![
            "--subcluster".to_string(),
            subcluster.to_string(),
            "--type".to_string(),
            new_type.as_str().to_string(),
        ];
        args.extend(sandbox_args(sandbox));
        self.run(vdb, initiator, "alter_subcluster_type", args).await
    }

    async fn stop_subcluster(
        &self,
        vdb: &VerticaDB,
        initiator: &PodTarget,
        subcluster: &str,
    ) -> Result<()> {
        let args = vec!["--subcluster".to_string(), subcluster.to_string()];
        self.run(vdb, initiator, "stop_subcluster", args).await
    }

    async fn install_packages(&self, vdb: &VerticaDB, initiator: &PodTarget) -> Result<()> {
        self.run(vdb, initiator, "install_packages", Vec::new()).await
    }

    async fn rotate_nma_certs(
        &self,
        vdb: &VerticaDB,
        initiator: &PodTarget,
        opts: &RotateNmaCertsOptions,
    ) -> Result<()> {
        let args = vec!["--tls-secret".to_string(), opts.new_secret.clone()];
        self.run(vdb, initiator, "rotate_nma_certs", args).await
    }
}
