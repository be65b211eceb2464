// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Command execution inside pods.
//!
//! Fact collection, idle detection and the administrative dispatcher all run
//! commands in the database server container. [`PodRunner`] abstracts that so
//! callers can be exercised without a cluster.

use anyhow::{bail, Context as _, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams};
use kube::Client;
use tokio::io::AsyncReadExt;
use tracing::debug;

/// Captured output of a command run in a pod.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs a command in a container of a pod.
#[async_trait]
pub trait PodRunner: Send + Sync {
    /// Run `command` in `container` of `pod` and capture its output.
    ///
    /// # Errors
    ///
    /// Returns an error when the exec cannot be started or the command exits non-zero.
    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: &[String],
    ) -> Result<ExecOutput>;
}

/// [`PodRunner`] that uses the Kubernetes exec API.
#[derive(Clone)]
pub struct KubePodRunner {
    client: Client,
}

impl KubePodRunner {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PodRunner for KubePodRunner {
    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: &[String],
    ) -> Result<ExecOutput> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = AttachParams::default()
            .container(container)
            .stdout(true)
            .stderr(true);

        debug!(pod, container, command = ?command, "Executing command in pod");
        let mut attached = pods
            .exec(pod, command.to_vec(), &params)
            .await
            .with_context(|| format!("exec into pod {namespace}/{pod}"))?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        let out_reader = attached.stdout();
        let err_reader = attached.stderr();
        let read_out = async {
            if let Some(mut reader) = out_reader {
                reader.read_to_string(&mut stdout).await?;
            }
            Ok::<_, std::io::Error>(())
        };
        let read_err = async {
            if let Some(mut reader) = err_reader {
                reader.read_to_string(&mut stderr).await?;
            }
            Ok::<_, std::io::Error>(())
        };
        let (out_res, err_res) = tokio::join!(read_out, read_err);
        out_res.context("read stdout")?;
        err_res.context("read stderr")?;

        let status = match attached.take_status() {
            Some(status) => status.await,
            None => None,
        };
        attached
            .join()
            .await
            .with_context(|| format!("wait for exec in pod {pod}"))?;

        if let Some(status) = status {
            if status.status.as_deref() == Some("Failure") {
                bail!(
                    "command {:?} failed in pod {pod}: {} {}",
                    command.first(),
                    status.message.unwrap_or_default(),
                    stderr.trim()
                );
            }
        }
        Ok(ExecOutput { stdout, stderr })
    }
}
