// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Rotation of the node management agent (NMA) TLS certificate.
//!
//! `spec.nmaTLSSecret` names the desired secret and `status.nmaTLSSecretInUse`
//! the one the cluster runs with. A failed rotation sets
//! `TLSCertRollbackNeeded`, and the next pass reverts the spec to the secret
//! still in use.

use super::retry::{update_vdb_status_with_retry, update_vdb_with_retry};
use super::status::{create_condition, set_vdb_condition};
use super::{Actor, ReconcileResult};
use crate::context::Context;
use crate::crd::VerticaDB;
use crate::dispatcher::RotateNmaCertsOptions;
use crate::podfacts::{PodFact, PodFacts};
use crate::status_reasons::{
    CONDITION_FALSE, CONDITION_TLS_CERT_ROLLBACK_NEEDED, CONDITION_TRUE,
    EVENT_NMA_CERT_ROTATION_FAILED, EVENT_NMA_CERT_ROTATION_ROLLED_BACK,
    EVENT_NMA_CERT_ROTATION_SUCCEEDED, REASON_CERT_ROTATION_FAILED,
    REASON_CERT_ROTATION_ROLLED_BACK,
};
use anyhow::Result;
use async_trait::async_trait;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct NmaCertRotationReconciler {
    ctx: Arc<Context>,
}

impl NmaCertRotationReconciler {
    #[must_use]
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    async fn rollback(&self, vdb: &mut VerticaDB) -> Result<ReconcileResult> {
        let in_use = vdb
            .status
            .as_ref()
            .and_then(|st| st.nma_tls_secret_in_use.clone());
        warn!(vdb = %vdb.name_any(), secret = ?in_use, "Rolling back NMA certificate rotation");
        update_vdb_with_retry(self.ctx.client.as_ref(), vdb, |latest| {
            if latest.spec.nma_tls_secret == in_use {
                return Ok(false);
            }
            latest.spec.nma_tls_secret.clone_from(&in_use);
            Ok(true)
        })
        .await?;
        set_vdb_condition(
            self.ctx.client.as_ref(),
            vdb,
            create_condition(
                CONDITION_TLS_CERT_ROLLBACK_NEEDED,
                CONDITION_FALSE,
                REASON_CERT_ROTATION_ROLLED_BACK,
                "",
            ),
        )
        .await?;
        self.ctx
            .publish_warning_event(
                vdb,
                EVENT_NMA_CERT_ROTATION_ROLLED_BACK,
                &format!(
                    "NMA certificate rotation was rolled back to secret '{}'",
                    in_use.as_deref().unwrap_or_default()
                ),
            )
            .await;
        Ok(ReconcileResult::done())
    }

    async fn record_in_use(&self, vdb: &mut VerticaDB, secret: &str) -> Result<bool> {
        update_vdb_status_with_retry(self.ctx.client.as_ref(), vdb, |latest| {
            let status = latest.status.get_or_insert_with(Default::default);
            if status.nma_tls_secret_in_use.as_deref() == Some(secret) {
                return Ok(false);
            }
            status.nma_tls_secret_in_use = Some(secret.to_string());
            Ok(true)
        })
        .await
    }
}

#[async_trait]
impl Actor for NmaCertRotationReconciler {
    fn name(&self) -> &'static str {
        "nma_cert_rotation"
    }

    async fn reconcile(
        &mut self,
        vdb: &mut VerticaDB,
        pfacts: &mut PodFacts,
    ) -> Result<ReconcileResult> {
        if vdb.is_condition_true(CONDITION_TLS_CERT_ROLLBACK_NEEDED) {
            return self.rollback(vdb).await;
        }
        let Some(desired) = vdb.spec.nma_tls_secret.clone().filter(|s| !s.is_empty()) else {
            return Ok(ReconcileResult::done());
        };
        let in_use = vdb
            .status
            .as_ref()
            .and_then(|st| st.nma_tls_secret_in_use.clone());
        let Some(in_use) = in_use else {
            self.record_in_use(vdb, &desired).await?;
            return Ok(ReconcileResult::done());
        };
        if in_use == desired {
            return Ok(ReconcileResult::done());
        }

        pfacts.collect(vdb).await?;
        let Some(initiator) = pfacts.find_first_up_pod(true, None).map(PodFact::target) else {
            info!(vdb = %vdb.name_any(), "No up pod to rotate NMA certificates from, requeueing");
            return Ok(ReconcileResult::requeue());
        };

        info!(vdb = %vdb.name_any(), from = %in_use, to = %desired, "Rotating NMA certificates");
        let opts = RotateNmaCertsOptions {
            new_secret: desired.clone(),
        };
        if let Err(e) = self
            .ctx
            .dispatcher
            .rotate_nma_certs(vdb, &initiator, &opts)
            .await
        {
            error!(vdb = %vdb.name_any(), error = %e, "NMA certificate rotation failed");
            set_vdb_condition(
                self.ctx.client.as_ref(),
                vdb,
                create_condition(
                    CONDITION_TLS_CERT_ROLLBACK_NEEDED,
                    CONDITION_TRUE,
                    REASON_CERT_ROTATION_FAILED,
                    &e.to_string(),
                ),
            )
            .await?;
            self.ctx
                .publish_warning_event(
                    vdb,
                    EVENT_NMA_CERT_ROTATION_FAILED,
                    &format!("Failed to rotate NMA certificates to secret '{desired}': {e}"),
                )
                .await;
            return Err(e);
        }

        self.record_in_use(vdb, &desired).await?;
        self.ctx
            .publish_normal_event(
                vdb,
                EVENT_NMA_CERT_ROTATION_SUCCEEDED,
                &format!("NMA certificates were rotated to secret '{desired}'"),
            )
            .await;
        Ok(ReconcileResult::done())
    }
}

#[cfg(test)]
#[path = "cert_rotation_tests.rs"]
mod cert_rotation_tests;
