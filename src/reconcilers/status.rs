// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Status condition helpers.
//!
//! Conditions follow the Kubernetes conventions:
//! - `type`: the aspect being reported (e.g. `UpgradeInProgress`)
//! - `status`: "True" or "False"
//! - `reason`: a CamelCase identifier
//! - `message`: a human-readable explanation
//! - `lastTransitionTime`: RFC3339 timestamp of the last status flip
//!
//! The in-memory helpers edit a `Vec<Condition>`. The `*_vdb_*` helpers persist
//! the change through [`update_vdb_status_with_retry`], so a stale copy never
//! overwrites a concurrent status write.
//!
//! # Example
//!
//! ```rust,no_run
//! use verticadb_operator::reconcilers::status::create_condition;
//!
//! let condition = create_condition(
//!     "UpgradeInProgress",
//!     "True",
//!     "UpgradeStarted",
//!     "Upgrading to vertica-k8s:24.2.0"
//! );
//! assert_eq!(condition.status, "True");
//! ```

use super::retry::update_vdb_status_with_retry;
use crate::cluster::ClusterClient;
use crate::crd::{Condition, VerticaDB};
use anyhow::Result;
use chrono::Utc;
use tracing::debug;

/// Create a condition stamped with the current time.
#[must_use]
pub fn create_condition(
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
) -> Condition {
    Condition {
        r#type: condition_type.to_string(),
        status: status.to_string(),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        last_transition_time: Some(Utc::now().to_rfc3339()),
    }
}

/// Whether `new_condition` differs from `existing` in type, status, reason or message.
///
/// `lastTransitionTime` is not compared.
#[must_use]
pub fn condition_changed(existing: Option<&Condition>, new_condition: &Condition) -> bool {
    existing.is_none_or(|current| {
        current.r#type != new_condition.r#type
            || current.status != new_condition.status
            || current.reason != new_condition.reason
            || current.message != new_condition.message
    })
}

#[must_use]
pub fn find_condition<'a>(
    conditions: &'a [Condition],
    condition_type: &str,
) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == condition_type)
}

/// Add or replace a condition in place. Returns whether anything changed.
///
/// The existing `lastTransitionTime` is kept when the status value does not flip.
pub fn set_condition(conditions: &mut Vec<Condition>, mut new_condition: Condition) -> bool {
    match conditions
        .iter_mut()
        .find(|c| c.r#type == new_condition.r#type)
    {
        Some(existing) => {
            if !condition_changed(Some(existing), &new_condition) {
                return false;
            }
            if existing.status == new_condition.status {
                new_condition
                    .last_transition_time
                    .clone_from(&existing.last_transition_time);
            }
            *existing = new_condition;
            true
        }
        None => {
            conditions.push(new_condition);
            true
        }
    }
}

/// Remove every condition whose type is in `condition_types`. Returns whether anything changed.
pub fn remove_conditions(conditions: &mut Vec<Condition>, condition_types: &[&str]) -> bool {
    let before = conditions.len();
    conditions.retain(|c| !condition_types.contains(&c.r#type.as_str()));
    conditions.len() != before
}

/// Persist `condition` on the `VerticaDB` status.
///
/// # Errors
///
/// Returns an error if the status write fails for a reason other than a resolvable conflict.
pub async fn set_vdb_condition(
    client: &dyn ClusterClient,
    vdb: &mut VerticaDB,
    condition: Condition,
) -> Result<bool> {
    let condition_type = condition.r#type.clone();
    let changed = update_vdb_status_with_retry(client, vdb, |latest| {
        let status = latest.status.get_or_insert_with(Default::default);
        Ok(set_condition(&mut status.conditions, condition.clone()))
    })
    .await?;
    if changed {
        debug!(condition = %condition_type, "Updated VerticaDB condition");
    }
    Ok(changed)
}

/// Remove conditions from the persisted `VerticaDB` status.
///
/// # Errors
///
/// Returns an error if the status write fails for a reason other than a resolvable conflict.
pub async fn remove_vdb_conditions(
    client: &dyn ClusterClient,
    vdb: &mut VerticaDB,
    condition_types: &[&str],
) -> Result<bool> {
    update_vdb_status_with_retry(client, vdb, |latest| {
        Ok(latest
            .status
            .as_mut()
            .is_some_and(|st| remove_conditions(&mut st.conditions, condition_types)))
    })
    .await
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod status_tests;
