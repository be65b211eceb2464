// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Retry helpers for Kubernetes API calls.
//!
//! Two kinds of retry live here:
//!
//! - [`retry_api_call`] retries transient API errors (429, 5xx, transport) with
//!   jittered exponential backoff and fails fast on everything else.
//! - [`update_vdb_with_retry`] and [`update_vdb_status_with_retry`] are the
//!   optimistic-concurrency combinators: re-fetch the latest `VerticaDB`, reapply
//!   the caller's mutation, write, and start over on a 409 conflict.

use crate::cluster::ClusterClient;
use crate::constants::{KIND_VERTICA_DB, MAX_UPDATE_ATTEMPTS};
use crate::context::vdb_namespace;
use crate::crd::VerticaDB;
use crate::errors::{is_conflict, OperatorError};
use anyhow::Result;
use kube::ResourceExt;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Maximum total time to spend retrying (5 minutes)
const MAX_ELAPSED_TIME_SECS: u64 = 300;

/// Initial retry interval (100ms)
const INITIAL_INTERVAL_MILLIS: u64 = 100;

/// Maximum interval between retries (30 seconds)
const MAX_INTERVAL_SECS: u64 = 30;

/// Backoff multiplier (exponential growth factor)
const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Randomization factor to prevent thundering herd (±10%)
const RANDOMIZATION_FACTOR: f64 = 0.1;

/// Exponential backoff with jitter.
pub struct ExponentialBackoff {
    pub current_interval: Duration,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub max_elapsed_time: Option<Duration>,
    pub multiplier: f64,
    pub randomization_factor: f64,
    start_time: Instant,
}

impl ExponentialBackoff {
    fn new(
        initial_interval: Duration,
        max_interval: Duration,
        max_elapsed_time: Option<Duration>,
        multiplier: f64,
        randomization_factor: f64,
    ) -> Self {
        Self {
            current_interval: initial_interval,
            initial_interval,
            max_interval,
            max_elapsed_time,
            multiplier,
            randomization_factor,
            start_time: Instant::now(),
        }
    }

    /// Get the next backoff interval, or None if max elapsed time exceeded.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if let Some(max_elapsed) = self.max_elapsed_time {
            if self.start_time.elapsed() >= max_elapsed {
                return None;
            }
        }

        let interval = self.current_interval;
        let jittered = self.apply_jitter(interval);

        let next = interval.as_secs_f64() * self.multiplier;
        self.current_interval = Duration::from_secs_f64(next).min(self.max_interval);

        Some(jittered)
    }

    fn apply_jitter(&self, interval: Duration) -> Duration {
        if self.randomization_factor == 0.0 {
            return interval;
        }

        let secs = interval.as_secs_f64();
        let delta = secs * self.randomization_factor;
        let jittered = secs - delta + 2.0 * delta * rand::random::<f64>();

        Duration::from_secs_f64(jittered.max(0.0))
    }
}

/// Default backoff for Kubernetes API retries.
///
/// Starts at 100ms, doubles up to 30s between attempts, and gives up after 5 minutes.
/// Each interval is jittered by ±10%.
#[must_use]
pub fn default_backoff() -> ExponentialBackoff {
    ExponentialBackoff::new(
        Duration::from_millis(INITIAL_INTERVAL_MILLIS),
        Duration::from_secs(MAX_INTERVAL_SECS),
        Some(Duration::from_secs(MAX_ELAPSED_TIME_SECS)),
        BACKOFF_MULTIPLIER,
        RANDOMIZATION_FACTOR,
    )
}

/// Retry a Kubernetes API call with exponential backoff.
///
/// Retries on transient errors (HTTP 429, 5xx, transport) and fails immediately
/// on everything else, including 404 and 409.
///
/// # Errors
///
/// Returns the first non-retryable error, or an error once the backoff is exhausted.
pub async fn retry_api_call<T, F, Fut>(mut operation: F, operation_name: &str) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, kube::Error>>,
{
    let mut backoff = default_backoff();
    let start_time = Instant::now();
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(
                        operation = operation_name,
                        attempt = attempt,
                        elapsed = ?start_time.elapsed(),
                        "Kubernetes API call succeeded after retries"
                    );
                }
                return Ok(value);
            }
            Err(e) => {
                if !is_retryable_error(&e) {
                    debug!(
                        operation = operation_name,
                        error = %e,
                        "Non-retryable Kubernetes API error"
                    );
                    return Err(e.into());
                }

                if let Some(duration) = backoff.next_backoff() {
                    warn!(
                        operation = operation_name,
                        attempt = attempt,
                        retry_after = ?duration,
                        error = %e,
                        "Retryable Kubernetes API error, will retry"
                    );
                    tokio::time::sleep(duration).await;
                } else {
                    error!(
                        operation = operation_name,
                        attempt = attempt,
                        elapsed = ?start_time.elapsed(),
                        error = %e,
                        "Backoff exhausted, giving up"
                    );
                    return Err(anyhow::anyhow!(
                        "Backoff exhausted after {attempt} attempts: {e}"
                    ));
                }
            }
        }
    }
}

/// Whether a Kubernetes error is transient: 429, 5xx or a transport failure.
fn is_retryable_error(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(api_err) => {
            api_err.code == 429 || (api_err.code >= 500 && api_err.code < 600)
        }
        kube::Error::Service(_) => true,
        _ => false,
    }
}

/// Which half of the `VerticaDB` an update writes.
#[derive(Clone, Copy, Debug)]
enum UpdateTarget {
    Spec,
    Status,
}

async fn update_with_retry<F>(
    client: &dyn ClusterClient,
    vdb: &mut VerticaDB,
    target: UpdateTarget,
    mut mutate: F,
) -> Result<bool>
where
    F: FnMut(&mut VerticaDB) -> Result<bool>,
{
    let namespace = vdb_namespace(vdb)?;
    let name = vdb.name_any();

    for attempt in 1..=MAX_UPDATE_ATTEMPTS {
        let mut latest = client.get_vdb(&namespace, &name).await?;
        if !mutate(&mut latest)? {
            *vdb = latest;
            return Ok(false);
        }

        let written = match target {
            UpdateTarget::Spec => client.update_vdb(&latest).await,
            UpdateTarget::Status => client.update_vdb_status(&latest).await,
        };
        match written {
            Ok(updated) => {
                *vdb = updated;
                return Ok(true);
            }
            Err(e) if is_conflict(&e) => {
                debug!(
                    vdb = %name,
                    target = ?target,
                    attempt,
                    "Conflict writing VerticaDB, re-fetching"
                );
            }
            Err(e) => return Err(e),
        }
    }

    Err(OperatorError::UpdateConflictRetriesExhausted {
        kind: KIND_VERTICA_DB.to_string(),
        name,
        attempts: MAX_UPDATE_ATTEMPTS,
    }
    .into())
}

/// Read-modify-write of the `VerticaDB` spec and metadata.
///
/// `mutate` runs against a freshly fetched copy on every attempt and returns
/// whether it changed anything. When it reports no change nothing is written.
/// On return `vdb` holds the latest persisted object.
///
/// # Errors
///
/// Returns errors from `mutate`, non-conflict API errors, or
/// [`OperatorError::UpdateConflictRetriesExhausted`].
pub async fn update_vdb_with_retry<F>(
    client: &dyn ClusterClient,
    vdb: &mut VerticaDB,
    mutate: F,
) -> Result<bool>
where
    F: FnMut(&mut VerticaDB) -> Result<bool>,
{
    update_with_retry(client, vdb, UpdateTarget::Spec, mutate).await
}

/// Read-modify-write of the `VerticaDB` status. Same contract as [`update_vdb_with_retry`].
///
/// # Errors
///
/// Returns errors from `mutate`, non-conflict API errors, or
/// [`OperatorError::UpdateConflictRetriesExhausted`].
pub async fn update_vdb_status_with_retry<F>(
    client: &dyn ClusterClient,
    vdb: &mut VerticaDB,
    mutate: F,
) -> Result<bool>
where
    F: FnMut(&mut VerticaDB) -> Result<bool>,
{
    update_with_retry(client, vdb, UpdateTarget::Status, mutate).await
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod retry_tests;
