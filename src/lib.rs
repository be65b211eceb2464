// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

#![allow(unexpected_cfgs)]

//! # verticadb-operator - Kubernetes operator for Vertica
//!
//! Manages Vertica databases in Eon mode through the `VerticaDB` custom
//! resource: statefulsets and services per subcluster, database membership,
//! sandboxes, client routing, NMA certificate rotation, and image upgrades.
//!
//! ## Upgrades
//!
//! An image change on a running database is rolled out one of two ways:
//!
//! - **Offline** - stop the cluster, reimage every pod, restart.
//! - **Online** - build a mirror of every subcluster (replica group B), move it
//!   into a sandbox, upgrade the sandbox, replicate the data written in the
//!   meantime, shift client traffic, promote the sandbox to main and drop the
//!   original subclusters (replica group A). The database stays writable until
//!   the short pause before the final replication.
//!
//! Both are resumable: every step is idempotent and derives its position from
//! persisted status, conditions and annotations, so an operator restart picks
//! up where the previous process stopped.
//!
//! ## Modules
//!
//! - [`crd`] - `VerticaDB` and `VerticaReplicator` custom resources
//! - [`reconcilers`] - the actor chain and every actor
//! - [`podfacts`] - per-pod facts gathered from the cluster and the pods themselves
//! - [`dispatcher`] - administrative database commands
//! - [`cluster`] - Kubernetes access behind the [`cluster::ClusterClient`] trait
//! - [`metrics`] - Prometheus metrics
//!
//! ## Example
//!
//! ```rust,no_run
//! use verticadb_operator::crd::{Subcluster, SubclusterType};
//!
//! let primary = Subcluster::new("pri1", 3, SubclusterType::Primary);
//! assert!(primary.is_primary());
//! ```

pub mod cluster;
pub mod constants;
pub mod context;
pub mod crd;
pub mod dispatcher;
pub mod errors;
pub mod labels;
pub mod meta;
pub mod metrics;
pub mod names;
pub mod pod_runner;
pub mod podfacts;
pub mod reconcilers;
pub mod status_reasons;

#[cfg(test)]
pub mod fake;
