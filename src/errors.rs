// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error types for upgrade orchestration and cluster administration.
//!
//! Reconcilers return `anyhow::Result`. The variants below are the failures a
//! caller may want to match on: logical errors that mean the persisted state is
//! inconsistent with the current step, and failures of administrative commands.
//! Kubernetes API conflicts and not-found responses are recognised with
//! [`is_conflict`] and [`is_not_found`] on any `anyhow::Error`.

use thiserror::Error;

/// Errors raised by the operator's own logic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperatorError {
    /// The sandbox name was expected in the `VerticaDB` annotations but is absent
    #[error("online upgrade sandbox name is not recorded on VerticaDB '{vdb}'")]
    SandboxNameMissing {
        /// The `VerticaDB` name
        vdb: String,
    },

    /// A subcluster referenced by another object is not in the spec
    #[error("subcluster '{name}' not found in VerticaDB '{vdb}'")]
    SubclusterNotFound {
        /// The missing subcluster
        name: String,
        /// The `VerticaDB` name
        vdb: String,
    },

    /// An annotation required by the current step is missing
    #[error("annotation '{annotation}' missing on subcluster '{subcluster}'")]
    AnnotationMissing {
        /// The annotation key
        annotation: String,
        /// The subcluster name
        subcluster: String,
    },

    /// Every candidate name was already taken
    #[error("could not generate a unique name from base '{base}' after {attempts} attempts")]
    NameGenerationExhausted {
        /// The base the names were derived from
        base: String,
        /// Number of random candidates tried
        attempts: usize,
    },

    /// Stopping the requested subclusters would leave too few primaries up
    #[error(
        "shutting down subclusters would lose quorum: {up_after} of {total} primary nodes would remain up"
    )]
    QuorumLoss {
        /// Up primary nodes left after the shutdown
        up_after: usize,
        /// Total primary nodes
        total: usize,
    },

    /// An administrative command returned an error
    #[error("{command} failed: {reason}")]
    CommandFailed {
        /// The administrative command
        command: String,
        /// Error reported by the command
        reason: String,
    },

    /// A replica group that the current step works on has no subclusters
    #[error("replica group '{group}' of VerticaDB '{vdb}' has no subclusters")]
    ReplicaGroupEmpty {
        /// The replica group
        group: String,
        /// The `VerticaDB` name
        vdb: String,
    },

    /// A subcluster may belong to only one sandbox
    #[error("subcluster '{subcluster}' of VerticaDB '{vdb}' is already in sandbox '{sandbox}'")]
    SubclusterAlreadySandboxed {
        /// The subcluster name
        subcluster: String,
        /// The sandbox that already holds it
        sandbox: String,
        /// The `VerticaDB` name
        vdb: String,
    },

    /// The image the cluster ran before the upgrade could not be determined
    #[error("cannot determine the image VerticaDB '{vdb}' ran before the upgrade")]
    OldImageUnknown {
        /// The `VerticaDB` name
        vdb: String,
    },

    /// A subcluster rename would produce a duplicate name
    #[error("cannot rename subcluster '{from}' to '{to}': name already in use")]
    DuplicateSubclusterName {
        /// Current name
        from: String,
        /// Requested name
        to: String,
    },

    /// The resource has no namespace
    #[error("{kind} '{name}' has no namespace")]
    NamespaceMissing {
        /// Resource kind
        kind: String,
        /// Resource name
        name: String,
    },

    /// A read-modify-write kept conflicting with concurrent writers
    #[error("gave up updating {kind} '{name}' after {attempts} conflicting attempts")]
    UpdateConflictRetriesExhausted {
        /// Resource kind
        kind: String,
        /// Resource name
        name: String,
        /// Attempts made
        attempts: usize,
    },
}

/// HTTP status code carried by a Kubernetes API error in the chain, if any.
fn api_status_code(err: &anyhow::Error) -> Option<u16> {
    err.chain().find_map(|cause| match cause.downcast_ref::<kube::Error>() {
        Some(kube::Error::Api(api_err)) => Some(api_err.code),
        _ => None,
    })
}

/// True when `err` is an optimistic-concurrency conflict (HTTP 409).
#[must_use]
pub fn is_conflict(err: &anyhow::Error) -> bool {
    api_status_code(err) == Some(409)
}

/// True when `err` is a not-found response (HTTP 404).
#[must_use]
pub fn is_not_found(err: &anyhow::Error) -> bool {
    api_status_code(err) == Some(404)
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod errors_tests;
