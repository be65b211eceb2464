// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Collision-free name generation for mirror subclusters, statefulsets and sandboxes.
//!
//! Every generator follows the same three tiers:
//!
//! 1. the **preferred** name (e.g. `pri1-sb`)
//! 2. the **reverse** name, which undoes the suffix so that a second upgrade
//!    cycle oscillates back to the original name (e.g. `pri1`)
//! 3. a **random** 5-character suffix on a base, retried up to
//!    [`MAX_NAME_GEN_ATTEMPTS`] times
//!
//! The first two tiers are deterministic, which keeps names stable in the
//! common case.

use crate::constants::{
    MAX_NAME_GEN_ATTEMPTS, MIRROR_SUFFIX, PREFERRED_SANDBOX_NAME, RANDOM_SUFFIX_LEN,
    REVERSE_SANDBOX_NAME,
};
use crate::errors::OperatorError;

const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Pick the first free name among preferred, reverse and random-suffixed candidates.
///
/// # Errors
///
/// Returns [`OperatorError::NameGenerationExhausted`] when every candidate is taken.
pub fn gen_unique_name<F>(
    preferred: &str,
    reverse: Option<&str>,
    random_base: &str,
    is_taken: F,
) -> Result<String, OperatorError>
where
    F: Fn(&str) -> bool,
{
    if !is_taken(preferred) {
        return Ok(preferred.to_string());
    }
    if let Some(reverse) = reverse.filter(|r| !r.is_empty() && *r != preferred) {
        if !is_taken(reverse) {
            return Ok(reverse.to_string());
        }
    }
    for _ in 0..MAX_NAME_GEN_ATTEMPTS {
        let candidate = format!("{random_base}-{}", random_suffix());
        if !is_taken(&candidate) {
            return Ok(candidate);
        }
    }
    Err(OperatorError::NameGenerationExhausted {
        base: random_base.to_string(),
        attempts: MAX_NAME_GEN_ATTEMPTS,
    })
}

/// Name for the mirror of subcluster `base`.
///
/// # Errors
///
/// Returns an error when no free name can be found.
pub fn mirror_subcluster_name<F>(base: &str, is_taken: F) -> Result<String, OperatorError>
where
    F: Fn(&str) -> bool,
{
    let preferred = format!("{base}{MIRROR_SUFFIX}");
    let reverse = strip_mirror_suffix(base);
    gen_unique_name(&preferred, Some(reverse), base, is_taken)
}

/// Statefulset name for mirror subcluster `mirror` of database `vdb_name`.
///
/// # Errors
///
/// Returns an error when no free name can be found.
pub fn mirror_sts_name<F>(vdb_name: &str, mirror: &str, is_taken: F) -> Result<String, OperatorError>
where
    F: Fn(&str) -> bool,
{
    let preferred = format!("{vdb_name}-{mirror}");
    let reverse = format!("{vdb_name}-{}", strip_mirror_suffix(mirror));
    gen_unique_name(&preferred, Some(&reverse), &preferred, is_taken)
}

/// Name for the sandbox that holds replica group B.
///
/// # Errors
///
/// Returns an error when no free name can be found.
pub fn sandbox_name<F>(is_taken: F) -> Result<String, OperatorError>
where
    F: Fn(&str) -> bool,
{
    gen_unique_name(
        PREFERRED_SANDBOX_NAME,
        Some(REVERSE_SANDBOX_NAME),
        PREFERRED_SANDBOX_NAME,
        is_taken,
    )
}

fn strip_mirror_suffix(name: &str) -> &str {
    name.strip_suffix(MIRROR_SUFFIX).unwrap_or(name)
}

fn random_suffix() -> String {
    (0..RANDOM_SUFFIX_LEN)
        .map(|_| {
            let idx = rand::random::<u32>() as usize % SUFFIX_ALPHABET.len();
            char::from(SUFFIX_ALPHABET[idx])
        })
        .collect()
}

#[cfg(test)]
#[path = "names_tests.rs"]
mod names_tests;
