// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Status helpers shared by the `Glue` and `GlueOperator` reconcilers.
//!
//! Both kinds expose the same [`GlueStatus`]:
//!
//! ```yaml
//! status:
//!   observedGeneration: 3
//!   errorMessage: "Error: Failed to render 'configMap2': undefined value"
//! ```
//!
//! A successful pass clears `errorMessage` and records the generation. A failed
//! pass records the error message and keeps the last observed generation. Patches
//! are only sent when the status actually changes, since every status write
//! triggers another reconciliation.

use crate::cluster::ClusterClient;
use crate::constants::{ERROR_MESSAGE_PREFIX, MAX_STATUS_MESSAGE_LENGTH};
use crate::crd::GlueStatus;
use crate::glue_errors::GlueError;
use kube::api::ApiResource;
use kube::{Resource, ResourceExt};
use serde_json::{json, Value as JsonValue};
use tracing::debug;

/// Message stored in `status.errorMessage` for `err`.
///
/// Duplicate-name errors are stored verbatim so tooling can match their prefix.
/// Everything else is truncated to 150 characters (plus `...`) and prefixed
/// with `Error: `.
#[must_use]
pub fn error_message(err: &GlueError) -> String {
    let message = err.to_string();
    if matches!(err, GlueError::NonUniqueNames { .. }) {
        return message;
    }
    let message = if message.chars().count() > MAX_STATUS_MESSAGE_LENGTH {
        let truncated: String = message.chars().take(MAX_STATUS_MESSAGE_LENGTH).collect();
        format!("{truncated}...")
    } else {
        message
    };
    format!("{ERROR_MESSAGE_PREFIX}{message}")
}

/// Merge patch for a successful pass, or `None` when the status is already current.
#[must_use]
pub fn success_patch(current: Option<&GlueStatus>, generation: Option<i64>) -> Option<JsonValue> {
    let has_error = current.is_some_and(|s| s.error_message.is_some());
    let observed = current.and_then(|s| s.observed_generation);
    if !has_error && observed == generation {
        return None;
    }
    Some(json!({
        "observedGeneration": generation,
        "errorMessage": null,
    }))
}

/// Merge patch recording `err`, or `None` when the same message is already stored.
#[must_use]
pub fn error_patch(current: Option<&GlueStatus>, err: &GlueError) -> Option<JsonValue> {
    let message = error_message(err);
    if current.and_then(|s| s.error_message.as_deref()) == Some(message.as_str()) {
        return None;
    }
    Some(json!({ "errorMessage": message }))
}

/// Send a status merge patch for a typed resource.
///
/// # Errors
///
/// Returns [`GlueError::Cluster`] if the patch fails.
pub async fn patch_status<K>(
    client: &dyn ClusterClient,
    resource: &K,
    patch: &JsonValue,
) -> Result<(), GlueError>
where
    K: Resource<DynamicType = ()>,
{
    let api_resource = ApiResource::erase::<K>(&());
    let namespace = resource.namespace();
    client
        .patch_status(&api_resource, namespace.as_deref(), &resource.name_any(), patch)
        .await?;
    debug!(
        "Patched status of {} {}/{}",
        api_resource.kind,
        namespace.unwrap_or_default(),
        resource.name_any()
    );
    Ok(())
}

/// Whether every field of `patch` is already present in `current` with the same value.
///
/// Used to skip status patches of related resources that would change nothing.
#[must_use]
pub fn is_applied(patch: &JsonValue, current: Option<&JsonValue>) -> bool {
    match (patch, current) {
        (JsonValue::Object(patch), Some(JsonValue::Object(current))) => patch
            .iter()
            .all(|(key, value)| match value {
                JsonValue::Null => !current.contains_key(key),
                value => is_applied(value, current.get(key)),
            }),
        (JsonValue::Object(patch), None) => patch.values().all(JsonValue::is_null),
        (patch, Some(current)) => patch == current,
        (JsonValue::Null, None) => true,
        (_, None) => false,
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod status_tests;
