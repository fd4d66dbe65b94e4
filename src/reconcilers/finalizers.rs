// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Generic finalizer management for Kubernetes resources.
//!
//! The same helpers handle the typed `Glue` / `GlueOperator` objects and the
//! untyped parent objects a `Glue` holds on to, so they work on an
//! [`ApiResource`] plus [`ObjectMeta`] and go through the [`ClusterClient`] seam.
//!
//! # Example
//!
//! ```rust,ignore
//! use glue_operator::labels::FINALIZER_GLUE;
//! use glue_operator::reconcilers::finalizers::{ensure_finalizer, remove_finalizer};
//!
//! async fn reconcile(ctx: &Context, glue: &Glue) -> Result<(), GlueError> {
//!     if glue.metadata.deletion_timestamp.is_some() {
//!         // cleanup...
//!         remove_finalizer(ctx.client.as_ref(), glue, FINALIZER_GLUE).await?;
//!         return Ok(());
//!     }
//!     ensure_finalizer(ctx.client.as_ref(), glue, FINALIZER_GLUE).await?;
//!     Ok(())
//! }
//! ```

use crate::cluster::ClusterClient;
use crate::glue_errors::GlueError;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::ApiResource;
use kube::Resource;
use tracing::info;

/// Whether `finalizer` is present on the object.
#[must_use]
pub fn has_finalizer(meta: &ObjectMeta, finalizer: &str) -> bool {
    meta.finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|existing| existing == finalizer))
}

/// Add a finalizer to an object if not already present.
///
/// Returns `true` if the object was patched.
///
/// # Errors
///
/// Returns [`GlueError::Cluster`] if the patch fails.
pub async fn add_finalizer(
    client: &dyn ClusterClient,
    resource: &ApiResource,
    meta: &ObjectMeta,
    finalizer: &str,
) -> Result<bool, GlueError> {
    if has_finalizer(meta, finalizer) {
        return Ok(false);
    }
    let name = meta.name.clone().unwrap_or_default();
    let mut finalizers = meta.finalizers.clone().unwrap_or_default();
    finalizers.push(finalizer.to_string());

    client
        .patch_finalizers(resource, meta.namespace.as_deref(), &name, &finalizers)
        .await?;
    info!(
        "Added finalizer {} to {} {}",
        finalizer, resource.kind, name
    );
    Ok(true)
}

/// Remove a finalizer from an object.
///
/// Returns `true` if the object was patched. The operation is idempotent:
/// nothing is sent when the finalizer is already absent.
///
/// # Errors
///
/// Returns [`GlueError::Cluster`] if the patch fails.
pub async fn drop_finalizer(
    client: &dyn ClusterClient,
    resource: &ApiResource,
    meta: &ObjectMeta,
    finalizer: &str,
) -> Result<bool, GlueError> {
    if !has_finalizer(meta, finalizer) {
        return Ok(false);
    }
    let name = meta.name.clone().unwrap_or_default();
    let finalizers: Vec<String> = meta
        .finalizers
        .iter()
        .flatten()
        .filter(|f| f.as_str() != finalizer)
        .cloned()
        .collect();

    client
        .patch_finalizers(resource, meta.namespace.as_deref(), &name, &finalizers)
        .await?;
    info!(
        "Removed finalizer {} from {} {}",
        finalizer, resource.kind, name
    );
    Ok(true)
}

/// Add a finalizer to a typed resource if not already present.
///
/// # Errors
///
/// Returns [`GlueError::Cluster`] if the patch fails.
pub async fn ensure_finalizer<K>(
    client: &dyn ClusterClient,
    resource: &K,
    finalizer: &str,
) -> Result<bool, GlueError>
where
    K: Resource<DynamicType = ()>,
{
    add_finalizer(client, &ApiResource::erase::<K>(&()), resource.meta(), finalizer).await
}

/// Remove a finalizer from a typed resource.
///
/// # Errors
///
/// Returns [`GlueError::Cluster`] if the patch fails.
pub async fn remove_finalizer<K>(
    client: &dyn ClusterClient,
    resource: &K,
    finalizer: &str,
) -> Result<bool, GlueError>
where
    K: Resource<DynamicType = ()>,
{
    drop_finalizer(client, &ApiResource::erase::<K>(&()), resource.meta(), finalizer).await
}

#[cfg(test)]
#[path = "finalizers_tests.rs"]
mod finalizers_tests;
