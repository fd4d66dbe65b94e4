// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `GlueOperator` reconciliation logic.
//!
//! A `GlueOperator` turns every object of its parent kind into a `Glue`. The
//! parent kind is watched through the operator's own [`WatchManager`](crate::watches::WatchManager),
//! so any parent event re-triggers every operator watching that kind.
//!
//! The generated `Glue` carries the operator's children and related resources,
//! plus a related resource named `parent` pointing at the parent object. The
//! `parent` entry is also how the operator's `statusTemplate` reaches the parent:
//! the `Glue` patches the status of its related resources after each pass.

use crate::constants::PARENT_RELATED_RESOURCE_NAME;
use crate::context::Context;
use crate::crd::{Glue, GlueOperator, GlueSpec, RelatedResourceSpec};
use crate::glue_errors::GlueError;
use crate::identity::{gvk_from_api_version, sanitize_name, InstanceId};
use crate::labels::{
    FINALIZER_GLUE_OPERATOR, FOR_GLUE_OPERATOR_LABEL_KEY, FOR_GLUE_OPERATOR_LABEL_VALUE,
    K8S_MANAGED_BY, MANAGED_BY_GLUE_OPERATOR,
};
use crate::metrics;
use crate::reconcilers::finalizers::{ensure_finalizer, remove_finalizer};
use crate::reconcilers::glue::is_glue_of_operator;
use crate::reconcilers::status;
use crate::workflow;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::api::{ApiResource, DynamicObject};
use kube::{Resource, ResourceExt};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeSet;
use std::time::Instant;
use tracing::{debug, info, warn};

const KIND: &str = "GlueOperator";

/// Reconcile a `GlueOperator`, or clean it up when it is being deleted.
///
/// # Errors
///
/// Returns the first error hit while validating the spec, rendering a `Glue`
/// or applying it.
pub async fn reconcile_glue_operator(
    ctx: &Context,
    operator: &GlueOperator,
) -> Result<(), GlueError> {
    let start = Instant::now();

    let result = if operator.metadata.deletion_timestamp.is_some() {
        delete_glue_operator(ctx, operator).await
    } else {
        match reconcile_parents(ctx, operator).await {
            Ok(()) => update_success_status(ctx, operator).await,
            Err(err) => {
                record_error_status(ctx, operator, &err).await;
                Err(err)
            }
        }
    };

    match &result {
        Ok(()) => metrics::record_reconciliation_success(KIND, start.elapsed()),
        Err(err) => {
            metrics::record_reconciliation_error(KIND, start.elapsed());
            metrics::record_error(KIND, err.category());
        }
    }
    result
}

async fn reconcile_parents(ctx: &Context, operator: &GlueOperator) -> Result<(), GlueError> {
    workflow::validate(&operator.spec.glue_spec())?;
    ensure_finalizer(ctx.client.as_ref(), operator, FINALIZER_GLUE_OPERATOR).await?;

    let instance = InstanceId::of(operator);
    let parent = &operator.spec.parent;
    let gvk = gvk_from_api_version(&parent.api_version, &parent.kind);
    let parents = ctx
        .parent_watches
        .acquire(&gvk, &instance, parent.label_selector.as_deref())?;
    parents.ready().await?;
    metrics::set_active_watches(KIND, ctx.parent_watches.live_watch_count());

    let glue_resource = ApiResource::erase::<Glue>(&());
    for parent_object in parents.objects() {
        if parent_object.metadata.deletion_timestamp.is_some() {
            debug!(
                "{} {} is being deleted, not syncing its Glue",
                parent.kind,
                parent_object.name_any()
            );
            continue;
        }
        let desired = desired_glue(ctx, operator, &parent_object)?;
        let namespace = desired.namespace();
        let current = ctx
            .client
            .get(&glue_resource, namespace.as_deref(), &desired.name_any())
            .await?;
        if current.as_ref().is_some_and(|c| spec_of(c).as_ref() == Some(&desired.spec)) {
            continue;
        }

        let object: DynamicObject = serde_json::from_value(
            serde_json::to_value(&desired)
                .map_err(|e| GlueError::render(desired.name_any(), e))?,
        )
        .map_err(|e| GlueError::render(desired.name_any(), e))?;
        ctx.client
            .apply(&glue_resource, &object, &ctx.field_manager)
            .await?;
        if current.is_some() {
            metrics::record_resource_updated("Glue");
        } else {
            metrics::record_resource_created("Glue");
        }
        info!(
            "Applied Glue {} for {} {} of GlueOperator {}",
            InstanceId::of(&desired),
            parent.kind,
            parent_object.name_any(),
            instance
        );
    }
    Ok(())
}

/// The `Glue` a `GlueOperator` wants for one parent object.
///
/// Without `glueMetadata` the `Glue` is named `<parent>-<kind>` (sanitized) and
/// lives in the parent's namespace, or the operator's for cluster-scoped parents.
///
/// # Errors
///
/// Returns [`GlueError::Render`] if the `glueMetadata` templates fail, and
/// [`GlueError::Configuration`] if the parent has no uid.
pub fn desired_glue(
    ctx: &Context,
    operator: &GlueOperator,
    parent: &DynamicObject,
) -> Result<Glue, GlueError> {
    let parent_spec = &operator.spec.parent;
    let parent_namespace = parent
        .namespace()
        .or_else(|| operator.namespace())
        .unwrap_or_default();

    let (name, namespace) = match &operator.spec.glue_metadata {
        Some(metadata) => {
            let mut data = Map::new();
            data.insert(
                PARENT_RELATED_RESOURCE_NAME.to_string(),
                serde_json::to_value(parent).unwrap_or_default(),
            );
            let data = JsonValue::Object(data);
            let render = |template: &str| {
                ctx.renderer
                    .render(template, &data)
                    .map(|s| s.trim().to_string())
                    .map_err(|e| GlueError::render("glueMetadata", e))
            };
            (render(&metadata.name)?, render(&metadata.namespace)?)
        }
        None => (
            sanitize_name(&format!("{}-{}", parent.name_any(), parent_spec.kind)),
            parent_namespace,
        ),
    };

    let uid = parent.uid().ok_or_else(|| {
        GlueError::configuration(format!(
            "{} {} has no uid",
            parent_spec.kind,
            parent.name_any()
        ))
    })?;

    let mut labels = ctx.default_glue_labels.clone();
    labels.insert(
        FOR_GLUE_OPERATOR_LABEL_KEY.to_string(),
        FOR_GLUE_OPERATOR_LABEL_VALUE.to_string(),
    );
    labels.insert(K8S_MANAGED_BY.to_string(), MANAGED_BY_GLUE_OPERATOR.to_string());

    let mut spec: GlueSpec = operator.spec.glue_spec();
    spec.related_resources.push(RelatedResourceSpec {
        name: PARENT_RELATED_RESOURCE_NAME.to_string(),
        namespace: parent.namespace(),
        api_version: parent_spec.api_version.clone(),
        kind: parent_spec.kind.clone(),
        cluster_scoped: parent_spec.cluster_scoped,
        resource_names: vec![parent.name_any()],
        status_patch: parent_spec.status.clone(),
        status_patch_template: parent_spec.status_template.clone(),
    });

    let mut glue = Glue::new(&name, spec);
    glue.metadata = ObjectMeta {
        name: Some(name),
        namespace: Some(namespace),
        labels: Some(labels),
        owner_references: Some(vec![OwnerReference {
            api_version: parent_spec.api_version.clone(),
            kind: parent_spec.kind.clone(),
            name: parent.name_any(),
            uid,
            ..OwnerReference::default()
        }]),
        ..ObjectMeta::default()
    };
    Ok(glue)
}

fn spec_of(object: &DynamicObject) -> Option<GlueSpec> {
    object
        .data
        .get("spec")
        .and_then(|spec| serde_json::from_value(spec.clone()).ok())
}

/// `GlueOperator`s to re-run when a generated `Glue` changes.
///
/// A generated `Glue` is owned by its parent object, so it maps back to every
/// operator currently watching the owner's kind. Unlabelled `Glue`s map to
/// nothing.
#[must_use]
pub fn operators_for_glue(ctx: &Context, glue: &Glue) -> Vec<InstanceId> {
    if !is_glue_of_operator(glue) {
        return Vec::new();
    }
    let mut operators = BTreeSet::new();
    for owner in glue.owner_references() {
        let gvk = gvk_from_api_version(&owner.api_version, &owner.kind);
        operators.extend(ctx.parent_watches.requesters(&gvk));
    }
    operators.into_iter().collect()
}

/// Stop watching the parent kind for a deleted `GlueOperator`.
///
/// Generated `Glue` objects are owned by their parents, not by the operator,
/// so they are left in place.
///
/// # Errors
///
/// Returns [`GlueError::Cluster`] if the finalizer cannot be removed.
pub async fn delete_glue_operator(
    ctx: &Context,
    operator: &GlueOperator,
) -> Result<(), GlueError> {
    let instance = InstanceId::of(operator);
    info!("Cleaning up GlueOperator {}", instance);
    ctx.parent_watches.release_all(&instance);
    metrics::set_active_watches(KIND, ctx.parent_watches.live_watch_count());
    remove_finalizer(ctx.client.as_ref(), operator, FINALIZER_GLUE_OPERATOR).await?;
    Ok(())
}

async fn update_success_status(ctx: &Context, operator: &GlueOperator) -> Result<(), GlueError> {
    match status::success_patch(operator.status.as_ref(), operator.meta().generation) {
        Some(patch) => status::patch_status(ctx.client.as_ref(), operator, &patch).await,
        None => Ok(()),
    }
}

async fn record_error_status(ctx: &Context, operator: &GlueOperator, err: &GlueError) {
    warn!(
        "Failed to reconcile GlueOperator {}: {}",
        InstanceId::of(operator),
        err
    );
    if let Some(patch) = status::error_patch(operator.status.as_ref(), err) {
        if let Err(e) = status::patch_status(ctx.client.as_ref(), operator, &patch).await {
            warn!(
                "Failed to record error on GlueOperator {}: {}",
                InstanceId::of(operator),
                e
            );
        }
    }
}

#[cfg(test)]
#[path = "glue_operator_tests.rs"]
mod glue_operator_tests;
