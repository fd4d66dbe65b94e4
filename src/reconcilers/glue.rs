// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `Glue` reconciliation logic.
//!
//! One pass over a `Glue`:
//!
//! 1. validate the spec (terminal on failure)
//! 2. register watches on related kinds and route the named related objects
//!    back to this `Glue`
//! 3. if the related resource named `parent` is being deleted, delete this `Glue`
//!    and stop
//! 4. put the parent finalizer on the parent (for `Glue`s of a `GlueOperator`), and
//!    the `Glue` finalizer on the `Glue`
//! 5. build the plan, acquire watches on every managed kind, execute
//! 6. prune objects of children no longer in the spec
//! 7. release watches on kinds no longer referenced
//! 8. raise collected node failures
//! 9. patch the status of related resources, then the `Glue` status
//!
//! Deletion runs the plan's cleanup, then removes the parent finalizer, the
//! `Glue` finalizer and every watch registration of the instance.

use crate::constants::PARENT_RELATED_RESOURCE_NAME;
use crate::context::Context;
use crate::crd::{Glue, RelatedResourceSpec};
use crate::data::{related_namespace, related_objects, related_value, DataContext};
use crate::dependent::{managed_by, resource_name_of};
use crate::executor::Executor;
use crate::glue_errors::GlueError;
use crate::identity::{api_resource, related_gvk, InstanceId};
use crate::labels::{
    parent_finalizer, FINALIZER_GLUE, FOR_GLUE_OPERATOR_LABEL_KEY, FOR_GLUE_OPERATOR_LABEL_VALUE,
};
use crate::mapper::ObjectKey;
use crate::metrics;
use crate::reconcilers::finalizers::{
    add_finalizer, drop_finalizer, ensure_finalizer, has_finalizer, remove_finalizer,
};
use crate::reconcilers::status;
use crate::watches::WatchHandle;
use crate::workflow::{self, Plan};
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use kube::{Resource, ResourceExt};
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tracing::{debug, info, warn};

const KIND: &str = "Glue";

enum Pass {
    Completed,
    DeletedWithParent,
}

/// Reconcile a `Glue`, or clean it up when it is being deleted.
///
/// # Errors
///
/// Returns the first terminal error, the collected node failures as
/// [`GlueError::Aggregate`], or [`GlueError::CleanupPending`] while deletion waits.
pub async fn reconcile_glue(ctx: &Context, glue: &Glue) -> Result<(), GlueError> {
    let start = Instant::now();
    let instance = InstanceId::of(glue);

    let result = if glue.metadata.deletion_timestamp.is_some() {
        delete_glue(ctx, glue).await
    } else {
        debug!("Reconciling Glue {}", instance);
        match reconcile_workflow(ctx, glue).await {
            Ok(Pass::Completed) => update_success_status(ctx, glue).await,
            Ok(Pass::DeletedWithParent) => Ok(()),
            Err(err) => {
                record_error_status(ctx, glue, &err).await;
                Err(err)
            }
        }
    };

    metrics::set_active_watches(KIND, ctx.glue_watches.live_watch_count());
    match &result {
        Ok(()) => metrics::record_reconciliation_success(KIND, start.elapsed()),
        Err(GlueError::CleanupPending { .. }) => {}
        Err(err) => {
            metrics::record_reconciliation_error(KIND, start.elapsed());
            metrics::record_error(KIND, err.category());
        }
    }
    result
}

async fn reconcile_workflow(ctx: &Context, glue: &Glue) -> Result<Pass, GlueError> {
    workflow::validate(&glue.spec)?;

    let instance = InstanceId::of(glue);
    let namespace = instance.namespace.clone();
    let related = ctx
        .glue_watches
        .sync_related(&instance, &related_watches(glue, &namespace))?;
    wait_ready(&related).await?;

    let parent = find_parent(ctx, glue).await?;
    if let Some((_, parent)) = &parent {
        if parent.metadata.deletion_timestamp.is_some() {
            info!(
                "Parent {} of Glue {} is being deleted, deleting the Glue",
                parent.name_any(),
                instance
            );
            ctx.client
                .delete(&ApiResource::erase::<Glue>(&()), Some(&namespace), &instance.name)
                .await?;
            return Ok(Pass::DeletedWithParent);
        }
    }
    if let Some((resource, parent)) = parent.as_ref().filter(|_| is_glue_of_operator(glue)) {
        add_finalizer(
            ctx.client.as_ref(),
            resource,
            &parent.metadata,
            &parent_finalizer(&instance.name),
        )
        .await?;
    }
    ensure_finalizer(ctx.client.as_ref(), glue, FINALIZER_GLUE).await?;

    let mut data = data_with_related(glue, &namespace, &related);
    let plan = workflow::build(&glue.spec, &namespace, &data.to_value(), &ctx.renderer)?;
    let executor = executor(ctx, glue, &plan).await?;
    executor.seed_observed(&plan, &mut data);
    let report = executor.reconcile(&plan, data).await;

    prune_orphans(ctx, glue, &instance).await;
    release_unreferenced(ctx, glue, &plan, &instance);

    let data = report.into_result()?;
    patch_related_status(ctx, glue, &data).await?;
    Ok(Pass::Completed)
}

/// Tear down a `Glue` being deleted.
///
/// # Errors
///
/// Returns [`GlueError::CleanupPending`] while delete postconditions are unmet,
/// and [`GlueError::Aggregate`] if deleting some node failed.
pub async fn delete_glue(ctx: &Context, glue: &Glue) -> Result<(), GlueError> {
    let instance = InstanceId::of(glue);
    if !has_finalizer(&glue.metadata, FINALIZER_GLUE) {
        ctx.glue_watches.release_all(&instance);
        return Ok(());
    }
    info!("Cleaning up Glue {}", instance);

    let namespace = instance.namespace.clone();
    let related = ctx
        .glue_watches
        .sync_related(&instance, &related_watches(glue, &namespace))?;
    wait_ready(&related).await?;
    let data = data_with_related(glue, &namespace, &related);
    let plan = match workflow::build(&glue.spec, &namespace, &data.to_value(), &ctx.renderer) {
        Ok(plan) => plan,
        Err(err) if !err.is_retryable() => {
            warn!(
                "Glue {} has an invalid spec ({}), removing its finalizer without cleanup",
                instance, err
            );
            Plan::default()
        }
        Err(err) => return Err(err),
    };

    let report = executor(ctx, glue, &plan).await?.cleanup(&plan).await;
    let complete = report.is_complete(&plan);
    if !report.failures.is_empty() {
        return Err(GlueError::Aggregate(report.failures));
    }
    if !complete {
        debug!("Cleanup of Glue {} is waiting for dependents", instance);
        return Err(GlueError::CleanupPending {
            name: instance.to_string(),
        });
    }

    if is_glue_of_operator(glue) {
        match find_parent(ctx, glue).await? {
            Some((resource, parent)) => {
                drop_finalizer(
                    ctx.client.as_ref(),
                    &resource,
                    &parent.metadata,
                    &parent_finalizer(&instance.name),
                )
                .await?;
            }
            None => warn!("Parent of Glue {} expected to be present on cleanup", instance),
        }
    }
    remove_finalizer(ctx.client.as_ref(), glue, FINALIZER_GLUE).await?;
    ctx.glue_watches.release_all(&instance);
    info!("Cleaned up Glue {}", instance);
    Ok(())
}

async fn executor<'a>(
    ctx: &'a Context,
    glue: &'a Glue,
    plan: &Plan,
) -> Result<Executor<'a>, GlueError> {
    let instance = InstanceId::of(glue);
    let mut caches = HashMap::new();
    for gvk in plan.gvks() {
        let handle = ctx.glue_watches.acquire(&gvk, &instance, None)?;
        handle.ready().await?;
        caches.insert(gvk, handle);
    }
    Ok(Executor {
        client: ctx.client.as_ref(),
        evaluator: &ctx.conditions,
        renderer: &ctx.renderer,
        field_manager: &ctx.field_manager,
        glue,
        instance,
        caches,
    })
}

async fn wait_ready(handles: &[WatchHandle]) -> Result<(), GlueError> {
    for handle in handles {
        handle.ready().await?;
    }
    Ok(())
}

/// Kinds and explicit routing keys of the related resources.
fn related_watches(glue: &Glue, instance_namespace: &str) -> Vec<(GroupVersionKind, Vec<ObjectKey>)> {
    glue.spec
        .related_resources
        .iter()
        .map(|related| {
            let namespace = related_namespace(related, instance_namespace).unwrap_or_default();
            let keys = related
                .resource_names
                .iter()
                .map(|name| (namespace.clone(), name.clone()))
                .collect();
            (related_gvk(related), keys)
        })
        .collect()
}

fn data_with_related(glue: &Glue, instance_namespace: &str, handles: &[WatchHandle]) -> DataContext {
    let mut data = DataContext::for_glue(glue);
    for (related, handle) in glue.spec.related_resources.iter().zip(handles) {
        data.insert(
            &related.name,
            related_value(related, instance_namespace, &handle.objects()),
        );
    }
    data
}

pub(crate) fn is_glue_of_operator(glue: &Glue) -> bool {
    glue.labels().get(FOR_GLUE_OPERATOR_LABEL_KEY).map(String::as_str)
        == Some(FOR_GLUE_OPERATOR_LABEL_VALUE)
}

fn parent_spec(glue: &Glue) -> Option<&RelatedResourceSpec> {
    glue.spec
        .related_resources
        .iter()
        .find(|r| r.name == PARENT_RELATED_RESOURCE_NAME)
}

async fn find_parent(
    ctx: &Context,
    glue: &Glue,
) -> Result<Option<(ApiResource, DynamicObject)>, GlueError> {
    let Some(spec) = parent_spec(glue) else {
        return Ok(None);
    };
    let Some(name) = spec.resource_names.first() else {
        return Ok(None);
    };
    let resource = api_resource(&related_gvk(spec));
    let namespace = related_namespace(spec, &glue.namespace().unwrap_or_default());
    let parent = ctx.client.get(&resource, namespace.as_deref(), name).await?;
    Ok(parent.map(|p| (resource, p)))
}

/// Delete objects tagged with a child name that is no longer in the spec.
async fn prune_orphans(ctx: &Context, glue: &Glue, instance: &InstanceId) {
    let children: HashSet<&str> = glue
        .spec
        .child_resources
        .iter()
        .map(|c| c.name.as_str())
        .collect();

    for gvk in ctx.glue_watches.watched_kinds(instance) {
        let Some(handle) = ctx.glue_watches.handle(&gvk) else {
            continue;
        };
        let resource = api_resource(&gvk);
        for object in handle.objects() {
            let Some(child) = resource_name_of(&object) else {
                continue;
            };
            if children.contains(child)
                || !managed_by(&object, instance)
                || object.metadata.deletion_timestamp.is_some()
            {
                continue;
            }
            info!(
                "Deleting {} {} of removed child '{}' of Glue {}",
                gvk.kind,
                object.name_any(),
                child,
                instance
            );
            match ctx
                .client
                .delete(&resource, object.namespace().as_deref(), &object.name_any())
                .await
            {
                Ok(true) => metrics::record_resource_deleted(&gvk.kind),
                Ok(false) => {}
                Err(e) => warn!("Error deleting {} {}: {}", gvk.kind, object.name_any(), e),
            }
        }
    }
}

/// Release watches on kinds neither the plan nor a related resource uses any more.
fn release_unreferenced(ctx: &Context, glue: &Glue, plan: &Plan, instance: &InstanceId) {
    let referenced: HashSet<GroupVersionKind> = plan
        .gvks()
        .into_iter()
        .chain(glue.spec.related_resources.iter().map(related_gvk))
        .collect();
    for gvk in ctx.glue_watches.watched_kinds(instance) {
        if !referenced.contains(&gvk) {
            debug!("Glue {} no longer references {}", instance, gvk.kind);
            ctx.glue_watches.release(&gvk, instance);
        }
    }
}

async fn patch_related_status(
    ctx: &Context,
    glue: &Glue,
    data: &DataContext,
) -> Result<(), GlueError> {
    let namespace = glue.namespace().unwrap_or_default();
    let values = data.to_value();

    for related in &glue.spec.related_resources {
        let patch = match (&related.status_patch, &related.status_patch_template) {
            (Some(object), _) => ctx.renderer.render_object(object, &values)?,
            (None, Some(template)) => ctx.renderer.render_yaml(template, &values)?,
            (None, None) => continue,
        };
        let gvk = related_gvk(related);
        let Some(handle) = ctx.glue_watches.handle(&gvk) else {
            continue;
        };
        let resource = api_resource(&gvk);
        for object in related_objects(related, &namespace, &handle.objects()) {
            if status::is_applied(&patch, object.data.get("status")) {
                continue;
            }
            ctx.client
                .patch_status(
                    &resource,
                    object.namespace().as_deref(),
                    &object.name_any(),
                    &patch,
                )
                .await?;
            debug!(
                "Patched status of related '{}' {} for Glue {}",
                related.name,
                object.name_any(),
                InstanceId::of(glue)
            );
        }
    }
    Ok(())
}

async fn update_success_status(ctx: &Context, glue: &Glue) -> Result<(), GlueError> {
    match status::success_patch(glue.status.as_ref(), glue.meta().generation) {
        Some(patch) => status::patch_status(ctx.client.as_ref(), glue, &patch).await,
        None => Ok(()),
    }
}

async fn record_error_status(ctx: &Context, glue: &Glue, err: &GlueError) {
    warn!("Failed to reconcile Glue {}: {}", InstanceId::of(glue), err);
    if let Some(patch) = status::error_patch(glue.status.as_ref(), err) {
        if let Err(e) = status::patch_status(ctx.client.as_ref(), glue, &patch).await {
            warn!("Failed to record error on Glue {}: {}", InstanceId::of(glue), e);
        }
    }
}

#[cfg(test)]
#[path = "glue_tests.rs"]
mod glue_tests;
