// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Generic dependent resource: one workflow node's cluster objects.
//!
//! A [`DependentResource`] turns a [`ChildResourceSpec`] into desired objects and
//! converges the cluster towards them:
//!
//! ```text
//! render (static object or template) -> decorate -> match observed -> create / update
//! ```
//!
//! # Ownership modes
//!
//! - **Garbage-collected**: leaf nodes in the `Glue` namespace carry a controller
//!   owner reference; the cluster deletes them together with the `Glue`.
//! - **Explicit**: everything else carries the primary name/namespace annotations
//!   and is deleted by the engine during cleanup.
//!
//! Every object carries the resource-name annotation naming the spec entry that
//! produced it, which is how bulk sets and orphan pruning find their objects.
//!
//! # Matchers
//!
//! The SSA matcher dry-runs a server-side apply of the desired object and compares
//! the result with the observed object, ignoring volatile metadata. The exact
//! matcher never short-circuits. `apps/v1 Deployment` always uses the SSA matcher.

use crate::cluster::ClusterClient;
use crate::constants::{DEPLOYMENT_API_VERSION, DEPLOYMENT_KIND};
use crate::crd::{ChildResourceSpec, Glue, Matcher};
use crate::glue_errors::GlueError;
use crate::identity::{
    api_resource, api_version_of, child_gvk, gvk_from_api_version, InstanceId, ResourceIdentity,
};
use crate::labels::{
    GLUE_PRIMARY_NAMESPACE_ANNOTATION, GLUE_PRIMARY_NAME_ANNOTATION, GLUE_RESOURCE_NAME_ANNOTATION,
};
use crate::metrics;
use crate::templating::TemplateRenderer;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use kube::{Resource, ResourceExt};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Metadata fields that change on every write and never count as drift.
const VOLATILE_METADATA: &[&str] = &["resourceVersion", "managedFields", "generation"];

/// What a reconcile pass did to one object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Created,
    Updated,
    Unchanged,
    Deleted,
}

/// One workflow node's objects and how to converge them.
#[derive(Clone, Debug)]
pub struct DependentResource {
    child: ChildResourceSpec,
    gvk: GroupVersionKind,
    resource: ApiResource,
    garbage_collected: bool,
}

impl DependentResource {
    /// # Errors
    ///
    /// Returns [`GlueError::Validation`] if the child does not declare its kind.
    pub fn new(child: ChildResourceSpec, garbage_collected: bool) -> Result<Self, GlueError> {
        let gvk = child_gvk(&child)?;
        let resource = api_resource(&gvk);
        Ok(Self {
            child,
            gvk,
            resource,
            garbage_collected,
        })
    }

    /// Logical name of the spec entry.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.child.name
    }

    #[must_use]
    pub fn spec(&self) -> &ChildResourceSpec {
        &self.child
    }

    #[must_use]
    pub fn gvk(&self) -> &GroupVersionKind {
        &self.gvk
    }

    #[must_use]
    pub fn api_resource(&self) -> &ApiResource {
        &self.resource
    }

    #[must_use]
    pub fn is_bulk(&self) -> bool {
        self.child.bulk
    }

    #[must_use]
    pub fn is_garbage_collected(&self) -> bool {
        self.garbage_collected
    }

    /// Whether updates go through server-side apply.
    #[must_use]
    pub fn uses_server_side_apply(&self) -> bool {
        let is_deployment =
            self.gvk.kind == DEPLOYMENT_KIND && api_version_of(&self.gvk) == DEPLOYMENT_API_VERSION;
        is_deployment || self.child.matcher == Matcher::ServerSideApply
    }

    fn render(&self, data: &JsonValue, renderer: &TemplateRenderer) -> Result<JsonValue, GlueError> {
        let rendered = match (&self.child.resource, &self.child.resource_template) {
            (Some(object), _) => renderer.render_object(object, data),
            (None, Some(template)) => renderer.render_yaml(template, data),
            (None, None) => Err(GlueError::validation(format!(
                "child resource '{}' declares neither resource nor resourceTemplate",
                self.child.name
            ))),
        };
        rendered.map_err(|e| match e {
            GlueError::Render { reason, .. } => GlueError::render(&self.child.name, reason),
            other => other,
        })
    }

    /// Turn a rendered value into an object tagged for `glue`.
    fn decorate(&self, value: JsonValue, glue: &Glue) -> Result<DynamicObject, GlueError> {
        let mut object: DynamicObject = serde_json::from_value(value).map_err(|e| {
            GlueError::render(
                &self.child.name,
                format!("rendered output is not a Kubernetes object: {e}"),
            )
        })?;
        if object.metadata.name.as_deref().is_none_or(str::is_empty) {
            return Err(GlueError::render(
                &self.child.name,
                "rendered object has no metadata.name",
            ));
        }

        let glue_namespace = glue.namespace().unwrap_or_default();
        if self.child.cluster_scoped {
            object.metadata.namespace = None;
        } else if object.metadata.namespace.is_none() {
            object.metadata.namespace = Some(glue_namespace.clone());
        }

        object
            .annotations_mut()
            .insert(GLUE_RESOURCE_NAME_ANNOTATION.to_string(), self.child.name.clone());

        if self.garbage_collected {
            let owner = glue.controller_owner_ref(&()).ok_or_else(|| {
                GlueError::configuration(format!(
                    "Glue {}/{} has no uid to own '{}'",
                    glue_namespace,
                    glue.name_any(),
                    self.child.name
                ))
            })?;
            let owners = object.metadata.owner_references.get_or_insert_with(Vec::new);
            if !owners.iter().any(|o| o.uid == owner.uid) {
                owners.push(owner);
            }
        } else {
            let annotations = object.annotations_mut();
            annotations.insert(GLUE_PRIMARY_NAME_ANNOTATION.to_string(), glue.name_any());
            annotations.insert(GLUE_PRIMARY_NAMESPACE_ANNOTATION.to_string(), glue_namespace);
        }
        Ok(object)
    }

    /// Desired object of a single-mode node.
    ///
    /// # Errors
    ///
    /// Returns [`GlueError::Render`] if rendering fails or does not produce a named object.
    pub fn desired(
        &self,
        glue: &Glue,
        data: &JsonValue,
        renderer: &TemplateRenderer,
    ) -> Result<DynamicObject, GlueError> {
        let value = self.render(data, renderer)?;
        self.decorate(value, glue)
    }

    /// Desired objects of a bulk node, keyed by object name.
    ///
    /// The template renders to a YAML list, or to an object with an `items` list.
    ///
    /// # Errors
    ///
    /// Returns [`GlueError::Render`] if rendering fails, the output is not a list, or two
    /// elements share a name.
    pub fn desired_set(
        &self,
        glue: &Glue,
        data: &JsonValue,
        renderer: &TemplateRenderer,
    ) -> Result<BTreeMap<String, DynamicObject>, GlueError> {
        let items = match self.render(data, renderer)? {
            JsonValue::Null => Vec::new(),
            JsonValue::Array(items) => items,
            JsonValue::Object(mut map) => match map.remove("items") {
                Some(JsonValue::Array(items)) => items,
                Some(JsonValue::Null) | None => Vec::new(),
                Some(_) => {
                    return Err(GlueError::render(&self.child.name, "`items` is not a list"));
                }
            },
            _ => {
                return Err(GlueError::render(
                    &self.child.name,
                    "bulk template must render to a list of objects",
                ));
            }
        };

        let mut desired = BTreeMap::new();
        for item in items {
            let object = self.decorate(item, glue)?;
            let name = object.name_any();
            if desired.insert(name.clone(), object).is_some() {
                return Err(GlueError::render(
                    &self.child.name,
                    format!("bulk template renders '{name}' more than once"),
                ));
            }
        }
        Ok(desired)
    }

    /// The cached object a single-mode node resolves to.
    ///
    /// # Errors
    ///
    /// Returns [`GlueError::RoutingAmbiguity`] if several cached objects match.
    pub fn select_observed(
        &self,
        identity: &ResourceIdentity,
        cache: &[Arc<DynamicObject>],
    ) -> Result<Option<DynamicObject>, GlueError> {
        let matching: Vec<&Arc<DynamicObject>> = cache
            .iter()
            .filter(|o| is_kind(o, &self.gvk))
            .filter(|o| o.name_any() == identity.name)
            .filter(|o| {
                identity
                    .namespace
                    .as_deref()
                    .is_none_or(|ns| o.namespace().as_deref() == Some(ns))
            })
            .collect();

        match matching.as_slice() {
            [] => Ok(None),
            [object] => Ok(Some(DynamicObject::clone(object))),
            many => Err(GlueError::RoutingAmbiguity {
                resource: self.child.name.clone(),
                kind: self.gvk.kind.clone(),
                name: identity.name.clone(),
                count: many.len(),
            }),
        }
    }

    /// Cached objects this node manages for `instance`, keyed by object name.
    #[must_use]
    pub fn observed_set(
        &self,
        instance: &InstanceId,
        cache: &[Arc<DynamicObject>],
    ) -> BTreeMap<String, DynamicObject> {
        self.managed_objects(instance, cache)
            .into_iter()
            .map(|o| (o.name_any(), o))
            .collect()
    }

    /// Every cached object tagged with this node's name and managed by `instance`.
    #[must_use]
    pub fn managed_objects(
        &self,
        instance: &InstanceId,
        cache: &[Arc<DynamicObject>],
    ) -> Vec<DynamicObject> {
        cache
            .iter()
            .filter(|o| is_kind(o, &self.gvk))
            .filter(|o| resource_name_of(o) == Some(self.child.name.as_str()))
            .filter(|o| managed_by(o, instance))
            .map(|o| DynamicObject::clone(o))
            .collect()
    }

    /// Whether `observed` already matches `desired`.
    ///
    /// # Errors
    ///
    /// Returns the cluster error if the dry-run apply fails.
    pub async fn matches(
        &self,
        client: &dyn ClusterClient,
        observed: &DynamicObject,
        desired: &DynamicObject,
        field_manager: &str,
    ) -> Result<bool, GlueError> {
        if !self.uses_server_side_apply() {
            return Ok(false);
        }
        let preview = client
            .dry_run_apply(&self.resource, desired, field_manager)
            .await?;
        Ok(comparable(&preview) == comparable(observed))
    }

    /// Create `desired` if missing, update it if it drifted.
    ///
    /// # Errors
    ///
    /// Returns the cluster error of the failed write.
    pub async fn converge(
        &self,
        client: &dyn ClusterClient,
        observed: Option<&DynamicObject>,
        desired: &DynamicObject,
        field_manager: &str,
    ) -> Result<(DynamicObject, Operation), GlueError> {
        let kind = self.gvk.kind.as_str();
        let Some(observed) = observed else {
            let created = if self.uses_server_side_apply() {
                client.apply(&self.resource, desired, field_manager).await?
            } else {
                client.create(&self.resource, desired).await?
            };
            info!("Created {} {} for '{}'", kind, created.name_any(), self.child.name);
            metrics::record_resource_created(kind);
            return Ok((created, Operation::Created));
        };

        if self.matches(client, observed, desired, field_manager).await? {
            debug!("{} {} is up to date", kind, observed.name_any());
            return Ok((observed.clone(), Operation::Unchanged));
        }

        let updated = if self.uses_server_side_apply() {
            client.apply(&self.resource, desired, field_manager).await?
        } else {
            let mut replacement = desired.clone();
            replacement
                .metadata
                .resource_version
                .clone_from(&observed.metadata.resource_version);
            client.replace(&self.resource, &replacement).await?
        };
        info!("Updated {} {} for '{}'", kind, updated.name_any(), self.child.name);
        metrics::record_resource_updated(kind);
        Ok((updated, Operation::Updated))
    }

    /// Delete one object of this node.
    ///
    /// # Errors
    ///
    /// Returns the cluster error if the delete fails for a reason other than not-found.
    pub async fn delete_object(
        &self,
        client: &dyn ClusterClient,
        object: &DynamicObject,
    ) -> Result<Operation, GlueError> {
        let deleted = client
            .delete(&self.resource, object.namespace().as_deref(), &object.name_any())
            .await?;
        if deleted {
            info!(
                "Deleted {} {} of '{}'",
                self.gvk.kind,
                object.name_any(),
                self.child.name
            );
            metrics::record_resource_deleted(&self.gvk.kind);
            Ok(Operation::Deleted)
        } else {
            Ok(Operation::Unchanged)
        }
    }

    /// Delete every object this node manages for `instance`.
    ///
    /// # Errors
    ///
    /// Returns the first cluster error.
    pub async fn delete_managed(
        &self,
        client: &dyn ClusterClient,
        instance: &InstanceId,
        cache: &[Arc<DynamicObject>],
    ) -> Result<usize, GlueError> {
        let mut deleted = 0;
        for object in self.managed_objects(instance, cache) {
            if self.delete_object(client, &object).await? == Operation::Deleted {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

fn is_kind(object: &DynamicObject, gvk: &GroupVersionKind) -> bool {
    object
        .types
        .as_ref()
        .is_none_or(|t| gvk_from_api_version(&t.api_version, &t.kind) == *gvk)
}

/// The resource-name annotation of an object, if any.
#[must_use]
pub fn resource_name_of(object: &DynamicObject) -> Option<&str> {
    object
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(GLUE_RESOURCE_NAME_ANNOTATION))
        .map(String::as_str)
}

/// Whether `object` is owned by, or annotated for, the `Glue` `instance`.
#[must_use]
pub fn managed_by(object: &DynamicObject, instance: &InstanceId) -> bool {
    let owned = object.namespace().as_deref() == Some(instance.namespace.as_str())
        && object
            .owner_references()
            .iter()
            .any(|o| o.kind == Glue::kind(&()) && o.name == instance.name);
    if owned {
        return true;
    }
    let annotations = object.annotations();
    annotations.get(GLUE_PRIMARY_NAME_ANNOTATION) == Some(&instance.name)
        && annotations.get(GLUE_PRIMARY_NAMESPACE_ANNOTATION) == Some(&instance.namespace)
}

/// JSON form of an object without volatile metadata.
fn comparable(object: &DynamicObject) -> JsonValue {
    let mut value = serde_json::to_value(object).unwrap_or_default();
    if let Some(metadata) = value.get_mut("metadata").and_then(JsonValue::as_object_mut) {
        for field in VOLATILE_METADATA {
            metadata.remove(*field);
        }
    }
    value
}

/// Objects as they appear in the data context (bulk nodes expose a list).
#[must_use]
pub fn to_context_value(objects: &[DynamicObject]) -> JsonValue {
    JsonValue::Array(
        objects
            .iter()
            .map(|o| serde_json::to_value(o).unwrap_or_default())
            .collect(),
    )
}

#[cfg(test)]
#[path = "dependent_tests.rs"]
mod dependent_tests;
