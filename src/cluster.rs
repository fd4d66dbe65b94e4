// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Cluster access seam for untyped objects.
//!
//! The engine manipulates arbitrary kinds, so every call is made on
//! [`DynamicObject`] addressed by an [`ApiResource`]. [`ClusterClient`] is the
//! seam between the workflow engine and the API server; [`KubeClusterClient`]
//! implements it with `kube::Api`.
//!
//! # Update strategies
//!
//! - **apply**: server-side apply with `force`, used by the SSA matcher and for
//!   generated `Glue` objects
//! - **replace**: full replace carrying the observed `resourceVersion`, used by
//!   the exact matcher
//! - **`dry_run_apply`**: server-side apply with `dryRun=All`, used to compute what
//!   an apply would change without changing it

use crate::glue_errors::GlueError;
use async_trait::async_trait;
use kube::api::{ApiResource, DeleteParams, DynamicObject, Patch, PatchParams, PostParams};
use kube::{Api, Client, ResourceExt};
use serde_json::{json, Value as JsonValue};
use tracing::{debug, info, warn};

/// Operations the engine needs from the cluster.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetch one object; `Ok(None)` when it does not exist.
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>, GlueError>;

    async fn create(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, GlueError>;

    async fn replace(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, GlueError>;

    /// Server-side apply with `force`.
    async fn apply(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
        field_manager: &str,
    ) -> Result<DynamicObject, GlueError>;

    /// Server-side apply in dry-run mode: returns what the object would look like.
    async fn dry_run_apply(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
        field_manager: &str,
    ) -> Result<DynamicObject, GlueError>;

    /// Delete an object. Returns `Ok(false)` if it was already gone.
    async fn delete(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<bool, GlueError>;

    /// Merge-patch the status subresource.
    async fn patch_status(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        status: &JsonValue,
    ) -> Result<(), GlueError>;

    /// Replace `metadata.finalizers` with a merge patch.
    async fn patch_finalizers(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        finalizers: &[String],
    ) -> Result<(), GlueError>;
}

/// `Kind namespace/name` used in error messages and logs.
#[must_use]
pub fn describe_target(resource: &ApiResource, namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) => format!("{} {}/{}", resource.kind, ns, name),
        None => format!("{} {}", resource.kind, name),
    }
}

/// [`ClusterClient`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, resource: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, resource),
            None => Api::all_with(self.client.clone(), resource),
        }
    }

    fn object_api(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> (Api<DynamicObject>, String, String) {
        let namespace = object.namespace();
        let name = object.name_any();
        let target = describe_target(resource, namespace.as_deref(), &name);
        (self.api(resource, namespace.as_deref()), name, target)
    }
}

fn cluster_error(operation: &'static str, target: String) -> impl FnOnce(kube::Error) -> GlueError {
    move |source| GlueError::Cluster {
        operation,
        target,
        source,
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>, GlueError> {
        self.api(resource, namespace)
            .get_opt(name)
            .await
            .map_err(cluster_error("get", describe_target(resource, namespace, name)))
    }

    async fn create(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, GlueError> {
        let (api, _, target) = self.object_api(resource, object);
        let created = api
            .create(&PostParams::default(), object)
            .await
            .map_err(cluster_error("create", target.clone()))?;
        info!("Created {}", target);
        Ok(created)
    }

    async fn replace(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, GlueError> {
        let (api, name, target) = self.object_api(resource, object);
        let replaced = api
            .replace(&name, &PostParams::default(), object)
            .await
            .map_err(cluster_error("replace", target.clone()))?;
        info!("Replaced {}", target);
        Ok(replaced)
    }

    async fn apply(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
        field_manager: &str,
    ) -> Result<DynamicObject, GlueError> {
        let (api, name, target) = self.object_api(resource, object);
        let applied = api
            .patch(
                &name,
                &PatchParams::apply(field_manager).force(),
                &Patch::Apply(object),
            )
            .await
            .map_err(cluster_error("apply", target.clone()))?;
        info!("Applied {}", target);
        Ok(applied)
    }

    async fn dry_run_apply(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
        field_manager: &str,
    ) -> Result<DynamicObject, GlueError> {
        let (api, name, target) = self.object_api(resource, object);
        debug!("Dry-run apply of {}", target);
        api.patch(
            &name,
            &PatchParams::apply(field_manager).force().dry_run(),
            &Patch::Apply(object),
        )
        .await
        .map_err(cluster_error("dry-run apply", target))
    }

    async fn delete(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<bool, GlueError> {
        let target = describe_target(resource, namespace, name);
        match self
            .api(resource, namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => {
                info!("Deleted {}", target);
                Ok(true)
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                warn!("{} already deleted", target);
                Ok(false)
            }
            Err(e) => Err(cluster_error("delete", target)(e)),
        }
    }

    async fn patch_status(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        status: &JsonValue,
    ) -> Result<(), GlueError> {
        let patch = json!({ "status": status });
        self.api(resource, namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(cluster_error(
                "patch status of",
                describe_target(resource, namespace, name),
            ))?;
        debug!(
            "Patched status of {}",
            describe_target(resource, namespace, name)
        );
        Ok(())
    }

    async fn patch_finalizers(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        finalizers: &[String],
    ) -> Result<(), GlueError> {
        let patch = json!({ "metadata": { "finalizers": finalizers } });
        self.api(resource, namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(cluster_error(
                "patch finalizers of",
                describe_target(resource, namespace, name),
            ))?;
        Ok(())
    }
}
