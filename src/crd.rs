// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Custom Resource Definitions (CRDs) for declarative workflows.
//!
//! # Resource Types
//!
//! - [`Glue`] - A workflow instance: an ordered graph of child resources plus the
//!   related (observed, never owned) resources the graph reads from
//! - [`GlueOperator`] - A meta-controller: spawns one [`Glue`] per object of an
//!   arbitrary parent kind
//!
//! # Example: A Two-Step Workflow
//!
//! ```yaml
//! apiVersion: glue.firestoned.io/v1beta1
//! kind: Glue
//! metadata:
//!   name: sample
//! spec:
//!   childResources:
//!     - name: configMap1
//!       resource:
//!         apiVersion: v1
//!         kind: ConfigMap
//!         metadata:
//!           name: cm-1
//!         data:
//!           key: value1
//!     - name: configMap2
//!       dependsOn: [configMap1]
//!       resourceTemplate: |
//!         apiVersion: v1
//!         kind: ConfigMap
//!         metadata:
//!           name: cm-2
//!         data:
//!           copied: "{{ configMap1.data.key }}"
//! ```

use kube::CustomResource;
use schemars::{json_schema, JsonSchema, Schema, SchemaGenerator};
use serde::{Deserialize, Serialize};

/// Schema for free-form Kubernetes objects embedded in a spec.
fn preserve_unknown_fields(_: &mut SchemaGenerator) -> Schema {
    json_schema!({
        "type": "object",
        "nullable": true,
        "x-kubernetes-preserve-unknown-fields": true
    })
}

/// Strategy deciding whether an observed object already matches the desired state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Matcher {
    /// Compare against a server-side dry-run apply of the desired object.
    #[default]
    #[serde(rename = "SSA")]
    ServerSideApply,
    /// Never short-circuit: every pass updates the object.
    #[serde(rename = "NONE")]
    Exact,
}

/// A boolean gate attached to a child resource.
///
/// Serialized as an object discriminated by its `type` field:
///
/// ```yaml
/// readyPostCondition:
///   type: ReadyCondition
///   negated: false
/// condition:
///   type: ScriptCondition
///   script: target.data.enabled == "true"
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ConditionSpec {
    /// Met when the target object reports ready through common status conventions.
    ReadyCondition {
        #[serde(default)]
        negated: bool,
    },
    /// Met when the Lua expression (or chunk) evaluates to `true`.
    ScriptCondition { script: String },
    /// Met when the template renders to `true` (case-insensitive, trimmed).
    TemplateCondition { template: String },
}

/// One node of the workflow graph: a cluster object (or, in bulk mode, a list of them)
/// that the engine creates, updates and deletes on behalf of a [`Glue`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChildResourceSpec {
    /// Logical name, unique among child and related resources of one spec.
    ///
    /// Templates refer to the materialized object under this name.
    pub name: String,

    /// Set for cluster-scoped kinds so no namespace is defaulted.
    #[serde(default)]
    pub cluster_scoped: bool,

    /// Static object. Its string values may contain template expressions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub resource: Option<serde_json::Value>,

    /// YAML template rendering to one object, or to a list of objects when `bulk` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_template: Option<String>,

    #[serde(default)]
    pub matcher: Matcher,

    /// Render `resourceTemplate` to a list and manage each element by its name.
    #[serde(default)]
    pub bulk: bool,

    /// Logical names of earlier child resources this one waits for.
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Gate that must hold before this resource is reconciled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub ready_post_condition: Option<ConditionSpec>,

    /// Activation precondition; the node and its dependents are skipped while it is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub condition: Option<ConditionSpec>,
}

/// A cluster object the workflow reads (and optionally status-patches) but never owns.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RelatedResourceSpec {
    /// Logical name used in templates and conditions (not the object name).
    pub name: String,

    /// Namespace of the related objects; defaults to the `Glue` namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    pub api_version: String,

    pub kind: String,

    #[serde(default)]
    pub cluster_scoped: bool,

    /// Object names to watch and route back to the `Glue`.
    #[serde(default)]
    pub resource_names: Vec<String>,

    /// Object template patched into the status of every related object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub status_patch: Option<serde_json::Value>,

    /// String template rendering to the status patch of every related object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_patch_template: Option<String>,
}

/// Status shared by [`Glue`] and [`GlueOperator`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GlueStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Last reconciliation failure, truncated to 150 characters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// `Glue` reconciles an ordered graph of child resources.
///
/// Children are rendered against a data context holding every already-materialized
/// sibling (by logical name), every related resource (by logical name) and the
/// `Glue`'s own metadata under `glueMetadata`.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "glue.firestoned.io",
    version = "v1beta1",
    kind = "Glue",
    namespaced,
    shortname = "glue",
    doc = "Glue declares a graph of templated child resources and related resources that the operator keeps reconciled."
)]
#[kube(status = "GlueStatus")]
#[serde(rename_all = "camelCase")]
pub struct GlueSpec {
    #[serde(default)]
    pub child_resources: Vec<ChildResourceSpec>,

    #[serde(default)]
    pub related_resources: Vec<RelatedResourceSpec>,
}

/// The kind watched by a [`GlueOperator`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Parent {
    pub api_version: String,

    pub kind: String,

    #[serde(default)]
    pub cluster_scoped: bool,

    /// Only parents matching this label selector get a `Glue`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<String>,

    /// Object template patched into each parent's status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub status: Option<serde_json::Value>,

    /// String template rendering to each parent's status patch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_template: Option<String>,
}

/// Name and namespace templates for generated `Glue` objects.
///
/// Both are rendered with the parent object available as `parent`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GlueMetadata {
    pub name: String,

    pub namespace: String,
}

/// `GlueOperator` spawns one `Glue` per object of the parent kind.
///
/// # Example
///
/// ```yaml
/// apiVersion: glue.firestoned.io/v1beta1
/// kind: GlueOperator
/// metadata:
///   name: webpage-operator
/// spec:
///   parent:
///     apiVersion: example.io/v1
///     kind: WebPage
///   childResources:
///     - name: htmlconfigmap
///       resourceTemplate: |
///         apiVersion: v1
///         kind: ConfigMap
///         metadata:
///           name: "{{ parent.metadata.name }}"
///         data:
///           index.html: "{{ parent.spec.html }}"
/// ```
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "glue.firestoned.io",
    version = "v1beta1",
    kind = "GlueOperator",
    namespaced,
    shortname = "glueop",
    doc = "GlueOperator watches a parent kind and materializes one Glue for every parent object."
)]
#[kube(status = "GlueStatus")]
#[serde(rename_all = "camelCase")]
pub struct GlueOperatorSpec {
    #[serde(default)]
    pub child_resources: Vec<ChildResourceSpec>,

    #[serde(default)]
    pub related_resources: Vec<RelatedResourceSpec>,

    pub parent: Parent,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glue_metadata: Option<GlueMetadata>,
}

impl GlueOperatorSpec {
    /// The embedded workflow spec, without the implicit `parent` related resource.
    #[must_use]
    pub fn glue_spec(&self) -> GlueSpec {
        GlueSpec {
            child_resources: self.child_resources.clone(),
            related_resources: self.related_resources.clone(),
        }
    }
}

#[cfg(test)]
#[path = "crd_tests.rs"]
mod crd_tests;
