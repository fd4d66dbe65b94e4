// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Common label, annotation and finalizer constants used across all reconcilers.
//!
//! Every object the engine creates on behalf of a `Glue` carries the
//! [`GLUE_RESOURCE_NAME_ANNOTATION`]. Objects that cannot be owned through an
//! owner reference additionally carry the primary name/namespace annotations,
//! which the routing index reads back to find the owning `Glue`.

// ============================================================================
// Kubernetes Standard Labels
// https://kubernetes.io/docs/concepts/overview/working-with-objects/common-labels/
// ============================================================================

/// Standard label for the tool being used to manage the operation of an application
pub const K8S_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value for `app.kubernetes.io/managed-by` on objects created by the meta-controller
pub const MANAGED_BY_GLUE_OPERATOR: &str = "GlueOperator";

// ============================================================================
// Glue-Specific Labels
// ============================================================================

/// Label placed on every `Glue` generated by a `GlueOperator`
pub const FOR_GLUE_OPERATOR_LABEL_KEY: &str = "for-glue-operator";

/// Value of [`FOR_GLUE_OPERATOR_LABEL_KEY`]
pub const FOR_GLUE_OPERATOR_LABEL_VALUE: &str = "true";

// ============================================================================
// Glue-Specific Annotations
// ============================================================================

/// Logical child name (`childResources[].name`) of the spec entry that produced an object
pub const GLUE_RESOURCE_NAME_ANNOTATION: &str = "glue.firestoned.io/resource-name";

/// Name of the `Glue` managing an object that is not owned through an owner reference
pub const GLUE_PRIMARY_NAME_ANNOTATION: &str = "glue.firestoned.io/primary-name";

/// Namespace of the `Glue` managing an object that is not owned through an owner reference
pub const GLUE_PRIMARY_NAMESPACE_ANNOTATION: &str = "glue.firestoned.io/primary-namespace";

// ============================================================================
// Finalizers
// ============================================================================

/// Finalizer for `Glue` resources
pub const FINALIZER_GLUE: &str = "glue.firestoned.io/finalizer";

/// Finalizer for `GlueOperator` resources
pub const FINALIZER_GLUE_OPERATOR: &str = "glue.firestoned.io/glueoperator-finalizer";

/// Prefix of the finalizer a `Glue` places on its meta-controller parent
pub const PARENT_GLUE_FINALIZER_PREFIX: &str = "glue.firestoned.io/";

/// Finalizer a `Glue` named `glue_name` places on its parent object.
#[must_use]
pub fn parent_finalizer(glue_name: &str) -> String {
    format!("{PARENT_GLUE_FINALIZER_PREFIX}{glue_name}")
}
