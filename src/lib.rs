// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! # Glue Operator - Declarative Workflows for Kubernetes
//!
//! Glue Operator is a Kubernetes operator written in Rust that reconciles graphs of
//! templated resources described by Custom Resource Definitions (CRDs).
//!
//! ## Overview
//!
//! - A [`Glue`](crd::Glue) declares child resources (static objects or YAML templates)
//!   with dependencies, activation and readiness conditions, plus related resources
//!   the templates read from
//! - A [`GlueOperator`](crd::GlueOperator) watches an arbitrary parent kind and keeps
//!   one `Glue` per parent object
//!
//! ## Modules
//!
//! - [`crd`] - Custom Resource Definition types
//! - [`reconcilers`] - Reconciliation logic for `Glue` and `GlueOperator`
//! - [`workflow`] - Spec validation and dependency planning
//! - [`executor`] - Wave-by-wave execution and reverse-order cleanup of a plan
//! - [`dependent`] - Desired-state construction and matching of one child
//! - [`watches`] - Reference-counted dynamic watches and event routing
//! - [`cluster`] - Cluster access seam over the Kubernetes API
//! - [`templating`] - Template rendering
//! - [`conditions`] - Activation and readiness conditions
//!
//! ## Example
//!
//! ```rust,no_run
//! use glue_operator::crd::GlueSpec;
//!
//! let spec: GlueSpec = serde_yaml::from_str(r#"
//! childResources:
//!   - name: configMap1
//!     resource:
//!       apiVersion: v1
//!       kind: ConfigMap
//!       metadata:
//!         name: cm-1
//!       data:
//!         key: value
//! "#).unwrap();
//! assert_eq!(spec.child_resources.len(), 1);
//! ```

pub mod cluster;
pub mod conditions;
pub mod config;
pub mod constants;
pub mod context;
pub mod crd;
pub mod data;
pub mod dependent;
pub mod executor;
pub mod glue_errors;
pub mod identity;
pub mod labels;
pub mod mapper;
pub mod metrics;
pub mod reconcilers;
pub mod templating;
pub mod watches;
pub mod workflow;

#[cfg(test)]
pub mod testing;
