// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Workflow graph builder.
//!
//! [`validate`] checks a [`GlueSpec`] before any cluster I/O; [`build`] turns it
//! into a [`Plan`] of nodes in declaration order with dependency edges pointing
//! at earlier nodes only, so the graph is acyclic by construction.
//!
//! ```text
//! childResources:            Plan
//!   - name: a                  [0] a   depends_on = []      dependents = [1, 2]
//!   - name: b, dependsOn: [a]  [1] b   depends_on = [0]     delete postcondition
//!   - name: c, dependsOn: [a]  [2] c   depends_on = [0]     delete postcondition
//! ```

use crate::crd::{ConditionSpec, GlueSpec};
use crate::dependent::DependentResource;
use crate::glue_errors::GlueError;
use crate::identity::{child_gvk, raw_name_and_namespace};
use crate::templating::TemplateRenderer;
use kube::api::GroupVersionKind;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};

/// One node of the execution plan.
#[derive(Clone, Debug)]
pub struct PlanNode {
    pub dependent: DependentResource,
    /// Indices of the nodes this one waits for
    pub depends_on: Vec<usize>,
    /// Indices of the nodes waiting for this one
    pub dependents: Vec<usize>,
    /// Activation precondition
    pub condition: Option<ConditionSpec>,
    pub ready_post_condition: Option<ConditionSpec>,
    /// During cleanup, this node's dependencies wait until its objects are gone.
    pub delete_post_condition: bool,
}

impl PlanNode {
    #[must_use]
    pub fn name(&self) -> &str {
        self.dependent.name()
    }
}

/// Dependency-ordered nodes of one `Glue`.
#[derive(Clone, Debug, Default)]
pub struct Plan {
    pub nodes: Vec<PlanNode>,
}

impl Plan {
    /// Distinct kinds managed by the plan, in declaration order.
    #[must_use]
    pub fn gvks(&self) -> Vec<GroupVersionKind> {
        let mut seen = HashSet::new();
        self.nodes
            .iter()
            .map(|n| n.dependent.gvk().clone())
            .filter(|gvk| seen.insert(gvk.clone()))
            .collect()
    }

    #[must_use]
    pub fn node(&self, name: &str) -> Option<&PlanNode> {
        self.nodes.iter().find(|n| n.name() == name)
    }

    /// Nodes deleted explicitly during cleanup.
    #[must_use]
    pub fn deletable_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| !n.dependent.is_garbage_collected())
            .count()
    }
}

/// Check the spec without touching the cluster.
///
/// # Errors
///
/// - [`GlueError::NonUniqueNames`] if child and related names collide
/// - [`GlueError::Validation`] for a child with both or neither of `resource` and
///   `resourceTemplate`, a bulk child without template, a child without kind, or a
///   `dependsOn` entry that does not name an earlier child
pub fn validate(spec: &GlueSpec) -> Result<(), GlueError> {
    let mut seen = HashSet::new();
    let mut duplicates: Vec<String> = Vec::new();
    let names = spec
        .child_resources
        .iter()
        .map(|c| c.name.as_str())
        .chain(spec.related_resources.iter().map(|r| r.name.as_str()));
    for name in names {
        if !seen.insert(name) && !duplicates.iter().any(|d| d == name) {
            duplicates.push(name.to_string());
        }
    }
    if !duplicates.is_empty() {
        return Err(GlueError::NonUniqueNames { duplicates });
    }

    let mut declared: HashSet<&str> = HashSet::new();
    let all_children: HashSet<&str> = spec
        .child_resources
        .iter()
        .map(|c| c.name.as_str())
        .collect();

    for child in &spec.child_resources {
        match (&child.resource, &child.resource_template) {
            (Some(_), Some(_)) => {
                return Err(GlueError::validation(format!(
                    "child resource '{}' sets both resource and resourceTemplate",
                    child.name
                )));
            }
            (None, None) => {
                return Err(GlueError::validation(format!(
                    "child resource '{}' sets neither resource nor resourceTemplate",
                    child.name
                )));
            }
            _ => {}
        }
        if child.bulk && child.resource_template.is_none() {
            return Err(GlueError::validation(format!(
                "bulk child resource '{}' requires resourceTemplate",
                child.name
            )));
        }
        child_gvk(child)?;

        for dependency in &child.depends_on {
            if dependency == &child.name {
                return Err(GlueError::validation(format!(
                    "child resource '{}' depends on itself",
                    child.name
                )));
            }
            if !declared.contains(dependency.as_str()) {
                let reason = if all_children.contains(dependency.as_str()) {
                    "which is declared after it"
                } else {
                    "which is not a child resource"
                };
                return Err(GlueError::validation(format!(
                    "child resource '{}' depends on '{}' {}",
                    child.name, dependency, reason
                )));
            }
        }
        declared.insert(child.name.as_str());
    }
    Ok(())
}

/// Names of children nothing depends on.
#[must_use]
pub fn leaf_names(spec: &GlueSpec) -> HashSet<String> {
    let depended_on: HashSet<&str> = spec
        .child_resources
        .iter()
        .flat_map(|c| c.depends_on.iter().map(String::as_str))
        .collect();
    spec.child_resources
        .iter()
        .filter(|c| !depended_on.contains(c.name.as_str()))
        .map(|c| c.name.clone())
        .collect()
}

/// Validate `spec` and build its plan.
///
/// A node is garbage-collected when it is a leaf, not cluster-scoped, and targets
/// `instance_namespace`. A namespace template that cannot be rendered yet makes
/// the node explicitly managed.
///
/// # Errors
///
/// Same as [`validate`].
pub fn build(
    spec: &GlueSpec,
    instance_namespace: &str,
    data: &JsonValue,
    renderer: &TemplateRenderer,
) -> Result<Plan, GlueError> {
    validate(spec)?;
    let leaves = leaf_names(spec);
    let index: HashMap<&str, usize> = spec
        .child_resources
        .iter()
        .enumerate()
        .map(|(i, c)| (c.name.as_str(), i))
        .collect();

    let mut nodes = Vec::with_capacity(spec.child_resources.len());
    for child in &spec.child_resources {
        let same_namespace = match raw_name_and_namespace(child).1 {
            None => true,
            Some(raw) => renderer
                .render(&raw, data)
                .is_ok_and(|ns| ns.trim() == instance_namespace.trim()),
        };
        let garbage_collected =
            leaves.contains(&child.name) && !child.cluster_scoped && same_namespace;

        let depends_on: Vec<usize> = child
            .depends_on
            .iter()
            .filter_map(|d| index.get(d.as_str()).copied())
            .collect();

        nodes.push(PlanNode {
            dependent: DependentResource::new(child.clone(), garbage_collected)?,
            delete_post_condition: !depends_on.is_empty(),
            depends_on,
            dependents: Vec::new(),
            condition: child.condition.clone(),
            ready_post_condition: child.ready_post_condition.clone(),
        });
    }

    for i in 0..nodes.len() {
        for dependency in nodes[i].depends_on.clone() {
            nodes[dependency].dependents.push(i);
        }
    }
    Ok(Plan { nodes })
}

#[cfg(test)]
#[path = "workflow_tests.rs"]
mod workflow_tests;
