// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Plan executor.
//!
//! # Reconcile
//!
//! Nodes run in dependency waves. A wave holds every pending node whose
//! dependencies are all *ready*; its nodes run concurrently against the same
//! data-context snapshot and their results are merged before the next wave:
//!
//! ```text
//! wave 1: a            (no dependencies)
//! wave 2: b, c         (depend on a, which reported ready)
//! ```
//!
//! A node whose activation condition is false is skipped together with everything
//! depending on it, and the objects they created earlier are deleted. A node whose
//! ready postcondition is false does not block its siblings but its dependents wait
//! for the next reconciliation. Node failures are collected and reported together.
//!
//! # Cleanup
//!
//! Cleanup walks the plan in reverse: a node is torn down once all its dependents
//! are gone. Explicitly managed nodes are deleted; garbage-collected nodes are left
//! to the cluster. Nodes with a delete postcondition hold back their dependencies
//! until none of their objects remain.

use crate::cluster::ClusterClient;
use crate::conditions::ConditionEvaluator;
use crate::crd::{ConditionSpec, Glue};
use crate::data::DataContext;
use crate::dependent::{to_context_value, Operation};
use crate::glue_errors::{GlueError, NodeFailure};
use crate::identity::{resolve_child, InstanceId};
use crate::templating::TemplateRenderer;
use crate::watches::WatchHandle;
use crate::workflow::{Plan, PlanNode};
use futures::future::join_all;
use kube::api::{DynamicObject, GroupVersionKind};
use kube::ResourceExt;
use serde_json::Value as JsonValue;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// State of a node after one execution pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    /// Reconciled and its ready postcondition holds
    Ready,
    /// Reconciled, but its ready postcondition does not hold yet
    NotReady,
    /// Its activation condition, or that of a dependency, is false
    Skipped,
    Failed,
    /// A dependency is not ready or failed
    Blocked,
}

/// Outcome of [`Executor::reconcile`].
#[derive(Debug)]
pub struct ExecutionReport {
    /// Per node, in plan order
    pub states: Vec<NodeState>,
    pub failures: Vec<NodeFailure>,
    /// Data context after execution
    pub data: DataContext,
}

impl ExecutionReport {
    #[must_use]
    pub fn state_of(&self, plan: &Plan, name: &str) -> Option<NodeState> {
        plan.nodes
            .iter()
            .position(|n| n.name() == name)
            .and_then(|i| self.states.get(i).copied())
    }

    /// The data context, or the collected failures.
    ///
    /// # Errors
    ///
    /// Returns [`GlueError::Aggregate`] if any node failed.
    pub fn into_result(self) -> Result<DataContext, GlueError> {
        if self.failures.is_empty() {
            Ok(self.data)
        } else {
            Err(GlueError::Aggregate(self.failures))
        }
    }
}

/// Outcome of [`Executor::cleanup`].
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub all_post_conditions_met: bool,
    /// Number of explicitly managed nodes delete was invoked on
    pub delete_called: usize,
    pub failures: Vec<NodeFailure>,
}

impl CleanupReport {
    /// Whether the `Glue` can release its finalizer.
    #[must_use]
    pub fn is_complete(&self, plan: &Plan) -> bool {
        self.failures.is_empty()
            && self.all_post_conditions_met
            && self.delete_called >= plan.deletable_count()
    }
}

enum NodeOutcome {
    Reconciled { value: JsonValue, ready: bool },
    Skipped,
}

/// Executes a [`Plan`] for one `Glue`.
pub struct Executor<'a> {
    pub client: &'a dyn ClusterClient,
    pub evaluator: &'a ConditionEvaluator,
    pub renderer: &'a TemplateRenderer,
    pub field_manager: &'a str,
    pub glue: &'a Glue,
    pub instance: InstanceId,
    /// Watch caches by managed kind
    pub caches: HashMap<GroupVersionKind, WatchHandle>,
}

impl Executor<'_> {
    fn cache(&self, gvk: &GroupVersionKind) -> Vec<Arc<DynamicObject>> {
        self.caches.get(gvk).map(WatchHandle::objects).unwrap_or_default()
    }

    /// Put the currently observed objects of every node into `data`.
    ///
    /// Objects are found by their resource-name annotation so that nothing needs
    /// rendering yet.
    pub fn seed_observed(&self, plan: &Plan, data: &mut DataContext) {
        for node in &plan.nodes {
            let dependent = &node.dependent;
            let objects = dependent.managed_objects(&self.instance, &self.cache(dependent.gvk()));
            let value = if dependent.is_bulk() {
                to_context_value(&objects)
            } else {
                objects
                    .first()
                    .map_or(JsonValue::Null, |o| serde_json::to_value(o).unwrap_or_default())
            };
            data.insert(node.name(), value);
        }
    }

    /// Run every node in dependency waves.
    pub async fn reconcile(&self, plan: &Plan, mut data: DataContext) -> ExecutionReport {
        let mut states: Vec<Option<NodeState>> = vec![None; plan.nodes.len()];
        let mut failures = Vec::new();

        loop {
            let wave: Vec<usize> = (0..plan.nodes.len())
                .filter(|&i| states[i].is_none())
                .filter(|&i| {
                    plan.nodes[i]
                        .depends_on
                        .iter()
                        .all(|&d| states[d] == Some(NodeState::Ready))
                })
                .collect();
            if wave.is_empty() {
                break;
            }

            let snapshot = data.to_value();
            debug!(
                "Executing wave of {} node(s) for {}",
                wave.len(),
                self.instance
            );
            let results = join_all(
                wave.iter()
                    .map(|&i| self.run_node(&plan.nodes[i], &snapshot)),
            )
            .await;

            for (i, result) in wave.into_iter().zip(results) {
                let node = &plan.nodes[i];
                states[i] = Some(match result {
                    Ok(NodeOutcome::Reconciled { value, ready }) => {
                        data.insert(node.name(), value);
                        if ready {
                            NodeState::Ready
                        } else {
                            debug!("'{}' is not ready yet, holding its dependents", node.name());
                            NodeState::NotReady
                        }
                    }
                    Ok(NodeOutcome::Skipped) => {
                        debug!("Activation condition of '{}' is false", node.name());
                        NodeState::Skipped
                    }
                    Err(error) => {
                        failures.push(NodeFailure {
                            resource: node.name().to_string(),
                            error,
                        });
                        NodeState::Failed
                    }
                });
            }
        }

        let inactive = inactive_nodes(plan, &states);
        let removals = join_all(
            inactive
                .iter()
                .map(|&i| self.deactivate_node(&plan.nodes[i])),
        )
        .await;
        for (i, result) in inactive.into_iter().zip(removals) {
            let node = &plan.nodes[i];
            match result {
                Ok(()) => {
                    states[i] = Some(NodeState::Skipped);
                    let empty = if node.dependent.is_bulk() {
                        JsonValue::Array(Vec::new())
                    } else {
                        JsonValue::Null
                    };
                    data.insert(node.name(), empty);
                }
                Err(error) => {
                    failures.push(NodeFailure {
                        resource: node.name().to_string(),
                        error,
                    });
                    states[i] = Some(NodeState::Failed);
                }
            }
        }

        ExecutionReport {
            states: states
                .into_iter()
                .map(|s| s.unwrap_or(NodeState::Blocked))
                .collect(),
            failures,
            data,
        }
    }

    async fn run_node(&self, node: &PlanNode, data: &JsonValue) -> Result<NodeOutcome, GlueError> {
        if node.dependent.is_bulk() {
            self.run_bulk_node(node, data).await
        } else {
            self.run_single_node(node, data).await
        }
    }

    async fn run_single_node(
        &self,
        node: &PlanNode,
        data: &JsonValue,
    ) -> Result<NodeOutcome, GlueError> {
        let dependent = &node.dependent;
        let namespace = self.instance.namespace.as_str();
        let identity = resolve_child(dependent.spec(), data, self.renderer, namespace)?;
        let observed = dependent.select_observed(&identity, &self.cache(dependent.gvk()))?;
        let target = observed
            .as_ref()
            .map(|o| serde_json::to_value(o).unwrap_or_default());

        if !self.activated(node, target.as_ref(), data)? {
            return Ok(NodeOutcome::Skipped);
        }

        let desired = dependent.desired(self.glue, data, self.renderer)?;
        let (current, _) = dependent
            .converge(self.client, observed.as_ref(), &desired, self.field_manager)
            .await?;
        let value = serde_json::to_value(&current).unwrap_or_default();
        let ready = self.post_condition_met(node.ready_post_condition.as_ref(), &[&value], data)?;
        Ok(NodeOutcome::Reconciled { value, ready })
    }

    async fn run_bulk_node(
        &self,
        node: &PlanNode,
        data: &JsonValue,
    ) -> Result<NodeOutcome, GlueError> {
        let dependent = &node.dependent;
        let mut observed = dependent.observed_set(&self.instance, &self.cache(dependent.gvk()));
        let target = to_context_value(&observed.values().cloned().collect::<Vec<_>>());

        if !self.activated(node, Some(&target), data)? {
            return Ok(NodeOutcome::Skipped);
        }

        let desired = dependent.desired_set(self.glue, data, self.renderer)?;
        let mut current = Vec::with_capacity(desired.len());
        let mut errors = Vec::new();
        for (name, object) in &desired {
            match dependent
                .converge(self.client, observed.remove(name).as_ref(), object, self.field_manager)
                .await
            {
                Ok((object, _)) => current.push(object),
                Err(e) => errors.push(e),
            }
        }
        for stale in observed.values() {
            match dependent.delete_object(self.client, stale).await {
                Ok(Operation::Deleted) => {
                    debug!("Removed '{}' from bulk '{}'", stale.name_any(), node.name());
                }
                Ok(_) => {}
                Err(e) => errors.push(e),
            }
        }
        let mut errors = errors.into_iter();
        if let Some(first) = errors.next() {
            for other in errors {
                warn!("Bulk '{}' also failed: {}", node.name(), other);
            }
            return Err(first);
        }

        let values: Vec<JsonValue> = current
            .iter()
            .map(|o| serde_json::to_value(o).unwrap_or_default())
            .collect();
        let refs: Vec<&JsonValue> = values.iter().collect();
        let ready = self.post_condition_met(node.ready_post_condition.as_ref(), &refs, data)?;
        Ok(NodeOutcome::Reconciled {
            value: JsonValue::Array(values),
            ready,
        })
    }

    /// Remove what an inactive node left behind.
    async fn deactivate_node(&self, node: &PlanNode) -> Result<(), GlueError> {
        let dependent = &node.dependent;
        let removed = dependent
            .delete_managed(self.client, &self.instance, &self.cache(dependent.gvk()))
            .await?;
        if removed > 0 {
            info!(
                "Deleted {} object(s) of inactive '{}' for {}",
                removed,
                node.name(),
                self.instance
            );
        }
        Ok(())
    }

    fn activated(
        &self,
        node: &PlanNode,
        target: Option<&JsonValue>,
        data: &JsonValue,
    ) -> Result<bool, GlueError> {
        match &node.condition {
            Some(condition) => self.evaluator.is_met(condition, target, data),
            None => Ok(true),
        }
    }

    fn post_condition_met(
        &self,
        condition: Option<&ConditionSpec>,
        targets: &[&JsonValue],
        data: &JsonValue,
    ) -> Result<bool, GlueError> {
        let Some(condition) = condition else {
            return Ok(true);
        };
        for target in targets {
            if !self.evaluator.is_met(condition, Some(target), data)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Tear the plan down in reverse dependency order.
    pub async fn cleanup(&self, plan: &Plan) -> CleanupReport {
        let mut done: Vec<Option<bool>> = vec![None; plan.nodes.len()];
        let mut report = CleanupReport::default();

        loop {
            let wave: Vec<usize> = (0..plan.nodes.len())
                .filter(|&i| done[i].is_none())
                .filter(|&i| plan.nodes[i].dependents.iter().all(|&d| done[d] == Some(true)))
                .collect();
            if wave.is_empty() {
                break;
            }

            let results = join_all(wave.iter().map(|&i| self.cleanup_node(&plan.nodes[i]))).await;
            for (i, result) in wave.into_iter().zip(results) {
                let node = &plan.nodes[i];
                match result {
                    Ok((delete_called, met)) => {
                        if delete_called {
                            report.delete_called += 1;
                        }
                        if !met {
                            info!(
                                "Waiting for objects of '{}' to be deleted before its dependencies",
                                node.name()
                            );
                        }
                        done[i] = Some(met);
                    }
                    Err(error) => {
                        report.failures.push(NodeFailure {
                            resource: node.name().to_string(),
                            error,
                        });
                        done[i] = Some(false);
                    }
                }
            }
        }

        report.all_post_conditions_met = done.iter().all(|d| *d == Some(true));
        report
    }

    /// Returns whether delete was invoked and whether the delete postcondition holds.
    async fn cleanup_node(&self, node: &PlanNode) -> Result<(bool, bool), GlueError> {
        let dependent = &node.dependent;
        if dependent.is_garbage_collected() {
            debug!("'{}' is garbage collected with its Glue", node.name());
            return Ok((false, true));
        }

        dependent
            .delete_managed(self.client, &self.instance, &self.cache(dependent.gvk()))
            .await?;
        let met = !node.delete_post_condition
            || dependent
                .managed_objects(&self.instance, &self.cache(dependent.gvk()))
                .is_empty();
        Ok((true, met))
    }
}

/// Nodes whose activation condition is false, and everything depending on them.
fn inactive_nodes(plan: &Plan, states: &[Option<NodeState>]) -> Vec<usize> {
    let mut pending: Vec<usize> = (0..states.len())
        .filter(|&i| states[i] == Some(NodeState::Skipped))
        .collect();
    let mut inactive: BTreeSet<usize> = pending.iter().copied().collect();
    while let Some(i) = pending.pop() {
        for &dependent in &plan.nodes[i].dependents {
            if inactive.insert(dependent) {
                pending.push(dependent);
            }
        }
    }
    inactive.into_iter().collect()
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod executor_tests;
