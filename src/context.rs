// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared context for the `Glue` and `GlueOperator` controllers.
//!
//! Both controllers receive an `Arc<Context>` that contains:
//! - the cluster client seam
//! - one [`WatchManager`] per controller (dynamic watches for the kinds a `Glue`
//!   manages, parent-kind watches for a `GlueOperator`)
//! - the template renderer and condition evaluator
//! - operator configuration resolved at startup

use crate::cluster::ClusterClient;
use crate::conditions::script::LuaSandbox;
use crate::conditions::ConditionEvaluator;
use crate::config::OperatorConfig;
use crate::glue_errors::GlueError;
use crate::templating::TemplateRenderer;
use crate::watches::{RoutingMode, Trigger, WatchBackend, WatchManager};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Shared context passed to all controllers.
pub struct Context {
    /// Cluster access for every kind the engine touches
    pub client: Arc<dyn ClusterClient>,

    /// Watches on kinds managed or read by `Glue` instances
    pub glue_watches: WatchManager,

    /// Watches on parent kinds of `GlueOperator` instances
    pub parent_watches: WatchManager,

    pub renderer: TemplateRenderer,

    pub conditions: ConditionEvaluator,

    /// Field manager for server-side apply
    pub field_manager: String,

    /// Labels put on every `Glue` created by a `GlueOperator`
    pub default_glue_labels: BTreeMap<String, String>,
}

impl Context {
    /// Build the context from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`GlueError::Configuration`] if label selectors or default labels are malformed.
    pub fn new(
        config: &OperatorConfig,
        client: Arc<dyn ClusterClient>,
        backend: Arc<dyn WatchBackend>,
        glue_trigger: Trigger,
        operator_trigger: Trigger,
    ) -> Result<Self, GlueError> {
        let selectors = config.label_selectors()?;
        let renderer = TemplateRenderer::new();
        let sandbox = LuaSandbox::new(config.script_memory_limit_bytes, config.script_timeout());

        Ok(Self {
            client,
            glue_watches: WatchManager::new(
                backend.clone(),
                glue_trigger,
                RoutingMode::Secondary,
                selectors.clone(),
            ),
            parent_watches: WatchManager::new(
                backend,
                operator_trigger,
                RoutingMode::Broadcast,
                selectors,
            ),
            conditions: ConditionEvaluator::new(renderer.clone(), Arc::new(sandbox)),
            renderer,
            field_manager: config.field_manager.clone(),
            default_glue_labels: config.default_glue_labels()?,
        })
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod context_tests;
