// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Boolean gates attached to workflow nodes.
//!
//! A condition is evaluated against the node's current object (the *target*, absent
//! when it does not exist yet) and the workflow data context. Three kinds exist:
//!
//! - [`readiness`] - status conventions (`Ready`/`Available` conditions, replica
//!   counts, pod phase)
//! - [`template`] - a template rendering to `true`
//! - [`script`] - a Lua expression evaluated in a bounded sandbox
//!
//! The engine attaches them in three roles: activation (node skipped while false),
//! ready postcondition (dependents wait while false) and delete postcondition
//! (teardown of dependencies waits while false).

pub mod readiness;
pub mod script;
pub mod template;

use crate::crd::ConditionSpec;
use crate::glue_errors::GlueError;
use crate::templating::TemplateRenderer;
use script::ScriptSandbox;
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Evaluates [`ConditionSpec`]s.
#[derive(Clone)]
pub struct ConditionEvaluator {
    renderer: TemplateRenderer,
    sandbox: Arc<dyn ScriptSandbox>,
}

impl ConditionEvaluator {
    pub fn new(renderer: TemplateRenderer, sandbox: Arc<dyn ScriptSandbox>) -> Self {
        Self { renderer, sandbox }
    }

    /// Whether `condition` holds for `target` under `data`.
    ///
    /// # Errors
    ///
    /// Returns [`GlueError::Render`] for template failures and
    /// [`GlueError::Sandbox`] for script failures.
    pub fn is_met(
        &self,
        condition: &ConditionSpec,
        target: Option<&JsonValue>,
        data: &JsonValue,
    ) -> Result<bool, GlueError> {
        match condition {
            ConditionSpec::ReadyCondition { negated } => {
                Ok(readiness::is_ready(target) != *negated)
            }
            ConditionSpec::TemplateCondition { template } => {
                template::is_met(&self.renderer, template, target, data)
            }
            ConditionSpec::ScriptCondition { script } => {
                script::is_met(self.sandbox.as_ref(), script, target, data)
            }
        }
    }
}

/// Parse condition output: true iff it is `true`, ignoring case and surrounding whitespace.
#[must_use]
pub fn parse_bool(output: &str) -> bool {
    output.trim().eq_ignore_ascii_case("true")
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod mod_tests;
