// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Operator configuration from command-line flags and environment variables.
//!
//! # Example
//!
//! ```text
//! glue-operator \
//!   --resource-label-selector 'v1#ConfigMap=app=web' \
//!   --glue-label-selector 'team=a' \
//!   --concurrency 32
//! ```

use crate::constants::{
    DEFAULT_CONCURRENCY, DEFAULT_FIELD_MANAGER, DEFAULT_SCRIPT_MEMORY_LIMIT_BYTES,
    DEFAULT_SCRIPT_TIMEOUT_MS,
};
use crate::glue_errors::GlueError;
use crate::identity::gvk_from_api_version;
use clap::Parser;
use kube::api::GroupVersionKind;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Runtime configuration of the operator.
#[derive(Parser, Debug, Clone)]
#[command(name = "glue-operator", version, about = "Declarative Kubernetes workflow operator")]
pub struct OperatorConfig {
    /// Label selector for watches of one kind, as `group/version#Kind=selector`
    /// (repeatable; `;`-separated in the environment variable)
    #[arg(
        long = "resource-label-selector",
        env = "GLUE_RESOURCE_LABEL_SELECTORS",
        value_delimiter = ';'
    )]
    pub resource_label_selectors: Vec<String>,

    /// Label selector restricting which `Glue` objects this operator reconciles
    #[arg(long, env = "GLUE_LABEL_SELECTOR")]
    pub glue_label_selector: Option<String>,

    /// Label added to every `Glue` created by a `GlueOperator`, as `key=value` (repeatable)
    #[arg(
        long = "managed-glue-label",
        env = "GLUE_MANAGED_GLUE_LABELS",
        value_delimiter = ','
    )]
    pub managed_glue_labels: Vec<String>,

    /// Maximum number of instances reconciled concurrently per controller
    #[arg(long, env = "GLUE_CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: u16,

    /// Field manager used for server-side apply
    #[arg(long, env = "GLUE_FIELD_MANAGER", default_value = DEFAULT_FIELD_MANAGER)]
    pub field_manager: String,

    /// Memory limit of one script condition interpreter
    #[arg(long, env = "GLUE_SCRIPT_MEMORY_LIMIT_BYTES", default_value_t = DEFAULT_SCRIPT_MEMORY_LIMIT_BYTES)]
    pub script_memory_limit_bytes: usize,

    /// Wall-clock budget of one script condition
    #[arg(long, env = "GLUE_SCRIPT_TIMEOUT_MS", default_value_t = DEFAULT_SCRIPT_TIMEOUT_MS)]
    pub script_timeout_ms: u64,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            resource_label_selectors: Vec::new(),
            glue_label_selector: None,
            managed_glue_labels: Vec::new(),
            concurrency: DEFAULT_CONCURRENCY,
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
            script_memory_limit_bytes: DEFAULT_SCRIPT_MEMORY_LIMIT_BYTES,
            script_timeout_ms: DEFAULT_SCRIPT_TIMEOUT_MS,
        }
    }
}

impl OperatorConfig {
    /// Per-kind label selectors keyed by kind.
    ///
    /// # Errors
    ///
    /// Returns [`GlueError::Configuration`] for entries not of the form
    /// `group/version#Kind=selector`.
    pub fn label_selectors(&self) -> Result<HashMap<GroupVersionKind, String>, GlueError> {
        self.resource_label_selectors
            .iter()
            .filter(|entry| !entry.trim().is_empty())
            .map(|entry| parse_label_selector_entry(entry))
            .collect()
    }

    /// Labels added to every `Glue` a `GlueOperator` creates.
    ///
    /// Explicit `--managed-glue-label` entries win. Otherwise a simple
    /// `--glue-label-selector` (`key` or `key=value`) is turned into a label so the
    /// generated `Glue` objects are picked up by this operator.
    ///
    /// # Errors
    ///
    /// Returns [`GlueError::Configuration`] for malformed labels or a selector that
    /// cannot be expressed as a single label.
    pub fn default_glue_labels(&self) -> Result<BTreeMap<String, String>, GlueError> {
        if !self.managed_glue_labels.is_empty() {
            return self
                .managed_glue_labels
                .iter()
                .map(|entry| {
                    entry
                        .split_once('=')
                        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                        .filter(|(k, _)| !k.is_empty())
                        .ok_or_else(|| {
                            GlueError::configuration(format!(
                                "managed Glue label must be key=value, got '{entry}'"
                            ))
                        })
                })
                .collect();
        }

        let mut labels = BTreeMap::new();
        if let Some(selector) = self.glue_label_selector.as_deref() {
            if selector.contains(',') || selector.contains('(') || selector.contains('!') {
                return Err(GlueError::configuration(format!(
                    "Glue label selector '{selector}' is not a simple selector; specify it as \
                     'key=value' or 'key', or configure --managed-glue-label"
                )));
            }
            let parts: Vec<&str> = selector.split('=').collect();
            match parts.as_slice() {
                [key] => {
                    labels.insert(key.trim().to_string(), String::new());
                }
                [key, value] => {
                    labels.insert(key.trim().to_string(), value.trim().to_string());
                }
                _ => {
                    return Err(GlueError::configuration(format!(
                        "invalid label selector: {selector}"
                    )))
                }
            }
        }
        Ok(labels)
    }

    /// Script condition wall-clock budget.
    #[must_use]
    pub fn script_timeout(&self) -> Duration {
        Duration::from_millis(self.script_timeout_ms)
    }
}

fn parse_label_selector_entry(entry: &str) -> Result<(GroupVersionKind, String), GlueError> {
    let invalid = || {
        GlueError::configuration(format!(
            "resource label selector must be group/version#Kind=selector, got '{entry}'"
        ))
    };
    let (api_version, rest) = entry.trim().split_once('#').ok_or_else(invalid)?;
    let (kind, selector) = rest.split_once('=').ok_or_else(invalid)?;
    if api_version.is_empty() || kind.is_empty() || selector.trim().is_empty() {
        return Err(invalid());
    }
    Ok((
        gvk_from_api_version(api_version, kind),
        selector.trim().to_string(),
    ))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
