// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error types for workflow reconciliation.
//!
//! [`GlueError`] classifies every failure the engine can surface:
//!
//! - **Validation** (`NonUniqueNames`, `Validation`) - terminal, the spec must change
//! - **Routing** (`RoutingAmbiguity`) - one child matches several observed objects
//! - **Rendering** (`Render`) and **scripting** (`Sandbox`) - retried
//! - **Cluster** (`Cluster`) - retried by the controller
//! - **Configuration** (`Configuration`) - operator misconfiguration, retried
//! - **Aggregate** - per-node failures collected during one execution pass
//!
//! `CleanupPending` is not a failure: it keeps the finalizer in place while
//! delete postconditions are still unmet.

use crate::constants::NON_UNIQUE_NAMES_FOUND_PREFIX;
use thiserror::Error;

/// A failure of a single workflow node, collected during plan execution.
#[derive(Debug)]
pub struct NodeFailure {
    /// Logical name of the child resource that failed
    pub resource: String,
    /// What went wrong
    pub error: GlueError,
}

impl std::fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.resource, self.error)
    }
}

/// Errors raised while validating, rendering, executing or cleaning up a workflow.
#[derive(Error, Debug)]
pub enum GlueError {
    /// Two or more child/related resources share a logical name.
    ///
    /// The message starts with a fixed prefix so tooling can detect it in `status.errorMessage`.
    #[error("{}{}", NON_UNIQUE_NAMES_FOUND_PREFIX, .duplicates.join(","))]
    NonUniqueNames {
        /// Every name seen more than once, in declaration order
        duplicates: Vec<String>,
    },

    /// The spec is structurally invalid (bulk without template, bad `dependsOn`, ...).
    #[error("Invalid workflow spec: {reason}")]
    Validation {
        /// Explanation of what is invalid
        reason: String,
    },

    /// More than one observed object matches a single child resource.
    #[error("Child resource '{resource}' matches {count} observed {kind} objects named '{name}'")]
    RoutingAmbiguity {
        /// Logical child name
        resource: String,
        /// Kind of the conflicting objects
        kind: String,
        /// Resolved object name
        name: String,
        /// Number of matching objects
        count: usize,
    },

    /// A template failed to render or its output failed to parse.
    #[error("Failed to render '{resource}': {reason}")]
    Render {
        /// Logical resource (or template role) being rendered
        resource: String,
        /// Renderer or parser message
        reason: String,
    },

    /// A script condition failed to compile or execute.
    #[error("Script condition failed: {reason}")]
    Sandbox {
        /// Interpreter message
        reason: String,
    },

    /// A Kubernetes API call failed.
    #[error("Failed to {operation} {target}: {source}")]
    Cluster {
        /// The attempted verb (create, apply, delete, ...)
        operation: &'static str,
        /// `Kind namespace/name` of the object
        target: String,
        /// Underlying API error
        #[source]
        source: kube::Error,
    },

    /// Operator configuration rejects the request (e.g. conflicting label selectors).
    #[error("Configuration error: {reason}")]
    Configuration {
        /// Explanation of the conflict
        reason: String,
    },

    /// Failures of individual workflow nodes collected during one pass.
    #[error("{} resource(s) failed to reconcile: {}", .0.len(), join_failures(.0))]
    Aggregate(Vec<NodeFailure>),

    /// Cleanup is waiting for dependents to disappear before releasing the finalizer.
    #[error("Cleanup of {name} is waiting for dependent resources to be deleted")]
    CleanupPending {
        /// Name of the `Glue` being cleaned up
        name: String,
    },
}

fn join_failures(failures: &[NodeFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl GlueError {
    /// Shorthand for [`GlueError::Validation`].
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`GlueError::Render`].
    pub fn render(resource: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Render {
            resource: resource.into(),
            reason: reason.to_string(),
        }
    }

    /// Shorthand for [`GlueError::Configuration`].
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Returns true if the controller should retry the reconciliation.
    ///
    /// Validation errors are terminal: nothing changes until the spec is edited,
    /// which triggers a new reconciliation anyway.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NonUniqueNames { .. } | Self::Validation { .. } => false,
            Self::Aggregate(failures) => failures.iter().any(|f| f.error.is_retryable()),
            Self::RoutingAmbiguity { .. }
            | Self::Render { .. }
            | Self::Sandbox { .. }
            | Self::Cluster { .. }
            | Self::Configuration { .. }
            | Self::CleanupPending { .. } => true,
        }
    }

    /// Short category used as the `error_type` metric label.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::NonUniqueNames { .. } | Self::Validation { .. } => "validation_error",
            Self::RoutingAmbiguity { .. } => "routing_error",
            Self::Render { .. } => "render_error",
            Self::Sandbox { .. } => "sandbox_error",
            Self::Cluster { .. } => "api_error",
            Self::Configuration { .. } => "configuration_error",
            Self::Aggregate(_) => "aggregate_error",
            Self::CleanupPending { .. } => "cleanup_pending",
        }
    }
}

impl From<minijinja::Error> for GlueError {
    fn from(err: minijinja::Error) -> Self {
        Self::Render {
            resource: "template".to_string(),
            reason: err.to_string(),
        }
    }
}

impl From<mlua::Error> for GlueError {
    fn from(err: mlua::Error) -> Self {
        Self::Sandbox {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
#[path = "glue_errors_tests.rs"]
mod glue_errors_tests;
