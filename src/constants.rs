// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the Glue operator.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// API Constants
// ============================================================================

/// API group for all Glue CRDs
pub const API_GROUP: &str = "glue.firestoned.io";

/// API version for all Glue CRDs
pub const API_VERSION: &str = "v1beta1";

/// Fully qualified API version (group/version)
pub const API_GROUP_VERSION: &str = "glue.firestoned.io/v1beta1";

/// Kind name for `Glue` resource
pub const KIND_GLUE: &str = "Glue";

/// Kind name for `GlueOperator` resource
pub const KIND_GLUE_OPERATOR: &str = "GlueOperator";

/// Default field manager used for server-side apply
pub const DEFAULT_FIELD_MANAGER: &str = "glue-operator";

// ============================================================================
// Workflow Constants
// ============================================================================

/// Logical name of the related resource pointing back at a meta-controller parent
pub const PARENT_RELATED_RESOURCE_NAME: &str = "parent";

/// Data context key holding the metadata of the reconciled `Glue`
pub const GLUE_METADATA_KEY: &str = "glueMetadata";

/// Data context key holding the condition target inside templated conditions
pub const TARGET_KEY: &str = "target";

/// `apiVersion` of the one kind that always uses the server-side apply matcher
pub const DEPLOYMENT_API_VERSION: &str = "apps/v1";

/// Kind that always uses the server-side apply matcher
pub const DEPLOYMENT_KIND: &str = "Deployment";

// ============================================================================
// Status Constants
// ============================================================================

/// Maximum length of `status.errorMessage` before truncation
pub const MAX_STATUS_MESSAGE_LENGTH: usize = 150;

/// Prefix for generic error messages written to status
pub const ERROR_MESSAGE_PREFIX: &str = "Error: ";

/// Prefix for duplicate-name validation errors written to status
pub const NON_UNIQUE_NAMES_FOUND_PREFIX: &str = "Non unique names found: ";

// ============================================================================
// Controller Timing Constants
// ============================================================================

/// Requeue interval after a successful reconciliation (5 minutes)
pub const REQUEUE_WHEN_READY_SECS: u64 = 300;

/// Requeue interval after a failed reconciliation (30 seconds)
pub const ERROR_REQUEUE_DURATION_SECS: u64 = 30;

/// Requeue interval while cleanup waits on delete postconditions
pub const CLEANUP_REQUEUE_DURATION_SECS: u64 = 5;

/// Upper bound on waiting for a new watch to finish its initial list
pub const WATCH_READY_TIMEOUT_SECS: u64 = 30;

/// Default number of `Glue` objects reconciled concurrently
pub const DEFAULT_CONCURRENCY: u16 = 16;

// ============================================================================
// Script Sandbox Constants
// ============================================================================

/// Default memory ceiling for one script evaluation (8 MiB)
pub const DEFAULT_SCRIPT_MEMORY_LIMIT_BYTES: usize = 8 * 1024 * 1024;

/// Default wall clock budget for one script evaluation
pub const DEFAULT_SCRIPT_TIMEOUT_MS: u64 = 1_000;

/// Number of Lua VM instructions between deadline checks
pub const SCRIPT_HOOK_INSTRUCTION_INTERVAL: u32 = 1_000;

// ============================================================================
// Kubernetes Naming Constants
// ============================================================================

/// Maximum length of a DNS-1123 label
pub const MAX_NAME_LENGTH: usize = 63;
