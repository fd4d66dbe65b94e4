// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Resource identity: which kind, name and namespace a spec entry refers to.
//!
//! A child resource is declared either as a static object or as a YAML template.
//! Its kind is known before anything is rendered: it is read from the static
//! object or scanned from the template text. Name and namespace may themselves be
//! templates (`name: "{{ parent.metadata.name }}-cm"`), so they are extracted
//! textually and rendered against the current data context.

use crate::crd::{ChildResourceSpec, RelatedResourceSpec};
use crate::glue_errors::GlueError;
use crate::templating::TemplateRenderer;
use kube::api::{ApiResource, GroupVersionKind};
use kube::ResourceExt;
use serde_json::Value as JsonValue;
use std::fmt;

use crate::constants::MAX_NAME_LENGTH;

/// Identifies one `Glue` (or `GlueOperator`) instance.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId {
    pub name: String,
    pub namespace: String,
}

impl InstanceId {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Identity of a namespaced object.
    pub fn of<K: ResourceExt>(object: &K) -> Self {
        Self::new(object.name_any(), object.namespace().unwrap_or_default())
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Resolved coordinates of a single child object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceIdentity {
    pub gvk: GroupVersionKind,
    pub name: String,
    /// `None` for cluster-scoped kinds
    pub namespace: Option<String>,
}

/// Split an `apiVersion` into group and version (`v1` is the core group).
#[must_use]
pub fn gvk_from_api_version(api_version: &str, kind: &str) -> GroupVersionKind {
    match api_version.split_once('/') {
        Some((group, version)) => GroupVersionKind::gvk(group, version, kind),
        None => GroupVersionKind::gvk("", api_version, kind),
    }
}

/// `apiVersion` string of a kind.
#[must_use]
pub fn api_version_of(gvk: &GroupVersionKind) -> String {
    if gvk.group.is_empty() {
        gvk.version.clone()
    } else {
        format!("{}/{}", gvk.group, gvk.version)
    }
}

/// `group/version#Kind` form used to key label selector configuration.
#[must_use]
pub fn simple_gvk_string(gvk: &GroupVersionKind) -> String {
    format!("{}#{}", api_version_of(gvk), gvk.kind)
}

/// API resource for a kind, with the plural derived from the kind name.
#[must_use]
pub fn api_resource(gvk: &GroupVersionKind) -> ApiResource {
    ApiResource::from_gvk(gvk)
}

/// Kind declared by a related resource.
#[must_use]
pub fn related_gvk(related: &RelatedResourceSpec) -> GroupVersionKind {
    gvk_from_api_version(&related.api_version, &related.kind)
}

/// Kind declared by a child resource.
///
/// # Errors
///
/// Returns [`GlueError::Validation`] if neither the object nor the template names
/// an `apiVersion` and `kind`.
pub fn child_gvk(child: &ChildResourceSpec) -> Result<GroupVersionKind, GlueError> {
    let (api_version, kind) = if let Some(resource) = &child.resource {
        (
            resource.get("apiVersion").and_then(JsonValue::as_str).map(str::to_string),
            resource.get("kind").and_then(JsonValue::as_str).map(str::to_string),
        )
    } else if let Some(template) = &child.resource_template {
        (
            scan_top_level_key(template, "apiVersion"),
            scan_top_level_key(template, "kind"),
        )
    } else {
        (None, None)
    };

    match (api_version, kind) {
        (Some(api_version), Some(kind)) => Ok(gvk_from_api_version(&api_version, &kind)),
        _ => Err(GlueError::validation(format!(
            "child resource '{}' does not declare apiVersion and kind",
            child.name
        ))),
    }
}

/// Resolve name and namespace of a single-mode child against the data context.
///
/// The namespace defaults to `instance_namespace` unless the child is cluster-scoped.
///
/// # Errors
///
/// Returns [`GlueError::Render`] if the name or namespace fail to render, and
/// [`GlueError::Validation`] if no name is declared.
pub fn resolve_child(
    child: &ChildResourceSpec,
    data: &JsonValue,
    renderer: &TemplateRenderer,
    instance_namespace: &str,
) -> Result<ResourceIdentity, GlueError> {
    let gvk = child_gvk(child)?;
    let (raw_name, raw_namespace) = raw_name_and_namespace(child);

    let raw_name = raw_name.ok_or_else(|| {
        GlueError::validation(format!(
            "child resource '{}' does not declare metadata.name",
            child.name
        ))
    })?;
    let name = render_field(renderer, &child.name, &raw_name, data)?;

    let namespace = if child.cluster_scoped {
        None
    } else {
        match raw_namespace {
            Some(ns) => Some(render_field(renderer, &child.name, &ns, data)?),
            None => Some(instance_namespace.to_string()),
        }
    };

    Ok(ResourceIdentity {
        gvk,
        name,
        namespace,
    })
}

fn render_field(
    renderer: &TemplateRenderer,
    resource: &str,
    raw: &str,
    data: &JsonValue,
) -> Result<String, GlueError> {
    renderer
        .render(raw, data)
        .map(|s| s.trim().to_string())
        .map_err(|e| match e {
            GlueError::Render { reason, .. } => GlueError::render(resource, reason),
            other => other,
        })
}

/// Unrendered `metadata.name` / `metadata.namespace` of a child.
#[must_use]
pub fn raw_name_and_namespace(child: &ChildResourceSpec) -> (Option<String>, Option<String>) {
    if let Some(resource) = &child.resource {
        let metadata = resource.get("metadata");
        let field = |key: &str| {
            metadata
                .and_then(|m| m.get(key))
                .and_then(JsonValue::as_str)
                .map(str::to_string)
        };
        (field("name"), field("namespace"))
    } else if let Some(template) = &child.resource_template {
        scan_metadata(template)
    } else {
        (None, None)
    }
}

fn clean_scalar(raw: &str) -> String {
    let value = raw.trim();
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value);
    value.to_string()
}

/// First `key:` line at the top level of the template (or of its first list item).
///
/// The top level is the indentation of the first content line; template tags
/// and comments are ignored. Keys nested deeper, such as a `name:` under
/// `metadata.labels`, never match.
fn scan_top_level_key(template: &str, key: &str) -> Option<String> {
    let prefix = format!("{key}:");
    let mut top_indent: Option<usize> = None;
    let mut item_indent: Option<usize> = None;

    for line in template.lines() {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with("{%") {
            continue;
        }
        let mut indent = line.len() - trimmed.len();
        let entry = match trimmed.strip_prefix("- ") {
            Some(rest) => {
                indent += 2 + (rest.len() - rest.trim_start().len());
                item_indent.get_or_insert(indent);
                rest.trim_start()
            }
            None => trimmed,
        };
        let top = *top_indent.get_or_insert(indent);
        if indent != top && Some(indent) != item_indent {
            continue;
        }
        if let Some(value) = entry.strip_prefix(prefix.as_str()).map(clean_scalar) {
            if !value.is_empty() {
                return Some(value);
            }
        }
    }
    None
}

/// Direct `name:` and `namespace:` children of the first `metadata:` block.
fn scan_metadata(template: &str) -> (Option<String>, Option<String>) {
    let mut metadata_indent: Option<usize> = None;
    let mut child_indent: Option<usize> = None;
    let mut name = None;
    let mut namespace = None;

    for line in template.lines() {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let mut indent = line.len() - trimmed.len();
        let item = match trimmed.strip_prefix("- ") {
            Some(rest) => {
                indent += 2;
                rest.trim_start()
            }
            None => trimmed,
        };

        match metadata_indent {
            None => {
                if item.starts_with("metadata:") {
                    metadata_indent = Some(indent);
                }
            }
            Some(meta) => {
                if indent <= meta {
                    break;
                }
                let level = *child_indent.get_or_insert(indent);
                if indent != level {
                    continue;
                }
                if let Some(v) = item.strip_prefix("name:") {
                    name.get_or_insert_with(|| clean_scalar(v));
                } else if let Some(v) = item.strip_prefix("namespace:") {
                    namespace.get_or_insert_with(|| clean_scalar(v));
                }
            }
        }
    }

    (name, namespace)
}

/// Turn an arbitrary string into a valid object name.
///
/// Invalid characters become `-`, leading and trailing non-alphanumerics are
/// dropped and the result is lowercased and capped at 63 characters.
#[must_use]
pub fn sanitize_name(raw: &str) -> String {
    let replaced: String = raw
        .trim_start_matches(|c: char| !c.is_ascii_alphanumeric())
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .take(MAX_NAME_LENGTH)
        .collect();
    replaced
        .trim_end_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}

#[cfg(test)]
#[path = "identity_tests.rs"]
mod identity_tests;
