// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The data context templates and conditions are evaluated against.
//!
//! ```yaml
//! glueMetadata: { name: sample, namespace: default, ... }  # the Glue's metadata
//! configMap1: { apiVersion: v1, kind: ConfigMap, ... }      # child, as observed
//! secrets: [ {...}, {...} ]                                 # bulk child
//! settings: { ... }                                         # related, one resourceName
//! peers: { peer-a: {...}, peer-b: null }                    # related, several names
//! ```
//!
//! Children and related resources that do not exist yet are `null`.

use crate::constants::GLUE_METADATA_KEY;
use crate::crd::{Glue, RelatedResourceSpec};
use kube::api::DynamicObject;
use kube::ResourceExt;
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;

/// Mutable data context of one reconciliation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DataContext {
    values: Map<String, JsonValue>,
}

impl DataContext {
    /// Context holding only `glueMetadata`.
    #[must_use]
    pub fn for_glue(glue: &Glue) -> Self {
        let mut values = Map::new();
        values.insert(
            GLUE_METADATA_KEY.to_string(),
            serde_json::to_value(&glue.metadata).unwrap_or_default(),
        );
        Self { values }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: JsonValue) {
        self.values.insert(name.into(), value);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&JsonValue> {
        self.values.get(name)
    }

    /// Snapshot usable as template/condition input.
    #[must_use]
    pub fn to_value(&self) -> JsonValue {
        JsonValue::Object(self.values.clone())
    }
}

/// Value of a related resource: the object (or `null`) for one `resourceNames` entry,
/// otherwise a map of object name to object. Without names, every cached object of the
/// namespace is exposed by name.
#[must_use]
pub fn related_value(
    related: &RelatedResourceSpec,
    instance_namespace: &str,
    cache: &[Arc<DynamicObject>],
) -> JsonValue {
    let namespace = related_namespace(related, instance_namespace);
    let in_scope = |object: &DynamicObject| match &namespace {
        Some(ns) => object.namespace().as_deref() == Some(ns.as_str()),
        None => true,
    };
    let lookup = |name: &str| {
        cache
            .iter()
            .find(|o| o.name_any() == name && in_scope(o))
            .map_or(JsonValue::Null, |o| {
                serde_json::to_value(o.as_ref()).unwrap_or_default()
            })
    };

    match related.resource_names.as_slice() {
        [single] => lookup(single),
        [] => JsonValue::Object(
            cache
                .iter()
                .filter(|o| in_scope(o))
                .map(|o| {
                    (
                        o.name_any(),
                        serde_json::to_value(o.as_ref()).unwrap_or_default(),
                    )
                })
                .collect(),
        ),
        names => JsonValue::Object(
            names
                .iter()
                .map(|name| (name.clone(), lookup(name)))
                .collect(),
        ),
    }
}

/// Objects of a related resource that exist, with their names.
#[must_use]
pub fn related_objects(
    related: &RelatedResourceSpec,
    instance_namespace: &str,
    cache: &[Arc<DynamicObject>],
) -> Vec<DynamicObject> {
    match related_value(related, instance_namespace, cache) {
        JsonValue::Null => Vec::new(),
        JsonValue::Object(map) if related.resource_names.len() != 1 => map
            .into_iter()
            .filter_map(|(_, v)| serde_json::from_value(v).ok())
            .collect(),
        value => serde_json::from_value(value).ok().into_iter().collect(),
    }
}

/// Namespace a related resource lives in; `None` when cluster-scoped.
#[must_use]
pub fn related_namespace(related: &RelatedResourceSpec, instance_namespace: &str) -> Option<String> {
    if related.cluster_scoped {
        None
    } else {
        Some(
            related
                .namespace
                .clone()
                .unwrap_or_else(|| instance_namespace.to_string()),
        )
    }
}

#[cfg(test)]
#[path = "data_tests.rs"]
mod data_tests;
