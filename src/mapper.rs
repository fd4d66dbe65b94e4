// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Secondary-to-primary routing: which `Glue` instances an observed object concerns.
//!
//! An object routes to the union of
//!
//! 1. its owner references pointing at a `Glue`,
//! 2. the primary name/namespace annotations placed on managed objects that
//!    cannot carry an owner reference (other namespace, cluster-scoped, non-leaf),
//! 3. explicit `(namespace, name)` entries registered for related resources.
//!
//! Objects matching none of these route to nothing.

use crate::constants::{API_GROUP, KIND_GLUE};
use crate::identity::InstanceId;
use crate::labels::{GLUE_PRIMARY_NAMESPACE_ANNOTATION, GLUE_PRIMARY_NAME_ANNOTATION};
use kube::api::DynamicObject;
use kube::ResourceExt;
use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

/// Key of an explicit mapping: `(namespace, name)`; the namespace is empty for
/// cluster-scoped objects.
pub type ObjectKey = (String, String);

/// Routing index for one watched kind.
#[derive(Debug, Default)]
pub struct SecondaryToPrimaryMapper {
    explicit: RwLock<HashMap<ObjectKey, BTreeSet<InstanceId>>>,
}

impl SecondaryToPrimaryMapper {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Instances an object should trigger.
    #[must_use]
    pub fn route(&self, object: &DynamicObject) -> BTreeSet<InstanceId> {
        let namespace = object.namespace().unwrap_or_default();
        let mut targets = BTreeSet::new();

        for owner in object.owner_references() {
            let group = owner.api_version.split('/').next().unwrap_or_default();
            if group == API_GROUP && owner.kind == KIND_GLUE {
                targets.insert(InstanceId::new(owner.name.clone(), namespace.clone()));
            }
        }

        let annotations = object.annotations();
        if let (Some(name), Some(ns)) = (
            annotations.get(GLUE_PRIMARY_NAME_ANNOTATION),
            annotations.get(GLUE_PRIMARY_NAMESPACE_ANNOTATION),
        ) {
            targets.insert(InstanceId::new(name.clone(), ns.clone()));
        }

        let key = (namespace, object.name_any());
        if let Ok(explicit) = self.explicit.read() {
            if let Some(instances) = explicit.get(&key) {
                targets.extend(instances.iter().cloned());
            }
        }

        targets
    }

    /// Replace every explicit entry of `instance` with `keys`.
    pub fn replace_mappings_for(&self, instance: &InstanceId, keys: &[ObjectKey]) {
        if let Ok(mut explicit) = self.explicit.write() {
            remove_instance(&mut explicit, instance);
            for key in keys {
                explicit
                    .entry(key.clone())
                    .or_default()
                    .insert(instance.clone());
            }
        }
    }

    /// Drop every explicit entry of `instance`.
    pub fn remove_mapping_for(&self, instance: &InstanceId) {
        if let Ok(mut explicit) = self.explicit.write() {
            remove_instance(&mut explicit, instance);
        }
    }

    /// Number of explicitly mapped objects.
    #[must_use]
    pub fn explicit_len(&self) -> usize {
        self.explicit.read().map(|e| e.len()).unwrap_or_default()
    }
}

fn remove_instance(explicit: &mut HashMap<ObjectKey, BTreeSet<InstanceId>>, instance: &InstanceId) {
    explicit.retain(|_, instances| {
        instances.remove(instance);
        !instances.is_empty()
    });
}

#[cfg(test)]
#[path = "mapper_tests.rs"]
mod mapper_tests;
