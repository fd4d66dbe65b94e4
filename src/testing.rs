// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory cluster used by unit tests.
//!
//! [`InMemoryCluster`] implements both [`ClusterClient`] and [`WatchBackend`].
//! Watches are kube reflector stores fed by the same writes that go through the
//! client, so a test can run full reconciliations and inspect what was mutated.
//!
//! Deletion follows the API server closely enough for the engine:
//! objects with finalizers are only marked with a `deletionTimestamp`, and
//! deleting an owner removes every object whose owner reference points at it.

use crate::cluster::{describe_target, ClusterClient};
use crate::config::OperatorConfig;
use crate::context::Context;
use crate::crd::{Glue, GlueSpec};
use crate::glue_errors::GlueError;
use crate::identity::{gvk_from_api_version, simple_gvk_string, InstanceId};
use crate::watches::{ActiveWatch, RouteFn, Trigger, WatchBackend};
use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedReceiver};
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use kube::runtime::reflector::store::Writer;
use kube::runtime::watcher;
use kube::ResourceExt;
use serde_json::{json, Value as JsonValue};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type ObjectKey = (String, String, String);

struct TestWatch {
    kind: String,
    selector: Option<String>,
    writer: Writer<DynamicObject>,
    route: RouteFn,
    trigger: Trigger,
    active: Arc<AtomicBool>,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjectKey, DynamicObject>,
    watches: Vec<TestWatch>,
    mutations: Vec<String>,
    next_uid: u64,
    next_version: u64,
    fail_kinds: BTreeSet<String>,
}

/// Fake API server holding objects in memory.
#[derive(Default)]
pub struct InMemoryCluster {
    state: Mutex<State>,
}

fn kind_key(resource: &ApiResource) -> String {
    simple_gvk_string(&GroupVersionKind::gvk(
        &resource.group,
        &resource.version,
        &resource.kind,
    ))
}

fn object_kind_key(object: &DynamicObject) -> String {
    object
        .types
        .as_ref()
        .map(|t| simple_gvk_string(&gvk_from_api_version(&t.api_version, &t.kind)))
        .unwrap_or_default()
}

fn key_of(kind: &str, namespace: Option<&str>, name: &str) -> ObjectKey {
    (
        kind.to_string(),
        namespace.unwrap_or_default().to_string(),
        name.to_string(),
    )
}

/// Matches `k=v`, `k==v`, `k!=v` and `k` terms joined by commas.
#[must_use]
pub fn selector_matches(selector: &str, labels: &BTreeMap<String, String>) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| {
            if let Some((k, v)) = term.split_once("!=") {
                labels.get(k.trim()).map(String::as_str) != Some(v.trim())
            } else if let Some((k, v)) = term.split_once('=') {
                let v = v.trim_start_matches('=');
                labels.get(k.trim()).map(String::as_str) == Some(v.trim())
            } else {
                labels.contains_key(term)
            }
        })
}

fn api_error(code: u16, reason: &str, message: String) -> kube::Error {
    kube::Error::Api(
        kube::core::Status::failure(&message, reason)
            .with_code(code)
            .boxed(),
    )
}

/// Build a `DynamicObject` from JSON.
///
/// # Panics
///
/// Panics if the JSON is not an object with `metadata`.
#[must_use]
pub fn dynamic(value: JsonValue) -> DynamicObject {
    serde_json::from_value(value).expect("valid DynamicObject JSON")
}

impl InMemoryCluster {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store an object without recording a mutation.
    pub fn insert(&self, object: DynamicObject) {
        let mut state = self.lock();
        let kind = object_kind_key(&object);
        let object = stamp(&mut state, None, object);
        let key = key_of(&kind, object.namespace().as_deref(), &object.name_any());
        state.objects.insert(key, object.clone());
        notify(&mut state, &kind, &object, false);
    }

    /// Current object, if stored.
    #[must_use]
    pub fn object(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
        name: &str,
    ) -> Option<DynamicObject> {
        let kind = simple_gvk_string(&gvk_from_api_version(api_version, kind));
        self.lock()
            .objects
            .get(&key_of(&kind, namespace, name))
            .cloned()
    }

    /// Names of all stored objects of a kind in a namespace.
    #[must_use]
    pub fn names(&self, api_version: &str, kind: &str, namespace: Option<&str>) -> Vec<String> {
        let kind = simple_gvk_string(&gvk_from_api_version(api_version, kind));
        let namespace = namespace.unwrap_or_default();
        self.lock()
            .objects
            .keys()
            .filter(|(k, ns, _)| *k == kind && ns == namespace)
            .map(|(_, _, name)| name.clone())
            .collect()
    }

    /// Mutations performed through the client, e.g. `create ConfigMap default/cm-1`.
    #[must_use]
    pub fn mutations(&self) -> Vec<String> {
        self.lock().mutations.clone()
    }

    pub fn clear_mutations(&self) {
        self.lock().mutations.clear();
    }

    /// Number of watches started and not yet stopped.
    #[must_use]
    pub fn active_watch_count(&self) -> usize {
        self.lock()
            .watches
            .iter()
            .filter(|w| w.active.load(Ordering::SeqCst))
            .count()
    }

    /// Make every write to `api_version`/`kind` fail with a server error.
    pub fn fail_writes_for(&self, api_version: &str, kind: &str) {
        let kind = simple_gvk_string(&gvk_from_api_version(api_version, kind));
        self.lock().fail_kinds.insert(kind);
    }

    /// Mark an object as being deleted, as the API server does when finalizers exist.
    pub fn mark_deleted(&self, api_version: &str, kind: &str, namespace: Option<&str>, name: &str) {
        let kind = simple_gvk_string(&gvk_from_api_version(api_version, kind));
        let mut state = self.lock();
        let key = key_of(&kind, namespace, name);
        if let Some(object) = state.objects.get(&key).cloned() {
            let marked = with_deletion_timestamp(object);
            state.objects.insert(key, marked.clone());
            notify(&mut state, &kind, &marked, false);
        }
    }
}

fn with_deletion_timestamp(object: DynamicObject) -> DynamicObject {
    let mut value = serde_json::to_value(&object).unwrap_or_default();
    value["metadata"]["deletionTimestamp"] = json!("2025-01-01T00:00:00Z");
    serde_json::from_value(value).unwrap_or(object)
}

fn stamp(state: &mut State, existing: Option<&DynamicObject>, mut object: DynamicObject) -> DynamicObject {
    state.next_version += 1;
    object.metadata.resource_version = Some(state.next_version.to_string());
    object.metadata.uid = match existing.and_then(|e| e.metadata.uid.clone()) {
        Some(uid) => Some(uid),
        None => object.metadata.uid.clone().or_else(|| {
            state.next_uid += 1;
            Some(format!("uid-{}", state.next_uid))
        }),
    };
    if let Some(existing) = existing {
        if object.metadata.finalizers.is_none() {
            object.metadata.finalizers = existing.metadata.finalizers.clone();
        }
        if object.metadata.deletion_timestamp.is_none() {
            object.metadata.deletion_timestamp = existing.metadata.deletion_timestamp.clone();
        }
        if object.data.get("status").is_none() {
            if let Some(status) = existing.data.get("status") {
                object.data["status"] = status.clone();
            }
        }
    }
    object
}

fn notify(state: &mut State, kind: &str, object: &DynamicObject, deleted: bool) {
    for watch in &mut state.watches {
        if watch.kind != kind || !watch.active.load(Ordering::SeqCst) {
            continue;
        }
        if let Some(selector) = &watch.selector {
            if !selector_matches(selector, object.labels()) {
                continue;
            }
        }
        let event = if deleted {
            watcher::Event::Delete(object.clone())
        } else {
            watcher::Event::Apply(object.clone())
        };
        watch.writer.apply_watcher_event(&event);
        for instance in (watch.route)(object) {
            let _ = watch.trigger.unbounded_send(instance);
        }
    }
}

fn remove(state: &mut State, key: &ObjectKey) {
    let Some(object) = state.objects.remove(key) else {
        return;
    };
    notify(state, &key.0, &object, true);

    // garbage collection of dependents
    let Some(uid) = object.metadata.uid.clone() else {
        return;
    };
    let dependents: Vec<ObjectKey> = state
        .objects
        .iter()
        .filter(|(_, o)| o.owner_references().iter().any(|r| r.uid == uid))
        .map(|(k, _)| k.clone())
        .collect();
    for dependent in dependents {
        remove(state, &dependent);
    }
}

impl State {
    fn check_writable(&self, kind: &str, target: &str) -> Result<(), GlueError> {
        if self.fail_kinds.contains(kind) {
            return Err(GlueError::Cluster {
                operation: "write",
                target: target.to_string(),
                source: api_error(500, "InternalError", "injected failure".to_string()),
            });
        }
        Ok(())
    }

    fn record(&mut self, verb: &str, target: &str) {
        self.mutations.push(format!("{verb} {target}"));
    }
}

fn applied_form(state: &mut State, existing: Option<&DynamicObject>, object: &DynamicObject) -> DynamicObject {
    stamp(state, existing, object.clone())
}

#[async_trait]
impl ClusterClient for InMemoryCluster {
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>, GlueError> {
        Ok(self
            .lock()
            .objects
            .get(&key_of(&kind_key(resource), namespace, name))
            .cloned())
    }

    async fn create(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, GlueError> {
        let kind = kind_key(resource);
        let namespace = object.namespace();
        let name = object.name_any();
        let target = describe_target(resource, namespace.as_deref(), &name);
        let key = key_of(&kind, namespace.as_deref(), &name);

        let mut state = self.lock();
        state.check_writable(&kind, &target)?;
        if state.objects.contains_key(&key) {
            return Err(GlueError::Cluster {
                operation: "create",
                target: target.clone(),
                source: api_error(409, "AlreadyExists", format!("{target} already exists")),
            });
        }
        let created = applied_form(&mut state, None, object);
        state.objects.insert(key, created.clone());
        state.record("create", &target);
        notify(&mut state, &kind, &created, false);
        Ok(created)
    }

    async fn replace(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, GlueError> {
        let kind = kind_key(resource);
        let namespace = object.namespace();
        let name = object.name_any();
        let target = describe_target(resource, namespace.as_deref(), &name);
        let key = key_of(&kind, namespace.as_deref(), &name);

        let mut state = self.lock();
        state.check_writable(&kind, &target)?;
        let Some(existing) = state.objects.get(&key).cloned() else {
            return Err(GlueError::Cluster {
                operation: "replace",
                target: target.clone(),
                source: api_error(404, "NotFound", format!("{target} not found")),
            });
        };
        let replaced = applied_form(&mut state, Some(&existing), object);
        state.objects.insert(key, replaced.clone());
        state.record("replace", &target);
        notify(&mut state, &kind, &replaced, false);
        Ok(replaced)
    }

    async fn apply(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
        _field_manager: &str,
    ) -> Result<DynamicObject, GlueError> {
        let kind = kind_key(resource);
        let namespace = object.namespace();
        let name = object.name_any();
        let target = describe_target(resource, namespace.as_deref(), &name);
        let key = key_of(&kind, namespace.as_deref(), &name);

        let mut state = self.lock();
        state.check_writable(&kind, &target)?;
        let existing = state.objects.get(&key).cloned();
        let applied = applied_form(&mut state, existing.as_ref(), object);
        state.objects.insert(key, applied.clone());
        state.record("apply", &target);
        notify(&mut state, &kind, &applied, false);
        Ok(applied)
    }

    async fn dry_run_apply(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
        _field_manager: &str,
    ) -> Result<DynamicObject, GlueError> {
        let key = key_of(
            &kind_key(resource),
            object.namespace().as_deref(),
            &object.name_any(),
        );
        let mut state = self.lock();
        let existing = state.objects.get(&key).cloned();
        let version = state.next_version;
        let uid = state.next_uid;
        let preview = applied_form(&mut state, existing.as_ref(), object);
        state.next_version = version;
        state.next_uid = uid;
        Ok(preview)
    }

    async fn delete(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<bool, GlueError> {
        let kind = kind_key(resource);
        let target = describe_target(resource, namespace, name);
        let key = key_of(&kind, namespace, name);

        let mut state = self.lock();
        state.check_writable(&kind, &target)?;
        let Some(existing) = state.objects.get(&key).cloned() else {
            return Ok(false);
        };
        state.record("delete", &target);
        if existing.finalizers().is_empty() {
            remove(&mut state, &key);
        } else if existing.metadata.deletion_timestamp.is_none() {
            let marked = with_deletion_timestamp(existing);
            state.objects.insert(key, marked.clone());
            notify(&mut state, &kind, &marked, false);
        }
        Ok(true)
    }

    async fn patch_status(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        status: &JsonValue,
    ) -> Result<(), GlueError> {
        let kind = kind_key(resource);
        let target = describe_target(resource, namespace, name);
        let key = key_of(&kind, namespace, name);

        let mut state = self.lock();
        let Some(mut object) = state.objects.get(&key).cloned() else {
            return Err(GlueError::Cluster {
                operation: "patch status of",
                target: target.clone(),
                source: api_error(404, "NotFound", format!("{target} not found")),
            });
        };
        let mut merged = object.data.get("status").cloned().unwrap_or_else(|| json!({}));
        merge_json(&mut merged, status);
        object.data["status"] = merged;
        state.objects.insert(key, object.clone());
        state.record("patch_status", &target);
        notify(&mut state, &kind, &object, false);
        Ok(())
    }

    async fn patch_finalizers(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        finalizers: &[String],
    ) -> Result<(), GlueError> {
        let kind = kind_key(resource);
        let target = describe_target(resource, namespace, name);
        let key = key_of(&kind, namespace, name);

        let mut state = self.lock();
        let Some(mut object) = state.objects.get(&key).cloned() else {
            return Err(GlueError::Cluster {
                operation: "patch finalizers of",
                target: target.clone(),
                source: api_error(404, "NotFound", format!("{target} not found")),
            });
        };
        state.record("patch_finalizers", &target);
        if finalizers.is_empty() && object.metadata.deletion_timestamp.is_some() {
            remove(&mut state, &key);
            return Ok(());
        }
        object.metadata.finalizers = Some(finalizers.to_vec());
        state.objects.insert(key, object.clone());
        notify(&mut state, &kind, &object, false);
        Ok(())
    }
}

impl WatchBackend for InMemoryCluster {
    fn start(
        &self,
        resource: &ApiResource,
        label_selector: Option<&str>,
        route: RouteFn,
        trigger: Trigger,
    ) -> Result<ActiveWatch, GlueError> {
        let kind = kind_key(resource);
        let mut writer = Writer::new(resource.clone());
        let store = writer.as_reader();

        let mut state = self.lock();
        writer.apply_watcher_event(&watcher::Event::Init);
        for ((k, _, _), object) in &state.objects {
            if *k == kind && label_selector.is_none_or(|s| selector_matches(s, object.labels())) {
                writer.apply_watcher_event(&watcher::Event::InitApply(object.clone()));
            }
        }
        writer.apply_watcher_event(&watcher::Event::InitDone);
        let active = Arc::new(AtomicBool::new(true));
        state.watches.push(TestWatch {
            kind,
            selector: label_selector.map(str::to_string),
            writer,
            route,
            trigger,
            active: active.clone(),
        });

        Ok(ActiveWatch::new(store, move || {
            active.store(false, Ordering::SeqCst);
        }))
    }
}

/// Shallow-recursive JSON merge patch (`null` removes a key).
pub fn merge_json(target: &mut JsonValue, patch: &JsonValue) {
    match (target, patch) {
        (JsonValue::Object(target), JsonValue::Object(patch)) => {
            for (key, value) in patch {
                if value.is_null() {
                    target.remove(key);
                } else {
                    merge_json(target.entry(key.clone()).or_insert(JsonValue::Null), value);
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

/// Instance identity shorthand for tests.
#[must_use]
pub fn instance(name: &str, namespace: &str) -> InstanceId {
    InstanceId::new(name, namespace)
}

/// A stored-looking `Glue` with a uid, parsed from a YAML spec.
///
/// # Panics
///
/// Panics if the YAML is not a valid `GlueSpec`.
#[must_use]
pub fn glue(name: &str, namespace: &str, spec_yaml: &str) -> Glue {
    let spec: GlueSpec = serde_yaml::from_str(spec_yaml).expect("valid GlueSpec YAML");
    let mut glue = Glue::new(name, spec);
    glue.metadata.namespace = Some(namespace.to_string());
    glue.metadata.uid = Some(format!("uid-{namespace}-{name}"));
    glue.metadata.generation = Some(1);
    glue
}

/// Controller context wired to an [`InMemoryCluster`].
pub struct TestHarness {
    pub cluster: Arc<InMemoryCluster>,
    pub ctx: Arc<Context>,
    /// Instances triggered through `Glue` watches
    pub glue_events: UnboundedReceiver<InstanceId>,
    /// Instances triggered through `GlueOperator` parent watches
    pub operator_events: UnboundedReceiver<InstanceId>,
}

impl TestHarness {
    /// # Panics
    ///
    /// Panics if the default configuration is rejected.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(&OperatorConfig::default())
    }

    /// # Panics
    ///
    /// Panics if `config` is rejected.
    #[must_use]
    pub fn with_config(config: &OperatorConfig) -> Self {
        let cluster = InMemoryCluster::new();
        let (glue_tx, glue_events) = unbounded();
        let (operator_tx, operator_events) = unbounded();
        let ctx = Context::new(config, cluster.clone(), cluster.clone(), glue_tx, operator_tx)
            .expect("valid test configuration");
        Self {
            cluster,
            ctx: Arc::new(ctx),
            glue_events,
            operator_events,
        }
    }

    /// Instances triggered by `Glue` watches since the last call.
    pub fn drain_glue_events(&mut self) -> BTreeSet<InstanceId> {
        let mut seen = BTreeSet::new();
        while let Ok(Some(id)) = self.glue_events.try_next() {
            seen.insert(id);
        }
        seen
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
