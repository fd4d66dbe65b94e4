// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Dynamic watch lifecycle for the kinds referenced by workflow instances.
//!
//! The kinds a `Glue` manages are only known at runtime, so watches cannot be
//! declared on the controller up front. [`WatchManager`] starts one reflector per
//! kind the first time an instance asks for it and stops it when the last
//! instance releases it:
//!
//! ```text
//! acquire(ConfigMap, glue-a)  -> watch started, requesters = {glue-a}
//! acquire(ConfigMap, glue-b)  -> same watch,    requesters = {glue-a, glue-b}
//! release(ConfigMap, glue-a)  -> same watch,    requesters = {glue-b}
//! release(ConfigMap, glue-b)  -> watch stopped
//! ```
//!
//! Events observed by a watch are routed to instances and pushed into the
//! controller's trigger channel, which feeds `Controller::reconcile_on`.
//!
//! All bookkeeping (requesters per kind, kinds per instance, live watches and the
//! selector each watch runs with) sits behind one mutex so registration and
//! explicit related mappings change together.

use crate::constants::WATCH_READY_TIMEOUT_SECS;
use crate::glue_errors::GlueError;
use crate::identity::{api_resource, simple_gvk_string, InstanceId};
use crate::mapper::{ObjectKey, SecondaryToPrimaryMapper};
use crate::metrics;
use futures::channel::mpsc::UnboundedSender;
use futures::TryStreamExt;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use kube::runtime::reflector::Store;
use kube::runtime::{reflector, watcher, WatchStreamExt};
use kube::{Api, Client};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Sink receiving the instances to reconcile.
pub type Trigger = UnboundedSender<InstanceId>;

/// Maps an observed object to the instances it concerns.
pub type RouteFn = Arc<dyn Fn(&DynamicObject) -> BTreeSet<InstanceId> + Send + Sync>;

/// A running watch: its cache and a way to stop it. Dropping stops the watch.
pub struct ActiveWatch {
    store: Store<DynamicObject>,
    stop: Option<Box<dyn FnOnce() + Send>>,
}

impl ActiveWatch {
    pub fn new(store: Store<DynamicObject>, stop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            store,
            stop: Some(Box::new(stop)),
        }
    }

    #[must_use]
    pub fn store(&self) -> Store<DynamicObject> {
        self.store.clone()
    }
}

impl Drop for ActiveWatch {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

/// Starts watches. Implemented over the API server by [`KubeWatchBackend`].
pub trait WatchBackend: Send + Sync {
    /// Start watching `resource`, optionally restricted by `label_selector`.
    ///
    /// Every added, modified or deleted object is passed through `route` and each
    /// resulting instance is sent to `trigger`.
    ///
    /// # Errors
    ///
    /// Returns an error if the watch cannot be started.
    fn start(
        &self,
        resource: &ApiResource,
        label_selector: Option<&str>,
        route: RouteFn,
        trigger: Trigger,
    ) -> Result<ActiveWatch, GlueError>;
}

/// Reflector-backed watches against the API server.
#[derive(Clone)]
pub struct KubeWatchBackend {
    client: Client,
}

impl KubeWatchBackend {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl WatchBackend for KubeWatchBackend {
    fn start(
        &self,
        resource: &ApiResource,
        label_selector: Option<&str>,
        route: RouteFn,
        trigger: Trigger,
    ) -> Result<ActiveWatch, GlueError> {
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), resource);
        let mut config = watcher::Config::default();
        if let Some(selector) = label_selector {
            config = config.labels(selector);
        }

        let writer = reflector::store::Writer::new(resource.clone());
        let store = writer.as_reader();
        let kind = resource.kind.clone();
        let stream = reflector(writer, watcher(api, config))
            .default_backoff()
            .touched_objects();

        let task = tokio::spawn(async move {
            let mut stream = Box::pin(stream);
            loop {
                match stream.try_next().await {
                    Ok(Some(object)) => {
                        for instance in route(&object) {
                            if trigger.unbounded_send(instance).is_err() {
                                debug!("Trigger channel closed, stopping {} watch", kind);
                                return;
                            }
                        }
                    }
                    Ok(None) => {
                        warn!("Watch stream for {} terminated", kind);
                        break;
                    }
                    Err(e) => {
                        warn!("Watch for {} failed, retrying with backoff: {}", kind, e);
                    }
                }
            }
        });

        Ok(ActiveWatch::new(store, move || task.abort()))
    }
}

/// How events of a watched kind are turned into instances.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoutingMode {
    /// Owner references, primary annotations and explicit related mappings (`Glue`).
    Secondary,
    /// Every requester of the kind (`GlueOperator` parent watches).
    Broadcast,
}

impl RoutingMode {
    fn label(self) -> &'static str {
        match self {
            Self::Secondary => "Glue",
            Self::Broadcast => "GlueOperator",
        }
    }
}

/// Access to the cache of a live watch.
#[derive(Clone)]
pub struct WatchHandle {
    pub gvk: GroupVersionKind,
    pub store: Store<DynamicObject>,
}

impl WatchHandle {
    /// Every cached object of the kind.
    #[must_use]
    pub fn objects(&self) -> Vec<Arc<DynamicObject>> {
        self.store.state()
    }

    /// Wait until the initial list of the watch is in the cache.
    ///
    /// # Errors
    ///
    /// Returns [`GlueError::Configuration`] if the watch stops or the list does
    /// not complete within the timeout (typically missing RBAC on the kind).
    pub async fn ready(&self) -> Result<(), GlueError> {
        let not_ready = |reason: &str| {
            GlueError::configuration(format!(
                "watch for {} {}",
                simple_gvk_string(&self.gvk),
                reason
            ))
        };
        match tokio::time::timeout(
            Duration::from_secs(WATCH_READY_TIMEOUT_SECS),
            self.store.wait_until_ready(),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(not_ready("stopped before its cache was ready")),
            Err(_) => Err(not_ready("did not finish its initial list in time")),
        }
    }
}

struct LiveWatch {
    watch: ActiveWatch,
    selector: Option<String>,
    broadcast: Arc<RwLock<BTreeSet<InstanceId>>>,
}

#[derive(Default)]
struct WatchState {
    requesters: HashMap<GroupVersionKind, BTreeSet<InstanceId>>,
    kinds_by_instance: HashMap<InstanceId, HashSet<GroupVersionKind>>,
    live: HashMap<GroupVersionKind, LiveWatch>,
    mappers: HashMap<GroupVersionKind, Arc<SecondaryToPrimaryMapper>>,
}

/// Reference-counted registry of dynamic watches.
pub struct WatchManager {
    backend: Arc<dyn WatchBackend>,
    trigger: Trigger,
    mode: RoutingMode,
    configured_selectors: HashMap<GroupVersionKind, String>,
    state: Mutex<WatchState>,
}

impl WatchManager {
    pub fn new(
        backend: Arc<dyn WatchBackend>,
        trigger: Trigger,
        mode: RoutingMode,
        configured_selectors: HashMap<GroupVersionKind, String>,
    ) -> Self {
        Self {
            backend,
            trigger,
            mode,
            configured_selectors,
            state: Mutex::new(WatchState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, WatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `instance` as a requester of `gvk`, starting the watch if needed.
    ///
    /// `label_selector` overrides the configured selector of the kind. The first
    /// registration decides the selector a watch runs with.
    ///
    /// # Errors
    ///
    /// Returns [`GlueError::Configuration`] if the watch already runs with a
    /// different selector, or the backend error if the watch cannot be started.
    pub fn acquire(
        &self,
        gvk: &GroupVersionKind,
        instance: &InstanceId,
        label_selector: Option<&str>,
    ) -> Result<WatchHandle, GlueError> {
        let mut state = self.state();
        self.acquire_locked(&mut state, gvk, instance, label_selector)
    }

    fn acquire_locked(
        &self,
        state: &mut WatchState,
        gvk: &GroupVersionKind,
        instance: &InstanceId,
        label_selector: Option<&str>,
    ) -> Result<WatchHandle, GlueError> {
        let selector = label_selector
            .map(str::to_string)
            .or_else(|| self.configured_selectors.get(gvk).cloned());

        if let Some(live) = state.live.get(gvk) {
            if live.selector != selector {
                return Err(GlueError::configuration(format!(
                    "watch for {} already runs with label selector {:?}, requested {:?}",
                    simple_gvk_string(gvk),
                    live.selector,
                    selector
                )));
            }
        } else {
            let mapper = state
                .mappers
                .entry(gvk.clone())
                .or_insert_with(|| Arc::new(SecondaryToPrimaryMapper::new()))
                .clone();
            let broadcast: Arc<RwLock<BTreeSet<InstanceId>>> = Arc::default();
            let route: RouteFn = match self.mode {
                RoutingMode::Secondary => {
                    Arc::new(move |object: &DynamicObject| mapper.route(object))
                }
                RoutingMode::Broadcast => {
                    let requesters = broadcast.clone();
                    Arc::new(move |_: &DynamicObject| {
                        requesters
                            .read()
                            .map(|r| r.clone())
                            .unwrap_or_default()
                    })
                }
            };
            let watch = self.backend.start(
                &api_resource(gvk),
                selector.as_deref(),
                route,
                self.trigger.clone(),
            )?;
            info!(
                "Started watch for {} (selector: {:?})",
                simple_gvk_string(gvk),
                selector
            );
            state.live.insert(
                gvk.clone(),
                LiveWatch {
                    watch,
                    selector,
                    broadcast,
                },
            );
            metrics::set_active_watches(self.mode.label(), state.live.len());
        }

        state
            .requesters
            .entry(gvk.clone())
            .or_default()
            .insert(instance.clone());
        state
            .kinds_by_instance
            .entry(instance.clone())
            .or_default()
            .insert(gvk.clone());

        let live = state.live.get(gvk).ok_or_else(|| {
            GlueError::configuration(format!("watch for {} vanished", simple_gvk_string(gvk)))
        })?;
        if let Ok(mut requesters) = live.broadcast.write() {
            requesters.insert(instance.clone());
        }
        Ok(WatchHandle {
            gvk: gvk.clone(),
            store: live.watch.store(),
        })
    }

    /// Register the related kinds of `instance` and replace its explicit mappings.
    ///
    /// Every previous explicit mapping of the instance is dropped once all kinds
    /// are acquired, so a related declaration removed from the spec stops routing
    /// immediately. If an acquire fails the previous mappings stay in place.
    ///
    /// # Errors
    ///
    /// Same as [`WatchManager::acquire`].
    pub fn sync_related(
        &self,
        instance: &InstanceId,
        related: &[(GroupVersionKind, Vec<ObjectKey>)],
    ) -> Result<Vec<WatchHandle>, GlueError> {
        let mut state = self.state();

        let mut handles = Vec::with_capacity(related.len());
        for (gvk, _) in related {
            handles.push(self.acquire_locked(&mut state, gvk, instance, None)?);
        }

        let mut keys_by_kind: HashMap<&GroupVersionKind, Vec<ObjectKey>> = HashMap::new();
        for (gvk, keys) in related {
            keys_by_kind
                .entry(gvk)
                .or_default()
                .extend(keys.iter().cloned());
        }
        for mapper in state.mappers.values() {
            mapper.remove_mapping_for(instance);
        }
        for (gvk, keys) in keys_by_kind {
            if let Some(mapper) = state.mappers.get(gvk) {
                mapper.replace_mappings_for(instance, &keys);
            }
        }
        Ok(handles)
    }

    /// Drop `instance` as a requester of `gvk`; stops the watch when nobody is left.
    ///
    /// Returns `true` if the watch was stopped.
    pub fn release(&self, gvk: &GroupVersionKind, instance: &InstanceId) -> bool {
        let mut state = self.state();
        self.release_locked(&mut state, gvk, instance)
    }

    fn release_locked(
        &self,
        state: &mut WatchState,
        gvk: &GroupVersionKind,
        instance: &InstanceId,
    ) -> bool {
        if let Some(kinds) = state.kinds_by_instance.get_mut(instance) {
            kinds.remove(gvk);
            if kinds.is_empty() {
                state.kinds_by_instance.remove(instance);
            }
        }
        if let Some(mapper) = state.mappers.get(gvk) {
            mapper.remove_mapping_for(instance);
        }
        if let Some(live) = state.live.get(gvk) {
            if let Ok(mut requesters) = live.broadcast.write() {
                requesters.remove(instance);
            }
        }

        let remaining = state.requesters.get_mut(gvk).map_or(0, |requesters| {
            requesters.remove(instance);
            requesters.len()
        });
        if remaining > 0 {
            return false;
        }

        state.requesters.remove(gvk);
        state.mappers.remove(gvk);
        let stopped = state.live.remove(gvk).is_some();
        if stopped {
            info!("Stopped watch for {}", simple_gvk_string(gvk));
            metrics::set_active_watches(self.mode.label(), state.live.len());
        }
        stopped
    }

    /// Release every kind `instance` requested and drop its explicit mappings.
    pub fn release_all(&self, instance: &InstanceId) {
        let mut state = self.state();
        let kinds: Vec<GroupVersionKind> = state
            .kinds_by_instance
            .get(instance)
            .map(|k| k.iter().cloned().collect())
            .unwrap_or_default();
        for gvk in &kinds {
            self.release_locked(&mut state, gvk, instance);
        }
        for mapper in state.mappers.values() {
            mapper.remove_mapping_for(instance);
        }
        debug!("Released {} watched kind(s) of {}", kinds.len(), instance);
    }

    /// Kinds currently requested by `instance`.
    #[must_use]
    pub fn watched_kinds(&self, instance: &InstanceId) -> Vec<GroupVersionKind> {
        self.state()
            .kinds_by_instance
            .get(instance)
            .map(|k| k.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Instances currently requesting `gvk`.
    #[must_use]
    pub fn requesters(&self, gvk: &GroupVersionKind) -> Vec<InstanceId> {
        self.state()
            .requesters
            .get(gvk)
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Cache of the live watch of `gvk`, if any.
    #[must_use]
    pub fn handle(&self, gvk: &GroupVersionKind) -> Option<WatchHandle> {
        self.state().live.get(gvk).map(|live| WatchHandle {
            gvk: gvk.clone(),
            store: live.watch.store(),
        })
    }

    /// Routing index of `gvk`, if it is watched.
    #[must_use]
    pub fn mapper(&self, gvk: &GroupVersionKind) -> Option<Arc<SecondaryToPrimaryMapper>> {
        self.state().mappers.get(gvk).cloned()
    }

    #[must_use]
    pub fn is_watching(&self, gvk: &GroupVersionKind) -> bool {
        self.state().live.contains_key(gvk)
    }

    #[must_use]
    pub fn live_watch_count(&self) -> usize {
        self.state().live.len()
    }
}

#[cfg(test)]
#[path = "watches_tests.rs"]
mod watches_tests;
