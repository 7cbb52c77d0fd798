//! In-memory `ResourceStore` for integration tests
//!
//! Behaves like the API server in the ways the reconcilers depend on:
//! - assigns `uid`, `resourceVersion`, `creationTimestamp` (a preset one is
//!   kept) and `generation` on create, and honors `generateName`
//! - drops `status` on create and replace; only `patch_status` writes it
//! - rejects writes carrying a stale `resourceVersion` with a conflict
//! - evaluates label selectors and the `metadata.name` / `status.phase` field
//!   selectors
//! - garbage collects objects whose owner was deleted (cascade)
//!
//! Objects can be hidden from cached reads to model watch-cache lag.

#![allow(dead_code, reason = "each test binary uses a different subset of helpers")]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use oz_controller::controller::reconciler::Context;
use oz_controller::controller::store::{ListQuery, ResourceStore, StoreError, StoreObject};
use oz_controller::crd::{
    ExecAccessRequest, ExecAccessTemplate, PodAccessRequest, PodAccessTemplate,
};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

pub const NAMESPACE: &str = "default";

type Key = (String, String, String);

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<Key, Value>,
    hidden_from_cache: HashSet<Key>,
    status_conflicts: HashSet<Key>,
    next_resource_version: u64,
    next_uid: u64,
    next_generated_suffix: u64,
    status_writes: usize,
}

impl State {
    fn bump_resource_version(&mut self) -> String {
        self.next_resource_version += 1;
        self.next_resource_version.to_string()
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

fn key<K: StoreObject>(namespace: &str, name: &str) -> Key {
    (K::kind(&()).to_string(), namespace.to_string(), name.to_string())
}

fn to_object<K: StoreObject>(value: &Value) -> Result<K, StoreError> {
    Ok(serde_json::from_value(value.clone())?)
}

fn labels_match(value: &Value, wanted: &BTreeMap<String, String>) -> bool {
    let labels = &value["metadata"]["labels"];
    wanted
        .iter()
        .all(|(k, v)| labels.get(k).and_then(Value::as_str) == Some(v.as_str()))
}

fn query_matches(value: &Value, query: &ListQuery) -> bool {
    if !labels_match(value, &query.labels) {
        return false;
    }
    if let Some(name) = &query.name {
        if value["metadata"]["name"].as_str() != Some(name.as_str()) {
            return false;
        }
    }
    if let Some(phase) = &query.phase {
        if value["status"]["phase"].as_str() != Some(phase.as_str()) {
            return false;
        }
    }
    true
}

fn timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("store lock poisoned")
    }

    /// Create an object, panicking on failure
    pub async fn insert<K: StoreObject>(&self, obj: K) -> K {
        self.create(&obj).await.expect("insert failed")
    }

    /// Consistent read, for assertions
    pub fn get<K: StoreObject>(&self, namespace: &str, name: &str) -> Option<K> {
        let state = self.lock();
        state
            .objects
            .get(&key::<K>(namespace, name))
            .map(|v| to_object(v).expect("stored object deserializes"))
    }

    /// Every object of kind `K` in `namespace`
    pub fn all<K: StoreObject>(&self, namespace: &str) -> Vec<K> {
        let kind = K::kind(&()).to_string();
        let state = self.lock();
        state
            .objects
            .iter()
            .filter(|((k, ns, _), _)| *k == kind && ns == namespace)
            .map(|(_, v)| to_object(v).expect("stored object deserializes"))
            .collect()
    }

    pub fn count<K: StoreObject>(&self, namespace: &str) -> usize {
        self.all::<K>(namespace).len()
    }

    /// Number of successful status writes so far
    pub fn status_writes(&self) -> usize {
        self.lock().status_writes
    }

    /// Overwrite `status.phase` of a pod
    pub fn set_pod_phase(&self, namespace: &str, name: &str, phase: &str) {
        self.mutate_raw::<Pod>(namespace, name, |value| {
            value["status"] = json!({ "phase": phase });
        });
    }

    /// Move `metadata.creationTimestamp` back by `by`
    pub fn backdate<K: StoreObject>(&self, namespace: &str, name: &str, by: Duration) {
        self.mutate_raw::<K>(namespace, name, |value| {
            let created = value["metadata"]["creationTimestamp"]
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(Utc::now);
            let backdated = created - chrono::Duration::from_std(by).expect("duration fits");
            value["metadata"]["creationTimestamp"] = json!(timestamp(backdated));
        });
    }

    /// Write arbitrary status through the raw object, as a third party would
    pub fn set_status<K: StoreObject>(&self, namespace: &str, name: &str, status: Value) {
        self.mutate_raw::<K>(namespace, name, |value| {
            value["status"] = status;
        });
    }

    /// Keep an object out of cached reads until [`MemoryStore::sync_cache`]
    pub fn hide_from_cache<K: StoreObject>(&self, namespace: &str, name: &str) {
        self.lock().hidden_from_cache.insert(key::<K>(namespace, name));
    }

    /// Fail the next status write of an object with a conflict, as if another
    /// writer got there first
    pub fn conflict_next_status_write<K: StoreObject>(&self, namespace: &str, name: &str) {
        self.lock().status_conflicts.insert(key::<K>(namespace, name));
    }

    pub fn sync_cache(&self) {
        self.lock().hidden_from_cache.clear();
    }

    /// Apply `f` to the stored JSON, bumping the resourceVersion
    pub fn mutate_raw<K: StoreObject>(&self, namespace: &str, name: &str, f: impl FnOnce(&mut Value)) {
        let mut state = self.lock();
        let rv = state.bump_resource_version();
        let value = state
            .objects
            .get_mut(&key::<K>(namespace, name))
            .unwrap_or_else(|| panic!("{} {namespace}/{name} not stored", K::kind(&())));
        f(value);
        value["metadata"]["resourceVersion"] = json!(rv);
    }

    fn check_resource_version<K: StoreObject>(
        stored: &Value,
        obj: &K,
        namespace: &str,
        name: &str,
    ) -> Result<(), StoreError> {
        match obj.resource_version() {
            Some(rv) if stored["metadata"]["resourceVersion"].as_str() != Some(rv.as_str()) => {
                Err(StoreError::conflict::<K>(
                    namespace,
                    name,
                    "the object has been modified; please apply your changes to the latest version and try again",
                ))
            }
            _ => Ok(()),
        }
    }

    fn read<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
        cached: bool,
    ) -> Result<Option<K>, StoreError> {
        let state = self.lock();
        let key = key::<K>(namespace, name);
        if cached && state.hidden_from_cache.contains(&key) {
            return Ok(None);
        }
        state.objects.get(&key).map(to_object).transpose()
    }

    fn list<K: StoreObject>(
        &self,
        namespace: &str,
        query: &ListQuery,
        cached: bool,
    ) -> Result<Vec<K>, StoreError> {
        let kind = K::kind(&()).to_string();
        let state = self.lock();
        state
            .objects
            .iter()
            .filter(|(key, _)| key.0 == kind && key.1 == namespace)
            .filter(|(key, _)| !(cached && state.hidden_from_cache.contains(*key)))
            .filter(|(_, value)| query_matches(value, query))
            .map(|(_, value)| to_object(value))
            .collect()
    }

    /// Remove `uid`'s dependents, recursively
    fn cascade(state: &mut State, uid: &str) {
        let dependents: Vec<(Key, Option<String>)> = state
            .objects
            .iter()
            .filter(|(_, value)| {
                value["metadata"]["ownerReferences"]
                    .as_array()
                    .is_some_and(|refs| refs.iter().any(|r| r["uid"].as_str() == Some(uid)))
            })
            .map(|(key, value)| {
                (
                    key.clone(),
                    value["metadata"]["uid"].as_str().map(str::to_string),
                )
            })
            .collect();

        for (key, child_uid) in dependents {
            state.objects.remove(&key);
            state.hidden_from_cache.remove(&key);
            if let Some(child_uid) = child_uid {
                Self::cascade(state, &child_uid);
            }
        }
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get_cached<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<K>, StoreError> {
        self.read(namespace, name, true)
    }

    async fn get_consistent<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<K>, StoreError> {
        self.read(namespace, name, false)
    }

    async fn list_cached<K: StoreObject>(
        &self,
        namespace: &str,
        query: &ListQuery,
    ) -> Result<Vec<K>, StoreError> {
        self.list(namespace, query, true)
    }

    async fn list_consistent<K: StoreObject>(
        &self,
        namespace: &str,
        query: &ListQuery,
    ) -> Result<Vec<K>, StoreError> {
        self.list(namespace, query, false)
    }

    async fn create<K: StoreObject>(&self, obj: &K) -> Result<K, StoreError> {
        let mut value = serde_json::to_value(obj)?;
        let namespace = obj.namespace().unwrap_or_else(|| NAMESPACE.to_string());

        let mut state = self.lock();
        let name = match obj.meta().name.clone().filter(|n| !n.is_empty()) {
            Some(name) => name,
            None => {
                let prefix = obj.meta().generate_name.clone().unwrap_or_default();
                state.next_generated_suffix += 1;
                format!("{prefix}{:05x}", state.next_generated_suffix)
            }
        };

        let key = key::<K>(&namespace, &name);
        if state.objects.contains_key(&key) {
            return Err(StoreError::conflict::<K>(&namespace, &name, "already exists"));
        }

        state.next_uid += 1;
        let n = state.next_uid;
        let uid = format!("{n:08x}-0000-4000-8000-{n:012x}");
        let rv = state.bump_resource_version();

        let metadata = &mut value["metadata"];
        metadata["name"] = json!(name);
        metadata["namespace"] = json!(namespace);
        metadata["uid"] = json!(uid);
        metadata["resourceVersion"] = json!(rv);
        metadata["generation"] = json!(1);
        if metadata["creationTimestamp"].is_null() {
            metadata["creationTimestamp"] = json!(timestamp(Utc::now()));
        }
        if let Some(map) = value.as_object_mut() {
            map.remove("status");
        }

        let created = to_object(&value)?;
        state.objects.insert(key, value);
        Ok(created)
    }

    async fn replace<K: StoreObject>(&self, obj: &K) -> Result<K, StoreError> {
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();
        let key = key::<K>(&namespace, &name);

        let mut state = self.lock();
        let Some(stored) = state.objects.get(&key).cloned() else {
            return Err(StoreError::not_found::<K>(&namespace, &name));
        };
        Self::check_resource_version(&stored, obj, &namespace, &name)?;

        let mut value = serde_json::to_value(obj)?;
        let rv = state.bump_resource_version();
        let spec_changed = value.get("spec") != stored.get("spec");
        let generation = stored["metadata"]["generation"].as_i64().unwrap_or(1)
            + i64::from(spec_changed);

        let metadata = &mut value["metadata"];
        metadata["uid"] = stored["metadata"]["uid"].clone();
        metadata["creationTimestamp"] = stored["metadata"]["creationTimestamp"].clone();
        metadata["resourceVersion"] = json!(rv);
        metadata["generation"] = json!(generation);
        match stored.get("status") {
            Some(status) => value["status"] = status.clone(),
            None => {
                if let Some(map) = value.as_object_mut() {
                    map.remove("status");
                }
            }
        }

        let replaced = to_object(&value)?;
        state.objects.insert(key, value);
        Ok(replaced)
    }

    async fn patch_status<K: StoreObject>(&self, obj: &K) -> Result<K, StoreError> {
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();
        let key = key::<K>(&namespace, &name);

        let mut state = self.lock();
        let Some(mut stored) = state.objects.get(&key).cloned() else {
            return Err(StoreError::not_found::<K>(&namespace, &name));
        };
        if state.status_conflicts.remove(&key) {
            return Err(StoreError::conflict::<K>(&namespace, &name, "status was written concurrently"));
        }
        Self::check_resource_version(&stored, obj, &namespace, &name)?;

        let status = serde_json::to_value(obj)?
            .get("status")
            .cloned()
            .unwrap_or(Value::Null);
        let rv = state.bump_resource_version();
        stored["status"] = status;
        stored["metadata"]["resourceVersion"] = json!(rv);

        let patched = to_object(&stored)?;
        state.objects.insert(key, stored);
        state.status_writes += 1;
        Ok(patched)
    }

    async fn delete<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        let key = key::<K>(namespace, name);
        state.hidden_from_cache.remove(&key);
        if let Some(removed) = state.objects.remove(&key) {
            if let Some(uid) = removed["metadata"]["uid"].as_str() {
                Self::cascade(&mut state, uid);
            }
        }
        Ok(())
    }
}

/// Reconciler context over a fresh store
pub fn context() -> Context<MemoryStore> {
    Context::new(MemoryStore::new(), Duration::from_secs(300))
}

// Fixtures

pub fn deployment(name: &str, containers: Value, annotations: Value) -> Deployment {
    serde_json::from_value(json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": { "name": name, "namespace": NAMESPACE },
        "spec": {
            "selector": { "matchLabels": { "app": name } },
            "template": {
                "metadata": {
                    "labels": { "app": name, "team": "payments" },
                    "annotations": annotations
                },
                "spec": { "containers": containers }
            }
        }
    }))
    .expect("valid deployment")
}

/// A single-container deployment `name` selecting `app: name`
pub fn simple_deployment(name: &str) -> Deployment {
    deployment(
        name,
        json!([{ "name": "app", "image": "registry.local/app:1" }]),
        json!({}),
    )
}

/// A pod of deployment `app`, without status
pub fn pod(name: &str, app: &str) -> Pod {
    serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": { "name": name, "namespace": NAMESPACE, "labels": { "app": app } },
        "spec": { "containers": [{ "name": "app", "image": "registry.local/app:1" }] }
    }))
    .expect("valid pod")
}

/// Store a pod and set its phase
pub async fn insert_pod(store: &MemoryStore, name: &str, app: &str, phase: &str) {
    store.insert(pod(name, app)).await;
    store.set_pod_phase(NAMESPACE, name, phase);
}

pub fn exec_template(name: &str, target_kind: &str, target: &str, default: &str, max: &str) -> ExecAccessTemplate {
    serde_json::from_value(json!({
        "apiVersion": "crds.wizardofoz.co/v1alpha1",
        "kind": "ExecAccessTemplate",
        "metadata": { "name": name, "namespace": NAMESPACE },
        "spec": {
            "targetRef": { "apiVersion": "apps/v1", "kind": target_kind, "name": target },
            "accessConfig": {
                "allowedGroups": ["eng"],
                "defaultDuration": default,
                "maxDuration": max
            }
        }
    }))
    .expect("valid exec template")
}

pub fn pod_template(name: &str, target: &str, mutation: Value) -> PodAccessTemplate {
    serde_json::from_value(json!({
        "apiVersion": "crds.wizardofoz.co/v1alpha1",
        "kind": "PodAccessTemplate",
        "metadata": { "name": name, "namespace": NAMESPACE },
        "spec": {
            "targetRef": { "apiVersion": "apps/v1", "kind": "Deployment", "name": target },
            "accessConfig": {
                "allowedGroups": ["eng", "sre"],
                "defaultDuration": "1h",
                "maxDuration": "2h"
            },
            "controllerTargetMutationConfig": mutation,
            "maxCpu": "1",
            "maxMemory": "1Gi"
        }
    }))
    .expect("valid pod template")
}

pub fn exec_request(name: &str, template: &str, duration: Option<&str>, target_pod: Option<&str>) -> ExecAccessRequest {
    serde_json::from_value(json!({
        "apiVersion": "crds.wizardofoz.co/v1alpha1",
        "kind": "ExecAccessRequest",
        "metadata": { "name": name, "namespace": NAMESPACE },
        "spec": {
            "templateName": template,
            "duration": duration,
            "targetPod": target_pod
        }
    }))
    .expect("valid exec request")
}

pub fn pod_request(name: &str, template: &str, duration: Option<&str>) -> PodAccessRequest {
    serde_json::from_value(json!({
        "apiVersion": "crds.wizardofoz.co/v1alpha1",
        "kind": "PodAccessRequest",
        "metadata": { "name": name, "namespace": NAMESPACE },
        "spec": { "templateName": template, "duration": duration }
    }))
    .expect("valid pod request")
}

/// Status of condition `type_`, if present
pub fn condition_status<'a>(conditions: &'a [oz_controller::crd::Condition], type_: &str) -> Option<(&'a str, &'a str)> {
    conditions
        .iter()
        .find(|c| c.r#type == type_)
        .map(|c| (c.status.as_str(), c.reason.as_str()))
}
