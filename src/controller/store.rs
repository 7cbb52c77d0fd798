//! # Resource Store
//!
//! Typed access to the Kubernetes object store.
//!
//! Reads come in two flavors: *cached* reads may be served from the API server's
//! watch cache and can lag slightly, *consistent* reads go to etcd. Anything the
//! reconciler writes and then reads back in the same iteration must use the
//! consistent path.
//!
//! After every status write the object is refetched consistently and the
//! caller's copy overwritten, so the next write in the same iteration carries
//! the current `resourceVersion`.

use crate::constants::FIELD_MANAGER;
use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{DeleteParams, GetParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Debug;
use thiserror::Error;
use tracing::debug;

/// Any namespaced object the store can read and write
pub trait StoreObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + PartialEq
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<T> StoreObject for T where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + PartialEq
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Errors returned by the store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Object vanished between a write and the follow-up read
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },
    /// Optimistic concurrency failure (HTTP 409)
    #[error("conflict writing {kind} {namespace}/{name}: {message}")]
    Conflict {
        kind: String,
        namespace: String,
        name: String,
        message: String,
    },
    /// Any other API failure; treated as transient
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
    /// Object could not be converted to or from JSON
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found<K: Resource<DynamicType = ()>>(namespace: &str, name: &str) -> Self {
        StoreError::NotFound {
            kind: K::kind(&()).to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn conflict<K: Resource<DynamicType = ()>>(
        namespace: &str,
        name: &str,
        message: impl Into<String>,
    ) -> Self {
        StoreError::Conflict {
            kind: K::kind(&()).to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            message: message.into(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Label and field constraints for list calls
///
/// Only the field selectors the controller needs are modelled: `metadata.name`
/// and `status.phase`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    /// Every label must match exactly
    pub labels: BTreeMap<String, String>,
    /// `metadata.name=<name>`
    pub name: Option<String>,
    /// `status.phase=<phase>`
    pub phase: Option<String>,
}

impl ListQuery {
    pub fn with_labels(labels: BTreeMap<String, String>) -> Self {
        Self {
            labels,
            ..Default::default()
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    /// Render the label selector string, or None when unconstrained
    pub fn label_selector(&self) -> Option<String> {
        if self.labels.is_empty() {
            return None;
        }
        Some(
            self.labels
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(","),
        )
    }

    /// Render the field selector string, or None when unconstrained
    pub fn field_selector(&self) -> Option<String> {
        let mut fields = Vec::new();
        if let Some(name) = &self.name {
            fields.push(format!("metadata.name={name}"));
        }
        if let Some(phase) = &self.phase {
            fields.push(format!("status.phase={phase}"));
        }
        (!fields.is_empty()).then(|| fields.join(","))
    }

    fn list_params(&self) -> ListParams {
        let mut lp = ListParams::default();
        if let Some(labels) = self.label_selector() {
            lp = lp.labels(&labels);
        }
        if let Some(fields) = self.field_selector() {
            lp = lp.fields(&fields);
        }
        lp
    }
}

/// Outcome of [`create_or_update`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationResult {
    Created,
    Updated,
    Unchanged,
}

impl OperationResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationResult::Created => "created",
            OperationResult::Updated => "updated",
            OperationResult::Unchanged => "unchanged",
        }
    }
}

/// Store operations used by the reconcilers
///
/// The real implementation is [`KubeStore`]; tests substitute an in-memory store.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Read through the watch cache; may be slightly stale
    async fn get_cached<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<K>, StoreError>;

    /// Read from the authoritative store
    async fn get_consistent<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<K>, StoreError>;

    /// List through the watch cache
    async fn list_cached<K: StoreObject>(
        &self,
        namespace: &str,
        query: &ListQuery,
    ) -> Result<Vec<K>, StoreError>;

    /// List from the authoritative store
    async fn list_consistent<K: StoreObject>(
        &self,
        namespace: &str,
        query: &ListQuery,
    ) -> Result<Vec<K>, StoreError>;

    /// Create an object, returning the stored copy
    async fn create<K: StoreObject>(&self, obj: &K) -> Result<K, StoreError>;

    /// Replace an object (optimistic on `resourceVersion`), returning the stored copy
    async fn replace<K: StoreObject>(&self, obj: &K) -> Result<K, StoreError>;

    /// Write only the status subresource (optimistic on `resourceVersion`)
    async fn patch_status<K: StoreObject>(&self, obj: &K) -> Result<K, StoreError>;

    /// Delete an object; children are garbage collected through owner references
    async fn delete<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<(), StoreError>;
}

/// Fetch the current object, overlay the desired fields, and write it back
///
/// When the object does not exist yet, `desired` is used as the starting point.
/// Repeated calls with the same desired state write nothing.
pub async fn create_or_update<S, K, F>(
    store: &S,
    desired: K,
    mutate: F,
) -> Result<(K, OperationResult), StoreError>
where
    S: ResourceStore,
    K: StoreObject,
    F: Fn(&mut K) + Send + Sync,
{
    let namespace = desired.namespace().unwrap_or_default();
    let name = desired.name_any();

    match store.get_consistent::<K>(&namespace, &name).await? {
        None => {
            let mut obj = desired;
            mutate(&mut obj);
            let created = store.create(&obj).await?;
            Ok((created, OperationResult::Created))
        }
        Some(existing) => {
            let mut obj = existing.clone();
            mutate(&mut obj);
            if obj == existing {
                return Ok((existing, OperationResult::Unchanged));
            }
            let updated = store.replace(&obj).await?;
            Ok((updated, OperationResult::Updated))
        }
    }
}

/// Write the status subresource, then refetch consistently into `obj`
pub async fn update_status<S, K>(store: &S, obj: &mut K) -> Result<(), StoreError>
where
    S: ResourceStore,
    K: StoreObject,
{
    store.patch_status(obj).await?;
    refetch(store, obj).await
}

/// Refetch `obj` consistently, overwriting the caller's copy
pub async fn refetch<S, K>(store: &S, obj: &mut K) -> Result<(), StoreError>
where
    S: ResourceStore,
    K: StoreObject,
{
    let namespace = obj.namespace().unwrap_or_default();
    let name = obj.name_any();
    match store.get_consistent::<K>(&namespace, &name).await? {
        Some(fresh) => {
            *obj = fresh;
            Ok(())
        }
        None => Err(StoreError::not_found::<K>(&namespace, &name)),
    }
}

/// [`ResourceStore`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore").finish_non_exhaustive()
    }
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K: StoreObject>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        }
    }
}

fn map_write_error<K: StoreObject>(namespace: &str, name: &str, error: kube::Error) -> StoreError {
    match error {
        kube::Error::Api(api_err) if api_err.code == 409 => {
            StoreError::conflict::<K>(namespace, name, api_err.message)
        }
        other => StoreError::Kube(other),
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get_cached<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<K>, StoreError> {
        match self.api::<K>(namespace).get_with(name, &GetParams::any()).await {
            Ok(obj) => Ok(Some(obj)),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_consistent<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<K>, StoreError> {
        Ok(self.api::<K>(namespace).get_opt(name).await?)
    }

    async fn list_cached<K: StoreObject>(
        &self,
        namespace: &str,
        query: &ListQuery,
    ) -> Result<Vec<K>, StoreError> {
        let lp = query.list_params().match_any();
        Ok(self.api::<K>(namespace).list(&lp).await?.items)
    }

    async fn list_consistent<K: StoreObject>(
        &self,
        namespace: &str,
        query: &ListQuery,
    ) -> Result<Vec<K>, StoreError> {
        Ok(self.api::<K>(namespace).list(&query.list_params()).await?.items)
    }

    async fn create<K: StoreObject>(&self, obj: &K) -> Result<K, StoreError> {
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();
        self.api::<K>(&namespace)
            .create(&Self::post_params(), obj)
            .await
            .map_err(|e| map_write_error::<K>(&namespace, &name, e))
    }

    async fn replace<K: StoreObject>(&self, obj: &K) -> Result<K, StoreError> {
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();
        self.api::<K>(&namespace)
            .replace(&name, &Self::post_params(), obj)
            .await
            .map_err(|e| map_write_error::<K>(&namespace, &name, e))
    }

    async fn patch_status<K: StoreObject>(&self, obj: &K) -> Result<K, StoreError> {
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();

        // resourceVersion in a merge patch makes the API server reject stale writes
        let status = serde_json::to_value(obj)?
            .get("status")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let mut patch = serde_json::json!({ "status": status });
        if let Some(resource_version) = obj.resource_version() {
            patch["metadata"] = serde_json::json!({ "resourceVersion": resource_version });
        }

        debug!(
            "Patching status of {} {}/{}",
            K::kind(&()),
            namespace,
            name
        );

        self.api::<K>(&namespace)
            .patch_status(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_write_error::<K>(&namespace, &name, e))
    }

    async fn delete<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        match self
            .api::<K>(namespace)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
