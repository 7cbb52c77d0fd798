//! # Status Management
//!
//! Publishes the status computed during a reconcile.

use crate::controller::store::{update_status, ResourceStore, StoreError, StoreObject};
use kube::ResourceExt;
use serde::Serialize;
use tracing::debug;

fn status_value<K: Serialize>(obj: &K) -> serde_json::Value {
    serde_json::to_value(obj)
        .ok()
        .and_then(|v| v.get("status").cloned())
        .unwrap_or(serde_json::Value::Null)
}

/// Write `obj`'s status unless it matches the status in `before`
///
/// Skipping unchanged writes keeps the object's own watch quiet. Returns true
/// when a write happened; `obj` then holds the refetched object.
pub async fn publish_status<S, K>(store: &S, obj: &mut K, before: &K) -> Result<bool, StoreError>
where
    S: ResourceStore,
    K: StoreObject,
{
    // CRITICAL: only write when the status actually changed, otherwise every
    // reconcile would trigger another watch event for this object
    if status_value(obj) == status_value(before) {
        debug!(
            "Skipping status update for {} {}/{} - status unchanged",
            K::kind(&()),
            obj.namespace().unwrap_or_default(),
            obj.name_any()
        );
        return Ok(false);
    }

    update_status(store, obj).await?;
    Ok(true)
}
