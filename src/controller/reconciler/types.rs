//! # Reconciler Types
//!
//! Shared context handed to every reconcile call, and the reconciler error type.

use crate::controller::backoff::FibonacciBackoff;
use crate::controller::builder::BuildError;
use crate::controller::store::{ResourceStore, StoreError};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

/// Errors that abort a reconcile and hand the object to the error policy
///
/// User mistakes and failed builds never surface here; they are recorded as
/// conditions on the object instead.
#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("access verification failed: {0}")]
    Build(#[from] BuildError),
    #[error("{kind} {name} has no namespace")]
    MissingNamespace { kind: String, name: String },
}

/// Backoff state for one resource
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    pub fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::new(1, 10), // 1 minute min, 10 minutes max
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count = self.error_count.saturating_add(1);
    }
}

impl Default for BackoffState {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared reconciler context
#[derive(Debug)]
pub struct Context<S: ResourceStore> {
    pub store: S,
    /// Periodic requeue for requests so expiry is enforced without events
    pub reconcile_interval: Duration,
    /// Per-resource backoff, keyed by `kind/namespace/name`
    pub backoff_states: Mutex<HashMap<String, BackoffState>>,
}

impl<S: ResourceStore> Context<S> {
    pub fn new(store: S, reconcile_interval: Duration) -> Self {
        Self {
            store,
            reconcile_interval,
            backoff_states: Mutex::new(HashMap::new()),
        }
    }

    /// Forget the error history of a resource after a successful reconcile
    pub fn reset_backoff(&self, key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states.remove(key);
        }
    }
}

/// Key used for per-resource bookkeeping
pub fn resource_key(kind: &str, namespace: &str, name: &str) -> String {
    format!("{kind}/{namespace}/{name}")
}
