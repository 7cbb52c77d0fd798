//! # Reconciler
//!
//! Entry points handed to `kube::runtime::Controller`, one per watched kind.
//!
//! ## Submodules
//!
//! - `template` - verifies `ExecAccessTemplate` and `PodAccessTemplate`
//! - `request` - drives `ExecAccessRequest` and `PodAccessRequest` through
//!   their lifecycle
//! - `duration` - Go-style durations, the effective duration state machine
//!   and expiry
//! - `validation` - name and duration bound validation
//! - `status` - skip-if-unchanged status publication
//! - `types` - the shared [`Context`] and [`ReconcilerError`]
//!
//! Every entry point wraps the kind-specific reconcile in a span carrying the
//! resource identity, records metrics, and clears the resource's error backoff
//! after a success.

pub mod duration;
pub mod request;
pub mod status;
pub mod template;
pub mod types;
pub mod validation;

pub use request::{reconcile_exec_access_request, reconcile_pod_access_request};
pub use template::{verify_exec_template, verify_pod_template};
pub use types::{resource_key, BackoffState, Context, ReconcilerError};

use crate::controller::store::{ResourceStore, StoreObject};
use crate::crd::{ExecAccessRequest, ExecAccessTemplate, PodAccessRequest, PodAccessTemplate};
use crate::observability::metrics;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, Instrument};

/// Run one reconcile of `obj` with the shared bookkeeping
async fn instrumented<S, K, F, Fut>(
    obj: Arc<K>,
    ctx: Arc<Context<S>>,
    reconcile: F,
) -> Result<Action, ReconcilerError>
where
    S: ResourceStore,
    K: StoreObject,
    F: FnOnce(Arc<Context<S>>, String, String) -> Fut,
    Fut: Future<Output = Result<Action, ReconcilerError>>,
{
    let kind = K::kind(&()).to_string();
    let name = obj.name_any();
    let Some(namespace) = obj.namespace() else {
        return Err(ReconcilerError::MissingNamespace { kind, name });
    };

    let span = tracing::info_span!(
        "controller.reconcile",
        resource.kind = %kind,
        resource.namespace = %namespace,
        resource.name = %name,
    );

    async move {
        let start = Instant::now();
        metrics::increment_reconciliations(&kind);

        let key = resource_key(&kind, &namespace, &name);
        let result = reconcile(Arc::clone(&ctx), namespace, name).await;

        metrics::observe_reconciliation_duration(&kind, start.elapsed().as_secs_f64());
        if let Ok(action) = &result {
            ctx.reset_backoff(&key);
            debug!("Reconcile finished: {:?}", action);
        }
        result
    }
    .instrument(span)
    .await
}

/// Reconcile entry point for `ExecAccessTemplate`
pub async fn reconcile_exec_template<S: ResourceStore>(
    obj: Arc<ExecAccessTemplate>,
    ctx: Arc<Context<S>>,
) -> Result<Action, ReconcilerError> {
    instrumented(obj, ctx, |ctx, namespace, name| async move {
        verify_exec_template(&ctx, &namespace, &name).await
    })
    .await
}

/// Reconcile entry point for `PodAccessTemplate`
pub async fn reconcile_pod_template<S: ResourceStore>(
    obj: Arc<PodAccessTemplate>,
    ctx: Arc<Context<S>>,
) -> Result<Action, ReconcilerError> {
    instrumented(obj, ctx, |ctx, namespace, name| async move {
        verify_pod_template(&ctx, &namespace, &name).await
    })
    .await
}

/// Reconcile entry point for `ExecAccessRequest`
pub async fn reconcile_exec_request<S: ResourceStore>(
    obj: Arc<ExecAccessRequest>,
    ctx: Arc<Context<S>>,
) -> Result<Action, ReconcilerError> {
    instrumented(obj, ctx, |ctx, namespace, name| async move {
        reconcile_exec_access_request(&ctx, &namespace, &name).await
    })
    .await
}

/// Reconcile entry point for `PodAccessRequest`
pub async fn reconcile_pod_request<S: ResourceStore>(
    obj: Arc<PodAccessRequest>,
    ctx: Arc<Context<S>>,
) -> Result<Action, ReconcilerError> {
    instrumented(obj, ctx, |ctx, namespace, name| async move {
        reconcile_pod_access_request(&ctx, &namespace, &name).await
    })
    .await
}
