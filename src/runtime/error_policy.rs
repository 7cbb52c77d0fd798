//! # Error Policy
//!
//! Error handling and backoff logic for the controller watch loop.
//! This module handles reconciliation errors and watch stream errors.

use crate::constants;
use crate::controller::reconciler::{resource_key, BackoffState, Context, ReconcilerError};
use crate::controller::store::{ResourceStore, StoreObject};
use crate::observability;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Instrument};

/// Handle reconciliation errors with Fibonacci backoff
///
/// Backoff state is tracked per resource (`kind/namespace/name`) so one failing
/// object never delays another. The state is cleared by the next successful
/// reconcile of the same object, or once the object is found to be gone.
pub fn handle_reconciliation_error<K, S>(
    obj: Arc<K>,
    error: &ReconcilerError,
    ctx: Arc<Context<S>>,
) -> Action
where
    K: StoreObject,
    S: ResourceStore,
{
    let kind = K::kind(&()).to_string();
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_default();

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        resource.kind = %kind,
        resource.name = %name,
        resource.namespace = %namespace,
        error = %error
    );
    let _error_guard = error_span.enter();

    error!("Reconciliation error for {} {}/{}: {:?}", kind, namespace, name, error);
    observability::metrics::increment_reconciliation_errors(&kind);

    let key = resource_key(&kind, &namespace, &name);
    let (backoff_seconds, error_count) = match ctx.backoff_states.lock() {
        Ok(mut states) => {
            let state = states.entry(key).or_insert_with(BackoffState::new);
            state.increment_error();
            (state.backoff.next_backoff_seconds(), state.error_count)
        }
        Err(e) => {
            warn!(
                "Failed to lock backoff_states: {}, using default backoff",
                e
            );
            (constants::DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS, 0)
        }
    };

    let next_trigger_time =
        chrono::Utc::now() + chrono::Duration::seconds(i64::try_from(backoff_seconds).unwrap_or(i64::MAX));

    info!(
        "🔄 Retrying with Fibonacci backoff: {}s (error count: {}, trigger source: error-backoff)",
        backoff_seconds, error_count
    );
    info!(
        "📅 Next retry scheduled: {} (in {}s, trigger source: error-backoff)",
        next_trigger_time.to_rfc3339(),
        backoff_seconds
    );

    observability::metrics::increment_requeues_total("error-backoff");
    Action::requeue(Duration::from_secs(backoff_seconds))
}

/// Classification of a failed watch stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    /// 401: RBAC revoked or token expired
    Unauthorized,
    /// 410: resource version too old, normal after restarts
    Expired,
    /// 429: API server storage reinitializing
    TooManyRequests,
    /// Object vanished mid-watch
    NotFound,
    Other,
}

/// Classify a watch stream error by its rendered message
pub fn classify_watch_error(error_string: &str) -> WatchErrorKind {
    if error_string.contains("401") || error_string.contains("Unauthorized") {
        WatchErrorKind::Unauthorized
    } else if error_string.contains("410")
        || error_string.contains("too old resource version")
        || error_string.contains("Expired")
        || error_string.contains("Gone")
    {
        WatchErrorKind::Expired
    } else if error_string.contains("429")
        || error_string.contains("storage is (re)initializing")
        || error_string.contains("TooManyRequests")
    {
        WatchErrorKind::TooManyRequests
    } else if error_string.contains("ObjectNotFound")
        || (error_string.contains("404") && error_string.contains("not found"))
    {
        WatchErrorKind::NotFound
    } else {
        WatchErrorKind::Other
    }
}

/// Handle a controller stream error for `controller`
///
/// Sleeps where the error calls for it so a failing watch does not spin.
pub async fn handle_watch_stream_error(controller: &str, error_string: &str) {
    let error_span = tracing::span!(
        tracing::Level::WARN,
        "controller.watch.error",
        controller = controller,
        error = %error_string
    );

    async move {
        match classify_watch_error(error_string) {
            WatchErrorKind::Unauthorized => {
                error!("❌ {} watch authentication failed (401 Unauthorized) - RBAC may have been revoked or token expired", controller);
                error!("🔍 Verify the controller ClusterRole still grants list/watch on crds.wizardofoz.co resources, roles, rolebindings and pods");
                warn!(
                    "⏳ Waiting {}s before the watch retries (RBAC may need time to propagate)...",
                    constants::DEFAULT_WATCH_RESTART_DELAY_SECS
                );
                tokio::time::sleep(Duration::from_secs(
                    constants::DEFAULT_WATCH_RESTART_DELAY_SECS,
                ))
                .await;
            }
            WatchErrorKind::Expired => {
                warn!("{} watch resource version expired (410) - this is normal during restarts, watch will restart", controller);
            }
            WatchErrorKind::TooManyRequests => {
                warn!(
                    "API server storage reinitializing (429), backing off for {}s...",
                    constants::DEFAULT_WATCH_RESTART_DELAY_SECS
                );
                tokio::time::sleep(Duration::from_secs(
                    constants::DEFAULT_WATCH_RESTART_DELAY_SECS,
                ))
                .await;
            }
            WatchErrorKind::NotFound => {
                warn!("{}: resource not found (likely deleted), continuing watch...", controller);
            }
            WatchErrorKind::Other => {
                error!("{} controller stream error: {}", controller, error_string);
            }
        }
    }
    .instrument(error_span)
    .await;
}
