//! # Watch Loop
//!
//! Runs one `kube::runtime::Controller` per Oz kind:
//!
//! | Kind | Owns |
//! |---|---|
//! | `ExecAccessTemplate` | - |
//! | `PodAccessTemplate` | - |
//! | `ExecAccessRequest` | `Role`, `RoleBinding` |
//! | `PodAccessRequest` | `Role`, `RoleBinding`, `Pod` |
//!
//! Owned-object events requeue the owning request, so a deleted Role or debug
//! pod is rebuilt (or reported) without waiting for the periodic requeue.

use crate::controller::reconciler::{
    reconcile_exec_request, reconcile_exec_template, reconcile_pod_request,
    reconcile_pod_template, resource_key, ReconcilerError,
};
use crate::controller::reconciler::Context as ReconcilerContext;
use crate::controller::server::ServerState;
use crate::controller::store::KubeStore;
use crate::crd::{ExecAccessRequest, ExecAccessTemplate, PodAccessRequest, PodAccessTemplate};
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use crate::runtime::leader_election::LeaderGuard;
use anyhow::Result;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use kube::runtime::controller::{self, Action};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::{self, Config as WatcherConfig};
use kube::runtime::Controller;
use kube::{Api, Client, Resource};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Watch timeout (seconds), kept below the client read timeout so idle
/// watches are closed by the API server first
const WATCH_TIMEOUT_SECS: u32 = 25;

type ControllerFuture = BoxFuture<'static, ()>;
type ReconcileResult<K> =
    std::result::Result<(ObjectRef<K>, Action), controller::Error<ReconcilerError, watcher::Error>>;

fn watcher_config() -> WatcherConfig {
    WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)
}

/// Log a reconcile result; reconciler failures were already handled by the error policy
///
/// A scheduled retry for an object deleted in the meantime surfaces here as
/// `ObjectNotFound`, which is the last chance to drop its backoff state.
async fn log_reconcile_result<K>(
    controller_name: &'static str,
    result: ReconcileResult<K>,
    ctx: Arc<ReconcilerContext<KubeStore>>,
) where
    K: Resource,
{
    match result {
        Ok((obj, action)) => {
            debug!("{} reconciled {}: {:?}", controller_name, obj, action);
        }
        Err(controller::Error::ReconcilerFailed(e, obj)) => {
            debug!("{} reconcile of {} failed: {}", controller_name, obj, e);
        }
        Err(e) => {
            if let controller::Error::ObjectNotFound(obj) = &e {
                let namespace = obj.namespace.as_deref().unwrap_or_default();
                ctx.reset_backoff(&resource_key(controller_name, namespace, &obj.name));
            }
            handle_watch_stream_error(controller_name, &e.to_string()).await;
        }
    }
}

/// Build the controller futures for every Oz kind
pub fn build_controllers(
    client: Client,
    ctx: Arc<ReconcilerContext<KubeStore>>,
) -> Vec<ControllerFuture> {
    let exec_templates = Controller::new(
        Api::<ExecAccessTemplate>::all(client.clone()),
        watcher_config(),
    )
    .shutdown_on_signal()
    .run(
        reconcile_exec_template::<KubeStore>,
        handle_reconciliation_error::<ExecAccessTemplate, KubeStore>,
        Arc::clone(&ctx),
    )
    .for_each({
        let ctx = Arc::clone(&ctx);
        move |result| log_reconcile_result("ExecAccessTemplate", result, Arc::clone(&ctx))
    });

    let pod_templates = Controller::new(
        Api::<PodAccessTemplate>::all(client.clone()),
        watcher_config(),
    )
    .shutdown_on_signal()
    .run(
        reconcile_pod_template::<KubeStore>,
        handle_reconciliation_error::<PodAccessTemplate, KubeStore>,
        Arc::clone(&ctx),
    )
    .for_each({
        let ctx = Arc::clone(&ctx);
        move |result| log_reconcile_result("PodAccessTemplate", result, Arc::clone(&ctx))
    });

    let exec_requests = Controller::new(
        Api::<ExecAccessRequest>::all(client.clone()),
        watcher_config(),
    )
    .owns(Api::<Role>::all(client.clone()), watcher_config())
    .owns(Api::<RoleBinding>::all(client.clone()), watcher_config())
    .shutdown_on_signal()
    .run(
        reconcile_exec_request::<KubeStore>,
        handle_reconciliation_error::<ExecAccessRequest, KubeStore>,
        Arc::clone(&ctx),
    )
    .for_each({
        let ctx = Arc::clone(&ctx);
        move |result| log_reconcile_result("ExecAccessRequest", result, Arc::clone(&ctx))
    });

    let pod_requests = Controller::new(
        Api::<PodAccessRequest>::all(client.clone()),
        watcher_config(),
    )
    .owns(Api::<Role>::all(client.clone()), watcher_config())
    .owns(Api::<RoleBinding>::all(client.clone()), watcher_config())
    .owns(Api::<Pod>::all(client), watcher_config())
    .shutdown_on_signal()
    .run(
        reconcile_pod_request::<KubeStore>,
        handle_reconciliation_error::<PodAccessRequest, KubeStore>,
        Arc::clone(&ctx),
    )
    .for_each(move |result| log_reconcile_result("PodAccessRequest", result, Arc::clone(&ctx)));

    info!("- ExecAccessTemplate controller");
    info!("- PodAccessTemplate controller");
    info!("- ExecAccessRequest controller (owns Role, RoleBinding)");
    info!("- PodAccessRequest controller (owns Role, RoleBinding, Pod)");

    vec![
        exec_templates.boxed(),
        pod_templates.boxed(),
        exec_requests.boxed(),
        pod_requests.boxed(),
    ]
}

/// Run all controllers until shutdown, or until leadership is lost
pub async fn run_watch_loop(
    client: Client,
    ctx: Arc<ReconcilerContext<KubeStore>>,
    server_state: ServerState,
    leader: Option<LeaderGuard>,
) -> Result<()> {
    info!("🚀 Starting controllers...");
    let controllers = futures::future::join_all(build_controllers(client, ctx));
    server_state.mark_ready();

    match leader {
        None => {
            controllers.await;
            info!("Controllers stopped, shutting down");
        }
        Some(mut guard) => {
            tokio::select! {
                _ = controllers => {
                    info!("Controllers stopped, releasing leadership");
                    if let Err(e) = guard.release_leadership().await {
                        warn!("Failed to release leadership: {}", e);
                    }
                }
                () = guard.lost() => {
                    server_state.mark_not_ready();
                    anyhow::bail!("leadership lost, exiting so another replica can take over");
                }
            }
        }
    }

    server_state.mark_not_ready();
    Ok(())
}
