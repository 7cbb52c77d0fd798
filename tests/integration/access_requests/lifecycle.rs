//! Expiry, cascading deletes, conflicts and error backoff

use crate::common::{
    context, exec_request, exec_template, insert_pod, pod_request, pod_template,
    simple_deployment, MemoryStore, NAMESPACE,
};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use kube::runtime::controller::Action;
use oz_controller::controller::reconciler::{
    reconcile_exec_access_request, reconcile_exec_request, reconcile_pod_access_request,
    resource_key, BackoffState, Context, ReconcilerError,
};
use oz_controller::controller::store::ResourceStore;
use oz_controller::crd::{ExecAccessRequest, ExecAccessTemplate, PodAccessRequest};
use oz_controller::runtime::error_policy::handle_reconciliation_error;
use std::sync::Arc;
use std::time::Duration;

async fn granted(name: &str) -> Context<MemoryStore> {
    let ctx = context();
    ctx.store.insert(simple_deployment("api")).await;
    insert_pod(&ctx.store, "api-1", "api", "Running").await;
    ctx.store
        .insert(exec_template("shell", "Deployment", "api", "1h", "2h"))
        .await;
    ctx.store.insert(exec_request(name, "shell", None, None)).await;
    reconcile_exec_access_request(&ctx, NAMESPACE, name)
        .await
        .unwrap();
    assert_eq!(ctx.store.count::<Role>(NAMESPACE), 1);
    assert_eq!(ctx.store.count::<RoleBinding>(NAMESPACE), 1);
    ctx
}

#[tokio::test]
async fn test_expired_request_is_deleted_with_grants() {
    let ctx = granted("alice").await;
    ctx.store
        .backdate::<ExecAccessRequest>(NAMESPACE, "alice", Duration::from_secs(2 * 3600));
    let writes = ctx.store.status_writes();

    let action = reconcile_exec_access_request(&ctx, NAMESPACE, "alice")
        .await
        .unwrap();

    assert_eq!(action, Action::await_change());
    assert!(ctx.store.get::<ExecAccessRequest>(NAMESPACE, "alice").is_none());
    assert_eq!(ctx.store.count::<Role>(NAMESPACE), 0);
    assert_eq!(ctx.store.count::<RoleBinding>(NAMESPACE), 0);
    assert_eq!(ctx.store.status_writes(), writes);
}

#[tokio::test]
async fn test_clamped_duration_bounds_expiry() {
    let ctx = context();
    ctx.store.insert(simple_deployment("api")).await;
    insert_pod(&ctx.store, "api-1", "api", "Running").await;
    ctx.store
        .insert(exec_template("shell", "Deployment", "api", "1h", "2h"))
        .await;
    ctx.store
        .insert(exec_request("alice", "shell", Some("10h"), None))
        .await;
    // Inside the requested 10h but past the 2h max
    ctx.store
        .backdate::<ExecAccessRequest>(NAMESPACE, "alice", Duration::from_secs(3 * 3600));

    reconcile_exec_access_request(&ctx, NAMESPACE, "alice")
        .await
        .unwrap();
    assert!(ctx.store.get::<ExecAccessRequest>(NAMESPACE, "alice").is_none());
}

#[tokio::test]
async fn test_expired_pod_request_removes_debug_pod() {
    let ctx = context();
    ctx.store.insert(simple_deployment("api")).await;
    ctx.store
        .insert(pod_template("debug", "api", serde_json::Value::Null))
        .await;
    ctx.store.insert(pod_request("bob", "debug", None)).await;
    reconcile_pod_access_request(&ctx, NAMESPACE, "bob")
        .await
        .unwrap();
    assert_eq!(ctx.store.count::<Pod>(NAMESPACE), 1);

    ctx.store
        .backdate::<PodAccessRequest>(NAMESPACE, "bob", Duration::from_secs(2 * 3600));
    reconcile_pod_access_request(&ctx, NAMESPACE, "bob")
        .await
        .unwrap();

    assert!(ctx.store.get::<PodAccessRequest>(NAMESPACE, "bob").is_none());
    assert_eq!(ctx.store.count::<Pod>(NAMESPACE), 0);
    assert_eq!(ctx.store.count::<Role>(NAMESPACE), 0);
}

#[tokio::test]
async fn test_template_deletion_cascades_to_requests() {
    let ctx = granted("alice").await;

    ctx.store
        .delete::<ExecAccessTemplate>(NAMESPACE, "shell")
        .await
        .unwrap();

    assert_eq!(ctx.store.count::<ExecAccessRequest>(NAMESPACE), 0);
    assert_eq!(ctx.store.count::<Role>(NAMESPACE), 0);
    assert_eq!(ctx.store.count::<RoleBinding>(NAMESPACE), 0);
    // Workload objects are not owned by the template
    assert_eq!(ctx.store.count::<Pod>(NAMESPACE), 1);
}

#[tokio::test]
async fn test_status_conflict_is_returned() {
    let ctx = context();
    ctx.store
        .insert(exec_request("alice", "missing", None, None))
        .await;
    ctx.store
        .conflict_next_status_write::<ExecAccessRequest>(NAMESPACE, "alice");

    let err = reconcile_exec_access_request(&ctx, NAMESPACE, "alice")
        .await
        .unwrap_err();
    assert!(
        matches!(&err, ReconcilerError::Store(e) if e.is_conflict()),
        "unexpected error: {err:?}"
    );

    // The next iteration starts from a fresh read and succeeds
    reconcile_exec_access_request(&ctx, NAMESPACE, "alice")
        .await
        .unwrap();
    assert!(ctx
        .store
        .get::<ExecAccessRequest>(NAMESPACE, "alice")
        .unwrap()
        .status
        .is_some());
}

#[tokio::test]
async fn test_error_backoff_grows_and_resets_on_success() {
    let ctx = Arc::new(context());
    let request = Arc::new(
        ctx.store
            .insert(exec_request("alice", "missing", None, None))
            .await,
    );

    let mut delays = Vec::new();
    for _ in 0..3 {
        ctx.store
            .conflict_next_status_write::<ExecAccessRequest>(NAMESPACE, "alice");
        let err = reconcile_exec_request(Arc::clone(&request), Arc::clone(&ctx))
            .await
            .unwrap_err();
        delays.push(handle_reconciliation_error(
            Arc::clone(&request),
            &err,
            Arc::clone(&ctx),
        ));
    }
    assert_eq!(
        delays,
        vec![
            Action::requeue(Duration::from_secs(60)),
            Action::requeue(Duration::from_secs(60)),
            Action::requeue(Duration::from_secs(120)),
        ]
    );
    assert_eq!(ctx.backoff_states.lock().unwrap().len(), 1);

    reconcile_exec_request(Arc::clone(&request), Arc::clone(&ctx))
        .await
        .unwrap();
    assert!(ctx.backoff_states.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_expired_request_drops_backoff_state() {
    let ctx = granted("alice").await;
    let key = resource_key("ExecAccessRequest", NAMESPACE, "alice");
    ctx.backoff_states
        .lock()
        .unwrap()
        .insert(key.clone(), BackoffState::new());
    ctx.store
        .backdate::<ExecAccessRequest>(NAMESPACE, "alice", Duration::from_secs(2 * 3600));

    reconcile_exec_access_request(&ctx, NAMESPACE, "alice")
        .await
        .unwrap();
    assert!(!ctx.backoff_states.lock().unwrap().contains_key(&key));
}

#[tokio::test]
async fn test_missing_request_drops_backoff_state() {
    let ctx = context();
    let key = resource_key("PodAccessRequest", NAMESPACE, "bob");
    ctx.backoff_states
        .lock()
        .unwrap()
        .insert(key.clone(), BackoffState::new());

    let action = reconcile_pod_access_request(&ctx, NAMESPACE, "bob")
        .await
        .unwrap();
    assert_eq!(action, Action::await_change());
    assert!(ctx.backoff_states.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_request_without_namespace_is_rejected() {
    let ctx = Arc::new(context());
    let mut request = exec_request("alice", "shell", None, None);
    request.metadata.namespace = None;

    let err = reconcile_exec_request(Arc::new(request), ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcilerError::MissingNamespace { .. }));
}
