//! ExecAccessTemplate verification

use crate::common::{
    condition_status, context, exec_template, simple_deployment, NAMESPACE,
};
use oz_controller::controller::reconciler::{resource_key, verify_exec_template, BackoffState};
use oz_controller::crd::ExecAccessTemplate;
use std::time::Duration;

#[tokio::test]
async fn test_template_with_existing_deployment_is_ready() {
    let ctx = context();
    ctx.store.insert(simple_deployment("api")).await;
    ctx.store
        .insert(exec_template("shell", "Deployment", "api", "1h", "2h"))
        .await;

    let action = verify_exec_template(&ctx, NAMESPACE, "shell").await.unwrap();
    assert_eq!(
        action,
        kube::runtime::controller::Action::requeue(Duration::from_secs(60))
    );

    let template: ExecAccessTemplate = ctx.store.get(NAMESPACE, "shell").unwrap();
    let status = template.status.unwrap();
    assert!(status.ready);
    assert_eq!(
        condition_status(&status.conditions, "TargetRefExists"),
        Some(("True", "Found"))
    );
    assert_eq!(
        condition_status(&status.conditions, "DurationsValid"),
        Some(("True", "Valid"))
    );
}

#[tokio::test]
async fn test_unsupported_target_kind_is_rejected() {
    let ctx = context();
    ctx.store
        .insert(exec_template("shell", "ReplicaSet", "api", "1h", "2h"))
        .await;

    verify_exec_template(&ctx, NAMESPACE, "shell").await.unwrap();

    let status = ctx
        .store
        .get::<ExecAccessTemplate>(NAMESPACE, "shell")
        .unwrap()
        .status
        .unwrap();
    assert!(!status.ready);
    assert_eq!(
        condition_status(&status.conditions, "TargetRefExists"),
        Some(("False", "UnsupportedKind"))
    );
}

#[tokio::test]
async fn test_missing_target_is_not_found() {
    let ctx = context();
    ctx.store
        .insert(exec_template("shell", "Deployment", "ghost", "1h", "2h"))
        .await;

    verify_exec_template(&ctx, NAMESPACE, "shell").await.unwrap();

    let status = ctx
        .store
        .get::<ExecAccessTemplate>(NAMESPACE, "shell")
        .unwrap()
        .status
        .unwrap();
    assert!(!status.ready);
    assert_eq!(
        condition_status(&status.conditions, "TargetRefExists"),
        Some(("False", "NotFound"))
    );
}

#[tokio::test]
async fn test_default_longer_than_max_is_not_acceptable() {
    let ctx = context();
    ctx.store.insert(simple_deployment("api")).await;
    ctx.store
        .insert(exec_template("shell", "Deployment", "api", "3h", "2h"))
        .await;

    verify_exec_template(&ctx, NAMESPACE, "shell").await.unwrap();

    let status = ctx
        .store
        .get::<ExecAccessTemplate>(NAMESPACE, "shell")
        .unwrap()
        .status
        .unwrap();
    assert!(!status.ready);
    assert_eq!(
        condition_status(&status.conditions, "TargetRefExists"),
        Some(("True", "Found"))
    );
    assert_eq!(
        condition_status(&status.conditions, "DurationsValid"),
        Some(("False", "NotAcceptable"))
    );
}

#[tokio::test]
async fn test_unparseable_duration_is_not_acceptable() {
    let ctx = context();
    ctx.store.insert(simple_deployment("api")).await;
    ctx.store
        .insert(exec_template("shell", "Deployment", "api", "soon", "2h"))
        .await;

    verify_exec_template(&ctx, NAMESPACE, "shell").await.unwrap();

    let status = ctx
        .store
        .get::<ExecAccessTemplate>(NAMESPACE, "shell")
        .unwrap()
        .status
        .unwrap();
    assert_eq!(
        condition_status(&status.conditions, "DurationsValid"),
        Some(("False", "NotAcceptable"))
    );
}

#[tokio::test]
async fn test_unchanged_result_skips_status_write() {
    let ctx = context();
    ctx.store.insert(simple_deployment("api")).await;
    ctx.store
        .insert(exec_template("shell", "Deployment", "api", "1h", "2h"))
        .await;

    verify_exec_template(&ctx, NAMESPACE, "shell").await.unwrap();
    assert_eq!(ctx.store.status_writes(), 1);
    let first: ExecAccessTemplate = ctx.store.get(NAMESPACE, "shell").unwrap();

    verify_exec_template(&ctx, NAMESPACE, "shell").await.unwrap();
    assert_eq!(ctx.store.status_writes(), 1);
    let second: ExecAccessTemplate = ctx.store.get(NAMESPACE, "shell").unwrap();
    assert_eq!(first.metadata.resource_version, second.metadata.resource_version);
}

#[tokio::test]
async fn test_target_appearing_later_flips_ready() {
    let ctx = context();
    ctx.store
        .insert(exec_template("shell", "Deployment", "api", "1h", "2h"))
        .await;

    verify_exec_template(&ctx, NAMESPACE, "shell").await.unwrap();
    let before: ExecAccessTemplate = ctx.store.get(NAMESPACE, "shell").unwrap();
    assert!(!before.status.unwrap().ready);

    ctx.store.insert(simple_deployment("api")).await;
    verify_exec_template(&ctx, NAMESPACE, "shell").await.unwrap();
    let after: ExecAccessTemplate = ctx.store.get(NAMESPACE, "shell").unwrap();
    assert!(after.status.unwrap().ready);
}

#[tokio::test]
async fn test_deleted_template_waits_for_change() {
    let ctx = context();
    let key = resource_key("ExecAccessTemplate", NAMESPACE, "gone");
    ctx.backoff_states
        .lock()
        .unwrap()
        .insert(key, BackoffState::new());

    let action = verify_exec_template(&ctx, NAMESPACE, "gone").await.unwrap();
    assert_eq!(action, kube::runtime::controller::Action::await_change());
    assert_eq!(ctx.store.status_writes(), 0);
    assert!(ctx.backoff_states.lock().unwrap().is_empty());
}
