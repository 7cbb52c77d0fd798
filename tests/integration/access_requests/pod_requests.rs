//! PodAccessRequest reconciliation

use crate::common::{
    condition_status, context, deployment, pod_request, pod_template, MemoryStore, NAMESPACE,
};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use oz_controller::controller::reconciler::{reconcile_pod_access_request, Context};
use oz_controller::controller::store::ResourceStore;
use oz_controller::crd::PodAccessRequest;
use serde_json::json;
use std::time::Duration;

/// Two-container deployment `api` (default container `contB`) and template `debug`
async fn seeded(mutation: serde_json::Value) -> Context<MemoryStore> {
    let ctx = context();
    ctx.store
        .insert(deployment(
            "api",
            json!([
                { "name": "contA", "image": "a:1", "args": ["--serve"] },
                { "name": "contB", "image": "b:1", "command": ["/bin/b"] }
            ]),
            json!({ "kubectl.kubernetes.io/default-container": "contB" }),
        ))
        .await;
    ctx.store.insert(pod_template("debug", "api", mutation)).await;
    ctx
}

fn debug_pod_name(request: &PodAccessRequest) -> String {
    let uid: String = request.uid().unwrap().chars().take(8).collect();
    format!("{}-{uid}", request.name_any())
}

#[tokio::test]
async fn test_creates_mutated_debug_pod() {
    let ctx = seeded(json!({ "command": ["sleep"], "args": ["100"] })).await;
    let request = ctx.store.insert(pod_request("bob", "debug", None)).await;
    let pod_name = debug_pod_name(&request);

    reconcile_pod_access_request(&ctx, NAMESPACE, "bob")
        .await
        .unwrap();

    let pod: Pod = ctx.store.get(NAMESPACE, &pod_name).unwrap();
    let labels = pod.labels();
    assert!(!labels.contains_key("app"), "debug pod must not join the workload's selector");
    assert_eq!(labels.get("team").map(String::as_str), Some("payments"));
    assert_eq!(pod.owner_references()[0].uid, request.uid().unwrap());

    let containers = pod.spec.unwrap().containers;
    assert_eq!(containers[0].name, "contA");
    assert_eq!(containers[0].command, None);
    assert_eq!(containers[1].name, "contB");
    assert_eq!(containers[1].command, Some(vec!["sleep".to_string()]));
    assert_eq!(containers[1].args, Some(vec!["100".to_string()]));

    let role: Role = ctx.store.get(NAMESPACE, &pod_name).unwrap();
    assert!(role
        .rules
        .unwrap()
        .iter()
        .all(|r| r.resource_names == Some(vec![pod_name.clone()])));
    let binding: RoleBinding = ctx.store.get(NAMESPACE, &pod_name).unwrap();
    let groups: Vec<_> = binding.subjects.unwrap().into_iter().map(|s| s.name).collect();
    assert_eq!(groups, vec!["eng", "sre"]);
}

#[tokio::test]
async fn test_pending_pod_requeues_quickly() {
    let ctx = seeded(serde_json::Value::Null).await;
    let request = ctx.store.insert(pod_request("bob", "debug", None)).await;
    let pod_name = debug_pod_name(&request);

    let action = reconcile_pod_access_request(&ctx, NAMESPACE, "bob")
        .await
        .unwrap();
    assert_eq!(action, Action::requeue(Duration::from_secs(5)));

    let status = ctx
        .store
        .get::<PodAccessRequest>(NAMESPACE, "bob")
        .unwrap()
        .status
        .unwrap();
    assert!(!status.ready);
    assert_eq!(status.pod_name.as_deref(), Some(pod_name.as_str()));
    assert_eq!(
        condition_status(&status.conditions, "AccessResourcesCreated"),
        Some(("True", "Created"))
    );
    assert_eq!(
        condition_status(&status.conditions, "PodReady"),
        Some(("False", "PodNotRunning"))
    );
}

#[tokio::test]
async fn test_running_pod_makes_request_ready() {
    let ctx = seeded(serde_json::Value::Null).await;
    let request = ctx.store.insert(pod_request("bob", "debug", Some("30m"))).await;
    let pod_name = debug_pod_name(&request);

    reconcile_pod_access_request(&ctx, NAMESPACE, "bob")
        .await
        .unwrap();
    ctx.store.set_pod_phase(NAMESPACE, &pod_name, "Running");

    let action = reconcile_pod_access_request(&ctx, NAMESPACE, "bob")
        .await
        .unwrap();
    assert!(action != Action::requeue(Duration::from_secs(5)));

    let status = ctx
        .store
        .get::<PodAccessRequest>(NAMESPACE, "bob")
        .unwrap()
        .status
        .unwrap();
    assert!(status.ready);
    assert_eq!(
        condition_status(&status.conditions, "PodReady"),
        Some(("True", "PodRunning"))
    );
    assert_eq!(
        condition_status(&status.conditions, "DurationsValid"),
        Some(("True", "Honored"))
    );
    assert_eq!(
        status.access_message,
        Some(format!("kubectl exec -ti -n default {pod_name} -- /bin/sh"))
    );
}

#[tokio::test]
async fn test_recorded_pod_name_is_immutable() {
    let ctx = seeded(serde_json::Value::Null).await;
    ctx.store.insert(pod_request("bob", "debug", None)).await;
    ctx.store
        .set_status::<PodAccessRequest>(NAMESPACE, "bob", json!({ "podName": "someone-else" }));

    let action = reconcile_pod_access_request(&ctx, NAMESPACE, "bob")
        .await
        .unwrap();
    assert_eq!(action, Action::requeue(Duration::from_secs(300)));

    let status = ctx
        .store
        .get::<PodAccessRequest>(NAMESPACE, "bob")
        .unwrap()
        .status
        .unwrap();
    assert!(!status.ready);
    assert_eq!(status.pod_name.as_deref(), Some("someone-else"));
    assert_eq!(
        condition_status(&status.conditions, "AccessResourcesCreated"),
        Some(("False", "ImmutableField"))
    );
    assert_eq!(ctx.store.count::<Pod>(NAMESPACE), 0);
}

#[tokio::test]
async fn test_invalid_mutation_is_reported() {
    let ctx = seeded(json!({ "defaultContainerName": "contZ" })).await;
    ctx.store.insert(pod_request("bob", "debug", None)).await;

    let action = reconcile_pod_access_request(&ctx, NAMESPACE, "bob")
        .await
        .unwrap();
    assert_eq!(action, Action::requeue(Duration::from_secs(30)));

    let status = ctx
        .store
        .get::<PodAccessRequest>(NAMESPACE, "bob")
        .unwrap()
        .status
        .unwrap();
    assert_eq!(
        condition_status(&status.conditions, "AccessResourcesCreated"),
        Some(("False", "InvalidMutation"))
    );
    assert_eq!(ctx.store.count::<Pod>(NAMESPACE), 0);
}

#[tokio::test]
async fn test_deleted_debug_pod_is_not_recreated() {
    let ctx = seeded(serde_json::Value::Null).await;
    let request = ctx.store.insert(pod_request("bob", "debug", None)).await;
    let pod_name = debug_pod_name(&request);

    reconcile_pod_access_request(&ctx, NAMESPACE, "bob")
        .await
        .unwrap();
    ctx.store.delete::<Pod>(NAMESPACE, &pod_name).await.unwrap();

    let action = reconcile_pod_access_request(&ctx, NAMESPACE, "bob")
        .await
        .unwrap();
    assert_eq!(action, Action::requeue(Duration::from_secs(300)));
    assert!(ctx.store.get::<Pod>(NAMESPACE, &pod_name).is_none());

    let status = ctx
        .store
        .get::<PodAccessRequest>(NAMESPACE, "bob")
        .unwrap()
        .status
        .unwrap();
    assert!(!status.ready);
    assert_eq!(status.pod_name.as_deref(), Some(pod_name.as_str()));
    assert_eq!(
        condition_status(&status.conditions, "PodReady"),
        Some(("False", "PodNotFound"))
    );
    let pod_ready = status
        .conditions
        .iter()
        .find(|c| c.r#type == "PodReady")
        .unwrap();
    assert_eq!(pod_ready.message, "Error Fetching Pod");

    // Stays down on later iterations too
    reconcile_pod_access_request(&ctx, NAMESPACE, "bob")
        .await
        .unwrap();
    assert_eq!(ctx.store.count::<Pod>(NAMESPACE), 0);
}

#[tokio::test]
async fn test_pod_name_not_recorded_when_target_is_missing() {
    let ctx = context();
    ctx.store
        .insert(pod_template("debug", "gone", serde_json::Value::Null))
        .await;
    ctx.store.insert(pod_request("bob", "debug", None)).await;

    let action = reconcile_pod_access_request(&ctx, NAMESPACE, "bob")
        .await
        .unwrap();
    assert_eq!(action, Action::requeue(Duration::from_secs(30)));

    let status = ctx
        .store
        .get::<PodAccessRequest>(NAMESPACE, "bob")
        .unwrap()
        .status
        .unwrap();
    assert_eq!(status.pod_name, None);
    assert_eq!(
        condition_status(&status.conditions, "AccessResourcesCreated"),
        Some(("False", "NotFound"))
    );
    assert_eq!(ctx.store.count::<Pod>(NAMESPACE), 0);
}
