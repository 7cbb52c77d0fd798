//! PodAccessTemplate verification

use crate::common::{condition_status, context, deployment, pod_template, NAMESPACE};
use oz_controller::controller::reconciler::verify_pod_template;
use oz_controller::crd::PodAccessTemplate;
use serde_json::json;

fn two_container_deployment() -> k8s_openapi::api::apps::v1::Deployment {
    deployment(
        "api",
        json!([
            { "name": "contA", "image": "a:1" },
            { "name": "contB", "image": "b:1" }
        ]),
        json!({ "kubectl.kubernetes.io/default-container": "contB" }),
    )
}

async fn verified(mutation: serde_json::Value, with_target: bool) -> PodAccessTemplate {
    let ctx = context();
    if with_target {
        ctx.store.insert(two_container_deployment()).await;
    }
    ctx.store.insert(pod_template("debug", "api", mutation)).await;
    verify_pod_template(&ctx, NAMESPACE, "debug").await.unwrap();
    ctx.store.get(NAMESPACE, "debug").unwrap()
}

#[tokio::test]
async fn test_valid_mutation_is_ready() {
    let template = verified(
        json!({
            "command": ["sleep"],
            "args": ["100"],
            "resources": { "requests": { "cpu": "500m", "memory": "256Mi" } }
        }),
        true,
    )
    .await;

    let status = template.status.unwrap();
    assert!(status.ready);
    assert_eq!(
        condition_status(&status.conditions, "MutationConfigValid"),
        Some(("True", "Valid"))
    );
}

#[tokio::test]
async fn test_no_mutation_is_valid() {
    let template = verified(serde_json::Value::Null, true).await;
    let status = template.status.unwrap();
    assert!(status.ready);
    assert_eq!(
        condition_status(&status.conditions, "MutationConfigValid"),
        Some(("True", "Valid"))
    );
}

#[tokio::test]
async fn test_unknown_container_is_invalid() {
    let template = verified(json!({ "defaultContainerName": "contZ" }), true).await;
    let status = template.status.unwrap();
    assert!(!status.ready);
    assert_eq!(
        condition_status(&status.conditions, "MutationConfigValid"),
        Some(("False", "InvalidMutation"))
    );
}

#[tokio::test]
async fn test_resources_above_cap_are_invalid() {
    let template = verified(
        json!({ "resources": { "limits": { "cpu": "2" } } }),
        true,
    )
    .await;
    let status = template.status.unwrap();
    assert!(!status.ready);
    assert_eq!(
        condition_status(&status.conditions, "MutationConfigValid"),
        Some(("False", "InvalidMutation"))
    );
}

#[tokio::test]
async fn test_mutation_unchecked_without_target() {
    let template = verified(json!({ "command": ["sleep"] }), false).await;
    let status = template.status.unwrap();
    assert!(!status.ready);
    assert_eq!(
        condition_status(&status.conditions, "TargetRefExists"),
        Some(("False", "NotFound"))
    );
    assert_eq!(
        condition_status(&status.conditions, "MutationConfigValid"),
        Some(("Unknown", "TargetUnresolved"))
    );
}
