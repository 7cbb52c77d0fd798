//! # Exec Builder
//!
//! Grants exec into one running pod of the template's target workload.
//!
//! Pod selection:
//! 1. A pod name already recorded in the request status is kept.
//! 2. `spec.targetPod` is looked up through the consistent reader, because a
//!    pod the user just created may not be cached yet. It must be Running and
//!    carry the workload's selector labels.
//! 3. Otherwise one Running pod of the workload is drawn uniformly at random.
//!
//! A newly chosen name is written to the status before any RBAC object is
//! created, so the grant never names a pod the status does not.

use crate::controller::builder::target::TargetWorkload;
use crate::controller::builder::{
    access_message, ensure_role_and_binding, AccessBuilder, BuildError, BuildOutcome,
};
use crate::controller::store::{update_status, ListQuery, ResourceStore};
use crate::crd::{AccessTemplate, ExecAccessRequest, ExecAccessTemplate, HasPodName};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use rand::seq::IndexedRandom;
use rand::Rng;
use tracing::{debug, info};

const RUNNING_PHASE: &str = "Running";

#[derive(Debug, Clone, Copy, Default)]
pub struct ExecAccessBuilder;

impl ExecAccessBuilder {
    pub fn new() -> Self {
        Self
    }
}

/// Draw one pod name uniformly from `pods`
pub fn select_random_pod<'a, R: Rng + ?Sized>(pods: &'a [Pod], rng: &mut R) -> Option<&'a str> {
    pods.choose(rng).and_then(|pod| pod.metadata.name.as_deref())
}

async fn lookup_target_pod<S: ResourceStore>(
    store: &S,
    target: &TargetWorkload,
    pod_name: &str,
) -> Result<String, BuildError> {
    let query = ListQuery::with_labels(target.selector.clone())
        .name(pod_name)
        .phase(RUNNING_PHASE);
    let pods: Vec<Pod> = store.list_consistent(&target.namespace, &query).await?;

    match pods.len() {
        0 => Err(BuildError::PodNotFound {
            name: pod_name.to_string(),
            target: target.to_string(),
        }),
        1 => Ok(pods[0].name_any()),
        count => Err(BuildError::AmbiguousPod {
            name: pod_name.to_string(),
            target: target.to_string(),
            count,
        }),
    }
}

async fn pick_running_pod<S: ResourceStore>(
    store: &S,
    target: &TargetWorkload,
) -> Result<String, BuildError> {
    let query = ListQuery::with_labels(target.selector.clone()).phase(RUNNING_PHASE);
    let pods: Vec<Pod> = store.list_cached(&target.namespace, &query).await?;
    debug!("Found {} running pods for {}", pods.len(), target);

    // The thread-local rng is not Send, so it must not live across an await
    let picked = select_random_pod(&pods, &mut rand::rng()).map(str::to_string);
    picked.ok_or_else(|| BuildError::NoRunningPods {
        target: target.to_string(),
    })
}

impl ExecAccessBuilder {
    async fn resolve_pod_name<S: ResourceStore>(
        &self,
        store: &S,
        request: &ExecAccessRequest,
        template: &ExecAccessTemplate,
    ) -> Result<Option<String>, BuildError> {
        if request.pod_name().is_some() {
            return Ok(None);
        }

        let namespace = request.namespace().unwrap_or_default();
        let target = TargetWorkload::resolve(store, &namespace, template.target_ref()).await?;
        if target.selector.is_empty() {
            return Err(BuildError::invalid_target(
                target.kind,
                &target.name,
                "selector has no matchLabels",
            ));
        }

        let chosen = match request.spec.target_pod.as_deref().filter(|p| !p.is_empty()) {
            Some(pod_name) => lookup_target_pod(store, &target, pod_name).await?,
            None => pick_running_pod(store, &target).await?,
        };
        Ok(Some(chosen))
    }
}

#[async_trait]
impl AccessBuilder for ExecAccessBuilder {
    type Request = ExecAccessRequest;

    async fn generate_access_resources<S: ResourceStore>(
        &self,
        store: &S,
        request: &mut ExecAccessRequest,
        template: &ExecAccessTemplate,
    ) -> Result<BuildOutcome, BuildError> {
        if let Some(chosen) = self.resolve_pod_name(store, request, template).await? {
            request.set_pod_name(&chosen)?;
            update_status(store, request).await?;
            info!(
                "🎯 Selected pod {} for ExecAccessRequest {}",
                chosen,
                request.name_any()
            );
        }

        let pod_name = request
            .pod_name()
            .map(str::to_string)
            .ok_or_else(|| BuildError::PodNotFound {
                name: String::new(),
                target: template.target_ref().to_string(),
            })?;

        ensure_role_and_binding(store, &*request, template, &pod_name).await?;

        let namespace = request.namespace().unwrap_or_default();
        Ok(BuildOutcome {
            status_message: format!("Access granted to pod {pod_name}"),
            access_message: access_message(&namespace, &pod_name),
        })
    }
}
