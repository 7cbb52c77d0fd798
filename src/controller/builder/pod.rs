//! # Pod Builder
//!
//! Clones the target workload's pod template into a standalone debug pod,
//! applies the template's mutation config, and grants exec into that pod.
//!
//! The clone is detached from the workload: it carries no owner reference to
//! the workload, none of the selector labels (so Services never route to it),
//! and no finalizers. Its only owner is the request.
//!
//! `status.podName` is recorded only once the pod exists. A recorded pod that
//! later disappears is never recreated under the same name.

use crate::controller::builder::mutation::apply_mutation;
use crate::controller::builder::quantity::ResourceCaps;
use crate::controller::builder::target::TargetWorkload;
use crate::controller::builder::{
    access_message, child_labels, child_name, controller_reference, ensure_role_and_binding,
    AccessBuilder, BuildError, BuildOutcome, PodVerification, VerifiesAccessResources,
};
use crate::controller::store::{create_or_update, ResourceStore};
use crate::crd::{
    AccessTemplate, HasPodName, PodAccessRequest, PodAccessTemplate, PodAccessTemplateSpec,
};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::ResourceExt;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default)]
pub struct PodAccessBuilder;

impl PodAccessBuilder {
    pub fn new() -> Self {
        Self
    }
}

/// Identity of the debug pod being built
#[derive(Debug, Clone)]
pub struct DebugPodIdentity<'a> {
    pub name: &'a str,
    pub namespace: &'a str,
    pub request_name: &'a str,
    pub owner: &'a OwnerReference,
}

/// Build the desired debug pod from a resolved target
pub fn build_debug_pod(
    target: &TargetWorkload,
    spec: &PodAccessTemplateSpec,
    identity: &DebugPodIdentity<'_>,
) -> Result<Pod, BuildError> {
    let mut pod_template = target.pod_template.clone();
    let annotation = target.default_container_annotation().map(str::to_string);

    if let Some(config) = &spec.controller_target_mutation_config {
        apply_mutation(&mut pod_template, annotation.as_deref(), config)
            .map_err(|e| BuildError::InvalidMutation(e.0))?;

        if let Some(resources) = &config.resources {
            ResourceCaps::from_template(spec)
                .and_then(|caps| caps.check(resources))
                .map_err(|e| BuildError::InvalidMutation(e.to_string()))?;
        }
    }

    let template_meta = pod_template.metadata.unwrap_or_default();

    let mut labels = template_meta.labels.unwrap_or_default();
    labels.retain(|key, _| !target.selector.contains_key(key));
    labels.extend(child_labels(identity.request_name));

    let pod_spec = pod_template.spec.ok_or_else(|| {
        BuildError::invalid_target(target.kind, &target.name, "pod template has no spec")
    })?;

    Ok(Pod {
        metadata: ObjectMeta {
            name: Some(identity.name.to_string()),
            namespace: Some(identity.namespace.to_string()),
            labels: Some(labels),
            annotations: template_meta.annotations,
            owner_references: Some(vec![identity.owner.clone()]),
            finalizers: None,
            ..Default::default()
        },
        spec: Some(pod_spec),
        status: None,
    })
}

fn pod_phase(pod: &Pod) -> Option<&str> {
    pod.status.as_ref().and_then(|s| s.phase.as_deref())
}

#[async_trait]
impl AccessBuilder for PodAccessBuilder {
    type Request = PodAccessRequest;

    async fn generate_access_resources<S: ResourceStore>(
        &self,
        store: &S,
        request: &mut PodAccessRequest,
        template: &PodAccessTemplate,
    ) -> Result<BuildOutcome, BuildError> {
        let namespace = request.namespace().unwrap_or_default();
        let request_name = request.name_any();
        let name = child_name(&*request)?;
        let owner = controller_reference(&*request)?;

        // Rejects a different name recorded by an earlier iteration
        request.check_pod_name(&name)?;

        let outcome = BuildOutcome {
            status_message: format!("Debug pod {name} and access role created"),
            access_message: access_message(&namespace, &name),
        };

        // A recorded pod that is gone stays gone; verification reports it
        if request.pod_name().is_some()
            && store.get_consistent::<Pod>(&namespace, &name).await?.is_none()
        {
            debug!(
                "Debug pod {}/{} recorded by PodAccessRequest {} no longer exists, not recreating",
                namespace, name, request_name
            );
            return Ok(outcome);
        }

        let target = TargetWorkload::resolve(store, &namespace, template.target_ref()).await?;
        let desired = build_debug_pod(
            &target,
            &template.spec,
            &DebugPodIdentity {
                name: &name,
                namespace: &namespace,
                request_name: &request_name,
                owner: &owner,
            },
        )?;

        // Pod specs are immutable; only ownership is reconciled on an existing pod
        let owners = desired.metadata.owner_references.clone();
        let (_, result) = create_or_update(store, desired, |pod: &mut Pod| {
            pod.metadata.owner_references = owners.clone();
        })
        .await?;
        info!(
            "🐞 Debug pod {}/{} {} from {}",
            namespace,
            name,
            result.as_str(),
            target
        );
        request.set_pod_name(&name)?;

        ensure_role_and_binding(store, &*request, template, &name).await?;

        Ok(outcome)
    }
}

#[async_trait]
impl VerifiesAccessResources for PodAccessBuilder {
    async fn verify_access_resources<S: ResourceStore>(
        &self,
        store: &S,
        request: &PodAccessRequest,
    ) -> Result<PodVerification, BuildError> {
        let Some(pod_name) = request.pod_name() else {
            return Ok(PodVerification::Missing);
        };
        let namespace = request.namespace().unwrap_or_default();

        let verification = match store.get_consistent::<Pod>(&namespace, pod_name).await? {
            None => PodVerification::Missing,
            Some(pod) => match pod_phase(&pod) {
                Some("Running") => PodVerification::Running,
                phase => PodVerification::NotRunning {
                    phase: phase.unwrap_or("Unknown").to_string(),
                },
            },
        };
        Ok(verification)
    }
}
