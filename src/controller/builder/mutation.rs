//! # Pod Template Mutation
//!
//! Applies a template's `controllerTargetMutationConfig` to a cloned pod
//! template, and the coherence check the template verifier runs up front.
//!
//! Container choice: the configured `defaultContainerName`, else the pod
//! template's default-container annotation, else the first container.

use crate::controller::builder::quantity::ResourceCaps;
use crate::controller::builder::target::TargetWorkload;
use crate::crd::PodTemplateMutationConfig;
use k8s_openapi::api::core::v1::{PodSpec, PodTemplateSpec, ResourceRequirements};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct MutationError(pub String);

/// Pick the container the mutation applies to
pub fn select_container_index(
    spec: &PodSpec,
    requested: Option<&str>,
    annotation: Option<&str>,
) -> Result<usize, MutationError> {
    if spec.containers.is_empty() {
        return Err(MutationError("pod template has no containers".to_string()));
    }

    let position = |name: &str| spec.containers.iter().position(|c| c.name == name);

    if let Some(name) = requested.filter(|n| !n.is_empty()) {
        return position(name).ok_or_else(|| {
            MutationError(format!(
                "defaultContainerName '{name}' does not match any container in the target pod template"
            ))
        });
    }

    Ok(annotation.and_then(position).unwrap_or(0))
}

fn resources_empty(resources: &ResourceRequirements) -> bool {
    resources.limits.as_ref().is_none_or(|l| l.is_empty())
        && resources.requests.as_ref().is_none_or(|r| r.is_empty())
        && resources.claims.as_ref().is_none_or(|c| c.is_empty())
}

/// Apply the mutation config to `template` in place
///
/// Returns the name of the mutated container.
pub fn apply_mutation(
    template: &mut PodTemplateSpec,
    annotation: Option<&str>,
    config: &PodTemplateMutationConfig,
) -> Result<String, MutationError> {
    let spec = template
        .spec
        .as_mut()
        .ok_or_else(|| MutationError("pod template has no spec".to_string()))?;
    let index = select_container_index(spec, config.default_container_name.as_deref(), annotation)?;
    let container = &mut spec.containers[index];

    // A new entrypoint must not inherit the old entrypoint's arguments
    if let Some(command) = &config.command {
        container.command = Some(command.clone());
        container.args = None;
    }
    if let Some(args) = &config.args {
        container.args = Some(args.clone());
    }
    if let Some(resources) = config.resources.as_ref().filter(|r| !resources_empty(r)) {
        container.resources = Some(resources.clone());
    }
    if let Some(env) = config.env.as_ref().filter(|e| !e.is_empty()) {
        container
            .env
            .get_or_insert_with(Vec::new)
            .extend(env.iter().cloned());
    }

    Ok(container.name.clone())
}

/// Check that a mutation config can be applied to `target`
///
/// The configured container name must match a container in the target pod
/// template, or equal the template's default-container annotation. Resource
/// overrides must stay within the template's caps.
pub fn check_mutation_config(
    config: &PodTemplateMutationConfig,
    target: &TargetWorkload,
    caps: &ResourceCaps,
) -> Result<(), MutationError> {
    if let Some(name) = config
        .default_container_name
        .as_deref()
        .filter(|n| !n.is_empty())
    {
        let annotated = target.default_container_annotation() == Some(name);
        if !annotated && !target.container_names().contains(&name) {
            return Err(MutationError(format!(
                "defaultContainerName '{name}' matches neither a container of {target} nor its default-container annotation"
            )));
        }
    }

    if let Some(resources) = &config.resources {
        caps.check(resources)
            .map_err(|violation| MutationError(violation.to_string()))?;
    }

    Ok(())
}
