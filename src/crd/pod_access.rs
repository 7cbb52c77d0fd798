//! # Pod Access Resources
//!
//! `PodAccessTemplate` and `PodAccessRequest`: clone a workload's pod template
//! into a detached debug pod and grant exec into that pod only.

use crate::crd::common::{
    preserve_unknown_object, preserve_unknown_object_list, AccessConfig,
    CrossVersionObjectReference,
};
use crate::crd::status::{AccessRequestStatus, TemplateStatus};
use k8s_openapi::api::core::v1::{EnvVar, ResourceRequirements};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// PodAccessTemplate Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: crds.wizardofoz.co/v1alpha1
/// kind: PodAccessTemplate
/// metadata:
///   name: api-b-debug
///   namespace: default
/// spec:
///   targetRef:
///     apiVersion: apps/v1
///     kind: Deployment
///     name: api-b
///   accessConfig:
///     allowedGroups: [eng]
///     defaultDuration: 1h
///     maxDuration: 2h
///   controllerTargetMutationConfig:
///     command: [sleep]
///     args: ["100"]
///   maxCpu: "2"
///   maxMemory: 4Gi
/// ```
#[derive(CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "PodAccessTemplate",
    group = "crds.wizardofoz.co",
    version = "v1alpha1",
    namespaced,
    status = "TemplateStatus",
    shortname = "pat",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Ready", "type":"boolean", "jsonPath":".status.ready"}, {"name":"Target", "type":"string", "jsonPath":".spec.targetRef.name"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PodAccessTemplateSpec {
    /// Workload controller whose pod template is cloned
    pub target_ref: CrossVersionObjectReference,
    /// Groups and duration bounds
    pub access_config: AccessConfig,
    /// Changes applied to the cloned pod template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_target_mutation_config: Option<PodTemplateMutationConfig>,
    /// Upper bound on CPU the mutation config may request (quantity string)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cpu: Option<String>,
    /// Upper bound on memory the mutation config may request (quantity string)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_memory: Option<String>,
    /// Upper bound on ephemeral storage the mutation config may request (quantity string)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_storage: Option<String>,
}

/// Mutations applied to one container of the cloned pod template
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodTemplateMutationConfig {
    /// Container to mutate; falls back to the default-container annotation, then the first container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_container_name: Option<String>,
    /// Replaces the container command and clears its args
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    /// Replaces the container args
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    /// Appended to the container environment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_object_list")]
    pub env: Option<Vec<EnvVar>>,
    /// Replaces the container resource requirements when non-empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_object")]
    pub resources: Option<ResourceRequirements>,
}

/// PodAccessRequest Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: crds.wizardofoz.co/v1alpha1
/// kind: PodAccessRequest
/// metadata:
///   generateName: alice-
///   namespace: default
/// spec:
///   templateName: api-b-debug
/// ```
#[derive(CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "PodAccessRequest",
    group = "crds.wizardofoz.co",
    version = "v1alpha1",
    namespaced,
    status = "AccessRequestStatus",
    shortname = "par",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Template", "type":"string", "jsonPath":".spec.templateName"}, {"name":"Pod", "type":"string", "jsonPath":".status.podName"}, {"name":"Ready", "type":"boolean", "jsonPath":".status.ready"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PodAccessRequestSpec {
    /// Name of the PodAccessTemplate in the same namespace
    pub template_name: String,
    /// Requested duration; defaults to the template's default and is clamped to its max
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}
