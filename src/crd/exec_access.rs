//! # Exec Access Resources
//!
//! `ExecAccessTemplate` and `ExecAccessRequest`: grant `kubectl exec` into one
//! existing pod of a workload controller.

use crate::crd::common::{AccessConfig, CrossVersionObjectReference};
use crate::crd::status::{AccessRequestStatus, TemplateStatus};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// ExecAccessTemplate Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: crds.wizardofoz.co/v1alpha1
/// kind: ExecAccessTemplate
/// metadata:
///   name: api-a-exec
///   namespace: default
/// spec:
///   targetRef:
///     apiVersion: apps/v1
///     kind: Deployment
///     name: api-a
///   accessConfig:
///     allowedGroups: [eng]
///     defaultDuration: 1h
///     maxDuration: 2h
/// ```
#[derive(CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "ExecAccessTemplate",
    group = "crds.wizardofoz.co",
    version = "v1alpha1",
    namespaced,
    status = "TemplateStatus",
    shortname = "eat",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Ready", "type":"boolean", "jsonPath":".status.ready"}, {"name":"Target", "type":"string", "jsonPath":".spec.targetRef.name"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ExecAccessTemplateSpec {
    /// Workload controller whose pods may be exec'd into
    pub target_ref: CrossVersionObjectReference,
    /// Groups and duration bounds
    pub access_config: AccessConfig,
}

/// ExecAccessRequest Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: crds.wizardofoz.co/v1alpha1
/// kind: ExecAccessRequest
/// metadata:
///   generateName: alice-
///   namespace: default
/// spec:
///   templateName: api-a-exec
///   duration: 30m
/// ```
#[derive(CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "ExecAccessRequest",
    group = "crds.wizardofoz.co",
    version = "v1alpha1",
    namespaced,
    status = "AccessRequestStatus",
    shortname = "ear",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Template", "type":"string", "jsonPath":".spec.templateName"}, {"name":"Pod", "type":"string", "jsonPath":".status.podName"}, {"name":"Ready", "type":"boolean", "jsonPath":".status.ready"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ExecAccessRequestSpec {
    /// Name of the ExecAccessTemplate in the same namespace
    pub template_name: String,
    /// Requested duration; defaults to the template's default and is clamped to its max
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    /// Specific pod to exec into; a running pod is picked at random when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_pod: Option<String>,
}
