//! # Target Resolver
//!
//! The one place that fans out over workload controller kinds. Each kind knows
//! where its pod template and selector live; everything downstream works on
//! [`TargetWorkload`].

use crate::constants::DEFAULT_CONTAINER_ANNOTATION;
use crate::controller::builder::BuildError;
use crate::controller::store::{ResourceStore, StoreObject};
use crate::crd::CrossVersionObjectReference;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use std::collections::BTreeMap;
use std::fmt;

/// API version every supported workload controller lives under
const APPS_V1: &str = "apps/v1";

/// Supported workload controller kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Deployment,
    DaemonSet,
    StatefulSet,
}

impl TargetKind {
    /// Select the handler for a reference
    ///
    /// An empty `apiVersion` is read as `apps/v1`.
    pub fn from_reference(reference: &CrossVersionObjectReference) -> Result<Self, BuildError> {
        let api_version = reference.api_version.trim();
        let kind = match reference.kind.trim() {
            "Deployment" => TargetKind::Deployment,
            "DaemonSet" => TargetKind::DaemonSet,
            "StatefulSet" => TargetKind::StatefulSet,
            _ => return Err(BuildError::unsupported_kind(reference)),
        };
        if !api_version.is_empty() && api_version != APPS_V1 {
            return Err(BuildError::unsupported_kind(reference));
        }
        Ok(kind)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Deployment => "Deployment",
            TargetKind::DaemonSet => "DaemonSet",
            TargetKind::StatefulSet => "StatefulSet",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved workload controller: its pod template and pod selector
#[derive(Debug, Clone, PartialEq)]
pub struct TargetWorkload {
    pub kind: TargetKind,
    pub namespace: String,
    pub name: String,
    /// `spec.selector.matchLabels` of the controller
    pub selector: BTreeMap<String, String>,
    pub pod_template: PodTemplateSpec,
}

impl TargetWorkload {
    /// Load the referenced controller through the cached reader
    pub async fn resolve<S: ResourceStore>(
        store: &S,
        namespace: &str,
        reference: &CrossVersionObjectReference,
    ) -> Result<Self, BuildError> {
        let kind = TargetKind::from_reference(reference)?;
        let name = reference.name.trim();

        let (selector, pod_template) = match kind {
            TargetKind::Deployment => {
                let deployment: Deployment = fetch(store, kind, namespace, name).await?;
                let spec = deployment
                    .spec
                    .ok_or_else(|| BuildError::invalid_target(kind, name, "missing spec"))?;
                (spec.selector, spec.template)
            }
            TargetKind::DaemonSet => {
                let daemon_set: DaemonSet = fetch(store, kind, namespace, name).await?;
                let spec = daemon_set
                    .spec
                    .ok_or_else(|| BuildError::invalid_target(kind, name, "missing spec"))?;
                (spec.selector, spec.template)
            }
            TargetKind::StatefulSet => {
                let stateful_set: StatefulSet = fetch(store, kind, namespace, name).await?;
                let spec = stateful_set
                    .spec
                    .ok_or_else(|| BuildError::invalid_target(kind, name, "missing spec"))?;
                (spec.selector, spec.template)
            }
        };

        Ok(Self {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
            selector: match_labels(selector),
            pod_template,
        })
    }

    /// Value of the default-container annotation on the pod template
    pub fn default_container_annotation(&self) -> Option<&str> {
        self.pod_template
            .metadata
            .as_ref()
            .and_then(|m| m.annotations.as_ref())
            .and_then(|a| a.get(DEFAULT_CONTAINER_ANNOTATION))
            .map(String::as_str)
    }

    /// Names of the containers in the pod template, in order
    pub fn container_names(&self) -> Vec<&str> {
        self.pod_template
            .spec
            .as_ref()
            .map(|s| s.containers.iter().map(|c| c.name.as_str()).collect())
            .unwrap_or_default()
    }
}

impl fmt::Display for TargetWorkload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

async fn fetch<S: ResourceStore, K: StoreObject>(
    store: &S,
    kind: TargetKind,
    namespace: &str,
    name: &str,
) -> Result<K, BuildError> {
    store
        .get_cached::<K>(namespace, name)
        .await?
        .ok_or_else(|| BuildError::TargetNotFound {
            kind: kind.as_str().to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
}

fn match_labels(selector: LabelSelector) -> BTreeMap<String, String> {
    selector.match_labels.unwrap_or_default()
}
