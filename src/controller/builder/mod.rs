//! # Access Builders
//!
//! Materialize the child objects that implement an access grant.
//!
//! Both builders share the helpers in this module: child naming, the access
//! role, and the role binding. Every child carries its request as controller
//! reference, so deleting the request garbage-collects the grant.
//!
//! ## Builders
//!
//! - [`exec::ExecAccessBuilder`]: role + binding on an existing running pod
//! - [`pod::PodAccessBuilder`]: cloned debug pod + role + binding on that pod
//!
//! Only the pod builder verifies its output after generation
//! ([`VerifiesAccessResources`]).

pub mod exec;
pub mod mutation;
pub mod pod;
pub mod quantity;
pub mod target;

pub use exec::ExecAccessBuilder;
pub use pod::PodAccessBuilder;

use crate::constants::{FIELD_MANAGER, MAX_OBJECT_NAME_LENGTH, SHORT_UID_LENGTH};
use crate::controller::store::{create_or_update, ResourceStore, StoreError, StoreObject};
use crate::crd::{AccessRequest, AccessTemplate, CrossVersionObjectReference, ImmutableFieldError};
use async_trait::async_trait;
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::info;

/// Label identifying objects managed by the controller
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Label carrying the name of the request a child object belongs to
pub const REQUEST_LABEL: &str = "crds.wizardofoz.co/request";

/// Errors raised while building access resources
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("unsupported target kind '{kind}' ({api_version}): expected an apps/v1 Deployment, DaemonSet or StatefulSet")]
    UnsupportedKind { kind: String, api_version: String },
    #[error("{kind} {namespace}/{name} not found")]
    TargetNotFound {
        kind: String,
        namespace: String,
        name: String,
    },
    #[error("{kind} {name} cannot be used as a target: {reason}")]
    InvalidTarget {
        kind: String,
        name: String,
        reason: String,
    },
    #[error("pod not found: no running pod named '{name}' matches {target}")]
    PodNotFound { name: String, target: String },
    #[error("target pod '{name}' is ambiguous: {count} running pods match {target}")]
    AmbiguousPod {
        name: String,
        target: String,
        count: usize,
    },
    #[error("no running pods found for {target}")]
    NoRunningPods { target: String },
    #[error("invalid mutation: {0}")]
    InvalidMutation(String),
    #[error(transparent)]
    ImmutableField(#[from] ImmutableFieldError),
    #[error("{kind} {name} has no uid yet")]
    MissingUid { kind: String, name: String },
}

impl BuildError {
    pub(crate) fn unsupported_kind(reference: &CrossVersionObjectReference) -> Self {
        BuildError::UnsupportedKind {
            kind: reference.kind.clone(),
            api_version: reference.api_version.clone(),
        }
    }

    pub(crate) fn invalid_target(
        kind: target::TargetKind,
        name: &str,
        reason: impl Into<String>,
    ) -> Self {
        BuildError::InvalidTarget {
            kind: kind.as_str().to_string(),
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// Condition reason token for this error
    pub fn reason(&self) -> &'static str {
        match self {
            BuildError::Store(_) | BuildError::MissingUid { .. } => "CreateFailed",
            BuildError::UnsupportedKind { .. } => "UnsupportedKind",
            BuildError::TargetNotFound { .. }
            | BuildError::PodNotFound { .. }
            | BuildError::NoRunningPods { .. } => "NotFound",
            BuildError::InvalidTarget { .. } => "InvalidTarget",
            BuildError::AmbiguousPod { .. } => "Ambiguous",
            BuildError::InvalidMutation(_) => "InvalidMutation",
            BuildError::ImmutableField(_) => "ImmutableField",
        }
    }

    /// Errors that retrying cannot fix without operator intervention
    pub fn is_fatal(&self) -> bool {
        matches!(self, BuildError::ImmutableField(_))
    }
}

/// What a successful build reports back to the reconciler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    /// Message for the AccessResourcesCreated condition
    pub status_message: String,
    /// Command the user runs to get a shell
    pub access_message: String,
}

/// Builds the child objects for one request flavor
#[async_trait]
pub trait AccessBuilder: Send + Sync {
    type Request: AccessRequest + StoreObject;

    /// Create or update every child object for `request`
    ///
    /// Idempotent: a second call on an unchanged request writes nothing.
    async fn generate_access_resources<S: ResourceStore>(
        &self,
        store: &S,
        request: &mut Self::Request,
        template: &<Self::Request as AccessRequest>::Template,
    ) -> Result<BuildOutcome, BuildError>;
}

/// Outcome of re-reading a generated debug pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodVerification {
    Running,
    NotRunning { phase: String },
    Missing,
}

impl PodVerification {
    pub fn message(&self) -> String {
        match self {
            PodVerification::Running => "Pod is Running".to_string(),
            PodVerification::NotRunning { phase } => format!("Pod in {phase} Phase"),
            PodVerification::Missing => "Error Fetching Pod".to_string(),
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            PodVerification::Running => "PodRunning",
            PodVerification::NotRunning { .. } => "PodNotRunning",
            PodVerification::Missing => "PodNotFound",
        }
    }
}

/// Builders whose output must be checked after generation
#[async_trait]
pub trait VerifiesAccessResources: AccessBuilder {
    async fn verify_access_resources<S: ResourceStore>(
        &self,
        store: &S,
        request: &Self::Request,
    ) -> Result<PodVerification, BuildError>;
}

/// Stable child object name: `{request-name}-{first 8 chars of uid}`
pub fn child_name<K: Resource<DynamicType = ()>>(request: &K) -> Result<String, BuildError> {
    let name = request.name_any();
    let uid = request.uid().ok_or_else(|| BuildError::MissingUid {
        kind: K::kind(&()).to_string(),
        name: name.clone(),
    })?;
    let short_uid: String = uid.chars().take(SHORT_UID_LENGTH).collect();

    let max_prefix = MAX_OBJECT_NAME_LENGTH - short_uid.len() - 1;
    let prefix: String = name.chars().take(max_prefix).collect();
    Ok(format!("{}-{}", prefix.trim_end_matches(&['-', '.'][..]), short_uid))
}

/// Controller reference pointing at `request`
pub fn controller_reference<K: Resource<DynamicType = ()>>(
    request: &K,
) -> Result<OwnerReference, BuildError> {
    request
        .controller_owner_ref(&())
        .ok_or_else(|| BuildError::MissingUid {
            kind: K::kind(&()).to_string(),
            name: request.name_any(),
        })
}

/// Labels stamped on every child object
pub fn child_labels(request_name: &str) -> BTreeMap<String, String> {
    // Label values are capped at 63 characters and must end alphanumeric
    let value: String = request_name.chars().take(63).collect();
    BTreeMap::from([
        (MANAGED_BY_LABEL.to_string(), FIELD_MANAGER.to_string()),
        (
            REQUEST_LABEL.to_string(),
            value.trim_end_matches(|c: char| !c.is_ascii_alphanumeric()).to_string(),
        ),
    ])
}

/// The shell command handed to the user
pub fn access_message(namespace: &str, pod_name: &str) -> String {
    format!("kubectl exec -ti -n {namespace} {pod_name} -- /bin/sh")
}

/// Rules granting exec into exactly one pod
pub fn access_rules(pod_name: &str) -> Vec<PolicyRule> {
    vec![
        PolicyRule {
            api_groups: Some(vec![String::new()]),
            resources: Some(vec!["pods".to_string()]),
            resource_names: Some(vec![pod_name.to_string()]),
            verbs: ["get", "list", "watch"].map(String::from).to_vec(),
            ..Default::default()
        },
        PolicyRule {
            api_groups: Some(vec![String::new()]),
            resources: Some(vec!["pods/exec".to_string()]),
            resource_names: Some(vec![pod_name.to_string()]),
            verbs: ["create", "update", "delete", "get", "list"]
                .map(String::from)
                .to_vec(),
            ..Default::default()
        },
    ]
}

/// Desired access role for a pod
pub fn access_role(
    name: &str,
    namespace: &str,
    request_name: &str,
    pod_name: &str,
    owner: &OwnerReference,
) -> Role {
    Role {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(child_labels(request_name)),
            owner_references: Some(vec![owner.clone()]),
            ..Default::default()
        },
        rules: Some(access_rules(pod_name)),
    }
}

/// Desired binding of `role_name` to each allowed group
///
/// The binding shares the role's name, but the role reference is always taken
/// from the role itself.
pub fn access_role_binding(
    role: &Role,
    request_name: &str,
    groups: &[String],
    owner: &OwnerReference,
) -> RoleBinding {
    let subjects = groups
        .iter()
        .filter(|g| !g.trim().is_empty())
        .map(|group| Subject {
            api_group: Some("rbac.authorization.k8s.io".to_string()),
            kind: "Group".to_string(),
            name: group.clone(),
            namespace: None,
        })
        .collect();

    RoleBinding {
        metadata: ObjectMeta {
            name: role.metadata.name.clone(),
            namespace: role.metadata.namespace.clone(),
            labels: Some(child_labels(request_name)),
            owner_references: Some(vec![owner.clone()]),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: role.name_any(),
        },
        subjects: Some(subjects),
    }
}

/// Create or update the role and role binding granting exec into `pod_name`
pub async fn ensure_role_and_binding<S, R>(
    store: &S,
    request: &R,
    template: &R::Template,
    pod_name: &str,
) -> Result<(Role, RoleBinding), BuildError>
where
    S: ResourceStore,
    R: AccessRequest + StoreObject,
{
    let name = child_name(request)?;
    let namespace = request.namespace().unwrap_or_default();
    let request_name = request.name_any();
    let owner = controller_reference(request)?;

    let desired_role = access_role(&name, &namespace, &request_name, pod_name, &owner);
    let (role, role_result) = create_or_update(store, desired_role.clone(), |role: &mut Role| {
        role.rules = desired_role.rules.clone();
        role.metadata.labels = desired_role.metadata.labels.clone();
        role.metadata.owner_references = desired_role.metadata.owner_references.clone();
    })
    .await?;
    info!(
        "🔐 Role {}/{} {} for pod {}",
        namespace,
        name,
        role_result.as_str(),
        pod_name
    );

    let groups = &template.access_config().allowed_groups;
    let desired_binding = access_role_binding(&role, &request_name, groups, &owner);
    let (binding, binding_result) =
        create_or_update(store, desired_binding.clone(), |binding: &mut RoleBinding| {
            binding.role_ref = desired_binding.role_ref.clone();
            binding.subjects = desired_binding.subjects.clone();
            binding.metadata.labels = desired_binding.metadata.labels.clone();
            binding.metadata.owner_references =
                desired_binding.metadata.owner_references.clone();
        })
        .await?;
    info!(
        "🔗 RoleBinding {}/{} {} for groups {:?}",
        namespace,
        name,
        binding_result.as_str(),
        groups
    );

    Ok((role, binding))
}
