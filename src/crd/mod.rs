//! # Custom Resource Definitions
//!
//! CRD types for the Oz controller.
//!
//! Templates are long-lived policy documents owned by platform administrators;
//! requests are short-lived documents users create to obtain an access grant.
//! Both come in an exec flavor and a pod (debug copy) flavor.

pub mod common;
pub mod exec_access;
pub mod pod_access;
pub mod status;
pub mod traits;

pub use common::{AccessConfig, CrossVersionObjectReference};
pub use exec_access::{
    ExecAccessRequest, ExecAccessRequestSpec, ExecAccessTemplate, ExecAccessTemplateSpec,
};
pub use pod_access::{
    PodAccessRequest, PodAccessRequestSpec, PodAccessTemplate, PodAccessTemplateSpec,
    PodTemplateMutationConfig,
};
pub use status::{
    AccessRequestStatus, Condition, ConditionStatus, ConditionType, TemplateStatus,
};
pub use traits::{
    AccessRequest, AccessTemplate, HasConditions, HasDuration, HasPodName, ImmutableFieldError,
};
