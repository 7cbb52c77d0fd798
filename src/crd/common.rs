//! # Shared Spec Types
//!
//! Target references and access configuration shared by both template kinds.

use schemars::{JsonSchema, Schema, SchemaGenerator};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reference to a workload controller living in the template's namespace
///
/// All fields are plain strings so a missing field surfaces as an empty value
/// rather than a missing pointer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CrossVersionObjectReference {
    /// API version of the referent, e.g. `apps/v1`
    #[serde(default)]
    pub api_version: String,
    /// Kind of the referent: Deployment, DaemonSet or StatefulSet
    #[serde(default)]
    pub kind: String,
    /// Name of the referent
    #[serde(default)]
    pub name: String,
}

impl fmt::Display for CrossVersionObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({})", self.kind, self.name, self.api_version)
    }
}

/// Who may request access and for how long
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccessConfig {
    /// Identity groups bound to the generated role
    #[schemars(length(min = 1))]
    pub allowed_groups: Vec<String>,
    /// Duration applied when a request omits one (e.g. "1h")
    pub default_duration: String,
    /// Longest duration a request may be granted (e.g. "2h")
    pub max_duration: String,
}

/// Schema for embedded core Kubernetes objects
///
/// The API server validates these objects itself when they are used to build
/// pods, so the CRD keeps them opaque.
pub(crate) fn preserve_unknown_object(_gen: &mut SchemaGenerator) -> Schema {
    schemars::json_schema!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true
    })
}

/// Schema for a list of embedded core Kubernetes objects
pub(crate) fn preserve_unknown_object_list(_gen: &mut SchemaGenerator) -> Schema {
    schemars::json_schema!({
        "type": "array",
        "items": {
            "type": "object",
            "x-kubernetes-preserve-unknown-fields": true
        }
    })
}
