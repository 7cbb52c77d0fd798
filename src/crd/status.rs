//! # Status Types
//!
//! Condition records and status blocks shared by templates and requests.
//!
//! Conditions form a set keyed by `type`. Writing a condition whose type already
//! exists replaces the previous entry; `lastTransitionTime` only moves when the
//! `status` value actually changes. The top-level `ready` flag is derived from the
//! conditions and materialized so clients never have to parse the list.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status value of a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        }
    }
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every condition type the controller writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionType {
    /// Template: the target workload controller resolves and is a supported kind
    TargetRefExists,
    /// Template and request: duration strings parse and respect their bounds
    DurationsValid,
    /// Pod template: the mutation config can be applied to the target pod template
    MutationConfigValid,
    /// Request: the named template exists
    TargetTemplateExists,
    /// Request: the request has not outlived its effective duration
    AccessStillValid,
    /// Request: the builder materialized every backing object
    AccessResourcesCreated,
    /// Pod request: the debug pod is Running
    PodReady,
}

impl ConditionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionType::TargetRefExists => "TargetRefExists",
            ConditionType::DurationsValid => "DurationsValid",
            ConditionType::MutationConfigValid => "MutationConfigValid",
            ConditionType::TargetTemplateExists => "TargetTemplateExists",
            ConditionType::AccessStillValid => "AccessStillValid",
            ConditionType::AccessResourcesCreated => "AccessResourcesCreated",
            ConditionType::PodReady => "PodReady",
        }
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition represents one observed dimension of a resource's health
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: String,
    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,
    /// Short machine-readable reason token
    pub reason: String,
    /// Human-readable message
    #[serde(default)]
    pub message: String,
    /// Generation of the spec this condition was computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// Last time `status` changed (RFC3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

impl Condition {
    /// Create a new condition stamped with the current time
    pub fn new(
        type_: ConditionType,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
        observed_generation: Option<i64>,
    ) -> Self {
        Self {
            r#type: type_.as_str().to_string(),
            status,
            reason: reason.into(),
            message: message.into(),
            observed_generation,
            last_transition_time: Some(chrono::Utc::now().to_rfc3339()),
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Merge a condition into the list by type
///
/// Returns true when the stored list changed. The transition time of an existing
/// entry is preserved unless its status flips.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) -> bool {
    match conditions.iter_mut().find(|c| c.r#type == condition.r#type) {
        Some(existing) => {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time.clone();
            }
            if *existing == condition {
                return false;
            }
            *existing = condition;
            true
        }
        None => {
            conditions.push(condition);
            true
        }
    }
}

/// `ready` is true only when there is at least one condition and all are True
pub fn conditions_ready(conditions: &[Condition]) -> bool {
    !conditions.is_empty() && conditions.iter().all(Condition::is_true)
}

/// Status of an ExecAccessTemplate or PodAccessTemplate
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TemplateStatus {
    /// Conditions represent the latest available observations
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// True when every condition is True
    #[serde(default)]
    pub ready: bool,
}

/// Status of an ExecAccessRequest or PodAccessRequest
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccessRequestStatus {
    /// Conditions represent the latest available observations
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// True when every condition is True
    #[serde(default)]
    pub ready: bool,
    /// Pod the access was granted on. Write-once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_name: Option<String>,
    /// Command the requester runs to use the grant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_message: Option<String>,
}
