//! # Capability Traits
//!
//! Small traits describing what a resource can do, so reconcilers ask for the
//! intersection they need instead of a concrete type.

use crate::crd::common::{AccessConfig, CrossVersionObjectReference};
use crate::crd::exec_access::{ExecAccessRequest, ExecAccessTemplate};
use crate::crd::pod_access::{PodAccessRequest, PodAccessTemplate};
use crate::crd::status::{self, Condition};
use thiserror::Error;

/// Raised when a write-once status field would be overwritten
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("status.{field} is immutable: already set to '{current}', refusing to set '{attempted}'")]
pub struct ImmutableFieldError {
    pub field: &'static str,
    pub current: String,
    pub attempted: String,
}

/// Resource carrying a merge-keyed condition list and a derived `ready` flag
pub trait HasConditions {
    fn conditions(&self) -> &[Condition];
    fn conditions_mut(&mut self) -> &mut Vec<Condition>;
    fn is_ready(&self) -> bool;
    fn set_ready(&mut self, ready: bool);

    /// Merge a condition by type, returning true when the status changed
    fn set_condition(&mut self, condition: Condition) -> bool {
        status::set_condition(self.conditions_mut(), condition)
    }

    /// Recompute `ready` from the conditions, returning true when it flipped
    fn refresh_ready(&mut self) -> bool {
        let ready = status::conditions_ready(self.conditions());
        if ready == self.is_ready() {
            return false;
        }
        self.set_ready(ready);
        true
    }
}

/// Resource with an optional requested duration
pub trait HasDuration {
    fn requested_duration(&self) -> Option<&str>;
}

/// Resource with a write-once `status.podName`
pub trait HasPodName {
    fn pod_name(&self) -> Option<&str>;
    fn pod_name_slot(&mut self) -> &mut Option<String>;

    /// Reject `name` when a different pod name is already recorded
    fn check_pod_name(&self, name: &str) -> Result<(), ImmutableFieldError> {
        match self.pod_name() {
            Some(current) if current != name => Err(ImmutableFieldError {
                field: "podName",
                current: current.to_string(),
                attempted: name.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Record the pod name. Setting the same value again is a no-op; any other
    /// value once set is rejected.
    fn set_pod_name(&mut self, name: &str) -> Result<(), ImmutableFieldError> {
        self.check_pod_name(name)?;
        *self.pod_name_slot() = Some(name.to_string());
        Ok(())
    }
}

/// Policy document: target workload plus access bounds
pub trait AccessTemplate: HasConditions {
    fn target_ref(&self) -> &CrossVersionObjectReference;
    fn access_config(&self) -> &AccessConfig;
}

/// User request invoking a template
pub trait AccessRequest: HasConditions + HasDuration + HasPodName {
    /// Template kind this request resolves against
    type Template: AccessTemplate;

    fn template_name(&self) -> &str;
    fn access_message(&self) -> Option<&str>;
    fn set_access_message(&mut self, message: String);
}

macro_rules! impl_has_conditions {
    ($($kind:ty),+) => {
        $(
            impl HasConditions for $kind {
                fn conditions(&self) -> &[Condition] {
                    self.status.as_ref().map(|s| s.conditions.as_slice()).unwrap_or(&[])
                }

                fn conditions_mut(&mut self) -> &mut Vec<Condition> {
                    &mut self.status.get_or_insert_with(Default::default).conditions
                }

                fn is_ready(&self) -> bool {
                    self.status.as_ref().is_some_and(|s| s.ready)
                }

                fn set_ready(&mut self, ready: bool) {
                    self.status.get_or_insert_with(Default::default).ready = ready;
                }
            }
        )+
    };
}

impl_has_conditions!(
    ExecAccessTemplate,
    PodAccessTemplate,
    ExecAccessRequest,
    PodAccessRequest
);

impl AccessTemplate for ExecAccessTemplate {
    fn target_ref(&self) -> &CrossVersionObjectReference {
        &self.spec.target_ref
    }

    fn access_config(&self) -> &AccessConfig {
        &self.spec.access_config
    }
}

impl AccessTemplate for PodAccessTemplate {
    fn target_ref(&self) -> &CrossVersionObjectReference {
        &self.spec.target_ref
    }

    fn access_config(&self) -> &AccessConfig {
        &self.spec.access_config
    }
}

impl HasDuration for ExecAccessRequest {
    fn requested_duration(&self) -> Option<&str> {
        self.spec.duration.as_deref()
    }
}

impl HasDuration for PodAccessRequest {
    fn requested_duration(&self) -> Option<&str> {
        self.spec.duration.as_deref()
    }
}

impl HasPodName for ExecAccessRequest {
    fn pod_name(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.pod_name.as_deref())
    }

    fn pod_name_slot(&mut self) -> &mut Option<String> {
        &mut self.status.get_or_insert_with(Default::default).pod_name
    }
}

impl HasPodName for PodAccessRequest {
    fn pod_name(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.pod_name.as_deref())
    }

    fn pod_name_slot(&mut self) -> &mut Option<String> {
        &mut self.status.get_or_insert_with(Default::default).pod_name
    }
}

impl AccessRequest for ExecAccessRequest {
    type Template = ExecAccessTemplate;

    fn template_name(&self) -> &str {
        &self.spec.template_name
    }

    fn access_message(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.access_message.as_deref())
    }

    fn set_access_message(&mut self, message: String) {
        self.status.get_or_insert_with(Default::default).access_message = Some(message);
    }
}

impl AccessRequest for PodAccessRequest {
    type Template = PodAccessTemplate;

    fn template_name(&self) -> &str {
        &self.spec.template_name
    }

    fn access_message(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.access_message.as_deref())
    }

    fn set_access_message(&mut self, message: String) {
        self.status.get_or_insert_with(Default::default).access_message = Some(message);
    }
}
