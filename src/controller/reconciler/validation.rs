//! # Validation
//!
//! Validates template access bounds and Kubernetes object names.

use crate::controller::reconciler::duration::{format_duration, parse_duration, DurationError};
use crate::crd::AccessConfig;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

// RFC 1123 subdomain: [a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*
static KUBERNETES_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .expect("Failed to compile Kubernetes name regex - this should never happen")
});

/// Validation failures for template and request fields
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} cannot be empty")]
    Empty { field: String },
    #[error("{field} '{value}' exceeds maximum length of 253 characters (got {len})")]
    TooLong {
        field: String,
        value: String,
        len: usize,
    },
    #[error("{field} '{value}' must be a valid Kubernetes name (lowercase alphanumeric, hyphens, dots; cannot start/end with hyphen or dot)")]
    InvalidName { field: String, value: String },
    #[error("{field}: {source}")]
    Duration {
        field: &'static str,
        #[source]
        source: DurationError,
    },
    #[error("defaultDuration ({default}) exceeds maxDuration ({max})")]
    DefaultExceedsMax { default: String, max: String },
}

/// Validate a Kubernetes resource name (RFC 1123 subdomain)
/// Length: 1-253 characters; cannot start or end with hyphen or dot
pub fn validate_kubernetes_name(name: &str, field_name: &str) -> Result<(), ValidationError> {
    let name_trimmed = name.trim();

    if name_trimmed.is_empty() {
        return Err(ValidationError::Empty {
            field: field_name.to_string(),
        });
    }

    if name_trimmed.len() > 253 {
        return Err(ValidationError::TooLong {
            field: field_name.to_string(),
            value: name_trimmed.to_string(),
            len: name_trimmed.len(),
        });
    }

    if !KUBERNETES_NAME.is_match(name_trimmed) {
        return Err(ValidationError::InvalidName {
            field: field_name.to_string(),
            value: name_trimmed.to_string(),
        });
    }

    Ok(())
}

/// Validated duration bounds of a template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationBounds {
    pub default_duration: Duration,
    pub max_duration: Duration,
}

impl DurationBounds {
    /// Message published on a template's DurationsValid condition
    pub fn message(&self) -> String {
        format!(
            "Default duration {} within max duration {}",
            format_duration(self.default_duration),
            format_duration(self.max_duration)
        )
    }
}

/// Parse a template's duration bounds and check `default <= max`
pub fn validate_access_durations(config: &AccessConfig) -> Result<DurationBounds, ValidationError> {
    let default_duration =
        parse_duration(&config.default_duration).map_err(|source| ValidationError::Duration {
            field: "accessConfig.defaultDuration",
            source,
        })?;
    let max_duration =
        parse_duration(&config.max_duration).map_err(|source| ValidationError::Duration {
            field: "accessConfig.maxDuration",
            source,
        })?;

    if default_duration > max_duration {
        return Err(ValidationError::DefaultExceedsMax {
            default: config.default_duration.trim().to_string(),
            max: config.max_duration.trim().to_string(),
        });
    }

    Ok(DurationBounds {
        default_duration,
        max_duration,
    })
}
