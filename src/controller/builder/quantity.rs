//! # Resource Caps
//!
//! Quantity parsing and the upper bounds a pod template places on the resources
//! its mutation config may request.

use crate::crd::PodAccessTemplateSpec;
use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use thiserror::Error;

static QUANTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<number>[+-]?(?:\d+(?:\.\d*)?|\.\d+))(?:(?P<exponent>[eE][+-]?\d+)|(?P<suffix>Ki|Mi|Gi|Ti|Pi|Ei|n|u|m|k|M|G|T|P|E))?$",
    )
    .expect("Failed to compile quantity regex - this should never happen")
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid quantity '{0}'")]
pub struct QuantityError(pub String);

/// Parse a Kubernetes quantity string into its value in base units
///
/// `500m` is 0.5, `1Gi` is 1073741824. The float representation is plenty for
/// comparing requests against caps.
pub fn parse_quantity(input: &str) -> Result<f64, QuantityError> {
    let trimmed = input.trim();
    let captures = QUANTITY
        .captures(trimmed)
        .ok_or_else(|| QuantityError(trimmed.to_string()))?;

    let number: f64 = captures["number"]
        .parse()
        .map_err(|_| QuantityError(trimmed.to_string()))?;

    let multiplier = if let Some(exponent) = captures.name("exponent") {
        let power: i32 = exponent.as_str()[1..]
            .parse()
            .map_err(|_| QuantityError(trimmed.to_string()))?;
        10f64.powi(power)
    } else {
        match captures.name("suffix").map(|m| m.as_str()) {
            None => 1.0,
            Some("n") => 1e-9,
            Some("u") => 1e-6,
            Some("m") => 1e-3,
            Some("k") => 1e3,
            Some("M") => 1e6,
            Some("G") => 1e9,
            Some("T") => 1e12,
            Some("P") => 1e15,
            Some("E") => 1e18,
            Some("Ki") => 1024.0,
            Some("Mi") => 1024f64.powi(2),
            Some("Gi") => 1024f64.powi(3),
            Some("Ti") => 1024f64.powi(4),
            Some("Pi") => 1024f64.powi(5),
            Some(_) => 1024f64.powi(6),
        }
    };

    Ok(number * multiplier)
}

/// A resource exceeding its cap, or a cap that cannot be read
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapViolation {
    #[error("{field}: {source}")]
    InvalidCap {
        field: &'static str,
        #[source]
        source: QuantityError,
    },
    #[error("resources.{section}.{resource}: {source}")]
    InvalidQuantity {
        section: &'static str,
        resource: String,
        #[source]
        source: QuantityError,
    },
    #[error("resources.{section}.{resource} ({requested}) exceeds {cap_field} ({cap})")]
    Exceeded {
        section: &'static str,
        resource: String,
        requested: String,
        cap_field: &'static str,
        cap: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct Cap {
    resource: &'static str,
    field: &'static str,
    raw: String,
    value: f64,
}

/// Parsed `maxCpu`, `maxMemory` and `maxStorage` of a pod template
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceCaps {
    caps: Vec<Cap>,
}

impl ResourceCaps {
    pub fn from_template(spec: &PodAccessTemplateSpec) -> Result<Self, CapViolation> {
        let declared = [
            ("cpu", "maxCpu", spec.max_cpu.as_deref()),
            ("memory", "maxMemory", spec.max_memory.as_deref()),
            ("ephemeral-storage", "maxStorage", spec.max_storage.as_deref()),
        ];

        let mut caps = Vec::new();
        for (resource, field, raw) in declared {
            let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
                continue;
            };
            let value = parse_quantity(raw)
                .map_err(|source| CapViolation::InvalidCap { field, source })?;
            caps.push(Cap {
                resource,
                field,
                raw: raw.trim().to_string(),
                value,
            });
        }
        Ok(Self { caps })
    }

    /// Check every request and limit against the matching cap
    pub fn check(&self, resources: &ResourceRequirements) -> Result<(), CapViolation> {
        let sections = [
            ("requests", resources.requests.as_ref()),
            ("limits", resources.limits.as_ref()),
        ];
        for (section, values) in sections {
            let Some(values) = values else { continue };
            self.check_section(section, values)?;
        }
        Ok(())
    }

    fn check_section(
        &self,
        section: &'static str,
        values: &BTreeMap<String, Quantity>,
    ) -> Result<(), CapViolation> {
        for cap in &self.caps {
            let Some(quantity) = values.get(cap.resource) else {
                continue;
            };
            let requested =
                parse_quantity(&quantity.0).map_err(|source| CapViolation::InvalidQuantity {
                    section,
                    resource: cap.resource.to_string(),
                    source,
                })?;
            if requested > cap.value {
                return Err(CapViolation::Exceeded {
                    section,
                    resource: cap.resource.to_string(),
                    requested: quantity.0.clone(),
                    cap_field: cap.field,
                    cap: cap.raw.clone(),
                });
            }
        }
        Ok(())
    }
}
