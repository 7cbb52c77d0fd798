//! # Durations
//!
//! Parsing and formatting of duration strings, and the state machine that turns a
//! request's duration plus its template's bounds into an effective duration and
//! an expiry verdict.
//!
//! Accepted format: one or more `<decimal><unit>` groups (`1h30m`, `1.5h`,
//! `300ms`) with units `ns`, `us`, `µs`, `ms`, `s`, `m`, `h`. A bare `0` is zero.

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

static DURATION_FORMAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?:\d+(?:\.\d*)?|\.\d+)(?:ns|us|µs|μs|ms|s|m|h))+$")
        .expect("Failed to compile duration format regex - this should never happen")
});

static DURATION_GROUP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<int>\d*)(?:\.(?P<frac>\d*))?(?P<unit>ns|us|µs|μs|ms|s|m|h)")
        .expect("Failed to compile duration group regex - this should never happen")
});

/// Errors produced while parsing a duration string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationError {
    #[error("duration string cannot be empty")]
    Empty,
    #[error("invalid duration '{0}': expected groups like '1h30m' using units ns, us, µs, ms, s, m, h")]
    InvalidFormat(String),
    #[error("duration '{0}' is out of range")]
    Overflow(String),
}

fn unit_nanos(unit: &str) -> u128 {
    match unit {
        "ns" => 1,
        "us" | "µs" | "μs" => 1_000,
        "ms" => 1_000_000,
        "s" => 1_000_000_000,
        "m" => 60 * 1_000_000_000,
        _ => 3_600 * 1_000_000_000,
    }
}

/// Parse a duration string such as `1h30m` or `250ms`
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(DurationError::Empty);
    }
    if trimmed == "0" {
        return Ok(Duration::ZERO);
    }
    if !DURATION_FORMAT.is_match(trimmed) {
        return Err(DurationError::InvalidFormat(trimmed.to_string()));
    }

    let overflow = || DurationError::Overflow(trimmed.to_string());
    let mut total: u128 = 0;

    for group in DURATION_GROUP.captures_iter(trimmed) {
        let unit = unit_nanos(&group["unit"]);
        let int_part = group.name("int").map(|m| m.as_str()).unwrap_or_default();
        let whole: u128 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| overflow())?
        };
        total = total
            .checked_add(whole.checked_mul(unit).ok_or_else(overflow)?)
            .ok_or_else(overflow)?;

        if let Some(frac) = group.name("frac").map(|m| m.as_str()) {
            // Digits beyond nanosecond precision of an hour carry no information
            let digits = &frac[..frac.len().min(18)];
            if !digits.is_empty() {
                let numerator: u128 = digits.parse().map_err(|_| overflow())?;
                let scale = 10u128.pow(u32::try_from(digits.len()).map_err(|_| overflow())?);
                total = total
                    .checked_add(numerator * unit / scale)
                    .ok_or_else(overflow)?;
            }
        }
    }

    let nanos = u64::try_from(total).map_err(|_| overflow())?;
    Ok(Duration::from_nanos(nanos))
}

/// Render a duration compactly: `2h`, `1h30m`, `45s`, `1.5s`, `250ms`
pub fn format_duration(duration: Duration) -> String {
    if duration.is_zero() {
        return "0s".to_string();
    }

    let total_secs = duration.as_secs();
    let subsec_nanos = duration.subsec_nanos();

    if total_secs == 0 {
        return if subsec_nanos % 1_000_000 == 0 {
            format!("{}ms", subsec_nanos / 1_000_000)
        } else if subsec_nanos % 1_000 == 0 {
            format!("{}us", subsec_nanos / 1_000)
        } else {
            format!("{subsec_nanos}ns")
        };
    }

    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    if seconds > 0 || subsec_nanos > 0 {
        if subsec_nanos > 0 {
            let fraction = format!("{subsec_nanos:09}");
            out.push_str(&format!("{seconds}.{}s", fraction.trim_end_matches('0')));
        } else {
            out.push_str(&format!("{seconds}s"));
        }
    }
    out
}

/// How the effective duration was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationDecision {
    /// No duration requested; template default applied
    Defaulted,
    /// Requested duration within the template maximum
    Honored,
    /// Requested duration exceeded the maximum and was cut down to it
    Clamped,
}

impl DurationDecision {
    /// Condition reason token
    pub fn reason(&self) -> &'static str {
        match self {
            DurationDecision::Defaulted => "Defaulted",
            DurationDecision::Honored => "Honored",
            DurationDecision::Clamped => "Clamped",
        }
    }
}

/// Result of resolving a request's duration against its template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveDuration {
    pub duration: Duration,
    pub decision: DurationDecision,
    pub requested: Duration,
    pub max: Duration,
}

impl EffectiveDuration {
    /// Message published on the DurationsValid condition
    pub fn message(&self) -> String {
        match self.decision {
            DurationDecision::Defaulted => format!(
                "Access request duration defaulted to template default duration ({})",
                format_duration(self.duration)
            ),
            DurationDecision::Honored => format!(
                "Access request duration honored ({})",
                format_duration(self.duration)
            ),
            DurationDecision::Clamped => format!(
                "Access request duration {} clamped to template max duration ({})",
                format_duration(self.requested),
                format_duration(self.duration)
            ),
        }
    }
}

/// Why a duration could not be resolved
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationResolutionError {
    /// The request's own duration is unparseable
    #[error("could not parse spec.duration: {0}")]
    BadRequest(DurationError),
    /// The template's default or max duration is unparseable
    #[error("could not parse template durations: {0}")]
    TemplateError(DurationError),
    /// The template's default is longer than its max
    #[error("template defaultDuration ({default}) exceeds maxDuration ({max})")]
    DefaultExceedsMax { default: String, max: String },
}

impl DurationResolutionError {
    pub fn reason(&self) -> &'static str {
        match self {
            DurationResolutionError::BadRequest(_) => "BadRequest",
            DurationResolutionError::TemplateError(_)
            | DurationResolutionError::DefaultExceedsMax { .. } => "TemplateError",
        }
    }
}

/// Pick the effective duration for a request
///
/// An omitted, empty, or zero request means "use the template default". A request
/// longer than the template maximum is clamped rather than rejected.
pub fn resolve_effective_duration(
    requested: Option<&str>,
    default_duration: &str,
    max_duration: &str,
) -> Result<EffectiveDuration, DurationResolutionError> {
    let requested = match requested.map(str::trim) {
        None | Some("") => Duration::ZERO,
        Some(value) => parse_duration(value).map_err(DurationResolutionError::BadRequest)?,
    };
    let default_duration =
        parse_duration(default_duration).map_err(DurationResolutionError::TemplateError)?;
    let max = parse_duration(max_duration).map_err(DurationResolutionError::TemplateError)?;
    if default_duration > max {
        return Err(DurationResolutionError::DefaultExceedsMax {
            default: format_duration(default_duration),
            max: format_duration(max),
        });
    }

    let (duration, decision) = if requested.is_zero() {
        (default_duration, DurationDecision::Defaulted)
    } else if requested <= max {
        (requested, DurationDecision::Honored)
    } else {
        (max, DurationDecision::Clamped)
    };

    Ok(EffectiveDuration {
        duration,
        decision,
        requested,
        max,
    })
}

/// Whether a grant is still inside its effective duration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessValidity {
    Valid { expires_at: DateTime<Utc> },
    Expired { expired_at: DateTime<Utc> },
}

/// Compare the object's age against its effective duration
///
/// Expiry is strict: an object exactly as old as its duration is still valid.
pub fn check_expiry(
    created_at: DateTime<Utc>,
    effective: Duration,
    now: DateTime<Utc>,
) -> AccessValidity {
    let lifetime = chrono::Duration::from_std(effective).unwrap_or(chrono::Duration::MAX);
    let expires_at = created_at
        .checked_add_signed(lifetime)
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    if now > expires_at {
        AccessValidity::Expired {
            expired_at: expires_at,
        }
    } else {
        AccessValidity::Valid { expires_at }
    }
}

/// Creation timestamp of an object
///
/// Read through its JSON form so the result does not depend on which time
/// library the Kubernetes types are built on.
pub fn creation_time(meta: &ObjectMeta) -> Option<DateTime<Utc>> {
    let value = serde_json::to_value(meta.creation_timestamp.as_ref()?).ok()?;
    let text = value.as_str()?;
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
