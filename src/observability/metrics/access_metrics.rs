//! # Access Metrics
//!
//! Metrics for the lifecycle of access grants: expiries and clamped durations.

use crate::observability::metrics::registry::REGISTRY;
use anyhow::Result;
use prometheus::IntCounterVec;
use std::sync::LazyLock;

static ACCESS_REQUESTS_EXPIRED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "oz_access_requests_expired_total",
            "Total number of access requests deleted after outliving their duration",
        ),
        &["kind"],
    )
    .expect("Failed to create ACCESS_REQUESTS_EXPIRED_TOTAL metric - this should never happen")
});

static ACCESS_DURATIONS_CLAMPED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "oz_access_durations_clamped_total",
            "Total number of request durations clamped to the template maximum",
        ),
        &["kind"],
    )
    .expect("Failed to create ACCESS_DURATIONS_CLAMPED_TOTAL metric - this should never happen")
});

/// Register access metrics with the registry
pub(crate) fn register_access_metrics() -> Result<()> {
    REGISTRY.register(Box::new(ACCESS_REQUESTS_EXPIRED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ACCESS_DURATIONS_CLAMPED_TOTAL.clone()))?;
    Ok(())
}

pub fn increment_access_requests_expired(kind: &str) {
    ACCESS_REQUESTS_EXPIRED_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_access_durations_clamped(kind: &str) {
    ACCESS_DURATIONS_CLAMPED_TOTAL.with_label_values(&[kind]).inc();
}
