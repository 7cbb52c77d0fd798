//! # Metrics Module
//!
//! Prometheus metrics for monitoring the controller, organized by responsibility.
//!
//! ## Sub-modules
//!
//! - `registry` - Metrics registry setup, registration and exposition
//! - `controller_metrics` - Reconciliations, errors, durations and requeues
//! - `access_metrics` - Access grant lifecycle (expiries, clamped durations)

pub mod access_metrics;
pub mod controller_metrics;
pub mod registry;

pub use access_metrics::*;
pub use controller_metrics::*;
pub use registry::*;
