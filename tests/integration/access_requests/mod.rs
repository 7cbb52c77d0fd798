//! Access request tests
//!
//! - `exec_requests` - pod selection, grants and durations
//! - `pod_requests` - debug pod creation and readiness
//! - `lifecycle` - expiry, cascading deletes, conflicts and backoff

pub mod lifecycle;
pub mod pod_requests;
