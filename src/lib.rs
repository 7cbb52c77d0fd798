//! # Oz Controller
//!
//! A Kubernetes operator granting just-in-time, time-bounded access to
//! workloads.
//!
//! ## Overview
//!
//! Platform administrators publish **templates** describing which workload
//! may be accessed, by which groups and for how long. Users create
//! **requests** against a template. The controller then:
//!
//! 1. **Verifies templates** - the target workload exists, the durations are
//!    sane and (for pod templates) the mutation config applies
//! 2. **Resolves the effective duration** - requested, defaulted or clamped
//!    to the template maximum
//! 3. **Builds access** - a namespaced Role and RoleBinding granting exec
//!    into one pod; pod requests first get a detached, mutated copy of the
//!    workload's pod template
//! 4. **Expires access** - once the duration elapses the request is deleted
//!    and everything it owns is garbage collected
//!
//! ## Kinds
//!
//! - `ExecAccessTemplate` / `ExecAccessRequest` - exec into an existing pod
//! - `PodAccessTemplate` / `PodAccessRequest` - exec into a debug copy

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod runtime;
