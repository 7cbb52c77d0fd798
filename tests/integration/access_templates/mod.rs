//! Template verifier tests
//!
//! - `exec_templates` - target resolution and duration bounds
//! - `pod_templates` - mutation config checks

pub mod exec_templates;
pub mod pod_templates;
