//! # Controller
//!
//! Reconciliation machinery for the Oz custom resources.
//!
//! - `store` - the resource store adapter every read and write goes through
//! - `reconciler` - template verification and the request lifecycle
//! - `builder` - per-kind creation of the access resources
//! - `backoff` - Fibonacci backoff for the error policy
//! - `server` - metrics and probe endpoints

pub mod backoff;
pub mod builder;
pub mod reconciler;
pub mod server;
pub mod store;
