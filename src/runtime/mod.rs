//! # Runtime Module
//!
//! Runtime components for the Oz controller: initialization, the watch loop,
//! error handling and leader election.

pub mod error_policy;
pub mod initialization;
pub mod leader_election;
pub mod watch_loop;

pub use error_policy::*;
pub use initialization::*;
pub use leader_election::{LeaderElectionError, LeaderElector, LeaderGuard};
pub use watch_loop::*;
