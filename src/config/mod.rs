//! # Configuration
//!
//! Process configuration for the controller, parsed from flags with
//! environment fallbacks.
//!
//! | Flag | Env | Default |
//! |---|---|---|
//! | `--reconcile-interval` | `RECONCILE_INTERVAL` | `5` (minutes) |
//! | `--metrics-bind-address` | `METRICS_BIND_ADDRESS` | `0.0.0.0:8080` |
//! | `--health-probe-bind-address` | `HEALTH_PROBE_BIND_ADDRESS` | `0.0.0.0:8081` |
//! | `--leader-elect` | `LEADER_ELECT` | `false` |
//!
//! The leader-election identity comes from the downward API (`POD_NAME`,
//! `POD_NAMESPACE`).

use crate::constants::{
    DEFAULT_CONTROLLER_NAMESPACE, DEFAULT_HEALTH_PROBE_BIND_ADDRESS, DEFAULT_METRICS_BIND_ADDRESS,
    DEFAULT_RECONCILE_INTERVAL_MINUTES, DEFAULT_SERVER_POLL_INTERVAL_MS,
    DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
};
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

/// Oz controller: just-in-time exec and debug-pod access for Kubernetes
#[derive(Parser, Debug, Clone)]
#[command(name = "oz-controller")]
#[command(about = "Grants time-bounded exec and debug-pod access through templates and requests")]
#[command(version)]
pub struct ControllerArgs {
    /// Minutes between periodic reconciles of access requests
    #[arg(
        long,
        env = "RECONCILE_INTERVAL",
        default_value_t = DEFAULT_RECONCILE_INTERVAL_MINUTES,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub reconcile_interval: u64,

    /// Address the Prometheus metrics endpoint binds to
    #[arg(long, env = "METRICS_BIND_ADDRESS", default_value = DEFAULT_METRICS_BIND_ADDRESS)]
    pub metrics_bind_address: SocketAddr,

    /// Address the /healthz and /readyz endpoints bind to
    #[arg(
        long,
        env = "HEALTH_PROBE_BIND_ADDRESS",
        default_value = DEFAULT_HEALTH_PROBE_BIND_ADDRESS
    )]
    pub health_probe_bind_address: SocketAddr,

    /// Acquire a Lease before starting controllers, so only one replica reconciles
    #[arg(long, env = "LEADER_ELECT", default_value_t = false)]
    pub leader_elect: bool,
}

/// Resolved controller configuration
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub reconcile_interval: Duration,
    pub metrics_bind_address: SocketAddr,
    pub health_probe_bind_address: SocketAddr,
    pub leader_elect: bool,
    /// Leader-election identity
    pub pod_name: String,
    /// Namespace holding the leader lease
    pub pod_namespace: String,
    pub server_startup_timeout: Duration,
    pub server_poll_interval: Duration,
}

impl ControllerConfig {
    /// Combine parsed flags with the downward-API environment
    pub fn from_args(args: ControllerArgs) -> Self {
        let pod_name = std::env::var("POD_NAME")
            .or_else(|_| std::env::var("HOSTNAME"))
            .unwrap_or_else(|_| "oz-controller".to_string());

        Self {
            reconcile_interval: Duration::from_secs(args.reconcile_interval * 60),
            metrics_bind_address: args.metrics_bind_address,
            health_probe_bind_address: args.health_probe_bind_address,
            leader_elect: args.leader_elect,
            pod_name,
            pod_namespace: env_var_or_default(
                "POD_NAMESPACE",
                DEFAULT_CONTROLLER_NAMESPACE.to_string(),
            ),
            server_startup_timeout: Duration::from_secs(env_var_or_default(
                "SERVER_STARTUP_TIMEOUT_SECS",
                DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            )),
            server_poll_interval: Duration::from_millis(env_var_or_default(
                "SERVER_POLL_INTERVAL_MS",
                DEFAULT_SERVER_POLL_INTERVAL_MS,
            )),
        }
    }
}

/// Read environment variable or return default value
pub fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
