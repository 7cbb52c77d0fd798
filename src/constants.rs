//! # Constants
//!
//! Shared names, defaults and requeue delays for the Oz controller.

use std::time::Duration;

/// API group for all Oz custom resources
pub const API_GROUP: &str = "crds.wizardofoz.co";

/// API version for all Oz custom resources
pub const API_VERSION: &str = "v1alpha1";

/// Field manager used for every write the controller makes
pub const FIELD_MANAGER: &str = "oz-controller";

/// Default interval between periodic request reconciliations (minutes)
pub const DEFAULT_RECONCILE_INTERVAL_MINUTES: u64 = 5;

/// Template reconciles are requeued after this delay so target drift is caught
pub const TEMPLATE_REQUEUE_DELAY: Duration = Duration::from_secs(60);

/// Requeue delay after a failed attempt at building access resources
pub const BUILD_ERROR_REQUEUE_DELAY: Duration = Duration::from_secs(30);

/// Requeue delay while waiting for a debug pod to reach Running
pub const POD_NOT_READY_REQUEUE_DELAY: Duration = Duration::from_secs(5);

/// Default metrics bind address
pub const DEFAULT_METRICS_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default health probe bind address
pub const DEFAULT_HEALTH_PROBE_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Namespace used for the leader lease when POD_NAMESPACE is unset
pub const DEFAULT_CONTROLLER_NAMESPACE: &str = "oz-system";

/// Lease name used for leader election
pub const LEADER_LEASE_NAME: &str = "oz-controller-leader";

/// Annotation carrying the default container name on a pod template
pub const DEFAULT_CONTAINER_ANNOTATION: &str = "kubectl.kubernetes.io/default-container";

/// Number of uid characters appended to generated child object names
pub const SHORT_UID_LENGTH: usize = 8;

/// Maximum length of a Kubernetes object name
pub const MAX_OBJECT_NAME_LENGTH: usize = 253;

/// Default error-policy backoff window when the backoff state cannot be read
pub const DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS: u64 = 60;

/// Delay before the watch loop restarts a failed controller stream
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Server startup timeout
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;
