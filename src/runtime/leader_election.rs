//! # Leader Election
//!
//! Leader election over a `coordination.k8s.io/v1` Lease so only one replica
//! runs the controllers.
//!
//! Writes carry the lease's `resourceVersion`, so two replicas racing for an
//! expired lease cannot both win: the loser gets 409 Conflict and keeps
//! waiting.

use crate::constants::FIELD_MANAGER;
use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::Lease;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const LEASE_DURATION: Duration = Duration::from_secs(30);
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum LeaderElectionError {
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
    #[error("failed to build lease: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("lease {0} has no resourceVersion")]
    MissingResourceVersion(String),
}

/// Leader elector using Kubernetes Leases
pub struct LeaderElector {
    client: Client,
    lease_name: String,
    namespace: String,
    identity: String,
    lease_duration: Duration,
    renew_interval: Duration,
    retry_interval: Duration,
    is_leader: Arc<AtomicBool>,
}

impl std::fmt::Debug for LeaderElector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderElector")
            .field("lease_name", &self.lease_name)
            .field("namespace", &self.namespace)
            .field("identity", &self.identity)
            .field("is_leader", &self.is_leader.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Holder, last renewal and duration of a lease
#[derive(Debug, Clone, PartialEq, Eq)]
struct LeaseRecord {
    holder: Option<String>,
    renew_time: Option<DateTime<Utc>>,
    duration_secs: Option<i64>,
    transitions: i64,
}

impl LeaseRecord {
    fn from_lease(lease: &Lease) -> Self {
        let spec = serde_json::to_value(lease)
            .ok()
            .and_then(|v| v.get("spec").cloned())
            .unwrap_or_default();

        Self {
            holder: spec
                .get("holderIdentity")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            renew_time: spec
                .get("renewTime")
                .and_then(|v| v.as_str())
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| t.with_timezone(&Utc)),
            duration_secs: spec.get("leaseDurationSeconds").and_then(|v| v.as_i64()),
            transitions: spec
                .get("leaseTransitions")
                .and_then(|v| v.as_i64())
                .unwrap_or(0),
        }
    }

    /// A lease without a renewal time or duration counts as expired
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match (self.renew_time, self.duration_secs) {
            (Some(renewed), Some(duration)) => now > renewed + chrono::Duration::seconds(duration),
            _ => true,
        }
    }
}

impl LeaderElector {
    /// Create a new leader elector with default timing (30s lease, 10s renew, 5s retry)
    pub fn new(client: Client, lease_name: &str, namespace: &str, identity: &str) -> Self {
        Self {
            client,
            lease_name: lease_name.to_string(),
            namespace: namespace.to_string(),
            identity: identity.to_string(),
            lease_duration: LEASE_DURATION,
            renew_interval: RENEW_INTERVAL,
            retry_interval: RETRY_INTERVAL,
            is_leader: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }

    /// Block until leadership is acquired, then return a guard that keeps renewing
    pub async fn acquire(self: Arc<Self>) -> LeaderGuard {
        info!(
            "🗳️  Waiting for leadership of lease {}/{} as {}",
            self.namespace, self.lease_name, self.identity
        );

        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    info!("👑 Leadership acquired by {}", self.identity);
                    self.is_leader.store(true, Ordering::SeqCst);
                    return self.create_guard();
                }
                Ok(false) => {
                    debug!(
                        "Lease {} held by another replica, retrying in {}s",
                        self.lease_name,
                        self.retry_interval.as_secs()
                    );
                }
                Err(e) => {
                    warn!(
                        "Failed to acquire lease {}, retrying in {}s: {}",
                        self.lease_name,
                        self.retry_interval.as_secs(),
                        e
                    );
                }
            }
            tokio::time::sleep(self.retry_interval).await;
        }
    }

    fn create_guard(self: &Arc<Self>) -> LeaderGuard {
        let (lost_tx, lost_rx) = oneshot::channel();
        let elector = Arc::clone(self);
        let renewal_task = tokio::spawn(async move {
            elector.renewal_loop(lost_tx).await;
        });

        LeaderGuard {
            elector: Arc::clone(self),
            renewal_task,
            lost_rx: Some(lost_rx),
        }
    }

    fn api(&self) -> Api<Lease> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn lease_duration_secs(&self) -> i64 {
        i64::try_from(self.lease_duration.as_secs()).unwrap_or(i64::MAX)
    }

    /// Build a lease held by us
    fn desired_lease(
        &self,
        resource_version: Option<&str>,
        now: DateTime<Utc>,
        transitions: i64,
    ) -> Result<Lease, LeaderElectionError> {
        // MicroTime renders with microsecond precision
        let timestamp = now.to_rfc3339_opts(chrono::SecondsFormat::Micros, true);
        let lease = serde_json::from_value(json!({
            "apiVersion": "coordination.k8s.io/v1",
            "kind": "Lease",
            "metadata": {
                "name": self.lease_name,
                "namespace": self.namespace,
                "resourceVersion": resource_version,
            },
            "spec": {
                "holderIdentity": self.identity,
                "leaseDurationSeconds": self.lease_duration_secs(),
                "acquireTime": timestamp,
                "renewTime": timestamp,
                "leaseTransitions": transitions,
            }
        }))?;
        Ok(lease)
    }

    /// Try to acquire or renew the lease; `Ok(false)` means someone else holds it
    async fn try_acquire_or_renew(&self) -> Result<bool, LeaderElectionError> {
        let api = self.api();
        let now = Utc::now();

        let Some(lease) = api.get_opt(&self.lease_name).await? else {
            return self.create_lease(&api, now).await;
        };

        let record = LeaseRecord::from_lease(&lease);
        if record.holder.as_deref() == Some(self.identity.as_str()) {
            return self.renew_lease(&api, &lease, now).await;
        }

        if record.is_expired(now) {
            self.take_over_lease(&api, &lease, now, record.transitions + 1)
                .await
        } else {
            Ok(false)
        }
    }

    async fn create_lease(
        &self,
        api: &Api<Lease>,
        now: DateTime<Utc>,
    ) -> Result<bool, LeaderElectionError> {
        let lease = self.desired_lease(None, now, 0)?;
        match api.create(&PostParams::default(), &lease).await {
            Ok(_) => {
                info!("Created lease {}/{}", self.namespace, self.lease_name);
                Ok(true)
            }
            Err(kube::Error::Api(e)) if e.code == 409 => {
                debug!("Lease creation conflict, will retry");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Renew a lease we hold, keeping its acquire time and transitions
    async fn renew_lease(
        &self,
        api: &Api<Lease>,
        existing: &Lease,
        now: DateTime<Utc>,
    ) -> Result<bool, LeaderElectionError> {
        if existing.metadata.resource_version.is_none() {
            return Err(LeaderElectionError::MissingResourceVersion(
                self.lease_name.clone(),
            ));
        }

        let mut value = serde_json::to_value(existing)?;
        value["spec"]["renewTime"] = json!(now.to_rfc3339_opts(chrono::SecondsFormat::Micros, true));
        let updated: Lease = serde_json::from_value(value)?;

        match api
            .replace(&self.lease_name, &PostParams::default(), &updated)
            .await
        {
            Ok(_) => {
                debug!("Lease {} renewed", self.lease_name);
                Ok(true)
            }
            Err(kube::Error::Api(e)) if e.code == 409 => {
                warn!("Lease renewal conflict - lost leadership");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn take_over_lease(
        &self,
        api: &Api<Lease>,
        existing: &Lease,
        now: DateTime<Utc>,
        transitions: i64,
    ) -> Result<bool, LeaderElectionError> {
        let resource_version = existing.metadata.resource_version.as_deref().ok_or_else(|| {
            LeaderElectionError::MissingResourceVersion(self.lease_name.clone())
        })?;
        let lease = self.desired_lease(Some(resource_version), now, transitions)?;

        match api
            .replace(&self.lease_name, &PostParams::default(), &lease)
            .await
        {
            Ok(_) => {
                info!(
                    "Took over expired lease {} (transitions: {})",
                    self.lease_name, transitions
                );
                Ok(true)
            }
            Err(kube::Error::Api(e)) if e.code == 409 => {
                debug!("Lease takeover conflict, will retry");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn renewal_loop(&self, lost_tx: oneshot::Sender<()>) {
        loop {
            tokio::time::sleep(self.renew_interval).await;

            match self.try_acquire_or_renew().await {
                Ok(true) => {}
                Ok(false) | Err(_) => {
                    warn!("⚠️  Leadership lost by {}", self.identity);
                    self.is_leader.store(false, Ordering::SeqCst);
                    // The receiver may already be gone during shutdown
                    let _ = lost_tx.send(());
                    return;
                }
            }
        }
    }

    /// Clear the holder so a standby can take over without waiting for expiry
    async fn release_lease(&self) -> Result<(), LeaderElectionError> {
        let api = self.api();
        let Some(lease) = api.get_opt(&self.lease_name).await? else {
            return Ok(());
        };
        if LeaseRecord::from_lease(&lease).holder.as_deref() != Some(self.identity.as_str()) {
            debug!("Not the holder of lease {}, nothing to release", self.lease_name);
            return Ok(());
        }

        let past = Utc::now() - chrono::Duration::seconds(60);
        let patch = json!({
            "spec": {
                "holderIdentity": null,
                "renewTime": past.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
            }
        });
        api.patch(
            &self.lease_name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;

        info!("Lease {} released for fast failover", self.lease_name);
        Ok(())
    }
}

/// Held while this replica leads; renewal runs in the background
pub struct LeaderGuard {
    elector: Arc<LeaderElector>,
    renewal_task: JoinHandle<()>,
    lost_rx: Option<oneshot::Receiver<()>>,
}

impl std::fmt::Debug for LeaderGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderGuard")
            .field("elector", &self.elector)
            .finish_non_exhaustive()
    }
}

impl LeaderGuard {
    /// Wait until leadership is lost
    pub async fn lost(&mut self) {
        if let Some(rx) = self.lost_rx.take() {
            let _ = rx.await;
        }
    }

    /// Release leadership during graceful shutdown
    pub async fn release_leadership(&self) -> Result<(), LeaderElectionError> {
        self.elector.release_lease().await
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        self.elector.is_leader.store(false, Ordering::SeqCst);
        self.renewal_task.abort();
    }
}
