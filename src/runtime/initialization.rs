//! # Initialization
//!
//! Controller initialization logic including rustls setup, tracing, metrics,
//! server startup, Kubernetes client setup and leader election.

use crate::config::ControllerConfig;
use crate::constants::LEADER_LEASE_NAME;
use crate::controller::reconciler::Context as ReconcilerContext;
use crate::controller::server::{start_server, ServerState};
use crate::controller::store::KubeStore;
use crate::crd::{ExecAccessRequest, ExecAccessTemplate, PodAccessRequest, PodAccessTemplate};
use crate::observability;
use crate::runtime::leader_election::{LeaderElector, LeaderGuard};
use anyhow::{Context, Result};
use kube::api::{Api, ListParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Initialization result containing all necessary components for the controller
pub struct InitializationResult {
    /// Kubernetes client
    pub client: Client,
    /// Reconciler context shared by every controller
    pub ctx: Arc<ReconcilerContext<KubeStore>>,
    /// Server state for health checks
    pub server_state: ServerState,
    /// Held while this replica leads, when leader election is enabled
    pub leader: Option<LeaderGuard>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("ctx", &self.ctx)
            .field("server_state", &self.server_state)
            .field("leader", &self.leader)
            .finish_non_exhaustive()
    }
}

/// Initialize the controller runtime
///
/// This function handles:
/// - rustls crypto provider setup
/// - Tracing subscriber setup
/// - Metrics registration
/// - HTTP server startup
/// - Kubernetes client creation
/// - Startup summary of existing resources
/// - Leader election (when enabled)
pub async fn initialize(config: &ControllerConfig) -> Result<InitializationResult> {
    // CRITICAL: install the rustls crypto provider before anything opens a TLS connection
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "oz_controller=info".into()),
        )
        .init();

    info!("Starting Oz controller v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Reconcile interval: {}s, leader election: {}",
        config.reconcile_interval.as_secs(),
        config.leader_elect
    );

    observability::metrics::register_metrics()?;

    let server_state = ServerState::new();
    let server_handle = {
        let state = server_state.clone();
        let metrics_addr = config.metrics_bind_address;
        let probe_addr = config.health_probe_bind_address;
        tokio::spawn(async move {
            if let Err(e) = start_server(metrics_addr, probe_addr, state).await {
                error!("HTTP server error: {:#}", e);
            }
        })
    };
    wait_for_server_ready(config, &server_state, &server_handle).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    summarize_existing::<ExecAccessTemplate>(&client).await;
    summarize_existing::<PodAccessTemplate>(&client).await;
    summarize_existing::<ExecAccessRequest>(&client).await;
    summarize_existing::<PodAccessRequest>(&client).await;

    let leader = if config.leader_elect {
        let elector = Arc::new(LeaderElector::new(
            client.clone(),
            LEADER_LEASE_NAME,
            &config.pod_namespace,
            &config.pod_name,
        ));
        Some(elector.acquire().await)
    } else {
        None
    };

    let ctx = Arc::new(ReconcilerContext::new(
        KubeStore::new(client.clone()),
        config.reconcile_interval,
    ));

    info!("Controller initialized, starting watch loop...");

    Ok(InitializationResult {
        client,
        ctx,
        server_state,
        leader,
    })
}

/// Wait for the HTTP server to bind both listeners
async fn wait_for_server_ready(
    config: &ControllerConfig,
    server_state: &ServerState,
    server_handle: &tokio::task::JoinHandle<()>,
) -> Result<()> {
    let start_time = std::time::Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }

        if server_state.is_listening.load(Ordering::Relaxed) {
            info!("HTTP server is ready and accepting connections");
            break;
        }

        if start_time.elapsed() > config.server_startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                config.server_startup_timeout.as_secs()
            ));
        }

        tokio::time::sleep(config.server_poll_interval).await;
    }

    Ok(())
}

/// Group resource names by namespace, both sorted
fn group_by_namespace(items: impl IntoIterator<Item = (String, String)>) -> BTreeMap<String, Vec<String>> {
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (namespace, name) in items {
        grouped.entry(namespace).or_default().push(name);
    }
    for names in grouped.values_mut() {
        names.sort();
    }
    grouped
}

/// Render at most three names, then a total
fn preview_names(names: &[String]) -> String {
    if names.len() <= 3 {
        names.join(", ")
    } else {
        format!("{}, ... ({} total)", names[..3].join(", "), names.len())
    }
}

/// Log a per-namespace summary of the existing objects of kind `K`
///
/// Reconciling them is left to the controllers' initial list.
async fn summarize_existing<K>(client: &Client)
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug,
{
    let kind = K::kind(&()).to_string();
    let span = tracing::span!(
        tracing::Level::INFO,
        "controller.startup.summary",
        resource.kind = %kind
    );
    let _guard = span.enter();

    let api: Api<K> = Api::all(client.clone());
    let list = match api.list(&ListParams::default()).await {
        Ok(list) => list,
        Err(e) => {
            error!("{} CRD is not queryable; {:?}. Is the CRD installed?", kind, e);
            error!("Installation: crdgen | kubectl apply -f -");
            warn!("Continuing despite CRD queryability check failure - controller will retry");
            return;
        }
    };

    if list.items.is_empty() {
        info!("No existing {} resources found", kind);
        return;
    }

    let grouped = group_by_namespace(
        list.items
            .iter()
            .map(|item| (item.namespace().unwrap_or_default(), item.name_any())),
    );

    info!("Oz Controller - Startup Resource Summary");
    info!("Resource Kind: {}", kind);
    info!("Total Resources: {}", list.items.len());
    info!("Namespaces: {}", grouped.len());
    for (namespace, names) in &grouped {
        info!("Namespace: {}", namespace);
        info!("  Resources ({}): {}", names.len(), preview_names(names));
    }
}
