//! # OZCTL CLI
//!
//! Command-line interface for requesting access through the Oz controller.
//!
//! The CLI only talks to the Kubernetes API: it creates request objects and
//! polls their status until the controller marks them ready, then prints the
//! access command from `status.accessMessage`.
//!
//! ## Usage
//!
//! ```bash
//! # Exec into a pod of the workload behind the api-a-exec template for 30 minutes
//! ozctl create exec --template api-a-exec --duration 30m
//!
//! # Get a debug copy of the workload behind the api-b-debug template
//! ozctl create pod --template api-b-debug
//!
//! # List requests
//! ozctl list --namespace default
//!
//! # Show the conditions of one request
//! ozctl status --kind exec --name alice-x7k2p
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, ListParams, PostParams};
use kube::{Client, ResourceExt};
use oz_controller::crd::{
    AccessRequestStatus, ExecAccessRequest, ExecAccessRequestSpec, PodAccessRequest,
    PodAccessRequestSpec,
};
use std::time::{Duration, Instant};

/// Interval between status polls
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Oz CLI
#[derive(Parser, Debug)]
#[command(name = "ozctl")]
#[command(about = "Request just-in-time access to workloads through the Oz controller", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Kubernetes namespace (defaults to the current context namespace)
    #[arg(short, long, global = true)]
    namespace: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an access request and wait until it is ready
    Create {
        #[command(subcommand)]
        request: CreateCommand,
    },
    /// List access requests
    List,
    /// Show the status of an access request
    Status {
        /// Kind of the request
        #[arg(short, long, value_enum)]
        kind: RequestKind,

        /// Name of the request
        #[arg(long)]
        name: String,
    },
}

#[derive(Subcommand, Debug)]
enum CreateCommand {
    /// Exec into an existing pod of the template's workload
    Exec {
        #[command(flatten)]
        common: CreateArgs,

        /// Specific pod to exec into (defaults to a random running pod)
        #[arg(long)]
        target_pod: Option<String>,
    },
    /// Exec into a debug copy of the template's workload
    Pod {
        #[command(flatten)]
        common: CreateArgs,
    },
}

#[derive(clap::Args, Debug)]
struct CreateArgs {
    /// Template to request access through
    #[arg(short, long)]
    template: String,

    /// Requested duration, e.g. 30m or 1h30m (defaults to the template default)
    #[arg(short, long)]
    duration: Option<String>,

    /// Return right after creating the request
    #[arg(long)]
    no_wait: bool,

    /// How long to wait for the request to become ready (seconds)
    #[arg(long, default_value_t = 120)]
    timeout: u64,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum RequestKind {
    Exec,
    Pod,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ozctl=info".into()),
        )
        .init();

    let cli = Cli::parse();

    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client. Ensure kubeconfig is configured.")?;
    let namespace = cli
        .namespace
        .unwrap_or_else(|| client.default_namespace().to_string());

    match cli.command {
        Commands::Create { request } => create_command(client, &namespace, request).await,
        Commands::List => list_command(client, &namespace).await,
        Commands::Status { kind, name } => status_command(client, &namespace, kind, &name).await,
    }
}

/// `generateName` prefix derived from `$USER`
fn generate_name_prefix(user: Option<&str>) -> String {
    let sanitized: String = user
        .unwrap_or_default()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let trimmed = sanitized.trim_matches('-');
    if trimmed.is_empty() {
        "ozctl-".to_string()
    } else {
        format!("{trimmed}-")
    }
}

fn request_metadata(namespace: &str) -> ObjectMeta {
    let user = std::env::var("USER").ok();
    ObjectMeta {
        generate_name: Some(generate_name_prefix(user.as_deref())),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

async fn create_command(client: Client, namespace: &str, request: CreateCommand) -> Result<()> {
    let (kind, name, common) = match request {
        CreateCommand::Exec { common, target_pod } => {
            let api: Api<ExecAccessRequest> = Api::namespaced(client.clone(), namespace);
            let request = ExecAccessRequest {
                metadata: request_metadata(namespace),
                spec: ExecAccessRequestSpec {
                    template_name: common.template.clone(),
                    duration: common.duration.clone(),
                    target_pod,
                },
                status: None,
            };
            let created = api
                .create(&PostParams::default(), &request)
                .await
                .context("Failed to create ExecAccessRequest")?;
            (RequestKind::Exec, created.name_any(), common)
        }
        CreateCommand::Pod { common } => {
            let api: Api<PodAccessRequest> = Api::namespaced(client.clone(), namespace);
            let request = PodAccessRequest {
                metadata: request_metadata(namespace),
                spec: PodAccessRequestSpec {
                    template_name: common.template.clone(),
                    duration: common.duration.clone(),
                },
                status: None,
            };
            let created = api
                .create(&PostParams::default(), &request)
                .await
                .context("Failed to create PodAccessRequest")?;
            (RequestKind::Pod, created.name_any(), common)
        }
    };

    println!("✅ Created {:?} access request {}/{}", kind, namespace, name);
    if common.no_wait {
        return Ok(());
    }

    println!("Waiting for access to be granted...");
    let status = wait_for_ready(
        &client,
        namespace,
        kind,
        &name,
        Duration::from_secs(common.timeout),
    )
    .await?;

    println!("\nAccess granted. Connect with:\n");
    println!(
        "  {}",
        status.access_message.as_deref().unwrap_or("<no access message>")
    );
    Ok(())
}

async fn fetch_status(
    client: &Client,
    namespace: &str,
    kind: RequestKind,
    name: &str,
) -> Result<Option<AccessRequestStatus>> {
    let status = match kind {
        RequestKind::Exec => Api::<ExecAccessRequest>::namespaced(client.clone(), namespace)
            .get(name)
            .await
            .with_context(|| format!("Failed to get ExecAccessRequest '{namespace}/{name}'"))?
            .status,
        RequestKind::Pod => Api::<PodAccessRequest>::namespaced(client.clone(), namespace)
            .get(name)
            .await
            .with_context(|| format!("Failed to get PodAccessRequest '{namespace}/{name}'"))?
            .status,
    };
    Ok(status)
}

/// Poll until the request is ready, failing after `timeout`
async fn wait_for_ready(
    client: &Client,
    namespace: &str,
    kind: RequestKind,
    name: &str,
    timeout: Duration,
) -> Result<AccessRequestStatus> {
    let start = Instant::now();
    loop {
        if let Some(status) = fetch_status(client, namespace, kind, name).await? {
            if status.ready {
                return Ok(status);
            }
        }

        if start.elapsed() > timeout {
            bail!(
                "request {namespace}/{name} not ready after {}s; inspect it with `ozctl status --kind {} --name {name}`",
                timeout.as_secs(),
                kind_arg(kind)
            );
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn kind_arg(kind: RequestKind) -> &'static str {
    match kind {
        RequestKind::Exec => "exec",
        RequestKind::Pod => "pod",
    }
}

fn ready_column(status: Option<&AccessRequestStatus>) -> &'static str {
    match status {
        Some(s) if s.ready => "True",
        Some(_) => "False",
        None => "Unknown",
    }
}

/// List both request kinds in a namespace
async fn list_command(client: Client, namespace: &str) -> Result<()> {
    let exec_requests = Api::<ExecAccessRequest>::namespaced(client.clone(), namespace)
        .list(&ListParams::default())
        .await
        .context("Failed to list ExecAccessRequest resources")?;
    let pod_requests = Api::<PodAccessRequest>::namespaced(client, namespace)
        .list(&ListParams::default())
        .await
        .context("Failed to list PodAccessRequest resources")?;

    if exec_requests.items.is_empty() && pod_requests.items.is_empty() {
        println!("No access requests found in namespace '{namespace}'.");
        return Ok(());
    }

    println!(
        "\n{:<30} {:<6} {:<25} {:<8} {:<30}",
        "NAME", "KIND", "TEMPLATE", "READY", "POD"
    );
    println!("{}", "-".repeat(100));

    for request in &exec_requests.items {
        println!(
            "{:<30} {:<6} {:<25} {:<8} {:<30}",
            request.name_any(),
            "exec",
            request.spec.template_name,
            ready_column(request.status.as_ref()),
            request
                .status
                .as_ref()
                .and_then(|s| s.pod_name.as_deref())
                .unwrap_or("-")
        );
    }
    for request in &pod_requests.items {
        println!(
            "{:<30} {:<6} {:<25} {:<8} {:<30}",
            request.name_any(),
            "pod",
            request.spec.template_name,
            ready_column(request.status.as_ref()),
            request
                .status
                .as_ref()
                .and_then(|s| s.pod_name.as_deref())
                .unwrap_or("-")
        );
    }

    Ok(())
}

/// Show the conditions of one request
async fn status_command(
    client: Client,
    namespace: &str,
    kind: RequestKind,
    name: &str,
) -> Result<()> {
    println!("Status for {} access request '{}/{}':\n", kind_arg(kind), namespace, name);

    let Some(status) = fetch_status(&client, namespace, kind, name).await? else {
        println!("Status: No status available (request may not have been reconciled yet)");
        return Ok(());
    };

    println!("  Ready: {}", status.ready);
    if let Some(pod) = &status.pod_name {
        println!("  Pod: {pod}");
    }
    if let Some(message) = &status.access_message {
        println!("  Access: {message}");
    }

    if !status.conditions.is_empty() {
        println!("\nConditions:");
        for condition in &status.conditions {
            println!("  {}: {}", condition.r#type, condition.status.as_str());
            println!("    Reason: {}", condition.reason);
            println!("    Message: {}", condition.message);
            if let Some(time) = &condition.last_transition_time {
                println!("    Last Transition: {time}");
            }
        }
    }

    Ok(())
}
