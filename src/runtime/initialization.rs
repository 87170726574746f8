//! # Initialization
//!
//! Controller initialization: rustls setup, tracing, metrics, server startup,
//! Kubernetes client and reconciler construction.

use crate::cluster::KubeCluster;
use crate::config::{ControllerConfig, ServerConfig};
use crate::controller::reconciler::Reconciler;
use crate::controller::server::{start_server, ServerState};
use crate::crd::AgentConfig;
use crate::observability;
use crate::provider::tsb::TsbConnector;
use anyhow::{Context, Result};
use kube::{api::Api, api::ListParams, Client};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn, Instrument};

/// Initialization result containing all necessary components for the controller
pub struct InitializationResult {
    /// Kubernetes client
    pub client: Client,
    /// Reconciler context
    pub reconciler: Arc<Reconciler>,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("server_ready", &self.server_state.is_ready.load(Ordering::Relaxed))
            .field("reconciler", &self.reconciler)
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
/// - Reconciler setup
///
/// # Errors
/// Fails when metrics cannot be registered, the server does not come up, or
/// no Kubernetes client configuration is available
pub async fn initialize() -> Result<InitializationResult> {
    // Must run before anything opens a TLS connection
    let provider_installed = rustls::crypto::ring::default_provider()
        .install_default()
        .is_ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "arca_controller=info".into()),
        )
        .init();

    info!("Starting arca-controller v{}", env!("CARGO_PKG_VERSION"));
    if !provider_installed {
        warn!("A rustls crypto provider was already installed, keeping it");
    }

    observability::metrics::register_metrics().context("Failed to register metrics")?;

    let server_config = ServerConfig::from_env();
    let controller_config = ControllerConfig::from_env();
    info!(
        active_config = %controller_config.active_config_name,
        workers = controller_config.max_concurrent_reconciliations,
        label_removal_policy = ?controller_config.label_removal_policy,
        "Loaded controller configuration"
    );

    let server_state = Arc::new(ServerState {
        is_ready: Arc::new(AtomicBool::new(false)),
    });

    let server_state_clone = Arc::clone(&server_state);
    let server_port = server_config.metrics_port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });

    wait_for_server_ready(
        &server_state,
        &server_handle,
        Duration::from_secs(server_config.startup_timeout_secs),
        Duration::from_millis(server_config.poll_interval_ms),
    )
    .await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    check_crd_queryable(&client).await;

    let reconciler = Arc::new(Reconciler::new(
        Arc::new(KubeCluster::new(client.clone())),
        Arc::new(TsbConnector),
        controller_config,
    ));

    info!("Controller initialized, starting watch loop...");

    Ok(InitializationResult {
        client,
        reconciler,
        server_state,
    })
}

/// Poll until the server has bound its port
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
    startup_timeout: Duration,
    poll_interval: Duration,
) -> Result<()> {
    let start_time = Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }

        if server_state.is_ready.load(Ordering::Relaxed) {
            info!("HTTP server is ready and accepting connections");
            break;
        }

        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }

        tokio::time::sleep(poll_interval).await;
    }

    Ok(())
}

/// Warn early when the `AgentConfig` CRD is not installed
///
/// Existing configurations are picked up by the watch's initial listing.
async fn check_crd_queryable(client: &Client) {
    let span = tracing::span!(
        tracing::Level::INFO,
        "controller.startup.check_crd",
        operation = "check_crd_queryable"
    );
    let configs: Api<AgentConfig> = Api::all(client.clone());
    match configs.list(&ListParams::default()).instrument(span).await {
        Ok(list) => info!(
            "CRD is queryable, found {} existing AgentConfig resources",
            list.items.len()
        ),
        Err(e) => warn!(
            "AgentConfig CRD is not queryable yet (is it installed?), the watch will keep retrying: {}",
            e
        ),
    }
}
