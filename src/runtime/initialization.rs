//! # Initialization
//!
//! Controller initialization logic including rustls setup, tracing,
//! metrics, server startup, and Kubernetes client setup.

use crate::config::ControllerConfig;
use crate::controller::reconciler::Reconciler;
use crate::crd::APIcast;
use crate::observability;
use crate::server::{start_server, ServerState};
use anyhow::{Context, Result};
use kube::{api::Api, api::ListParams, Client};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Everything the watch loop needs
pub struct InitializationResult {
    /// Kubernetes client
    pub client: Client,
    /// API for the APIcast CRD, scoped to the watch namespace when one is set
    pub apicasts: Api<APIcast>,
    /// Reconciler context
    pub reconciler: Arc<Reconciler>,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
    pub config: ControllerConfig,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field(
                "server_ready",
                &self
                    .server_state
                    .is_ready
                    .load(std::sync::atomic::Ordering::Relaxed),
            )
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Install the tracing subscriber. JSON output when `LOG_FORMAT=json`.
pub fn init_tracing(config: &ControllerConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "apicast_controller=info".into());
    let result = if config.json_logs() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };
    if let Err(e) = result {
        warn!("Tracing subscriber already initialized: {}", e);
    }
}

/// Initialize the controller runtime
///
/// - rustls crypto provider setup
/// - tracing subscriber setup
/// - metrics registration
/// - HTTP server startup
/// - Kubernetes client creation
/// - reconciler setup
pub async fn initialize(config: ControllerConfig) -> Result<InitializationResult> {
    // Must happen before any rustls use. kube's rustls-tls feature leaves
    // the provider choice to the binary.
    rustls::crypto::ring::default_provider()
        .install_default()
        .unwrap_or_else(|_| panic!("Failed to install rustls crypto provider"));

    init_tracing(&config);

    info!("Starting APIcast controller");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::default());
    let server_state_clone = Arc::clone(&server_state);
    let server_port = config.metrics_port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });
    wait_for_server_ready(
        &server_state,
        &server_handle,
        config.server_startup_timeout_duration(),
        config.server_poll_interval_duration(),
    )
    .await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let apicasts: Api<APIcast> = match config.namespace_scope() {
        Some(namespace) => {
            info!("Watching APIcast resources in namespace {}", namespace);
            Api::namespaced(client.clone(), namespace)
        }
        None => {
            info!("Watching APIcast resources in all namespaces");
            Api::all(client.clone())
        }
    };
    check_crd_installed(&apicasts).await;

    let reconciler = Arc::new(Reconciler::new(client.clone(), config.clone()));

    info!("Controller initialized, starting watch loop...");

    Ok(InitializationResult {
        client,
        apicasts,
        reconciler,
        server_state,
        config,
    })
}

/// Wait for the HTTP server to become ready
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

        if server_state
            .is_ready
            .load(std::sync::atomic::Ordering::Relaxed)
        {
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

/// Log whether the CRD is queryable. The watch loop retries on its own, so
/// a missing CRD is not fatal here.
async fn check_crd_installed(apicasts: &Api<APIcast>) {
    let span = tracing::span!(
        tracing::Level::INFO,
        "controller.startup.check_crd",
        operation = "list_apicasts"
    );
    let _guard = span.enter();

    match apicasts.list(&ListParams::default().limit(1)).await {
        Ok(list) => info!(
            "CRD is queryable, found {} APIcast resource(s) on the first page",
            list.items.len()
        ),
        Err(e) => warn!(
            "APIcast CRD is not queryable yet ({}), install it with `crdgen | kubectl apply -f -`",
            e
        ),
    }
}
