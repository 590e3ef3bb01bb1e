//! # APIcast Controller
//!
//! Kubernetes controller for the `APIcast` custom resource
//! (`apps.3scale.net/v1alpha1`).
//!
//! For every `APIcast` it keeps a gateway Deployment, Service, optional
//! Ingress, optional HorizontalPodAutoscaler and optional
//! PodDisruptionBudget in line with the CR spec. Pods are rolled when the
//! content of a watched secret changes, and Deployments created with the
//! legacy versioned selector are migrated blue-green.
//!
//! ## Usage
//!
//! ```bash
//! # Watch every namespace
//! apicast-controller
//!
//! # Watch one namespace with JSON logs
//! apicast-controller --watch-namespace gateways --log-format json
//! ```
//!
//! Every flag can also be set through the environment variable named in
//! `--help`.

use anyhow::Result;
use apicast_controller::config::ControllerConfig;
use apicast_controller::runtime::{initialization, watch_loop};
use clap::Parser;

/// APIcast gateway controller
#[derive(Debug, Parser)]
#[command(name = "apicast-controller", version, about, long_about = None)]
struct Cli {
    /// Port of the metrics and probe server
    #[arg(long, env = "METRICS_PORT")]
    metrics_port: Option<u16>,

    /// Only watch this namespace (all namespaces when unset)
    #[arg(long, env = "WATCH_NAMESPACE")]
    watch_namespace: Option<String>,

    /// Log output format: `text` or `json`
    #[arg(long, env = "LOG_FORMAT")]
    log_format: Option<String>,
}

impl Cli {
    fn into_config(self) -> ControllerConfig {
        let mut config = ControllerConfig::from_env();
        if let Some(port) = self.metrics_port {
            config.metrics_port = port;
        }
        if let Some(namespace) = self.watch_namespace {
            config.watch_namespace = namespace;
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Cli::parse().into_config();
    let init = initialization::initialize(config).await?;

    watch_loop::run_watch_loop(
        init.client,
        init.apicasts,
        init.reconciler,
        init.server_state,
        init.config,
    )
    .await
}
