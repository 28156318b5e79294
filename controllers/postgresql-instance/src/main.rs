//! PostgresqlInstance Controller
//!
//! Provisions Cloud SQL for PostgreSQL instances from `PostgresqlInstance`
//! resources:
//! - creates the instance and keeps its settings in line with the spec
//! - generates the `postgres` user's password into a secret
//! - reports addresses and `Created`/`Ready` conditions in the status
//! - deletes the instance before letting the resource go

mod cluster;
mod config;
mod controller;
mod error;
mod metrics;
mod reconciler;
mod server;
#[cfg(test)]
mod test_utils;

use crate::config::Config;
use crate::controller::Controller;
use crate::error::ControllerError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        // Only fails when a provider is already installed
        eprintln!("rustls crypto provider already installed");
    }

    let config = Config::load()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting PostgresqlInstance Controller");
    info!("Configuration:");
    info!("  Project: {}", config.gcp.project_id);
    info!(
        "  Namespace: {}",
        config.cluster.namespace.as_deref().unwrap_or("all namespaces")
    );
    info!("  Threadiness: {}", config.controllers.threadiness);
    info!("  Resync period: {:?}", config.controllers.resync_period());

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            info!("Received shutdown signal");
            shutdown.cancel();
        });
    }

    let controller = Controller::new(config).await?;
    controller.run(shutdown).await
}

/// Resolves on SIGINT or SIGTERM.
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
