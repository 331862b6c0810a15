//! Lease Controller
//!
//! Reconciles Azimuth scheduling resources:
//! - Lease: reserves cloud capacity for a time window through OpenStack
//!   Blazar, and deletes the lease's owners once the window closes
//! - Schedule: deletes the object it refers to after `notAfter`

mod backoff;
mod blazar;
mod config;
mod controller;
mod dispatcher;
mod error;
mod k8s;
mod metrics;
mod reconciler;
mod scheduler;
mod sizes;
mod status;
mod timers;
mod watcher;

#[cfg(test)]
mod test_utils;

use controller::Controller;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::OperatorConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
        error!("Failed to install rustls crypto provider: {:?}", e);
        anyhow::bail!("no TLS crypto provider available");
    }

    info!("Starting Lease Controller");

    let config = OperatorConfig::from_env()?;
    info!("Configuration:");
    info!("  Schedule check interval: {:?}", config.schedule_check_interval);
    info!("  Lease check interval: {:?}", config.lease_check_interval);
    info!("  Default grace period: {:?}", config.default_grace_period);
    info!("  Blazar: {:?}", config.blazar);
    info!(
        "  Namespace: {}",
        config.watch_namespace.as_deref().unwrap_or("all namespaces")
    );

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
