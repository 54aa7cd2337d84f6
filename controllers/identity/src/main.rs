//! karectl Identity Controller
//!
//! Unified controller for managing all karectl CRDs:
//! - User, Group, KeycloakClient: identity resources synced to Keycloak
//! - Project: research projects backed by a dedicated realm group
//! - VDIInstance: per-user desktop workspaces (Pod + Service)
//!
//! CRD schemas are generated from the model catalog at startup, so the
//! served schema always matches the types the controller reconciles.

mod backoff;
mod config;
mod controller;
mod error;
mod reconcile_helpers;
mod reconciler;
mod scheduler;
mod watcher;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::OperatorConfig;
use crate::controller::Controller;
use crate::error::ControllerError;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting karectl identity controller");

    let config = OperatorConfig::from_env()?;
    info!("Configuration:");
    info!("  Keycloak URL: {}", config.keycloak_url);
    info!("  Realm: {}", config.keycloak_realm);
    info!("  Namespace: {}", config.watch_namespace.as_deref().unwrap_or("default"));
    info!("  Worker limit: {}", config.worker_limit);
    info!("  Posting enabled: {}", config.posting_enabled);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
