//! Kubernetes resource watchers.
//!
//! This module handles watching Kubernetes resources for changes and
//! triggering reconciliation using kube_runtime::Controller.
//!
//! All watchers use a generic `watch_resource()` helper. Reconcile execution
//! goes through the shared [`WorkerPool`], which bounds concurrency and
//! serializes event-driven and resync-driven work per resource.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::Api;
use kube_runtime::{
    Controller, watcher,
    controller::{Action, Config as ControllerConfig},
};
use tracing::{debug, error, info};

use crds::{Group, KeycloakClient, Project, User, VDIInstance};

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::scheduler::{ResourceKey, TaskOutcome, WorkerPool};

/// Shared context handed to every controller loop.
pub struct WatchCtx {
    pub reconciler: Arc<Reconciler>,
    pub pool: Arc<WorkerPool>,
}

/// Generic watcher helper that uses kube_runtime::Controller.
///
/// The Controller handles reconnection, event batching, and requeues; the
/// worker pool on top of it enforces the global concurrency bound and
/// per-resource ordering. Errors requeue with the per-resource backoff
/// schedule tracked by the reconciler.
async fn watch_resource<K, F>(
    api: Api<K>,
    ctx: Arc<WatchCtx>,
    reconcile_fn: F,
    resource_name: &'static str,
) -> Result<(), ControllerError>
where
    K: kube::Resource + Clone + Send + Sync + 'static + std::fmt::Debug + serde::de::DeserializeOwned,
    K::DynamicType: Default + std::cmp::Eq + std::hash::Hash + Clone + std::fmt::Debug + Unpin,
    F: Fn(Arc<Reconciler>, Arc<K>) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), ControllerError>> + Send>>
        + Send
        + Sync
        + Clone
        + 'static,
{
    info!("Starting {} watcher", resource_name);

    let error_policy = move |obj: Arc<K>, err: &ControllerError, ctx: Arc<WatchCtx>| {
        let key = resource_key(resource_name, obj.as_ref());
        let delay = ctx.reconciler.retry_delay(&key.to_string());
        error!(resource = %key, error = %err, delay_secs = delay.as_secs(), "reconciliation error, requeueing");
        Action::requeue(delay)
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<WatchCtx>| {
        let reconcile_fn = reconcile_fn.clone();
        async move {
            let key = resource_key(resource_name, obj.as_ref());
            let generation = obj.meta().generation.unwrap_or(0);
            debug!(resource = %key, generation, "reconciling");

            let reconciler = Arc::clone(&ctx.reconciler);
            let outcome = ctx
                .pool
                .run(key.clone(), generation, reconcile_fn(reconciler, Arc::clone(&obj)))
                .await?;
            match outcome {
                TaskOutcome::Completed => {
                    // A completed teardown is the last run this key will see.
                    if obj.meta().deletion_timestamp.is_some() {
                        ctx.pool.forget(&key);
                        ctx.reconciler.forget(&key.to_string());
                    }
                    Ok(Action::await_change())
                }
                TaskOutcome::Superseded => {
                    debug!(resource = %key, "skipped superseded reconciliation");
                    Ok(Action::await_change())
                }
                TaskOutcome::Draining => Ok(Action::await_change()),
            }
        }
    };

    // Debounce batches bursts of watch events; per-watcher concurrency stays
    // below the pool's global bound so one kind cannot starve the others.
    let controller_config = ControllerConfig::default()
        .debounce(Duration::from_secs(2))
        .concurrency(3);

    Controller::new(api, watcher::Config::default())
        .with_config(controller_config)
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            if let Err(e) = res {
                error!("Controller error for {}: {}", resource_name, e);
            }
        })
        .await;

    Ok(())
}

fn resource_key<K>(kind: &'static str, obj: &K) -> ResourceKey
where
    K: kube::Resource,
    K::DynamicType: Default,
{
    let meta = obj.meta();
    ResourceKey::new(
        kind,
        meta.namespace.clone().unwrap_or_else(|| "default".to_string()),
        meta.name.clone().unwrap_or_default(),
    )
}

/// Watches karectl resources for changes.
pub struct Watcher {
    ctx: Arc<WatchCtx>,
    user_api: Api<User>,
    group_api: Api<Group>,
    client_api: Api<KeycloakClient>,
    project_api: Api<Project>,
    vdi_api: Api<VDIInstance>,
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(
        reconciler: Arc<Reconciler>,
        pool: Arc<WorkerPool>,
        user_api: Api<User>,
        group_api: Api<Group>,
        client_api: Api<KeycloakClient>,
        project_api: Api<Project>,
        vdi_api: Api<VDIInstance>,
    ) -> Self {
        Self {
            ctx: Arc::new(WatchCtx { reconciler, pool }),
            user_api,
            group_api,
            client_api,
            project_api,
            vdi_api,
        }
    }

    /// Starts watching User resources.
    pub async fn watch_users(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.user_api.clone(),
            Arc::clone(&self.ctx),
            |reconciler, resource| {
                Box::pin(async move { reconciler.reconcile_user(&resource).await })
            },
            "User",
        )
        .await
    }

    /// Starts watching Group resources.
    pub async fn watch_groups(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.group_api.clone(),
            Arc::clone(&self.ctx),
            |reconciler, resource| {
                Box::pin(async move { reconciler.reconcile_group(&resource).await })
            },
            "Group",
        )
        .await
    }

    /// Starts watching KeycloakClient resources.
    pub async fn watch_keycloak_clients(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.client_api.clone(),
            Arc::clone(&self.ctx),
            |reconciler, resource| {
                Box::pin(async move { reconciler.reconcile_keycloak_client(&resource).await })
            },
            "KeycloakClient",
        )
        .await
    }

    /// Starts watching Project resources.
    pub async fn watch_projects(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.project_api.clone(),
            Arc::clone(&self.ctx),
            |reconciler, resource| {
                Box::pin(async move { reconciler.reconcile_project(&resource).await })
            },
            "Project",
        )
        .await
    }

    /// Starts watching VDIInstance resources.
    pub async fn watch_vdi_instances(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.vdi_api.clone(),
            Arc::clone(&self.ctx),
            |reconciler, resource| {
                Box::pin(async move { reconciler.reconcile_vdi_instance(&resource).await })
            },
            "VDIInstance",
        )
        .await
    }
}
