//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires configuration,
//! the model catalog, CRD installation, the Keycloak client, the worker
//! pool, and the per-kind watchers together.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::{Pod, Secret, Service};
use kube::{Api, Client};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crds::generator::{apply_crds, write_crd_manifests};
use crds::registry::{ModelRegistry, builtin_sources};
use crds::{Group, KeycloakClient, Project, User, VDIInstance};
use keycloak_client::{KeycloakAdminClient, KeycloakAdminTrait};

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use crate::reconciler::{Reconciler, ReconcilerSettings};
use crate::scheduler::{TaskOutcome, WorkerPool};
use crate::watcher::Watcher;

/// Main controller for karectl identity resources.
pub struct Controller {
    pool: Arc<WorkerPool>,
    user_watcher: JoinHandle<Result<(), ControllerError>>,
    group_watcher: JoinHandle<Result<(), ControllerError>>,
    client_watcher: JoinHandle<Result<(), ControllerError>>,
    project_watcher: JoinHandle<Result<(), ControllerError>>,
    vdi_watcher: JoinHandle<Result<(), ControllerError>>,
    resync_task: JoinHandle<()>,
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(config: OperatorConfig) -> Result<Self, ControllerError> {
        info!("Initializing identity controller");

        let registry = ModelRegistry::discover(&builtin_sources())
            .map_err(crds::generator::GeneratorError::Schema)?;

        if config.generate_crd_files {
            let files = write_crd_manifests(&registry, Path::new(&config.crd_output_dir))?;
            info!(count = files.len(), dir = %config.crd_output_dir, "wrote CRD manifests");
        }

        let kube_client = Client::try_default().await?;

        if config.manage_crds {
            let applied = apply_crds(kube_client.clone(), &registry).await?;
            info!(count = applied, "CRDs installed");
        }

        let keycloak = KeycloakAdminClient::new(
            config.keycloak_url.clone(),
            config.keycloak_admin.clone(),
            config.keycloak_admin_password.clone(),
            config.keycloak_realm.clone(),
            config.keycloak_tls_verify,
        )?;

        // Fail fast on bad credentials, an unreachable server, or a missing
        // realm. Realm creation is an external write, so with posting
        // disabled we only verify the realm already exists.
        info!("Validating Keycloak connectivity...");
        let startup = if config.posting_enabled {
            keycloak.ensure_realm().await.map(Some)
        } else {
            keycloak.ping().await.map(|()| None)
        };
        match startup {
            Ok(Some(true)) => info!(realm = %config.keycloak_realm, "realm created"),
            Ok(_) => {}
            Err(e) => {
                error!("Failed to reach Keycloak: {}", e);
                error!("Please ensure:");
                error!("  1. KEYCLOAK_ADMIN / KEYCLOAK_ADMIN_PASSWORD are correct");
                error!("  2. Keycloak is reachable at {}", config.keycloak_url);
                return Err(ControllerError::Keycloak(e));
            }
        }
        info!("Keycloak connectivity established");

        if !config.posting_enabled {
            warn!("POSTING_ENABLED=false: external writes are disabled, changes will be recorded as DryRun conditions");
        }

        let ns = config.watch_namespace.as_deref().unwrap_or("default");
        let user_api: Api<User> = Api::namespaced(kube_client.clone(), ns);
        let group_api: Api<Group> = Api::namespaced(kube_client.clone(), ns);
        let client_api: Api<KeycloakClient> = Api::namespaced(kube_client.clone(), ns);
        let project_api: Api<Project> = Api::namespaced(kube_client.clone(), ns);
        let vdi_api: Api<VDIInstance> = Api::namespaced(kube_client.clone(), ns);
        let secret_api: Api<Secret> = Api::namespaced(kube_client.clone(), ns);
        let pod_api: Api<Pod> = Api::namespaced(kube_client.clone(), ns);
        let service_api: Api<Service> = Api::namespaced(kube_client.clone(), ns);

        let reconciler = Arc::new(Reconciler::new(
            keycloak,
            user_api.clone(),
            group_api.clone(),
            client_api.clone(),
            project_api.clone(),
            vdi_api.clone(),
            secret_api,
            pod_api,
            service_api,
            registry,
            ReconcilerSettings {
                posting_enabled: config.posting_enabled,
                max_retry_attempts: config.max_retry_attempts,
            },
        ));

        let pool = Arc::new(WorkerPool::new(
            config.worker_limit,
            Duration::from_secs(config.operation_timeout_secs),
        ));

        let watcher = Arc::new(Watcher::new(
            Arc::clone(&reconciler),
            Arc::clone(&pool),
            user_api.clone(),
            group_api.clone(),
            client_api.clone(),
            project_api.clone(),
            vdi_api.clone(),
        ));

        let w = Arc::clone(&watcher);
        let user_watcher = tokio::spawn(async move { w.watch_users().await });
        let w = Arc::clone(&watcher);
        let group_watcher = tokio::spawn(async move { w.watch_groups().await });
        let w = Arc::clone(&watcher);
        let client_watcher = tokio::spawn(async move { w.watch_keycloak_clients().await });
        let w = Arc::clone(&watcher);
        let project_watcher = tokio::spawn(async move { w.watch_projects().await });
        let w = Arc::clone(&watcher);
        let vdi_watcher = tokio::spawn(async move { w.watch_vdi_instances().await });

        let resync_task = tokio::spawn(resync_loop(
            Arc::clone(&reconciler),
            Arc::clone(&pool),
            user_api,
            group_api,
            client_api,
            project_api,
            vdi_api,
            Duration::from_secs(config.resync_interval_secs),
        ));

        Ok(Self {
            pool,
            user_watcher,
            group_watcher,
            client_watcher,
            project_watcher,
            vdi_watcher,
            resync_task,
        })
    }

    /// Runs until a watcher fails or shutdown is requested.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Identity controller running");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested, draining worker pool");
                self.resync_task.abort();
                self.pool.drain().await;
                info!("Shutdown complete");
            }
            result = &mut self.user_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("User watcher panicked: {e}")))??;
            }
            result = &mut self.group_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("Group watcher panicked: {e}")))??;
            }
            result = &mut self.client_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("KeycloakClient watcher panicked: {e}")))??;
            }
            result = &mut self.project_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("Project watcher panicked: {e}")))??;
            }
            result = &mut self.vdi_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("VDIInstance watcher panicked: {e}")))??;
            }
        }

        Ok(())
    }
}

/// Periodic full re-list of every kind, catching missed watch events and
/// external drift. Work goes through the same pool as event-driven
/// reconciliations, so the two paths never overlap on one resource.
#[allow(clippy::too_many_arguments)]
async fn resync_loop(
    reconciler: Arc<Reconciler>,
    pool: Arc<WorkerPool>,
    user_api: Api<User>,
    group_api: Api<Group>,
    client_api: Api<KeycloakClient>,
    project_api: Api<Project>,
    vdi_api: Api<VDIInstance>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately; skip it, startup already reconciles.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        info!("Starting periodic resync");

        // Dependency order: groups before the users that join them, projects
        // before the workspaces that run under them.
        resync_kind(&reconciler, &pool, &group_api, "Group", |r, obj: Group| async move {
            r.reconcile_group(&obj).await
        })
        .await;
        resync_kind(&reconciler, &pool, &user_api, "User", |r, obj: User| async move {
            r.reconcile_user(&obj).await
        })
        .await;
        resync_kind(&reconciler, &pool, &client_api, "KeycloakClient", |r, obj: KeycloakClient| async move {
            r.reconcile_keycloak_client(&obj).await
        })
        .await;
        resync_kind(&reconciler, &pool, &project_api, "Project", |r, obj: Project| async move {
            r.reconcile_project(&obj).await
        })
        .await;
        resync_kind(&reconciler, &pool, &vdi_api, "VDIInstance", |r, obj: VDIInstance| async move {
            r.reconcile_vdi_instance(&obj).await
        })
        .await;

        info!("Periodic resync complete");
    }
}

async fn resync_kind<K, F, Fut>(
    reconciler: &Arc<Reconciler>,
    pool: &Arc<WorkerPool>,
    api: &Api<K>,
    kind: &'static str,
    reconcile_fn: F,
) where
    K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
    F: Fn(Arc<Reconciler>, K) -> Fut,
    Fut: std::future::Future<Output = Result<(), ControllerError>>,
{
    let list = match api.list(&Default::default()).await {
        Ok(list) => list,
        Err(e) => {
            warn!(kind, error = %e, "resync list failed");
            return;
        }
    };

    for obj in list.items {
        let meta = obj.meta();
        let key = crate::scheduler::ResourceKey::new(
            kind,
            meta.namespace.clone().unwrap_or_else(|| "default".to_string()),
            meta.name.clone().unwrap_or_default(),
        );
        let generation = meta.generation.unwrap_or(0);
        let deleting = meta.deletion_timestamp.is_some();
        let future = reconcile_fn(Arc::clone(reconciler), obj.clone());
        match pool.run(key.clone(), generation, future).await {
            Ok(TaskOutcome::Completed) if deleting => {
                pool.forget(&key);
                reconciler.forget(&key.to_string());
            }
            Ok(_) => {}
            Err(e) => warn!(resource = %key, error = %e, "resync reconciliation failed"),
        }
    }
}
