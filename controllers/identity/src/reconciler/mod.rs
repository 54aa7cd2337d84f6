//! Reconciliation logic for karectl CRDs.
//!
//! This module is organized by API group:
//! - `identity`: Users, Groups, and OIDC client registrations in Keycloak
//! - `research`: Projects (backed by a Keycloak group per project)
//! - `workspaces`: VDIInstances (per-user desktop Pod plus Service)

pub mod identity;
pub mod research;
pub mod workspaces;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use k8s_openapi::api::core::v1::{Pod, Secret, Service};
use kube::Api;
use kube::api::{Patch, PatchParams};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error, warn};

use crds::{
    Group, KeycloakClient, ModelRegistry, Project, ResourcePhase, SyncStatus, User, VDIInstance,
};
use keycloak_client::KeycloakAdminTrait;

use crate::backoff::ExponentialBackoff;
use crate::error::ControllerError;
use crate::reconcile_helpers::{
    add_finalizer_patch, has_finalizer, remove_finalizer_patch, status_patch,
};

/// Retry schedule bounds in seconds.
const BACKOFF_BASE_SECS: u64 = 5;
const BACKOFF_MAX_SECS: u64 = 300;

/// Backoff state for a resource
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: ExponentialBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new() -> Self {
        Self {
            backoff: ExponentialBackoff::new(BACKOFF_BASE_SECS, BACKOFF_MAX_SECS),
            error_count: 0,
        }
    }
}

/// Behavior knobs shared by every reconciler.
#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    /// When false, no external writes happen; intended changes are recorded
    /// as DryRun conditions instead
    pub posting_enabled: bool,
    /// Consecutive failures before a resource is marked Degraded
    pub max_retry_attempts: u32,
}

/// Reconciles karectl resources against Keycloak and the cluster.
pub struct Reconciler {
    pub(crate) keycloak: Box<dyn KeycloakAdminTrait>,
    pub(crate) user_api: Api<User>,
    pub(crate) group_api: Api<Group>,
    pub(crate) client_api: Api<KeycloakClient>,
    pub(crate) project_api: Api<Project>,
    pub(crate) vdi_api: Api<VDIInstance>,
    pub(crate) secret_api: Api<Secret>,
    pub(crate) pod_api: Api<Pod>,
    pub(crate) service_api: Api<Service>,
    pub(crate) registry: ModelRegistry,
    pub(crate) settings: ReconcilerSettings,
    /// Error count tracking per resource (kind/namespace/name -> BackoffState)
    backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl Reconciler {
    /// Creates a new reconciler instance.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        keycloak: impl KeycloakAdminTrait + 'static,
        user_api: Api<User>,
        group_api: Api<Group>,
        client_api: Api<KeycloakClient>,
        project_api: Api<Project>,
        vdi_api: Api<VDIInstance>,
        secret_api: Api<Secret>,
        pod_api: Api<Pod>,
        service_api: Api<Service>,
        registry: ModelRegistry,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            keycloak: Box::new(keycloak),
            user_api,
            group_api,
            client_api,
            project_api,
            vdi_api,
            secret_api,
            pod_api,
            service_api,
            registry,
            settings,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Validate a spec against its registered model descriptor.
    pub(crate) fn validate<S: Serialize>(&self, kind: &str, spec: &S) -> Result<(), ControllerError> {
        let value = serde_json::to_value(spec).map_err(|e| {
            ControllerError::InvalidConfig(format!("{kind} spec not serializable: {e}"))
        })?;
        self.registry.validate_spec(kind, &value)?;
        Ok(())
    }

    /// Patch the status subresource of any managed kind.
    pub(crate) async fn patch_status<K>(
        &self,
        api: &Api<K>,
        name: &str,
        status: &SyncStatus,
    ) -> Result<(), ControllerError>
    where
        K: kube::Resource + Clone + DeserializeOwned + std::fmt::Debug,
    {
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&status_patch(status)))
            .await?;
        Ok(())
    }

    /// Add the cleanup finalizer if the object does not carry it yet.
    pub(crate) async fn ensure_finalizer<K>(
        &self,
        api: &Api<K>,
        name: &str,
        meta: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta,
    ) -> Result<(), ControllerError>
    where
        K: kube::Resource + Clone + DeserializeOwned + std::fmt::Debug,
    {
        if has_finalizer(meta) {
            return Ok(());
        }
        api.patch(name, &PatchParams::default(), &Patch::Merge(&add_finalizer_patch(meta)))
            .await?;
        Ok(())
    }

    /// Drop the cleanup finalizer so deletion can proceed.
    pub(crate) async fn release_finalizer<K>(
        &self,
        api: &Api<K>,
        name: &str,
        meta: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta,
    ) -> Result<(), ControllerError>
    where
        K: kube::Resource + Clone + DeserializeOwned + std::fmt::Debug,
    {
        api.patch(name, &PatchParams::default(), &Patch::Merge(&remove_finalizer_patch(meta)))
            .await?;
        Ok(())
    }

    /// Record a successful reconciliation: the retry schedule resets.
    pub(crate) fn record_success(&self, key: &str) {
        let mut states = self
            .backoff_states
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(state) = states.get_mut(key) {
            state.error_count = 0;
            state.backoff.reset();
        }
    }

    /// Drop the backoff entry for a resource that no longer exists.
    pub(crate) fn forget(&self, key: &str) {
        self.backoff_states
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(key);
    }

    /// Record a failed reconciliation; returns the consecutive failure count.
    pub(crate) fn record_failure(&self, key: &str) -> u32 {
        let mut states = self
            .backoff_states
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let state = states.entry(key.to_string()).or_insert_with(BackoffState::new);
        state.error_count += 1;
        state.error_count
    }

    /// Delay before the next retry for a resource, advancing its schedule.
    pub fn retry_delay(&self, key: &str) -> Duration {
        let mut states = self
            .backoff_states
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let state = states.entry(key.to_string()).or_insert_with(BackoffState::new);
        state.backoff.next_backoff()
    }

    /// Shared failure handling at the end of a sync attempt.
    ///
    /// Terminal errors and exhausted retry budgets mark the resource Degraded
    /// and return `Ok` so the controller stops requeueing until the spec
    /// changes. The failing generation is stamped into the status so the
    /// periodic resync leaves the resource alone until a spec edit bumps it.
    /// Retryable errors bubble up to the error policy for backoff.
    pub(crate) async fn fail_or_degrade<K>(
        &self,
        api: &Api<K>,
        name: &str,
        key: &str,
        generation: Option<i64>,
        mut status: SyncStatus,
        err: ControllerError,
    ) -> Result<(), ControllerError>
    where
        K: kube::Resource + Clone + DeserializeOwned + std::fmt::Debug,
    {
        let attempts = self.record_failure(key);
        status.error = Some(err.to_string());

        if !err.is_retryable() || attempts >= self.settings.max_retry_attempts {
            error!(resource = key, attempts, error = %err, "marking resource Degraded");
            status.phase = ResourcePhase::Degraded;
            status.observed_generation = generation;
            status.push_condition(crds::Condition::new(
                "Synced",
                false,
                if err.is_retryable() { "RetryBudgetExhausted" } else { "TerminalError" },
                err.to_string(),
            ));
            self.patch_status(api, name, &status).await?;
            return Ok(());
        }

        warn!(resource = key, attempts, error = %err, "sync failed, will retry");
        self.patch_status(api, name, &status).await?;
        Err(err)
    }

    /// Record a successful teardown and release the finalizer.
    pub(crate) async fn finish_teardown<K>(
        &self,
        api: &Api<K>,
        name: &str,
        key: &str,
        meta: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta,
        mut status: SyncStatus,
    ) -> Result<(), ControllerError>
    where
        K: kube::Resource + Clone + DeserializeOwned + std::fmt::Debug,
    {
        status.phase = ResourcePhase::Removed;
        status.error = None;
        status.push_condition(crds::Condition::new(
            "CleanedUp",
            true,
            "ExternalStateRemoved",
            "external state removed, releasing finalizer",
        ));
        // The object may vanish between these patches once the finalizer is
        // gone; a NotFound on the status write is not a failure.
        if let Err(ControllerError::Kube(e)) = self.patch_status(api, name, &status).await {
            debug!(resource = key, error = %e, "status patch during teardown skipped");
        }
        self.release_finalizer(api, name, meta).await?;
        self.record_success(key);
        Ok(())
    }
}
