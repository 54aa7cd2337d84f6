//! Reconciliation of identity resources: Users, Groups, and OIDC clients.
//!
//! The external sync steps are free functions over [`KeycloakAdminTrait`] so
//! they can be unit tested against the in-memory mock without a cluster.

use kube::ResourceExt;
use tracing::{debug, info, warn};

use crds::{Condition, Group, GroupSpec, KeycloakClient, KeycloakClientSpec, ResourcePhase, User, UserSpec};
use keycloak_client::{
    ClientRepresentation, CredentialRepresentation, GroupRepresentation, KeycloakAdminTrait,
    KeycloakError, ProtocolMapperRepresentation, UserRepresentation, generate_temp_password,
};

use super::Reconciler;
use crate::error::ControllerError;
use crate::reconcile_helpers::{
    dependency_ready, deletion_requested, diff_summary, has_finalizer, needs_sync, spec_hash,
    string_set_diff, touch,
};

/// Length of the temporary password set on newly created users.
const TEMP_PASSWORD_LEN: usize = 16;

/// What a user sync pass did.
#[derive(Debug, Default)]
pub(crate) struct UserSyncReport {
    pub user_id: String,
    pub created: bool,
    pub updated: bool,
    pub groups_added: Vec<String>,
    pub groups_removed: Vec<String>,
}

impl UserSyncReport {
    fn summary(&self) -> String {
        let action = if self.created {
            "created with temporary password"
        } else if self.updated {
            "updated"
        } else {
            "unchanged"
        };
        format!(
            "{action}; membership {}",
            diff_summary(&self.groups_added, &self.groups_removed)
        )
    }
}

fn desired_user(spec: &UserSpec) -> UserRepresentation {
    UserRepresentation {
        username: spec.username.clone(),
        email: Some(spec.email.clone()),
        enabled: spec.enabled,
        ..Default::default()
    }
}

fn user_needs_update(existing: &UserRepresentation, desired: &UserRepresentation) -> bool {
    existing.email != desired.email || existing.enabled != desired.enabled
}

fn desired_group(name: &str, spec: &GroupSpec) -> GroupRepresentation {
    let mut attributes = std::collections::HashMap::new();
    if !spec.description.is_empty() {
        attributes.insert("description".to_string(), vec![spec.description.clone()]);
    }
    for (key, value) in &spec.attributes {
        let rendered = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        attributes.insert(key.clone(), vec![rendered]);
    }
    GroupRepresentation {
        name: name.to_string(),
        attributes,
        ..Default::default()
    }
}

fn desired_client(spec: &KeycloakClientSpec, secret: Option<String>) -> ClientRepresentation {
    let attributes = spec
        .attributes
        .iter()
        .map(|(key, value)| {
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), rendered)
        })
        .collect();
    let protocol_mappers = spec
        .protocol_mappers
        .iter()
        .map(|m| ProtocolMapperRepresentation {
            name: m.name.clone(),
            protocol: m.protocol.clone(),
            protocol_mapper: m.protocol_mapper.clone(),
            config: m.config.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            ..Default::default()
        })
        .collect();
    ClientRepresentation {
        client_id: spec.client_id.clone(),
        enabled: spec.enabled,
        public_client: spec.public_client,
        redirect_uris: spec.redirect_uris.clone(),
        web_origins: spec.web_origins.clone(),
        protocol: Some(spec.protocol.clone()),
        attributes,
        default_client_scopes: spec.default_client_scopes.clone(),
        protocol_mappers,
        secret,
        ..Default::default()
    }
}

/// Compare mappers by their declared fields; server-assigned mapper ids do
/// not count as drift.
fn mappers_differ(existing: &[ProtocolMapperRepresentation], desired: &[ProtocolMapperRepresentation]) -> bool {
    let strip = |mappers: &[ProtocolMapperRepresentation]| {
        let mut stripped: Vec<ProtocolMapperRepresentation> = mappers
            .iter()
            .map(|m| ProtocolMapperRepresentation { id: None, ..m.clone() })
            .collect();
        stripped.sort_by(|a, b| a.name.cmp(&b.name));
        stripped
    };
    strip(existing) != strip(desired)
}

fn client_needs_update(existing: &ClientRepresentation, desired: &ClientRepresentation) -> bool {
    existing.enabled != desired.enabled
        || existing.public_client != desired.public_client
        || existing.redirect_uris != desired.redirect_uris
        || existing.web_origins != desired.web_origins
        || existing.protocol != desired.protocol
        || existing.attributes != desired.attributes
        || (!desired.default_client_scopes.is_empty()
            && existing.default_client_scopes != desired.default_client_scopes)
        || (!desired.protocol_mappers.is_empty()
            && mappers_differ(&existing.protocol_mappers, &desired.protocol_mappers))
        || (desired.secret.is_some() && existing.secret != desired.secret)
}

/// Create or converge a realm user and its group memberships.
pub(crate) async fn sync_user(
    kc: &dyn KeycloakAdminTrait,
    spec: &UserSpec,
) -> Result<UserSyncReport, KeycloakError> {
    let desired = desired_user(spec);
    let mut report = UserSyncReport::default();

    let user_id = match kc.get_user_by_username(&spec.username).await? {
        Some(existing) => {
            let id = existing.id.clone().ok_or_else(|| {
                KeycloakError::InvalidRequest(format!("user {} has no id", spec.username))
            })?;
            if user_needs_update(&existing, &desired) {
                kc.update_user(&id, &desired).await?;
                report.updated = true;
            }
            id
        }
        None => {
            let id = kc.create_user(&desired).await?;
            let password = generate_temp_password(TEMP_PASSWORD_LEN);
            kc.reset_password(&id, &CredentialRepresentation::temporary_password(password))
                .await?;
            report.created = true;
            id
        }
    };

    let observed: Vec<String> = kc
        .list_user_groups(&user_id)
        .await?
        .into_iter()
        .map(|g| g.name)
        .collect();
    let (to_add, to_remove) = string_set_diff(&spec.groups, &observed);

    for group_name in &to_add {
        let group = kc
            .get_group_by_name(group_name)
            .await?
            .ok_or_else(|| KeycloakError::NotFound(format!("group {group_name}")))?;
        let group_id = group.id.ok_or_else(|| {
            KeycloakError::InvalidRequest(format!("group {group_name} has no id"))
        })?;
        kc.add_user_to_group(&user_id, &group_id).await?;
    }
    for group_name in &to_remove {
        if let Some(group) = kc.get_group_by_name(group_name).await? {
            if let Some(group_id) = group.id {
                kc.remove_user_from_group(&user_id, &group_id).await?;
            }
        }
    }

    report.user_id = user_id;
    report.groups_added = to_add;
    report.groups_removed = to_remove;
    Ok(report)
}

/// Describe what [`sync_user`] would do, without writing anything.
pub(crate) async fn plan_user(
    kc: &dyn KeycloakAdminTrait,
    spec: &UserSpec,
) -> Result<String, KeycloakError> {
    match kc.get_user_by_username(&spec.username).await? {
        Some(existing) => {
            let id = existing.id.clone().unwrap_or_default();
            let update = user_needs_update(&existing, &desired_user(spec));
            let observed: Vec<String> = kc
                .list_user_groups(&id)
                .await?
                .into_iter()
                .map(|g| g.name)
                .collect();
            let (to_add, to_remove) = string_set_diff(&spec.groups, &observed);
            Ok(format!(
                "would {}; membership {}",
                if update { "update" } else { "leave unchanged" },
                diff_summary(&to_add, &to_remove)
            ))
        }
        None => Ok(format!(
            "would create user {} with temporary password and join [{}]",
            spec.username,
            spec.groups.join(", ")
        )),
    }
}

/// Remove the realm user if it still exists.
pub(crate) async fn teardown_user(
    kc: &dyn KeycloakAdminTrait,
    username: &str,
) -> Result<(), KeycloakError> {
    if let Some(user) = kc.get_user_by_username(username).await? {
        if let Some(id) = user.id {
            kc.delete_user(&id).await?;
        }
    }
    Ok(())
}

/// Create or converge a realm group; listed members are joined if absent.
pub(crate) async fn sync_group(
    kc: &dyn KeycloakAdminTrait,
    name: &str,
    spec: &GroupSpec,
) -> Result<String, KeycloakError> {
    let desired = desired_group(name, spec);
    let group_id = match kc.get_group_by_name(name).await? {
        Some(existing) => {
            let id = existing
                .id
                .clone()
                .ok_or_else(|| KeycloakError::InvalidRequest(format!("group {name} has no id")))?;
            if existing.attributes != desired.attributes {
                kc.update_group(&id, &desired).await?;
            }
            id
        }
        None => kc.create_group(&desired).await?,
    };

    // Member removal is owned by the User reconciler; the group side only
    // joins listed members that already exist in the realm.
    for username in &spec.members {
        let Some(user) = kc.get_user_by_username(username).await? else {
            continue;
        };
        let Some(user_id) = user.id else { continue };
        let in_group = kc
            .list_user_groups(&user_id)
            .await?
            .iter()
            .any(|g| g.name == name);
        if !in_group {
            kc.add_user_to_group(&user_id, &group_id).await?;
        }
    }

    Ok(group_id)
}

/// Remove the realm group if it still exists.
pub(crate) async fn teardown_group(
    kc: &dyn KeycloakAdminTrait,
    name: &str,
) -> Result<(), KeycloakError> {
    if let Some(group) = kc.get_group_by_name(name).await? {
        if let Some(id) = group.id {
            kc.delete_group(&id).await?;
        }
    }
    Ok(())
}

/// Create or converge an OIDC client registration.
pub(crate) async fn sync_client(
    kc: &dyn KeycloakAdminTrait,
    spec: &KeycloakClientSpec,
    secret: Option<String>,
) -> Result<String, KeycloakError> {
    let desired = desired_client(spec, secret);
    match kc.get_client_by_client_id(&spec.client_id).await? {
        Some(existing) => {
            let id = existing.id.clone().ok_or_else(|| {
                KeycloakError::InvalidRequest(format!("client {} has no id", spec.client_id))
            })?;
            if client_needs_update(&existing, &desired) {
                kc.update_client(&id, &desired).await?;
            }
            Ok(id)
        }
        None => kc.create_client(&desired).await,
    }
}

/// Describe what [`sync_client`] would do, without writing anything.
pub(crate) async fn plan_client(
    kc: &dyn KeycloakAdminTrait,
    spec: &KeycloakClientSpec,
    secret: Option<String>,
) -> Result<String, KeycloakError> {
    let desired = desired_client(spec, secret);
    match kc.get_client_by_client_id(&spec.client_id).await? {
        Some(existing) => Ok(if client_needs_update(&existing, &desired) {
            format!("would update client {}", spec.client_id)
        } else {
            format!("would leave client {} unchanged", spec.client_id)
        }),
        None => Ok(format!("would create client {}", spec.client_id)),
    }
}

/// Remove the OIDC client registration if it still exists.
pub(crate) async fn teardown_client(
    kc: &dyn KeycloakAdminTrait,
    client_id: &str,
) -> Result<(), KeycloakError> {
    if let Some(client) = kc.get_client_by_client_id(client_id).await? {
        if let Some(id) = client.id {
            kc.delete_client(&id).await?;
        }
    }
    Ok(())
}

/// Users that still reference `group_name` and are not being deleted.
pub(crate) fn group_dependents(group_name: &str, users: &[User]) -> Vec<String> {
    let mut dependents: Vec<String> = users
        .iter()
        .filter(|user| {
            user.metadata.deletion_timestamp.is_none()
                && user.spec.groups.iter().any(|g| g == group_name)
        })
        .map(ResourceExt::name_any)
        .collect();
    dependents.sort();
    dependents
}

impl Reconciler {
    /// Reconcile one User resource.
    pub async fn reconcile_user(&self, user: &User) -> Result<(), ControllerError> {
        let name = user.name_any();
        let namespace = user.namespace().unwrap_or_else(|| "default".to_string());
        let key = format!("User/{namespace}/{name}");
        let generation = user.metadata.generation;
        let mut status = user.status.clone().unwrap_or_default();

        if deletion_requested(&user.metadata) {
            if !has_finalizer(&user.metadata) {
                return Ok(());
            }
            status.phase = ResourcePhase::Deleting;
            if self.settings.posting_enabled {
                if let Err(e) = teardown_user(self.keycloak.as_ref(), &user.spec.username).await {
                    return self
                        .fail_or_degrade(&self.user_api, &name, &key, generation, status, e.into())
                        .await;
                }
            } else {
                status.push_condition(Condition::new(
                    "DryRun",
                    true,
                    "PostingDisabled",
                    format!("would delete user {}", user.spec.username),
                ));
            }
            return self
                .finish_teardown(&self.user_api, &name, &key, &user.metadata, status)
                .await;
        }

        self.ensure_finalizer(&self.user_api, &name, &user.metadata).await?;

        let hash = spec_hash(&user.spec);
        if !needs_sync(user.status.as_ref(), &hash, generation) {
            // A Ready status may outlive the account; Degraded stays parked.
            let drifted = status.phase == ResourcePhase::Ready
                && self.keycloak.get_user_by_username(&user.spec.username).await?.is_none();
            if !drifted {
                debug!(resource = %key, "nothing to sync");
                return Ok(());
            }
            warn!(resource = %key, "user missing from keycloak, recreating");
        }

        status.phase = ResourcePhase::Validating;
        if let Err(e) = self.validate("User", &user.spec) {
            status.push_condition(Condition::new("Validated", false, "SchemaViolation", e.to_string()));
            return self.fail_or_degrade(&self.user_api, &name, &key, generation, status, e).await;
        }
        status.push_condition(Condition::new("Validated", true, "SchemaValid", "spec matches model"));

        // A user can only join groups whose CRs have converged.
        let mut unready = Vec::new();
        for group_name in &user.spec.groups {
            let group = self.group_api.get_opt(group_name).await?;
            if !dependency_ready(group.as_ref().and_then(|g| g.status.as_ref())) {
                unready.push(group_name.clone());
            }
        }
        if !unready.is_empty() {
            let message = format!("groups not ready: {}", unready.join(", "));
            status.push_condition(Condition::new("DependenciesReady", false, "GroupsPending", &message));
            return self
                .fail_or_degrade(
                    &self.user_api,
                    &name,
                    &key,
                    generation,
                    status,
                    ControllerError::DependencyNotReady(message),
                )
                .await;
        }

        status.phase = ResourcePhase::Syncing;

        if !self.settings.posting_enabled {
            let plan = plan_user(self.keycloak.as_ref(), &user.spec).await.map_err(ControllerError::from);
            match plan {
                Ok(summary) => {
                    status.push_condition(Condition::new("DryRun", true, "PostingDisabled", summary));
                    touch(&mut status, generation);
                    self.patch_status(&self.user_api, &name, &status).await?;
                    self.record_success(&key);
                    return Ok(());
                }
                Err(e) => {
                    return self.fail_or_degrade(&self.user_api, &name, &key, generation, status, e).await;
                }
            }
        }

        match sync_user(self.keycloak.as_ref(), &user.spec).await {
            Ok(report) => {
                info!(resource = %key, user_id = %report.user_id, "user converged: {}", report.summary());
                status.phase = ResourcePhase::Ready;
                status.external_key = Some(user.spec.username.clone());
                status.applied_hash = Some(hash);
                status.error = None;
                status.push_condition(Condition::new("Synced", true, "Converged", report.summary()));
                touch(&mut status, generation);
                self.patch_status(&self.user_api, &name, &status).await?;
                self.record_success(&key);
                Ok(())
            }
            Err(e) => self.fail_or_degrade(&self.user_api, &name, &key, generation, status, e.into()).await,
        }
    }

    /// Reconcile one Group resource.
    pub async fn reconcile_group(&self, group: &Group) -> Result<(), ControllerError> {
        let name = group.name_any();
        let namespace = group.namespace().unwrap_or_else(|| "default".to_string());
        let key = format!("Group/{namespace}/{name}");
        let generation = group.metadata.generation;
        let mut status = group.status.clone().unwrap_or_default();

        if deletion_requested(&group.metadata) {
            if !has_finalizer(&group.metadata) {
                return Ok(());
            }
            // Teardown is deferred while live Users still reference the group.
            let users = self.user_api.list(&Default::default()).await?;
            let dependents = group_dependents(&name, &users.items);
            if !dependents.is_empty() {
                let message = format!("blocked by users: {}", dependents.join(", "));
                status.phase = ResourcePhase::Deleting;
                status.push_condition(Condition::new("CleanedUp", false, "DependentsPresent", &message));
                return self
                    .fail_or_degrade(
                        &self.group_api,
                        &name,
                        &key,
                        generation,
                        status,
                        ControllerError::DependentsPresent(message),
                    )
                    .await;
            }
            status.phase = ResourcePhase::Deleting;
            if self.settings.posting_enabled {
                if let Err(e) = teardown_group(self.keycloak.as_ref(), &name).await {
                    return self
                        .fail_or_degrade(&self.group_api, &name, &key, generation, status, e.into())
                        .await;
                }
            } else {
                status.push_condition(Condition::new(
                    "DryRun",
                    true,
                    "PostingDisabled",
                    format!("would delete group {name}"),
                ));
            }
            return self
                .finish_teardown(&self.group_api, &name, &key, &group.metadata, status)
                .await;
        }

        self.ensure_finalizer(&self.group_api, &name, &group.metadata).await?;

        let hash = spec_hash(&group.spec);
        if !needs_sync(group.status.as_ref(), &hash, generation) {
            // A Ready status may outlive the group; Degraded stays parked.
            let drifted = status.phase == ResourcePhase::Ready
                && self.keycloak.get_group_by_name(&name).await?.is_none();
            if !drifted {
                debug!(resource = %key, "nothing to sync");
                return Ok(());
            }
            warn!(resource = %key, "group missing from keycloak, recreating");
        }

        status.phase = ResourcePhase::Validating;
        if let Err(e) = self.validate("Group", &group.spec) {
            status.push_condition(Condition::new("Validated", false, "SchemaViolation", e.to_string()));
            return self.fail_or_degrade(&self.group_api, &name, &key, generation, status, e).await;
        }
        status.push_condition(Condition::new("Validated", true, "SchemaValid", "spec matches model"));
        status.phase = ResourcePhase::Syncing;

        if !self.settings.posting_enabled {
            let exists = match self.keycloak.get_group_by_name(&name).await {
                Ok(found) => found.is_some(),
                Err(e) => {
                    return self
                        .fail_or_degrade(&self.group_api, &name, &key, generation, status, e.into())
                        .await;
                }
            };
            status.push_condition(Condition::new(
                "DryRun",
                true,
                "PostingDisabled",
                if exists {
                    format!("would converge existing group {name}")
                } else {
                    format!("would create group {name}")
                },
            ));
            touch(&mut status, generation);
            self.patch_status(&self.group_api, &name, &status).await?;
            self.record_success(&key);
            return Ok(());
        }

        match sync_group(self.keycloak.as_ref(), &name, &group.spec).await {
            Ok(group_id) => {
                info!(resource = %key, group_id = %group_id, "group converged");
                status.phase = ResourcePhase::Ready;
                status.external_key = Some(name.clone());
                status.applied_hash = Some(hash);
                status.error = None;
                status.push_condition(Condition::new("Synced", true, "Converged", "group converged"));
                touch(&mut status, generation);
                self.patch_status(&self.group_api, &name, &status).await?;
                self.record_success(&key);
                Ok(())
            }
            Err(e) => self.fail_or_degrade(&self.group_api, &name, &key, generation, status, e.into()).await,
        }
    }

    /// Resolve the confidential client secret from its Secret reference.
    async fn read_client_secret(
        &self,
        spec: &KeycloakClientSpec,
    ) -> Result<Option<String>, ControllerError> {
        let Some(secret_ref) = &spec.secret_ref else {
            return Ok(None);
        };
        let secret = self
            .secret_api
            .get_opt(&secret_ref.name)
            .await?
            .ok_or_else(|| ControllerError::SecretRef(format!("Secret {} not found", secret_ref.name)))?;
        let data = secret.data.unwrap_or_default();
        let value = data.get(&secret_ref.key).ok_or_else(|| {
            ControllerError::SecretRef(format!(
                "Secret {} has no key {}",
                secret_ref.name, secret_ref.key
            ))
        })?;
        let decoded = String::from_utf8(value.0.clone()).map_err(|_| {
            ControllerError::SecretRef(format!(
                "Secret {} key {} is not UTF-8",
                secret_ref.name, secret_ref.key
            ))
        })?;
        Ok(Some(decoded))
    }

    /// Reconcile one KeycloakClient resource.
    pub async fn reconcile_keycloak_client(
        &self,
        client: &KeycloakClient,
    ) -> Result<(), ControllerError> {
        let name = client.name_any();
        let namespace = client.namespace().unwrap_or_else(|| "default".to_string());
        let key = format!("KeycloakClient/{namespace}/{name}");
        let generation = client.metadata.generation;
        let mut status = client.status.clone().unwrap_or_default();

        if deletion_requested(&client.metadata) {
            if !has_finalizer(&client.metadata) {
                return Ok(());
            }
            status.phase = ResourcePhase::Deleting;
            if self.settings.posting_enabled {
                if let Err(e) = teardown_client(self.keycloak.as_ref(), &client.spec.client_id).await {
                    return self
                        .fail_or_degrade(&self.client_api, &name, &key, generation, status, e.into())
                        .await;
                }
            } else {
                status.push_condition(Condition::new(
                    "DryRun",
                    true,
                    "PostingDisabled",
                    format!("would delete client {}", client.spec.client_id),
                ));
            }
            return self
                .finish_teardown(&self.client_api, &name, &key, &client.metadata, status)
                .await;
        }

        self.ensure_finalizer(&self.client_api, &name, &client.metadata).await?;

        let hash = spec_hash(&client.spec);
        if !needs_sync(client.status.as_ref(), &hash, generation) {
            // A Ready status may outlive the client; Degraded stays parked.
            let drifted = status.phase == ResourcePhase::Ready
                && self.keycloak.get_client_by_client_id(&client.spec.client_id).await?.is_none();
            if !drifted {
                debug!(resource = %key, "nothing to sync");
                return Ok(());
            }
            warn!(resource = %key, "client missing from keycloak, recreating");
        }

        status.phase = ResourcePhase::Validating;
        if let Err(e) = self.validate("KeycloakClient", &client.spec) {
            status.push_condition(Condition::new("Validated", false, "SchemaViolation", e.to_string()));
            return self.fail_or_degrade(&self.client_api, &name, &key, generation, status, e).await;
        }
        status.push_condition(Condition::new("Validated", true, "SchemaValid", "spec matches model"));

        let secret = match self.read_client_secret(&client.spec).await {
            Ok(secret) => secret,
            Err(e) => {
                status.push_condition(Condition::new(
                    "DependenciesReady",
                    false,
                    "SecretMissing",
                    e.to_string(),
                ));
                return self.fail_or_degrade(&self.client_api, &name, &key, generation, status, e).await;
            }
        };

        status.phase = ResourcePhase::Syncing;

        if !self.settings.posting_enabled {
            let summary = match plan_client(self.keycloak.as_ref(), &client.spec, secret.clone()).await {
                Ok(summary) => summary,
                Err(e) => {
                    return self
                        .fail_or_degrade(&self.client_api, &name, &key, generation, status, e.into())
                        .await;
                }
            };
            status.push_condition(Condition::new("DryRun", true, "PostingDisabled", summary));
            touch(&mut status, generation);
            self.patch_status(&self.client_api, &name, &status).await?;
            self.record_success(&key);
            return Ok(());
        }

        match sync_client(self.keycloak.as_ref(), &client.spec, secret).await {
            Ok(client_uuid) => {
                info!(resource = %key, client_uuid = %client_uuid, "client converged");
                status.phase = ResourcePhase::Ready;
                status.external_key = Some(client.spec.client_id.clone());
                status.applied_hash = Some(hash);
                status.error = None;
                status.push_condition(Condition::new("Synced", true, "Converged", "client converged"));
                touch(&mut status, generation);
                self.patch_status(&self.client_api, &name, &status).await?;
                self.record_success(&key);
                Ok(())
            }
            Err(e) => self.fail_or_degrade(&self.client_api, &name, &key, generation, status, e.into()).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keycloak_client::MockKeycloakAdminClient;

    fn user_spec(groups: &[&str]) -> UserSpec {
        UserSpec {
            username: "ada".to_string(),
            email: "ada@example.org".to_string(),
            enabled: true,
            groups: groups.iter().map(|g| g.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_sync_user_creates_with_temp_password() {
        let mock = MockKeycloakAdminClient::new("karectl");
        let report = sync_user(&mock, &user_spec(&[])).await.unwrap();

        assert!(report.created);
        assert!(mock.has_user("ada"));
        let credentials = mock.credentials_of(&report.user_id);
        assert_eq!(credentials.len(), 1);
        assert!(credentials[0].temporary);
        assert_eq!(credentials[0].credential_type, "password");
    }

    #[tokio::test]
    async fn test_sync_user_is_idempotent() {
        let mock = MockKeycloakAdminClient::new("karectl");
        mock.add_group(GroupRepresentation {
            name: "engineering".to_string(),
            ..Default::default()
        });
        let spec = user_spec(&["engineering"]);

        let first = sync_user(&mock, &spec).await.unwrap();
        assert!(first.created);
        assert_eq!(first.groups_added, vec!["engineering"]);

        let second = sync_user(&mock, &spec).await.unwrap();
        assert!(!second.created);
        assert!(!second.updated);
        assert!(second.groups_added.is_empty());
        // only the first pass created anything
        assert_eq!(mock.call_count("create_user"), 1);
        assert_eq!(mock.call_count("add_user_to_group"), 1);
        assert_eq!(mock.call_count("reset_password"), 1);
    }

    #[tokio::test]
    async fn test_sync_recreates_user_deleted_out_of_band() {
        let mock = MockKeycloakAdminClient::new("karectl");
        mock.add_group(GroupRepresentation {
            name: "engineering".to_string(),
            ..Default::default()
        });
        let spec = user_spec(&["engineering"]);
        let first = sync_user(&mock, &spec).await.unwrap();
        assert!(first.created);

        // someone removed the account directly in the admin console
        mock.delete_user(&first.user_id).await.unwrap();
        assert!(mock.get_user_by_username("ada").await.unwrap().is_none());

        let second = sync_user(&mock, &spec).await.unwrap();
        assert!(second.created);
        assert!(mock.has_user("ada"));
        assert_eq!(second.groups_added, vec!["engineering"]);
    }

    #[tokio::test]
    async fn test_sync_recreates_group_deleted_out_of_band() {
        let mock = MockKeycloakAdminClient::new("karectl");
        let spec = GroupSpec::default();
        let first_id = sync_group(&mock, "engineering", &spec).await.unwrap();

        mock.delete_group(&first_id).await.unwrap();
        assert!(mock.get_group_by_name("engineering").await.unwrap().is_none());

        sync_group(&mock, "engineering", &spec).await.unwrap();
        assert!(mock.has_group("engineering"));
        assert_eq!(mock.call_count("create_group"), 2);
    }

    #[tokio::test]
    async fn test_sync_user_converges_memberships() {
        let mock = MockKeycloakAdminClient::new("karectl");
        let eng = mock.add_group(GroupRepresentation {
            name: "engineering".to_string(),
            ..Default::default()
        });
        let research = mock.add_group(GroupRepresentation {
            name: "research".to_string(),
            ..Default::default()
        });
        let user_id = mock.add_user(UserRepresentation {
            username: "ada".to_string(),
            email: Some("ada@example.org".to_string()),
            enabled: true,
            ..Default::default()
        });
        // drifted external state: member of engineering only
        mock.add_user_to_group(&user_id, &eng).await.unwrap();

        let report = sync_user(&mock, &user_spec(&["research"])).await.unwrap();
        assert_eq!(report.groups_added, vec!["research"]);
        assert_eq!(report.groups_removed, vec!["engineering"]);
        let memberships = mock.memberships_of(&user_id);
        assert!(memberships.contains(&research));
        assert!(!memberships.contains(&eng));
    }

    #[tokio::test]
    async fn test_sync_user_updates_drifted_fields() {
        let mock = MockKeycloakAdminClient::new("karectl");
        mock.add_user(UserRepresentation {
            username: "ada".to_string(),
            email: Some("old@example.org".to_string()),
            enabled: false,
            ..Default::default()
        });

        let report = sync_user(&mock, &user_spec(&[])).await.unwrap();
        assert!(report.updated);
        let stored = mock.get_user_by_username("ada").await.unwrap().unwrap();
        assert_eq!(stored.email.as_deref(), Some("ada@example.org"));
        assert!(stored.enabled);
    }

    #[tokio::test]
    async fn test_teardown_user_is_idempotent() {
        let mock = MockKeycloakAdminClient::new("karectl");
        mock.add_user(UserRepresentation {
            username: "ada".to_string(),
            enabled: true,
            ..Default::default()
        });

        teardown_user(&mock, "ada").await.unwrap();
        assert!(!mock.has_user("ada"));
        // second teardown finds nothing and still succeeds
        teardown_user(&mock, "ada").await.unwrap();
        assert_eq!(mock.call_count("delete_user"), 1);
    }

    #[tokio::test]
    async fn test_sync_group_creates_and_joins_members() {
        let mock = MockKeycloakAdminClient::new("karectl");
        let user_id = mock.add_user(UserRepresentation {
            username: "ada".to_string(),
            enabled: true,
            ..Default::default()
        });

        let spec = GroupSpec {
            description: "Engineering team".to_string(),
            members: vec!["ada".to_string(), "ghost".to_string()],
            ..Default::default()
        };
        let group_id = sync_group(&mock, "engineering", &spec).await.unwrap();

        assert!(mock.has_group("engineering"));
        assert!(mock.memberships_of(&user_id).contains(&group_id));
        // unknown members are skipped, not an error
        assert_eq!(mock.call_count("create_group"), 1);

        // second pass changes nothing
        sync_group(&mock, "engineering", &spec).await.unwrap();
        assert_eq!(mock.call_count("create_group"), 1);
        assert_eq!(mock.call_count("add_user_to_group"), 1);
    }

    #[tokio::test]
    async fn test_sync_client_create_then_update() {
        let mock = MockKeycloakAdminClient::new("karectl");
        let mut spec = KeycloakClientSpec {
            client_id: "portal".to_string(),
            enabled: true,
            public_client: false,
            redirect_uris: vec!["https://portal.example.org/*".to_string()],
            protocol: "openid-connect".to_string(),
            ..Default::default()
        };

        sync_client(&mock, &spec, Some("s3cret".to_string())).await.unwrap();
        assert!(mock.has_client("portal"));

        // unchanged spec is a no-op
        sync_client(&mock, &spec, Some("s3cret".to_string())).await.unwrap();
        assert_eq!(mock.call_count("update_client"), 0);

        spec.redirect_uris.push("https://alt.example.org/*".to_string());
        sync_client(&mock, &spec, Some("s3cret".to_string())).await.unwrap();
        assert_eq!(mock.call_count("update_client"), 1);
        assert_eq!(mock.call_count("create_client"), 1);
    }

    #[tokio::test]
    async fn test_researcher_onboarding_converges_in_dependency_order() {
        use crate::reconciler::research::{project_group_name, sync_project};
        use crds::{AppConfig, ProjectSpec};

        let mock = MockKeycloakAdminClient::new("karectl");

        // the resync loop lands groups and projects before users
        sync_group(&mock, "researchers", &GroupSpec::default()).await.unwrap();
        sync_project(
            &mock,
            "genome",
            &ProjectSpec {
                description: "Genome study".to_string(),
                apps: vec![AppConfig {
                    name: "jupyter".to_string(),
                    type_: "web".to_string(),
                    url: "https://jupyter.example.org".to_string(),
                    ..Default::default()
                }],
                profiles: vec![],
            },
        )
        .await
        .unwrap();

        let spec = UserSpec {
            username: "ada".to_string(),
            email: "ada@example.org".to_string(),
            enabled: true,
            groups: vec!["researchers".to_string(), project_group_name("genome")],
        };
        let report = sync_user(&mock, &spec).await.unwrap();
        assert!(report.created);

        let user_id = mock.get_user_by_username("ada").await.unwrap().unwrap().id.unwrap();
        let groups: Vec<String> = mock
            .list_user_groups(&user_id)
            .await
            .unwrap()
            .into_iter()
            .map(|g| g.name)
            .collect();
        assert_eq!(groups, vec!["project-genome", "researchers"]);

        // a second pass over the whole set is a no-op
        sync_group(&mock, "researchers", &GroupSpec::default()).await.unwrap();
        let second = sync_user(&mock, &spec).await.unwrap();
        assert!(!second.created && !second.updated);
        assert!(second.groups_added.is_empty());
    }

    #[tokio::test]
    async fn test_sync_client_carries_scopes_and_mappers() {
        let mock = MockKeycloakAdminClient::new("karectl");
        let mut config = std::collections::BTreeMap::new();
        config.insert("user.attribute".to_string(), "department".to_string());
        config.insert("claim.name".to_string(), "department".to_string());
        let mut spec = KeycloakClientSpec {
            client_id: "portal".to_string(),
            enabled: true,
            protocol: "openid-connect".to_string(),
            default_client_scopes: vec!["profile".to_string(), "email".to_string()],
            protocol_mappers: vec![crds::ProtocolMapper {
                name: "department".to_string(),
                protocol: "openid-connect".to_string(),
                protocol_mapper: "oidc-usermodel-attribute-mapper".to_string(),
                config,
            }],
            ..Default::default()
        };

        sync_client(&mock, &spec, None).await.unwrap();
        let stored = mock.get_client_by_client_id("portal").await.unwrap().unwrap();
        assert_eq!(stored.default_client_scopes, vec!["profile", "email"]);
        assert_eq!(stored.protocol_mappers.len(), 1);
        assert_eq!(stored.protocol_mappers[0].protocol_mapper, "oidc-usermodel-attribute-mapper");

        // unchanged scopes and mappers are a no-op
        sync_client(&mock, &spec, None).await.unwrap();
        assert_eq!(mock.call_count("update_client"), 0);

        spec.default_client_scopes.push("roles".to_string());
        sync_client(&mock, &spec, None).await.unwrap();
        assert_eq!(mock.call_count("update_client"), 1);
    }

    #[test]
    fn test_mapper_ids_do_not_count_as_drift() {
        let desired = ProtocolMapperRepresentation {
            name: "department".to_string(),
            protocol: "openid-connect".to_string(),
            protocol_mapper: "oidc-usermodel-attribute-mapper".to_string(),
            ..Default::default()
        };
        let existing = ProtocolMapperRepresentation {
            id: Some("a1b2".to_string()),
            ..desired.clone()
        };
        assert!(!mappers_differ(&[existing.clone()], &[desired.clone()]));

        let renamed = ProtocolMapperRepresentation {
            name: "team".to_string(),
            ..desired.clone()
        };
        assert!(mappers_differ(&[existing], &[renamed]));
    }

    #[tokio::test]
    async fn test_plan_user_reports_without_writing() {
        let mock = MockKeycloakAdminClient::new("karectl");
        let plan = plan_user(&mock, &user_spec(&["engineering"])).await.unwrap();
        assert!(plan.contains("would create user ada"));
        assert!(!mock.has_user("ada"));
        assert_eq!(mock.call_count("create_user"), 0);
    }

    #[tokio::test]
    async fn test_plan_client_reports_without_writing() {
        let mock = MockKeycloakAdminClient::new("karectl");
        let spec = KeycloakClientSpec {
            client_id: "portal".to_string(),
            enabled: true,
            protocol: "openid-connect".to_string(),
            ..Default::default()
        };

        let plan = plan_client(&mock, &spec, None).await.unwrap();
        assert_eq!(plan, "would create client portal");
        assert!(!mock.has_client("portal"));
        assert_eq!(mock.call_count("create_client"), 0);

        sync_client(&mock, &spec, None).await.unwrap();
        let plan = plan_client(&mock, &spec, None).await.unwrap();
        assert_eq!(plan, "would leave client portal unchanged");

        let drifted = KeycloakClientSpec {
            redirect_uris: vec!["https://portal.example.org/*".to_string()],
            ..spec
        };
        let plan = plan_client(&mock, &drifted, None).await.unwrap();
        assert_eq!(plan, "would update client portal");
        assert_eq!(mock.call_count("update_client"), 0);
    }

    #[test]
    fn test_group_dependents_ignores_deleting_users() {
        use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

        let mut member = User::new("ada", user_spec(&["engineering"]));
        member.metadata.namespace = Some("default".to_string());
        let outsider = User::new("bob", user_spec(&[]));
        let mut leaving = User::new("eve", user_spec(&["engineering"]));
        leaving.metadata = ObjectMeta {
            name: Some("eve".to_string()),
            deletion_timestamp: Some(Time(chrono::Utc::now())),
            ..Default::default()
        };

        let users = vec![member, outsider, leaving];
        assert_eq!(group_dependents("engineering", &users), vec!["ada"]);
        assert!(group_dependents("research", &users).is_empty());
    }

    #[test]
    fn test_desired_group_renders_attributes() {
        let mut spec = GroupSpec {
            description: "Team".to_string(),
            ..Default::default()
        };
        spec.attributes
            .insert("tier".to_string(), serde_json::json!("gold"));
        spec.attributes
            .insert("quota".to_string(), serde_json::json!(5));

        let rendered = desired_group("engineering", &spec);
        assert_eq!(rendered.attributes["description"], vec!["Team"]);
        assert_eq!(rendered.attributes["tier"], vec!["gold"]);
        assert_eq!(rendered.attributes["quota"], vec!["5"]);
    }
}
