//! Reconciliation of research Projects.
//!
//! A Project is backed by a dedicated realm group named `project-<name>`
//! whose attributes carry the project description and its app and profile
//! catalogs. Teardown is deferred while VDIInstances still reference the
//! project.

use kube::ResourceExt;
use tracing::{debug, info, warn};

use crds::{Condition, Project, ProjectSpec, ResourcePhase, VDIInstance};
use keycloak_client::{GroupRepresentation, KeycloakAdminTrait, KeycloakError};

use super::Reconciler;
use crate::error::ControllerError;
use crate::reconcile_helpers::{deletion_requested, has_finalizer, needs_sync, spec_hash, touch};

/// Realm group backing a project.
pub(crate) fn project_group_name(project: &str) -> String {
    format!("project-{project}")
}

fn desired_project_group(project: &str, spec: &ProjectSpec) -> GroupRepresentation {
    let mut attributes = std::collections::HashMap::new();
    if !spec.description.is_empty() {
        attributes.insert("description".to_string(), vec![spec.description.clone()]);
    }
    if !spec.apps.is_empty() {
        let apps: Vec<String> = spec.apps.iter().map(|app| app.name.clone()).collect();
        attributes.insert("apps".to_string(), apps);
    }
    if !spec.profiles.is_empty() {
        let profiles: Vec<String> = spec.profiles.iter().map(|p| p.slug.clone()).collect();
        attributes.insert("profiles".to_string(), profiles);
    }
    GroupRepresentation {
        name: project_group_name(project),
        attributes,
        ..Default::default()
    }
}

/// Create or converge the group backing a project.
pub(crate) async fn sync_project(
    kc: &dyn KeycloakAdminTrait,
    project: &str,
    spec: &ProjectSpec,
) -> Result<String, KeycloakError> {
    let desired = desired_project_group(project, spec);
    match kc.get_group_by_name(&desired.name).await? {
        Some(existing) => {
            let id = existing.id.clone().ok_or_else(|| {
                KeycloakError::InvalidRequest(format!("group {} has no id", desired.name))
            })?;
            if existing.attributes != desired.attributes {
                kc.update_group(&id, &desired).await?;
            }
            Ok(id)
        }
        None => kc.create_group(&desired).await,
    }
}

/// Describe what [`sync_project`] would do, without writing anything.
pub(crate) async fn plan_project(
    kc: &dyn KeycloakAdminTrait,
    project: &str,
    spec: &ProjectSpec,
) -> Result<String, KeycloakError> {
    let desired = desired_project_group(project, spec);
    match kc.get_group_by_name(&desired.name).await? {
        Some(existing) => Ok(if existing.attributes != desired.attributes {
            format!("would update group {}", desired.name)
        } else {
            format!("would leave group {} unchanged", desired.name)
        }),
        None => Ok(format!("would create group {}", desired.name)),
    }
}

/// Remove the project group if it still exists.
pub(crate) async fn teardown_project(
    kc: &dyn KeycloakAdminTrait,
    project: &str,
) -> Result<(), KeycloakError> {
    let name = project_group_name(project);
    if let Some(group) = kc.get_group_by_name(&name).await? {
        if let Some(id) = group.id {
            kc.delete_group(&id).await?;
        }
    }
    Ok(())
}

/// VDIInstances that still reference `project` and are not being deleted.
pub(crate) fn project_dependents(project: &str, instances: &[VDIInstance]) -> Vec<String> {
    let mut dependents: Vec<String> = instances
        .iter()
        .filter(|vdi| vdi.metadata.deletion_timestamp.is_none() && vdi.spec.project == project)
        .map(ResourceExt::name_any)
        .collect();
    dependents.sort();
    dependents
}

impl Reconciler {
    /// Reconcile one Project resource.
    pub async fn reconcile_project(&self, project: &Project) -> Result<(), ControllerError> {
        let name = project.name_any();
        let namespace = project.namespace().unwrap_or_else(|| "default".to_string());
        let key = format!("Project/{namespace}/{name}");
        let generation = project.metadata.generation;
        let mut status = project.status.clone().unwrap_or_default();

        if deletion_requested(&project.metadata) {
            if !has_finalizer(&project.metadata) {
                return Ok(());
            }
            let instances = self.vdi_api.list(&Default::default()).await?;
            let dependents = project_dependents(&name, &instances.items);
            if !dependents.is_empty() {
                let message = format!("blocked by VDI instances: {}", dependents.join(", "));
                status.phase = ResourcePhase::Deleting;
                status.push_condition(Condition::new("CleanedUp", false, "DependentsPresent", &message));
                return self
                    .fail_or_degrade(
                        &self.project_api,
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
                if let Err(e) = teardown_project(self.keycloak.as_ref(), &name).await {
                    return self
                        .fail_or_degrade(&self.project_api, &name, &key, generation, status, e.into())
                        .await;
                }
            } else {
                status.push_condition(Condition::new(
                    "DryRun",
                    true,
                    "PostingDisabled",
                    format!("would delete group {}", project_group_name(&name)),
                ));
            }
            return self
                .finish_teardown(&self.project_api, &name, &key, &project.metadata, status)
                .await;
        }

        self.ensure_finalizer(&self.project_api, &name, &project.metadata).await?;

        let hash = spec_hash(&project.spec);
        if !needs_sync(project.status.as_ref(), &hash, generation) {
            // A Ready status may outlive the backing group; Degraded stays parked.
            let drifted = status.phase == ResourcePhase::Ready
                && self.keycloak.get_group_by_name(&project_group_name(&name)).await?.is_none();
            if !drifted {
                debug!(resource = %key, "nothing to sync");
                return Ok(());
            }
            warn!(resource = %key, "project group missing from keycloak, recreating");
        }

        status.phase = ResourcePhase::Validating;
        if let Err(e) = self.validate("Project", &project.spec) {
            status.push_condition(Condition::new("Validated", false, "SchemaViolation", e.to_string()));
            return self.fail_or_degrade(&self.project_api, &name, &key, generation, status, e).await;
        }
        status.push_condition(Condition::new("Validated", true, "SchemaValid", "spec matches model"));
        status.phase = ResourcePhase::Syncing;

        if !self.settings.posting_enabled {
            let summary = match plan_project(self.keycloak.as_ref(), &name, &project.spec).await {
                Ok(summary) => summary,
                Err(e) => {
                    return self
                        .fail_or_degrade(&self.project_api, &name, &key, generation, status, e.into())
                        .await;
                }
            };
            status.push_condition(Condition::new("DryRun", true, "PostingDisabled", summary));
            touch(&mut status, generation);
            self.patch_status(&self.project_api, &name, &status).await?;
            self.record_success(&key);
            return Ok(());
        }

        match sync_project(self.keycloak.as_ref(), &name, &project.spec).await {
            Ok(group_id) => {
                info!(resource = %key, group_id = %group_id, "project converged");
                status.phase = ResourcePhase::Ready;
                status.external_key = Some(project_group_name(&name));
                status.applied_hash = Some(hash);
                status.error = None;
                status.push_condition(Condition::new("Synced", true, "Converged", "project group converged"));
                touch(&mut status, generation);
                self.patch_status(&self.project_api, &name, &status).await?;
                self.record_success(&key);
                Ok(())
            }
            Err(e) => {
                self.fail_or_degrade(&self.project_api, &name, &key, generation, status, e.into())
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{AppConfig, ProfileConfig, VDIInstanceSpec};
    use keycloak_client::MockKeycloakAdminClient;

    fn project_spec() -> ProjectSpec {
        ProjectSpec {
            description: "Genome study".to_string(),
            apps: vec![AppConfig {
                name: "jupyter".to_string(),
                type_: "web".to_string(),
                url: "https://jupyter.example.org".to_string(),
                ..Default::default()
            }],
            profiles: vec![ProfileConfig {
                display_name: "Analyst".to_string(),
                description: None,
                slug: "analyst".to_string(),
            }],
        }
    }

    #[tokio::test]
    async fn test_sync_project_creates_prefixed_group() {
        let mock = MockKeycloakAdminClient::new("karectl");
        sync_project(&mock, "genome", &project_spec()).await.unwrap();

        assert!(mock.has_group("project-genome"));
        let group = mock.get_group_by_name("project-genome").await.unwrap().unwrap();
        assert_eq!(group.attributes["description"], vec!["Genome study"]);
        assert_eq!(group.attributes["apps"], vec!["jupyter"]);
        assert_eq!(group.attributes["profiles"], vec!["analyst"]);
    }

    #[tokio::test]
    async fn test_sync_project_is_idempotent() {
        let mock = MockKeycloakAdminClient::new("karectl");
        let spec = project_spec();
        let first = sync_project(&mock, "genome", &spec).await.unwrap();
        let second = sync_project(&mock, "genome", &spec).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(mock.call_count("create_group"), 1);
        assert_eq!(mock.call_count("update_group"), 0);
    }

    #[tokio::test]
    async fn test_sync_recreates_project_group_deleted_out_of_band() {
        let mock = MockKeycloakAdminClient::new("karectl");
        let spec = project_spec();
        let id = sync_project(&mock, "genome", &spec).await.unwrap();

        mock.delete_group(&id).await.unwrap();
        assert!(mock.get_group_by_name("project-genome").await.unwrap().is_none());

        sync_project(&mock, "genome", &spec).await.unwrap();
        assert!(mock.has_group("project-genome"));
        assert_eq!(mock.call_count("create_group"), 2);
    }

    #[tokio::test]
    async fn test_sync_project_converges_attribute_drift() {
        let mock = MockKeycloakAdminClient::new("karectl");
        mock.add_group(GroupRepresentation {
            name: "project-genome".to_string(),
            ..Default::default()
        });
        sync_project(&mock, "genome", &project_spec()).await.unwrap();
        assert_eq!(mock.call_count("update_group"), 1);
    }

    #[tokio::test]
    async fn test_plan_project_reports_without_writing() {
        let mock = MockKeycloakAdminClient::new("karectl");
        let spec = project_spec();

        let plan = plan_project(&mock, "genome", &spec).await.unwrap();
        assert_eq!(plan, "would create group project-genome");
        assert!(!mock.has_group("project-genome"));
        assert_eq!(mock.call_count("create_group"), 0);

        sync_project(&mock, "genome", &spec).await.unwrap();
        let plan = plan_project(&mock, "genome", &spec).await.unwrap();
        assert_eq!(plan, "would leave group project-genome unchanged");

        let mut drifted = spec;
        drifted.description = "Genome study, phase two".to_string();
        let plan = plan_project(&mock, "genome", &drifted).await.unwrap();
        assert_eq!(plan, "would update group project-genome");
        assert_eq!(mock.call_count("update_group"), 0);
    }

    #[tokio::test]
    async fn test_teardown_project_is_idempotent() {
        let mock = MockKeycloakAdminClient::new("karectl");
        sync_project(&mock, "genome", &project_spec()).await.unwrap();

        teardown_project(&mock, "genome").await.unwrap();
        assert!(!mock.has_group("project-genome"));
        teardown_project(&mock, "genome").await.unwrap();
        assert_eq!(mock.call_count("delete_group"), 1);
    }

    #[test]
    fn test_project_dependents_filters_by_project_and_deletion() {
        use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

        let active = VDIInstance::new(
            "vdi-ada",
            VDIInstanceSpec {
                user: "ada".to_string(),
                project: "genome".to_string(),
                ..Default::default()
            },
        );
        let other = VDIInstance::new(
            "vdi-bob",
            VDIInstanceSpec {
                user: "bob".to_string(),
                project: "climate".to_string(),
                ..Default::default()
            },
        );
        let mut leaving = VDIInstance::new(
            "vdi-eve",
            VDIInstanceSpec {
                user: "eve".to_string(),
                project: "genome".to_string(),
                ..Default::default()
            },
        );
        leaving.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));

        let instances = vec![active, other, leaving];
        assert_eq!(project_dependents("genome", &instances), vec!["vdi-ada"]);
        assert!(project_dependents("unknown", &instances).is_empty());
    }
}
