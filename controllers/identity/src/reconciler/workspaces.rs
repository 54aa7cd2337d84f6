//! Reconciliation of VDIInstance resources.
//!
//! Each VDIInstance gets a desktop Pod and a Service exposing its remote
//! display port. Both carry an ownerReference back to the VDIInstance so
//! garbage collection cleans up anything the controller misses.

use k8s_openapi::api::core::v1::{Pod, Service};
use kube::ResourceExt;
use kube::api::PostParams;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crds::{Condition, ResourcePhase, VDIInstance};

use super::Reconciler;
use crate::error::ControllerError;
use crate::reconcile_helpers::{dependency_ready, deletion_requested, has_finalizer, needs_sync, spec_hash, touch};

/// Remote display port for a connection protocol.
pub(crate) fn connection_port(connection: &str) -> i32 {
    match connection {
        "vnc" => 5900,
        // "rdp" and anything the schema let through
        _ => 3389,
    }
}

/// Name of the Pod and Service backing a VDIInstance.
pub(crate) fn workspace_name(vdi_name: &str) -> String {
    format!("vdi-{vdi_name}")
}

fn owner_reference(vdi: &VDIInstance) -> Value {
    json!({
        "apiVersion": "karectl.io/v1alpha1",
        "kind": "VDIInstance",
        "name": vdi.name_any(),
        "uid": vdi.metadata.uid.clone().unwrap_or_default(),
        "controller": true,
        "blockOwnerDeletion": true,
    })
}

fn labels(vdi: &VDIInstance) -> Value {
    json!({
        "app.kubernetes.io/name": "vdi-workspace",
        "app.kubernetes.io/managed-by": "identity-controller",
        "karectl.io/vdi": vdi.name_any(),
        "karectl.io/user": vdi.spec.user,
        "karectl.io/project": vdi.spec.project,
    })
}

/// Render the desktop Pod for a VDIInstance.
pub(crate) fn render_pod(vdi: &VDIInstance, namespace: &str) -> Value {
    let port = connection_port(&vdi.spec.connection);
    let mut env = vec![
        json!({"name": "VDI_USER", "value": vdi.spec.user}),
        json!({"name": "VDI_PROJECT", "value": vdi.spec.project}),
        json!({"name": "VDI_CONNECTION", "value": vdi.spec.connection}),
    ];
    for variable in &vdi.spec.env {
        env.push(json!({"name": variable.name, "value": variable.value}));
    }

    let mut container = json!({
        "name": "desktop",
        "image": vdi.spec.image,
        "env": env,
        "ports": [{"name": "display", "containerPort": port}],
    });
    if !vdi.spec.resources.is_empty() {
        container["resources"] = json!(vdi.spec.resources);
    }

    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": workspace_name(&vdi.name_any()),
            "namespace": namespace,
            "labels": labels(vdi),
            "ownerReferences": [owner_reference(vdi)],
        },
        "spec": {
            "restartPolicy": "Always",
            "containers": [container],
        },
    })
}

/// Render the Service exposing a VDIInstance's display port.
pub(crate) fn render_service(vdi: &VDIInstance, namespace: &str) -> Value {
    let port = connection_port(&vdi.spec.connection);
    json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {
            "name": workspace_name(&vdi.name_any()),
            "namespace": namespace,
            "labels": labels(vdi),
            "ownerReferences": [owner_reference(vdi)],
        },
        "spec": {
            "selector": {"karectl.io/vdi": vdi.name_any()},
            "ports": [{"name": "display", "port": port, "targetPort": port}],
        },
    })
}

impl Reconciler {
    /// Reconcile one VDIInstance resource.
    ///
    /// Pods and Services are cluster-internal, so the posting gate does not
    /// apply here; it only guards identity-provider writes.
    pub async fn reconcile_vdi_instance(&self, vdi: &VDIInstance) -> Result<(), ControllerError> {
        let name = vdi.name_any();
        let namespace = vdi.namespace().unwrap_or_else(|| "default".to_string());
        let key = format!("VDIInstance/{namespace}/{name}");
        let generation = vdi.metadata.generation;
        let workspace = workspace_name(&name);
        let mut status = vdi.status.clone().unwrap_or_default();

        if deletion_requested(&vdi.metadata) {
            if !has_finalizer(&vdi.metadata) {
                return Ok(());
            }
            status.phase = ResourcePhase::Deleting;
            if self.pod_api.get_opt(&workspace).await?.is_some() {
                self.pod_api.delete(&workspace, &Default::default()).await?;
            }
            if self.service_api.get_opt(&workspace).await?.is_some() {
                self.service_api.delete(&workspace, &Default::default()).await?;
            }
            return self
                .finish_teardown(&self.vdi_api, &name, &key, &vdi.metadata, status)
                .await;
        }

        self.ensure_finalizer(&self.vdi_api, &name, &vdi.metadata).await?;

        let hash = spec_hash(&vdi.spec);
        if !needs_sync(vdi.status.as_ref(), &hash, generation) {
            // A Ready status may outlive the Pod; Degraded stays parked.
            let drifted = status.phase == ResourcePhase::Ready
                && self.pod_api.get_opt(&workspace).await?.is_none();
            if !drifted {
                debug!(resource = %key, "nothing to sync");
                return Ok(());
            }
            warn!(resource = %key, "workspace pod missing, recreating");
        }

        status.phase = ResourcePhase::Validating;
        if let Err(e) = self.validate("VDIInstance", &vdi.spec) {
            status.push_condition(Condition::new("Validated", false, "SchemaViolation", e.to_string()));
            return self.fail_or_degrade(&self.vdi_api, &name, &key, generation, status, e).await;
        }
        status.push_condition(Condition::new("Validated", true, "SchemaValid", "spec matches model"));

        // A workspace only starts once its project has converged.
        let project = self.project_api.get_opt(&vdi.spec.project).await?;
        let project_ready = dependency_ready(project.as_ref().and_then(|p| p.status.as_ref()));
        if !project_ready {
            let message = format!("project not ready: {}", vdi.spec.project);
            status.push_condition(Condition::new("DependenciesReady", false, "ProjectPending", &message));
            return self
                .fail_or_degrade(
                    &self.vdi_api,
                    &name,
                    &key,
                    generation,
                    status,
                    ControllerError::DependencyNotReady(message),
                )
                .await;
        }

        status.phase = ResourcePhase::Syncing;

        let result = self.ensure_workspace(vdi, &namespace, &workspace).await;
        match result {
            Ok(()) => {
                info!(resource = %key, workspace = %workspace, "workspace converged");
                status.phase = ResourcePhase::Ready;
                status.external_key = Some(workspace);
                status.applied_hash = Some(hash);
                status.error = None;
                status.push_condition(Condition::new("Synced", true, "Converged", "workspace pod and service present"));
                touch(&mut status, generation);
                self.patch_status(&self.vdi_api, &name, &status).await?;
                self.record_success(&key);
                Ok(())
            }
            Err(e) => self.fail_or_degrade(&self.vdi_api, &name, &key, generation, status, e).await,
        }
    }

    /// Make sure the workspace Pod and Service exist with the desired shape.
    async fn ensure_workspace(
        &self,
        vdi: &VDIInstance,
        namespace: &str,
        workspace: &str,
    ) -> Result<(), ControllerError> {
        let pp = PostParams::default();

        match self.pod_api.get_opt(workspace).await? {
            None => {
                let pod: Pod = serde_json::from_value(render_pod(vdi, namespace)).map_err(|e| {
                    ControllerError::InvalidConfig(format!("rendered pod invalid: {e}"))
                })?;
                self.pod_api.create(&pp, &pod).await?;
            }
            Some(existing) => {
                let current_image = existing
                    .spec
                    .as_ref()
                    .and_then(|s| s.containers.first())
                    .and_then(|c| c.image.as_deref());
                if current_image != Some(vdi.spec.image.as_str()) {
                    // Pods are immutable where it matters; delete and let the
                    // requeue recreate with the new image.
                    warn!(workspace, "pod image drifted, recreating");
                    self.pod_api.delete(workspace, &Default::default()).await?;
                    return Err(ControllerError::Watch(format!(
                        "workspace pod {workspace} is being recreated"
                    )));
                }
            }
        }

        if self.service_api.get_opt(workspace).await?.is_none() {
            let service: Service = serde_json::from_value(render_service(vdi, namespace))
                .map_err(|e| ControllerError::InvalidConfig(format!("rendered service invalid: {e}")))?;
            self.service_api.create(&pp, &service).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{DEFAULT_VDI_IMAGE, EnvironmentVariable, VDIInstanceSpec};

    fn vdi(connection: &str) -> VDIInstance {
        let mut vdi = VDIInstance::new(
            "ada-genome",
            VDIInstanceSpec {
                user: "ada".to_string(),
                project: "genome".to_string(),
                image: DEFAULT_VDI_IMAGE.to_string(),
                connection: connection.to_string(),
                env: vec![EnvironmentVariable {
                    name: "TZ".to_string(),
                    value: "UTC".to_string(),
                }],
                resources: Default::default(),
            },
        );
        vdi.metadata.uid = Some("uid-1234".to_string());
        vdi
    }

    #[test]
    fn test_connection_ports() {
        assert_eq!(connection_port("rdp"), 3389);
        assert_eq!(connection_port("vnc"), 5900);
        assert_eq!(connection_port("unknown"), 3389);
    }

    #[test]
    fn test_render_pod_shape() {
        let rendered = render_pod(&vdi("rdp"), "research");
        assert_eq!(rendered["metadata"]["name"], "vdi-ada-genome");
        assert_eq!(rendered["metadata"]["namespace"], "research");
        assert_eq!(rendered["metadata"]["ownerReferences"][0]["uid"], "uid-1234");
        assert_eq!(rendered["metadata"]["ownerReferences"][0]["kind"], "VDIInstance");
        assert_eq!(rendered["spec"]["containers"][0]["image"], DEFAULT_VDI_IMAGE);
        assert_eq!(rendered["spec"]["containers"][0]["ports"][0]["containerPort"], 3389);

        // controller-provided env comes first, spec env after
        let env = rendered["spec"]["containers"][0]["env"].as_array().unwrap();
        assert_eq!(env[0]["name"], "VDI_USER");
        assert_eq!(env[0]["value"], "ada");
        assert!(env.iter().any(|e| e["name"] == "TZ" && e["value"] == "UTC"));

        // parses into the typed Pod
        let pod: Pod = serde_json::from_value(rendered).unwrap();
        assert_eq!(pod.metadata.name.as_deref(), Some("vdi-ada-genome"));
    }

    #[test]
    fn test_render_pod_resources_passthrough() {
        let mut instance = vdi("rdp");
        instance.spec.resources.insert(
            "limits".to_string(),
            serde_json::json!({"memory": "4Gi", "cpu": "2"}),
        );
        let rendered = render_pod(&instance, "research");
        assert_eq!(
            rendered["spec"]["containers"][0]["resources"]["limits"]["memory"],
            "4Gi"
        );
    }

    #[test]
    fn test_render_service_selects_pod() {
        let rendered = render_service(&vdi("vnc"), "research");
        assert_eq!(rendered["metadata"]["name"], "vdi-ada-genome");
        assert_eq!(rendered["spec"]["selector"]["karectl.io/vdi"], "ada-genome");
        assert_eq!(rendered["spec"]["ports"][0]["port"], 5900);

        let service: Service = serde_json::from_value(rendered).unwrap();
        assert_eq!(service.metadata.name.as_deref(), Some("vdi-ada-genome"));
    }
}
