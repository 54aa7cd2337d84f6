//! VDIInstance CRD
//!
//! A virtual-desktop session for a user within a project. The controller owns
//! the backing Pod and Service.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::conditions::SyncStatus;
use crate::registry::{FieldDescriptor, FieldType, ModelDescriptor};

/// Default desktop container image.
pub const DEFAULT_VDI_IMAGE: &str = "ghcr.io/karectl/vdi-mate:dev";

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "karectl.io",
    version = "v1alpha1",
    kind = "VDIInstance",
    plural = "vdiinstances",
    namespaced,
    status = "SyncStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct VDIInstanceSpec {
    /// Username the desktop belongs to
    pub user: String,

    /// Project resource name the desktop runs under
    pub project: String,

    /// Container image for the desktop
    #[serde(default = "default_image")]
    pub image: String,

    /// Connection type (rdp, vnc)
    #[serde(default = "default_connection")]
    pub connection: String,

    /// Environment variables injected into the desktop container
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvironmentVariable>,

    /// Resource requests and limits
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resources: BTreeMap<String, serde_json::Value>,
}

/// One environment variable for the desktop container.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentVariable {
    /// Variable name
    pub name: String,

    /// Variable value
    pub value: String,
}

fn default_image() -> String {
    DEFAULT_VDI_IMAGE.to_string()
}

fn default_connection() -> String {
    "rdp".to_string()
}

/// Model descriptor for the VDIInstance kind.
#[must_use]
pub fn descriptor() -> ModelDescriptor {
    ModelDescriptor::new("karectl.io", "v1alpha1", "VDIInstance", "vdiinstances")
        .field(
            FieldDescriptor::required("user", FieldType::String)
                .describe("Username for the VDI instance"),
        )
        .field(
            FieldDescriptor::required("project", FieldType::String)
                .describe("Project name for the VDI instance"),
        )
        .field(
            FieldDescriptor::optional("image", FieldType::String)
                .with_default(json!(DEFAULT_VDI_IMAGE))
                .describe("Container image to use for the VDI"),
        )
        .field(
            FieldDescriptor::optional("connection", FieldType::String)
                .with_default(json!("rdp"))
                .describe("Connection type (rdp, vnc, etc.)"),
        )
        .field(
            FieldDescriptor::optional(
                "env",
                FieldType::Array(Box::new(FieldType::Object(vec![
                    FieldDescriptor::required("name", FieldType::String),
                    FieldDescriptor::required("value", FieldType::String),
                ]))),
            )
            .describe("Environment variables to set in the VDI container"),
        )
        .field(
            FieldDescriptor::optional("resources", FieldType::Map)
                .describe("Resource requests and limits"),
        )
        .references("user", "User")
        .references("project", "Project")
}
