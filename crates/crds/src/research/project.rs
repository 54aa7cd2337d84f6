//! Project CRD
//!
//! A research project: declared applications, workspace profiles, and a
//! provider group (`project-<name>`) that gates access.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::conditions::SyncStatus;
use crate::registry::{FieldDescriptor, FieldType, ModelDescriptor};

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "research.karectl.io",
    version = "v1alpha1",
    kind = "Project",
    plural = "projects",
    namespaced,
    status = "SyncStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSpec {
    /// Human-readable project description
    pub description: String,

    /// Applications available in this project
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub apps: Vec<AppConfig>,

    /// Workspace profiles for this project
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub profiles: Vec<ProfileConfig>,
}

/// One application within a project.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// Application name
    pub name: String,

    /// Application type (e.g., jupyterhub, vdi)
    #[serde(rename = "type")]
    pub type_: String,

    /// URL endpoint for the application
    pub url: String,

    /// Application-specific configuration
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, serde_json::Value>,
}

/// One workspace profile within a project.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProfileConfig {
    /// Human-readable profile name
    pub display_name: String,

    /// Profile description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// URL-safe profile identifier
    pub slug: String,
}

/// Model descriptor for the Project kind.
#[must_use]
pub fn descriptor() -> ModelDescriptor {
    ModelDescriptor::new("research.karectl.io", "v1alpha1", "Project", "projects")
        .field(
            FieldDescriptor::required("description", FieldType::String)
                .describe("Human-readable project description"),
        )
        .field(
            FieldDescriptor::optional(
                "apps",
                FieldType::Array(Box::new(FieldType::Object(vec![
                    FieldDescriptor::required("name", FieldType::String),
                    FieldDescriptor::required("type", FieldType::String),
                    FieldDescriptor::required("url", FieldType::String),
                    FieldDescriptor::optional("config", FieldType::Map),
                ]))),
            )
            .describe("List of applications available in this project"),
        )
        .field(
            FieldDescriptor::optional(
                "profiles",
                FieldType::Array(Box::new(FieldType::Object(vec![
                    FieldDescriptor::required("displayName", FieldType::String),
                    FieldDescriptor::optional("description", FieldType::String),
                    FieldDescriptor::required("slug", FieldType::String),
                ]))),
            )
            .describe("List of workspace profiles for this project"),
        )
}
