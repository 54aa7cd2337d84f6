//! Group CRD
//!
//! A realm group in the identity provider, keyed by the resource name.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::conditions::SyncStatus;
use crate::registry::{FieldDescriptor, FieldType, ModelDescriptor};

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "identity.karectl.io",
    version = "v1alpha1",
    kind = "Group",
    plural = "groups",
    namespaced,
    status = "SyncStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct GroupSpec {
    /// Human-readable description of the group
    #[serde(default)]
    pub description: String,

    /// Additional attributes stored on the provider group
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, serde_json::Value>,

    /// Usernames that are members of this group
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<String>,

    /// Project names this group has access to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub projects: Vec<String>,
}

/// Model descriptor for the Group kind.
#[must_use]
pub fn descriptor() -> ModelDescriptor {
    ModelDescriptor::new("identity.karectl.io", "v1alpha1", "Group", "groups")
        .field(
            FieldDescriptor::optional("description", FieldType::String)
                .with_default(json!(""))
                .describe("Human-readable description of the group"),
        )
        .field(
            FieldDescriptor::optional("attributes", FieldType::Map)
                .describe("Additional attributes for the group"),
        )
        .field(
            FieldDescriptor::optional("members", FieldType::Array(Box::new(FieldType::String)))
                .describe("List of usernames that are members of this group"),
        )
        .field(
            FieldDescriptor::optional("projects", FieldType::Array(Box::new(FieldType::String)))
                .describe("List of projects that this group has access to"),
        )
        .references("members", "User")
        .references("projects", "Project")
}
