//! User CRD
//!
//! A platform account mirrored into the identity provider, keyed by username.

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
    kind = "User",
    plural = "users",
    namespaced,
    status = "SyncStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct UserSpec {
    /// Unique username, the natural key in the identity provider
    pub username: String,

    /// Email address
    pub email: String,

    /// Whether the account is enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Names of Group resources this user belongs to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

/// Model descriptor for the User kind.
#[must_use]
pub fn descriptor() -> ModelDescriptor {
    ModelDescriptor::new("identity.karectl.io", "v1alpha1", "User", "users")
        .field(
            FieldDescriptor::required("username", FieldType::String)
                .describe("Unique username for the user"),
        )
        .field(
            FieldDescriptor::required("email", FieldType::String)
                .describe("Email address of the user"),
        )
        .field(
            FieldDescriptor::optional("enabled", FieldType::Boolean)
                .with_default(json!(true))
                .describe("Whether the user is enabled"),
        )
        .field(
            FieldDescriptor::optional("groups", FieldType::Array(Box::new(FieldType::String)))
                .describe("List of groups the user belongs to"),
        )
        .references("groups", "Group")
}
