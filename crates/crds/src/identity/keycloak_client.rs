//! KeycloakClient CRD
//!
//! An OIDC client registration in the identity provider, keyed by clientId.

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
    kind = "KeycloakClient",
    plural = "keycloakclients",
    namespaced,
    status = "SyncStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct KeycloakClientSpec {
    /// Unique client identifier, the natural key in the identity provider
    pub client_id: String,

    /// Whether the client is enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Whether this is a public client (no secret)
    #[serde(default)]
    pub public_client: bool,

    /// Valid redirect URIs for the client
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub redirect_uris: Vec<String>,

    /// Valid web origins for CORS
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub web_origins: Vec<String>,

    /// Authentication protocol
    #[serde(default = "default_protocol")]
    pub protocol: String,

    /// Additional client attributes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, serde_json::Value>,

    /// Client scopes assigned as defaults on every token
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub default_client_scopes: Vec<String>,

    /// Protocol mappers shaping the tokens this client issues
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub protocol_mappers: Vec<ProtocolMapper>,

    /// Kubernetes Secret holding the confidential client secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<SecretKeyRef>,
}

/// A protocol mapper attached to a client.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolMapper {
    /// Mapper name, unique within the client
    pub name: String,

    /// Protocol the mapper applies to
    #[serde(default = "default_protocol")]
    pub protocol: String,

    /// Mapper implementation, e.g. "oidc-usermodel-attribute-mapper"
    pub protocol_mapper: String,

    /// Implementation-specific configuration
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, String>,
}

/// Reference to a key inside a Kubernetes Secret.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyRef {
    /// Secret name
    pub name: String,

    /// Key within the Secret data
    #[serde(default = "default_secret_key")]
    pub key: String,
}

fn default_enabled() -> bool {
    true
}

fn default_protocol() -> String {
    "openid-connect".to_string()
}

fn default_secret_key() -> String {
    "client-secret".to_string()
}

/// Model descriptor for the KeycloakClient kind.
#[must_use]
pub fn descriptor() -> ModelDescriptor {
    ModelDescriptor::new("identity.karectl.io", "v1alpha1", "KeycloakClient", "keycloakclients")
        .field(
            FieldDescriptor::required("clientId", FieldType::String)
                .describe("Unique client identifier"),
        )
        .field(
            FieldDescriptor::optional("enabled", FieldType::Boolean)
                .with_default(json!(true))
                .describe("Whether the client is enabled"),
        )
        .field(
            FieldDescriptor::optional("publicClient", FieldType::Boolean)
                .with_default(json!(false))
                .describe("Whether this is a public client"),
        )
        .field(
            FieldDescriptor::optional(
                "redirectUris",
                FieldType::Array(Box::new(FieldType::String)),
            )
            .describe("Valid redirect URIs for the client"),
        )
        .field(
            FieldDescriptor::optional("webOrigins", FieldType::Array(Box::new(FieldType::String)))
                .describe("Valid web origins for CORS"),
        )
        .field(
            FieldDescriptor::optional("protocol", FieldType::String)
                .with_default(json!("openid-connect"))
                .describe("Authentication protocol"),
        )
        .field(
            FieldDescriptor::optional("attributes", FieldType::Map)
                .describe("Additional client attributes"),
        )
        .field(
            FieldDescriptor::optional(
                "defaultClientScopes",
                FieldType::Array(Box::new(FieldType::String)),
            )
            .describe("Client scopes assigned as defaults on every token"),
        )
        .field(
            FieldDescriptor::optional(
                "protocolMappers",
                FieldType::Array(Box::new(FieldType::Object(vec![
                    FieldDescriptor::required("name", FieldType::String),
                    FieldDescriptor::optional("protocol", FieldType::String)
                        .with_default(json!("openid-connect")),
                    FieldDescriptor::required("protocolMapper", FieldType::String),
                    FieldDescriptor::optional("config", FieldType::Map),
                ]))),
            )
            .describe("Protocol mappers shaping the tokens this client issues"),
        )
        .field(
            FieldDescriptor::optional(
                "secretRef",
                FieldType::Object(vec![
                    FieldDescriptor::required("name", FieldType::String),
                    FieldDescriptor::optional("key", FieldType::String)
                        .with_default(json!("client-secret")),
                ]),
            )
            .describe("Kubernetes Secret holding the client secret"),
        )
}
