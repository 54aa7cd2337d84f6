//! Keycloak admin API data models
//!
//! Representations follow the Keycloak admin REST API wire format
//! (camelCase, most fields optional). Only the fields the controllers
//! actually reconcile are modelled.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A realm user
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserRepresentation {
    /// Server-assigned UUID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Natural key within the realm
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, Vec<String>>,
}

/// A credential attached to a user, as sent to the reset-password endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRepresentation {
    #[serde(rename = "type")]
    pub credential_type: String,
    pub value: String,
    /// Force a password change on first login
    pub temporary: bool,
}

impl CredentialRepresentation {
    /// A temporary password the user must rotate at first login
    pub fn temporary_password(value: impl Into<String>) -> Self {
        Self {
            credential_type: "password".to_string(),
            value: value.into(),
            temporary: true,
        }
    }
}

/// A realm group
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GroupRepresentation {
    /// Server-assigned UUID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Natural key within the realm
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, Vec<String>>,
}

/// An OIDC client registration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientRepresentation {
    /// Server-assigned UUID (distinct from the clientId natural key)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Natural key within the realm
    pub client_id: String,
    pub enabled: bool,
    pub public_client: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub redirect_uris: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub web_origins: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, String>,
    /// Scope names assigned as defaults on every token
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub default_client_scopes: Vec<String>,
    /// Token claim mappers; accepted inline on client create and update
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub protocol_mappers: Vec<ProtocolMapperRepresentation>,
    /// Confidential client secret; only round-tripped when explicitly set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

/// A protocol mapper attached to a client
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolMapperRepresentation {
    /// Server-assigned UUID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Natural key within the client
    pub name: String,
    pub protocol: String,
    /// Mapper implementation id, e.g. "oidc-usermodel-attribute-mapper"
    pub protocol_mapper: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub config: HashMap<String, String>,
}

/// Token endpoint response for the admin password grant
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Lifetime in seconds
    pub expires_in: u64,
}

/// Generate a random temporary password for a newly created user.
///
/// Mixed-case alphanumerics plus a few symbols, long enough to satisfy
/// typical realm password policies.
pub fn generate_temp_password(length: usize) -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz23456789!@#%^&*";
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_serializes_camel_case() {
        let user = UserRepresentation {
            username: "ada".to_string(),
            email: Some("ada@example.org".to_string()),
            enabled: true,
            first_name: Some("Ada".to_string()),
            ..Default::default()
        };
        let value = serde_json::to_value(&user).unwrap();
        assert_eq!(value["username"], "ada");
        assert_eq!(value["firstName"], "Ada");
        // unset fields stay off the wire
        assert!(value.get("id").is_none());
        assert!(value.get("lastName").is_none());
    }

    #[test]
    fn test_temp_password_length_and_charset() {
        let password = generate_temp_password(16);
        assert_eq!(password.len(), 16);
        assert!(password.chars().all(|c| c.is_ascii_graphic()));
        // two draws almost never collide
        assert_ne!(password, generate_temp_password(16));
    }
}
