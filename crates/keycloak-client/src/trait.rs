//! KeycloakAdmin trait for mocking
//!
//! Abstracts the admin API client so reconcilers can be unit tested against
//! an in-memory mock. All async methods must be `Send` to work with Tokio's
//! work-stealing runtime.

use crate::error::KeycloakError;
use crate::models::*;

/// Trait for Keycloak admin API operations
///
/// Every lookup uses the natural key (username, group name, clientId);
/// mutations use the server-assigned UUID returned by the lookup or create.
#[async_trait::async_trait]
pub trait KeycloakAdminTrait: Send + Sync {
    /// Base URL of the Keycloak server
    fn base_url(&self) -> &str;

    /// Realm all operations are scoped to
    fn realm(&self) -> &str;

    /// Validate connectivity and admin credentials
    async fn ping(&self) -> Result<(), KeycloakError>;

    /// Create the scoped realm if it does not exist yet; returns true if created
    async fn ensure_realm(&self) -> Result<bool, KeycloakError>;

    // User operations
    async fn get_user_by_username(&self, username: &str) -> Result<Option<UserRepresentation>, KeycloakError>;
    async fn create_user(&self, user: &UserRepresentation) -> Result<String, KeycloakError>;
    async fn update_user(&self, id: &str, user: &UserRepresentation) -> Result<(), KeycloakError>;
    async fn delete_user(&self, id: &str) -> Result<(), KeycloakError>;
    async fn reset_password(&self, id: &str, credential: &CredentialRepresentation) -> Result<(), KeycloakError>;
    async fn list_user_groups(&self, id: &str) -> Result<Vec<GroupRepresentation>, KeycloakError>;
    async fn add_user_to_group(&self, user_id: &str, group_id: &str) -> Result<(), KeycloakError>;
    async fn remove_user_from_group(&self, user_id: &str, group_id: &str) -> Result<(), KeycloakError>;

    // Group operations
    async fn get_group_by_name(&self, name: &str) -> Result<Option<GroupRepresentation>, KeycloakError>;
    async fn create_group(&self, group: &GroupRepresentation) -> Result<String, KeycloakError>;
    async fn update_group(&self, id: &str, group: &GroupRepresentation) -> Result<(), KeycloakError>;
    async fn delete_group(&self, id: &str) -> Result<(), KeycloakError>;

    // Client operations
    async fn get_client_by_client_id(&self, client_id: &str) -> Result<Option<ClientRepresentation>, KeycloakError>;
    async fn create_client(&self, client: &ClientRepresentation) -> Result<String, KeycloakError>;
    async fn update_client(&self, id: &str, client: &ClientRepresentation) -> Result<(), KeycloakError>;
    async fn delete_client(&self, id: &str) -> Result<(), KeycloakError>;
}
