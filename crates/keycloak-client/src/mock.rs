//! Mock Keycloak client for unit testing
//!
//! In-memory implementation of KeycloakAdminTrait. Stores resources keyed by
//! their server UUID, counts every call by method name, and can be told to
//! fail named methods for error-path tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::error::KeycloakError;
use crate::keycloak_trait::KeycloakAdminTrait;
use crate::models::*;

/// Mock admin client for testing
#[derive(Clone)]
pub struct MockKeycloakAdminClient {
    base_url: String,
    realm: String,
    users: Arc<Mutex<HashMap<String, UserRepresentation>>>,
    groups: Arc<Mutex<HashMap<String, GroupRepresentation>>>,
    clients: Arc<Mutex<HashMap<String, ClientRepresentation>>>,
    /// user id -> group ids
    memberships: Arc<Mutex<HashMap<String, HashSet<String>>>>,
    /// user id -> credentials set on it, newest last
    credentials: Arc<Mutex<HashMap<String, Vec<CredentialRepresentation>>>>,
    realms: Arc<Mutex<HashSet<String>>>,
    calls: Arc<Mutex<HashMap<String, usize>>>,
    fail_methods: Arc<Mutex<HashSet<String>>>,
    next_id: Arc<Mutex<u64>>,
}

impl MockKeycloakAdminClient {
    /// Create a new mock client
    pub fn new(realm: impl Into<String>) -> Self {
        Self {
            base_url: "http://keycloak.test".to_string(),
            realm: realm.into(),
            users: Arc::new(Mutex::new(HashMap::new())),
            groups: Arc::new(Mutex::new(HashMap::new())),
            clients: Arc::new(Mutex::new(HashMap::new())),
            memberships: Arc::new(Mutex::new(HashMap::new())),
            credentials: Arc::new(Mutex::new(HashMap::new())),
            realms: Arc::new(Mutex::new(HashSet::new())),
            calls: Arc::new(Mutex::new(HashMap::new())),
            fail_methods: Arc::new(Mutex::new(HashSet::new())),
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    fn allocate_id(&self) -> String {
        let mut next = self.next_id.lock().unwrap();
        let id = format!("mock-{:04}", *next);
        *next += 1;
        id
    }

    fn record(&self, method: &str) -> Result<(), KeycloakError> {
        *self.calls.lock().unwrap().entry(method.to_string()).or_insert(0) += 1;
        if self.fail_methods.lock().unwrap().contains(method) {
            return Err(KeycloakError::Api {
                status: 503,
                message: format!("mock failure injected for {method}"),
            });
        }
        Ok(())
    }

    /// How many times a trait method was invoked
    pub fn call_count(&self, method: &str) -> usize {
        self.calls.lock().unwrap().get(method).copied().unwrap_or(0)
    }

    /// Make the named method return a 503 until cleared
    pub fn fail_method(&self, method: &str) {
        self.fail_methods.lock().unwrap().insert(method.to_string());
    }

    /// Stop failing the named method
    pub fn clear_failure(&self, method: &str) {
        self.fail_methods.lock().unwrap().remove(method);
    }

    /// Seed a group (for test setup); returns its id
    pub fn add_group(&self, group: GroupRepresentation) -> String {
        let id = group.id.clone().unwrap_or_else(|| self.allocate_id());
        let mut group = group;
        group.id = Some(id.clone());
        group.path.get_or_insert_with(|| format!("/{}", group.name));
        self.groups.lock().unwrap().insert(id.clone(), group);
        id
    }

    /// Seed a user (for test setup); returns its id
    pub fn add_user(&self, user: UserRepresentation) -> String {
        let id = user.id.clone().unwrap_or_else(|| self.allocate_id());
        let mut user = user;
        user.id = Some(id.clone());
        self.users.lock().unwrap().insert(id.clone(), user);
        id
    }

    /// Group ids a user belongs to (for assertions)
    pub fn memberships_of(&self, user_id: &str) -> HashSet<String> {
        self.memberships
            .lock()
            .unwrap()
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Credentials set on a user, in order (for assertions)
    pub fn credentials_of(&self, user_id: &str) -> Vec<CredentialRepresentation> {
        self.credentials
            .lock()
            .unwrap()
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Whether a user with the given username exists (for assertions)
    pub fn has_user(&self, username: &str) -> bool {
        self.users.lock().unwrap().values().any(|u| u.username == username)
    }

    /// Whether a group with the given name exists (for assertions)
    pub fn has_group(&self, name: &str) -> bool {
        self.groups.lock().unwrap().values().any(|g| g.name == name)
    }

    /// Whether a client with the given clientId exists (for assertions)
    pub fn has_client(&self, client_id: &str) -> bool {
        self.clients.lock().unwrap().values().any(|c| c.client_id == client_id)
    }

    /// Mark the scoped realm as already provisioned (for test setup)
    pub fn seed_realm(&self) {
        self.realms.lock().unwrap().insert(self.realm.clone());
    }

    /// Whether the scoped realm exists (for assertions)
    pub fn has_realm(&self) -> bool {
        self.realms.lock().unwrap().contains(&self.realm)
    }
}

#[async_trait::async_trait]
impl KeycloakAdminTrait for MockKeycloakAdminClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn realm(&self) -> &str {
        &self.realm
    }

    async fn ping(&self) -> Result<(), KeycloakError> {
        self.record("ping")
    }

    async fn ensure_realm(&self) -> Result<bool, KeycloakError> {
        self.record("ensure_realm")?;
        Ok(self.realms.lock().unwrap().insert(self.realm.clone()))
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<UserRepresentation>, KeycloakError> {
        self.record("get_user_by_username")?;
        Ok(self
            .users
            .lock()
            .unwrap()
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn create_user(&self, user: &UserRepresentation) -> Result<String, KeycloakError> {
        self.record("create_user")?;
        let users = self.users.lock().unwrap();
        if users.values().any(|u| u.username == user.username) {
            return Err(KeycloakError::Conflict(format!("username {} exists", user.username)));
        }
        drop(users);
        let id = self.allocate_id();
        let mut stored = user.clone();
        stored.id = Some(id.clone());
        self.users.lock().unwrap().insert(id.clone(), stored);
        Ok(id)
    }

    async fn update_user(&self, id: &str, user: &UserRepresentation) -> Result<(), KeycloakError> {
        self.record("update_user")?;
        let mut users = self.users.lock().unwrap();
        if !users.contains_key(id) {
            return Err(KeycloakError::NotFound(format!("user {id}")));
        }
        let mut stored = user.clone();
        stored.id = Some(id.to_string());
        users.insert(id.to_string(), stored);
        Ok(())
    }

    async fn delete_user(&self, id: &str) -> Result<(), KeycloakError> {
        self.record("delete_user")?;
        self.users.lock().unwrap().remove(id);
        self.memberships.lock().unwrap().remove(id);
        Ok(())
    }

    async fn reset_password(&self, id: &str, credential: &CredentialRepresentation) -> Result<(), KeycloakError> {
        self.record("reset_password")?;
        if !self.users.lock().unwrap().contains_key(id) {
            return Err(KeycloakError::NotFound(format!("user {id}")));
        }
        self.credentials
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_default()
            .push(credential.clone());
        Ok(())
    }

    async fn list_user_groups(&self, id: &str) -> Result<Vec<GroupRepresentation>, KeycloakError> {
        self.record("list_user_groups")?;
        let memberships = self.memberships.lock().unwrap();
        let groups = self.groups.lock().unwrap();
        let mut result: Vec<GroupRepresentation> = memberships
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|gid| groups.get(gid).cloned())
            .collect();
        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    async fn add_user_to_group(&self, user_id: &str, group_id: &str) -> Result<(), KeycloakError> {
        self.record("add_user_to_group")?;
        if !self.groups.lock().unwrap().contains_key(group_id) {
            return Err(KeycloakError::NotFound(format!("group {group_id}")));
        }
        self.memberships
            .lock()
            .unwrap()
            .entry(user_id.to_string())
            .or_default()
            .insert(group_id.to_string());
        Ok(())
    }

    async fn remove_user_from_group(&self, user_id: &str, group_id: &str) -> Result<(), KeycloakError> {
        self.record("remove_user_from_group")?;
        if let Some(groups) = self.memberships.lock().unwrap().get_mut(user_id) {
            groups.remove(group_id);
        }
        Ok(())
    }

    async fn get_group_by_name(&self, name: &str) -> Result<Option<GroupRepresentation>, KeycloakError> {
        self.record("get_group_by_name")?;
        Ok(self
            .groups
            .lock()
            .unwrap()
            .values()
            .find(|g| g.name == name)
            .cloned())
    }

    async fn create_group(&self, group: &GroupRepresentation) -> Result<String, KeycloakError> {
        self.record("create_group")?;
        if self.groups.lock().unwrap().values().any(|g| g.name == group.name) {
            return Err(KeycloakError::Conflict(format!("group {} exists", group.name)));
        }
        let id = self.allocate_id();
        let mut stored = group.clone();
        stored.id = Some(id.clone());
        stored.path.get_or_insert_with(|| format!("/{}", group.name));
        self.groups.lock().unwrap().insert(id.clone(), stored);
        Ok(id)
    }

    async fn update_group(&self, id: &str, group: &GroupRepresentation) -> Result<(), KeycloakError> {
        self.record("update_group")?;
        let mut groups = self.groups.lock().unwrap();
        if !groups.contains_key(id) {
            return Err(KeycloakError::NotFound(format!("group {id}")));
        }
        let mut stored = group.clone();
        stored.id = Some(id.to_string());
        groups.insert(id.to_string(), stored);
        Ok(())
    }

    async fn delete_group(&self, id: &str) -> Result<(), KeycloakError> {
        self.record("delete_group")?;
        self.groups.lock().unwrap().remove(id);
        for members in self.memberships.lock().unwrap().values_mut() {
            members.remove(id);
        }
        Ok(())
    }

    async fn get_client_by_client_id(&self, client_id: &str) -> Result<Option<ClientRepresentation>, KeycloakError> {
        self.record("get_client_by_client_id")?;
        Ok(self
            .clients
            .lock()
            .unwrap()
            .values()
            .find(|c| c.client_id == client_id)
            .cloned())
    }

    async fn create_client(&self, client: &ClientRepresentation) -> Result<String, KeycloakError> {
        self.record("create_client")?;
        if self.clients.lock().unwrap().values().any(|c| c.client_id == client.client_id) {
            return Err(KeycloakError::Conflict(format!("clientId {} exists", client.client_id)));
        }
        let id = self.allocate_id();
        let mut stored = client.clone();
        stored.id = Some(id.clone());
        self.clients.lock().unwrap().insert(id.clone(), stored);
        Ok(id)
    }

    async fn update_client(&self, id: &str, client: &ClientRepresentation) -> Result<(), KeycloakError> {
        self.record("update_client")?;
        let mut clients = self.clients.lock().unwrap();
        if !clients.contains_key(id) {
            return Err(KeycloakError::NotFound(format!("client {id}")));
        }
        let mut stored = client.clone();
        stored.id = Some(id.to_string());
        clients.insert(id.to_string(), stored);
        Ok(())
    }

    async fn delete_client(&self, id: &str) -> Result<(), KeycloakError> {
        self.record("delete_client")?;
        self.clients.lock().unwrap().remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_user_lifecycle() {
        let mock = MockKeycloakAdminClient::new("karectl");
        let user = UserRepresentation {
            username: "ada".to_string(),
            enabled: true,
            ..Default::default()
        };

        let id = mock.create_user(&user).await.unwrap();
        assert!(mock.has_user("ada"));
        assert!(matches!(
            mock.create_user(&user).await,
            Err(KeycloakError::Conflict(_))
        ));

        mock.delete_user(&id).await.unwrap();
        assert!(!mock.has_user("ada"));
        assert_eq!(mock.call_count("create_user"), 2);
    }

    #[tokio::test]
    async fn test_membership_follows_group_deletion() {
        let mock = MockKeycloakAdminClient::new("karectl");
        let user_id = mock.add_user(UserRepresentation {
            username: "ada".to_string(),
            enabled: true,
            ..Default::default()
        });
        let group_id = mock.add_group(GroupRepresentation {
            name: "engineering".to_string(),
            ..Default::default()
        });

        mock.add_user_to_group(&user_id, &group_id).await.unwrap();
        assert_eq!(mock.list_user_groups(&user_id).await.unwrap().len(), 1);

        mock.delete_group(&group_id).await.unwrap();
        assert!(mock.list_user_groups(&user_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ensure_realm_creates_once() {
        let mock = MockKeycloakAdminClient::new("karectl");
        assert!(!mock.has_realm());
        assert!(mock.ensure_realm().await.unwrap());
        assert!(mock.has_realm());
        // second pass finds the realm and leaves it alone
        assert!(!mock.ensure_realm().await.unwrap());
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let mock = MockKeycloakAdminClient::new("karectl");
        mock.fail_method("ping");
        assert!(mock.ping().await.is_err());
        mock.clear_failure("ping");
        assert!(mock.ping().await.is_ok());
    }
}
