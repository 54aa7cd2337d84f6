//! Keycloak admin API client
//!
//! Implements the admin REST API under /admin/realms/{realm}/. Admin tokens
//! come from the password grant against the master realm and are cached until
//! shortly before expiry; a 401 on any call drops the cache and retries once
//! with a fresh token.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, Method, Response, StatusCode, header};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::KeycloakError;
use crate::keycloak_trait::KeycloakAdminTrait;
use crate::models::*;

/// Refresh the cached token this long before it actually expires.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 30;

struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// Keycloak admin API client
pub struct KeycloakAdminClient {
    client: Client,
    base_url: String,
    realm: String,
    admin_username: String,
    admin_password: String,
    token: RwLock<Option<CachedToken>>,
}

impl KeycloakAdminClient {
    /// Create a new admin client
    ///
    /// # Arguments
    /// * `base_url` - Keycloak base URL (e.g., "http://keycloak:8080")
    /// * `admin_username` / `admin_password` - master realm admin credentials
    /// * `realm` - realm all operations are scoped to
    /// * `verify_tls` - disable only against dev instances with self-signed certs
    pub fn new(
        base_url: String,
        admin_username: String,
        admin_password: String,
        realm: String,
        verify_tls: bool,
    ) -> Result<Self, KeycloakError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .danger_accept_invalid_certs(!verify_tls)
            .build()
            .map_err(KeycloakError::Http)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            realm,
            admin_username,
            admin_password,
            token: RwLock::new(None),
        })
    }

    fn admin_url(&self, path: &str) -> String {
        format!("{}/admin/realms/{}{}", self.base_url, urlencoding::encode(&self.realm), path)
    }

    async fn fetch_token(&self) -> Result<String, KeycloakError> {
        let url = format!("{}/realms/master/protocol/openid-connect/token", self.base_url);
        debug!("Requesting admin token");

        let response = self
            .client
            .post(&url)
            .form(&[
                ("grant_type", "password"),
                ("client_id", "admin-cli"),
                ("username", self.admin_username.as_str()),
                ("password", self.admin_password.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(KeycloakError::Authentication(format!(
                "token request failed: {status} - {body}"
            )));
        }

        let token: TokenResponse = response.json().await?;
        let expires_at = Utc::now()
            + chrono::Duration::seconds(token.expires_in as i64 - TOKEN_REFRESH_MARGIN_SECS);
        let access_token = token.access_token.clone();
        *self.token.write().await = Some(CachedToken {
            access_token: token.access_token,
            expires_at,
        });
        Ok(access_token)
    }

    async fn token(&self) -> Result<String, KeycloakError> {
        if let Some(cached) = self.token.read().await.as_ref() {
            if cached.expires_at > Utc::now() {
                return Ok(cached.access_token.clone());
            }
        }
        self.fetch_token().await
    }

    /// Send an authed request, refreshing the token once on 401.
    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Response, KeycloakError> {
        for attempt in 0..2 {
            let token = if attempt == 0 { self.token().await? } else { self.fetch_token().await? };
            let mut request = self
                .client
                .request(method.clone(), url)
                .bearer_auth(token)
                .header(header::ACCEPT, "application/json");
            if let Some(body) = body {
                request = request.json(body);
            }
            let response = request.send().await?;
            if response.status() == StatusCode::UNAUTHORIZED && attempt == 0 {
                debug!("Admin token rejected, refreshing");
                *self.token.write().await = None;
                continue;
            }
            return Ok(response);
        }
        unreachable!("send loop always returns within two attempts")
    }

    /// Map a non-success response to the error taxonomy.
    async fn check(response: Response, context: &str) -> Result<Response, KeycloakError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = format!("{context}: {}", body.chars().take(500).collect::<String>());
        match status {
            StatusCode::NOT_FOUND => Err(KeycloakError::NotFound(context.to_string())),
            StatusCode::CONFLICT => Err(KeycloakError::Conflict(message)),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(KeycloakError::Authentication(message))
            }
            _ => Err(KeycloakError::Api { status: status.as_u16(), message }),
        }
    }

    /// Extract the new resource id from a 201 Location header.
    fn id_from_location(response: &Response) -> Option<String> {
        response
            .headers()
            .get(header::LOCATION)?
            .to_str()
            .ok()?
            .rsplit('/')
            .next()
            .map(str::to_string)
    }

    async fn create(&self, url: &str, body: &serde_json::Value, context: &str) -> Result<Option<String>, KeycloakError> {
        let response = self.send(Method::POST, url, Some(body)).await?;
        let response = Self::check(response, context).await?;
        Ok(Self::id_from_location(&response))
    }

    async fn put(&self, url: &str, body: &serde_json::Value, context: &str) -> Result<(), KeycloakError> {
        let response = self.send(Method::PUT, url, Some(body)).await?;
        Self::check(response, context).await?;
        Ok(())
    }

    async fn delete_at(&self, url: &str, context: &str) -> Result<(), KeycloakError> {
        let response = self.send(Method::DELETE, url, None).await?;
        match Self::check(response, context).await {
            // deleting something already gone is a success
            Ok(_) | Err(KeycloakError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[async_trait::async_trait]
impl KeycloakAdminTrait for KeycloakAdminClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn realm(&self) -> &str {
        &self.realm
    }

    async fn ping(&self) -> Result<(), KeycloakError> {
        let url = self.admin_url("");
        let response = self.send(Method::GET, &url, None).await?;
        Self::check(response, "realm lookup").await?;
        Ok(())
    }

    async fn ensure_realm(&self) -> Result<bool, KeycloakError> {
        match self.ping().await {
            Ok(()) => return Ok(false),
            Err(KeycloakError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        info!(realm = %self.realm, "realm missing, creating it");
        let url = format!("{}/admin/realms", self.base_url);
        let body = serde_json::json!({ "realm": self.realm, "enabled": true });
        match self.create(&url, &body, "realm create").await {
            // a concurrent operator instance may have won the race
            Ok(_) => Ok(true),
            Err(KeycloakError::Conflict(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<UserRepresentation>, KeycloakError> {
        let url = format!(
            "{}?username={}&exact=true",
            self.admin_url("/users"),
            urlencoding::encode(username)
        );
        let response = self.send(Method::GET, &url, None).await?;
        let response = Self::check(response, "user lookup").await?;
        let users: Vec<UserRepresentation> = response.json().await?;
        // exact=true still substring-matches on old servers
        Ok(users.into_iter().find(|u| u.username == username))
    }

    async fn create_user(&self, user: &UserRepresentation) -> Result<String, KeycloakError> {
        let body = serde_json::to_value(user)?;
        // A 409 means someone else created it first; converge on the winner.
        let id = match self.create(&self.admin_url("/users"), &body, "user create").await {
            Ok(id) => id,
            Err(KeycloakError::Conflict(_)) => None,
            Err(e) => return Err(e),
        };
        match id {
            Some(id) => Ok(id),
            None => self
                .get_user_by_username(&user.username)
                .await?
                .and_then(|u| u.id)
                .ok_or_else(|| KeycloakError::NotFound(format!("user {} after create", user.username))),
        }
    }

    async fn update_user(&self, id: &str, user: &UserRepresentation) -> Result<(), KeycloakError> {
        let body = serde_json::to_value(user)?;
        let url = format!("{}/{}", self.admin_url("/users"), urlencoding::encode(id));
        self.put(&url, &body, "user update").await
    }

    async fn delete_user(&self, id: &str) -> Result<(), KeycloakError> {
        let url = format!("{}/{}", self.admin_url("/users"), urlencoding::encode(id));
        self.delete_at(&url, "user delete").await
    }

    async fn reset_password(&self, id: &str, credential: &CredentialRepresentation) -> Result<(), KeycloakError> {
        let body = serde_json::to_value(credential)?;
        let url = format!("{}/{}/reset-password", self.admin_url("/users"), urlencoding::encode(id));
        self.put(&url, &body, "password reset").await
    }

    async fn list_user_groups(&self, id: &str) -> Result<Vec<GroupRepresentation>, KeycloakError> {
        let url = format!("{}/{}/groups", self.admin_url("/users"), urlencoding::encode(id));
        let response = self.send(Method::GET, &url, None).await?;
        let response = Self::check(response, "user groups lookup").await?;
        Ok(response.json().await?)
    }

    async fn add_user_to_group(&self, user_id: &str, group_id: &str) -> Result<(), KeycloakError> {
        let url = format!(
            "{}/{}/groups/{}",
            self.admin_url("/users"),
            urlencoding::encode(user_id),
            urlencoding::encode(group_id)
        );
        self.put(&url, &serde_json::Value::Null, "group membership add").await
    }

    async fn remove_user_from_group(&self, user_id: &str, group_id: &str) -> Result<(), KeycloakError> {
        let url = format!(
            "{}/{}/groups/{}",
            self.admin_url("/users"),
            urlencoding::encode(user_id),
            urlencoding::encode(group_id)
        );
        self.delete_at(&url, "group membership remove").await
    }

    async fn get_group_by_name(&self, name: &str) -> Result<Option<GroupRepresentation>, KeycloakError> {
        let url = format!(
            "{}?search={}&exact=true",
            self.admin_url("/groups"),
            urlencoding::encode(name)
        );
        let response = self.send(Method::GET, &url, None).await?;
        let response = Self::check(response, "group lookup").await?;
        let groups: Vec<GroupRepresentation> = response.json().await?;
        Ok(groups.into_iter().find(|g| g.name == name))
    }

    async fn create_group(&self, group: &GroupRepresentation) -> Result<String, KeycloakError> {
        let body = serde_json::to_value(group)?;
        let id = match self.create(&self.admin_url("/groups"), &body, "group create").await {
            Ok(id) => id,
            Err(KeycloakError::Conflict(_)) => None,
            Err(e) => return Err(e),
        };
        match id {
            Some(id) => Ok(id),
            None => self
                .get_group_by_name(&group.name)
                .await?
                .and_then(|g| g.id)
                .ok_or_else(|| KeycloakError::NotFound(format!("group {} after create", group.name))),
        }
    }

    async fn update_group(&self, id: &str, group: &GroupRepresentation) -> Result<(), KeycloakError> {
        let body = serde_json::to_value(group)?;
        let url = format!("{}/{}", self.admin_url("/groups"), urlencoding::encode(id));
        self.put(&url, &body, "group update").await
    }

    async fn delete_group(&self, id: &str) -> Result<(), KeycloakError> {
        let url = format!("{}/{}", self.admin_url("/groups"), urlencoding::encode(id));
        self.delete_at(&url, "group delete").await
    }

    async fn get_client_by_client_id(&self, client_id: &str) -> Result<Option<ClientRepresentation>, KeycloakError> {
        let url = format!(
            "{}?clientId={}",
            self.admin_url("/clients"),
            urlencoding::encode(client_id)
        );
        let response = self.send(Method::GET, &url, None).await?;
        let response = Self::check(response, "client lookup").await?;
        let clients: Vec<ClientRepresentation> = response.json().await?;
        Ok(clients.into_iter().find(|c| c.client_id == client_id))
    }

    async fn create_client(&self, client: &ClientRepresentation) -> Result<String, KeycloakError> {
        let body = serde_json::to_value(client)?;
        let id = match self.create(&self.admin_url("/clients"), &body, "client create").await {
            Ok(id) => id,
            Err(KeycloakError::Conflict(_)) => None,
            Err(e) => return Err(e),
        };
        match id {
            Some(id) => Ok(id),
            None => self
                .get_client_by_client_id(&client.client_id)
                .await?
                .and_then(|c| c.id)
                .ok_or_else(|| {
                    KeycloakError::NotFound(format!("client {} after create", client.client_id))
                }),
        }
    }

    async fn update_client(&self, id: &str, client: &ClientRepresentation) -> Result<(), KeycloakError> {
        let body = serde_json::to_value(client)?;
        let url = format!("{}/{}", self.admin_url("/clients"), urlencoding::encode(id));
        self.put(&url, &body, "client update").await
    }

    async fn delete_client(&self, id: &str) -> Result<(), KeycloakError> {
        let url = format!("{}/{}", self.admin_url("/clients"), urlencoding::encode(id));
        self.delete_at(&url, "client delete").await
    }
}
