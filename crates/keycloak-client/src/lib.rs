//! Keycloak Admin REST API Client
//!
//! A Rust client library for the Keycloak admin API, scoped to the
//! operations the karectl identity controllers reconcile: realm users,
//! groups, group membership, and OIDC client registrations.
//!
//! # Example
//!
//! ```no_run
//! use keycloak_client::{KeycloakAdminClient, KeycloakAdminTrait, UserRepresentation};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = KeycloakAdminClient::new(
//!     "http://keycloak:8080".to_string(),
//!     "admin".to_string(),
//!     "admin-password".to_string(),
//!     "karectl".to_string(),
//!     true,
//! )?;
//!
//! client.ping().await?;
//!
//! if client.get_user_by_username("ada").await?.is_none() {
//!     let user = UserRepresentation {
//!         username: "ada".to_string(),
//!         email: Some("ada@example.org".to_string()),
//!         enabled: true,
//!         ..Default::default()
//!     };
//!     client.create_user(&user).await?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Natural keys**: lookups by username, group name, and clientId
//! - **Token caching**: admin password grant, refreshed before expiry and on 401
//! - **Idempotent deletes**: deleting an already-absent resource succeeds
//! - **`test-util`**: in-memory [`mock::MockKeycloakAdminClient`] for unit tests

pub mod client;
pub mod error;
#[path = "trait.rs"]
pub mod keycloak_trait;
#[cfg(feature = "test-util")]
pub mod mock;
pub mod models;

pub use client::KeycloakAdminClient;
pub use error::KeycloakError;
pub use keycloak_trait::KeycloakAdminTrait;
#[cfg(feature = "test-util")]
pub use mock::MockKeycloakAdminClient;
pub use models::*;
