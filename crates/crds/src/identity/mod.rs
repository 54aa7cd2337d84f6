//! Identity CRDs
//!
//! Kinds under `identity.karectl.io`: User, Group, KeycloakClient.

pub mod group;
pub mod keycloak_client;
pub mod user;

pub use group::*;
pub use keycloak_client::*;
pub use user::*;
