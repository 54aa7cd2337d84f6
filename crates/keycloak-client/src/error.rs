//! Keycloak client errors

use thiserror::Error;

/// Errors that can occur when interacting with the Keycloak admin API
#[derive(Debug, Error)]
pub enum KeycloakError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Keycloak API returned an error
    #[error("Keycloak API error ({status}): {message}")]
    Api {
        /// HTTP status code of the response
        status: u16,
        /// Response body, truncated
        message: String,
    },

    /// Admin token could not be obtained or was rejected
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Natural key already taken by another resource (HTTP 409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Invalid request (e.g., missing required fields)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl KeycloakError {
    /// Whether retrying the same call later can plausibly succeed.
    ///
    /// Transport failures and 5xx responses are retryable. Authentication,
    /// conflict, not-found, and malformed-request failures are not: the
    /// request will fail the same way until something else changes.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Api { status, .. } => *status >= 500 || *status == 429,
            Self::Authentication(_)
            | Self::Serialization(_)
            | Self::NotFound(_)
            | Self::Conflict(_)
            | Self::InvalidRequest(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_errors_are_retryable() {
        assert!(KeycloakError::Api { status: 503, message: "down".into() }.is_retryable());
        assert!(KeycloakError::Api { status: 429, message: "slow down".into() }.is_retryable());
    }

    #[test]
    fn test_client_errors_are_terminal() {
        assert!(!KeycloakError::Api { status: 400, message: "bad".into() }.is_retryable());
        assert!(!KeycloakError::Conflict("username taken".into()).is_retryable());
        assert!(!KeycloakError::Authentication("bad password".into()).is_retryable());
    }
}
