//! Controller-specific error types.
//!
//! This module defines error types specific to the unified identity
//! controller that are not covered by upstream library errors.

use keycloak_client::KeycloakError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the identity controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Keycloak admin API error
    #[error("Keycloak error: {0}")]
    Keycloak(#[from] KeycloakError),

    /// CRD generation or installation error
    #[error("CRD error: {0}")]
    Crd(#[from] crds::generator::GeneratorError),

    /// Spec failed validation against its model descriptor
    #[error("Validation failed: {0}")]
    Validation(#[from] crds::ValidationError),

    /// A referenced resource is not yet Ready
    #[error("Dependency not ready: {0}")]
    DependencyNotReady(String),

    /// Teardown blocked by resources that still reference this one
    #[error("Dependents still present: {0}")]
    DependentsPresent(String),

    /// Referenced Kubernetes Secret is missing or lacks the expected key
    #[error("Secret reference error: {0}")]
    SecretRef(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Reconciliation exceeded its deadline
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    /// Whether the error is worth retrying with backoff.
    ///
    /// Validation failures are terminal until the spec changes;
    /// dependency gaps resolve via watch events on the dependency,
    /// but a bounded requeue catches missed events too.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Kube(_) | Self::Timeout(_) | Self::Watch(_) => true,
            Self::Keycloak(e) => e.is_retryable(),
            Self::DependencyNotReady(_) | Self::DependentsPresent(_) | Self::SecretRef(_) => true,
            Self::Validation(_) | Self::InvalidConfig(_) | Self::Crd(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_is_terminal() {
        let err = ControllerError::Validation(crds::ValidationError {
            kind: "User".to_string(),
            message: "missing required field 'username'".to_string(),
        });
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_dependency_gap_is_retryable() {
        assert!(ControllerError::DependencyNotReady("Group engineering".to_string()).is_retryable());
        assert!(ControllerError::Timeout("sync".to_string()).is_retryable());
    }

    #[test]
    fn test_catalog_errors_convert_and_are_terminal() {
        let schema_err = crds::SchemaError::KindCollision {
            kind: "USER".to_string(),
            existing: "identity.karectl.io/v1alpha1/User".to_string(),
        };
        let err = ControllerError::from(crds::generator::GeneratorError::Schema(schema_err));
        assert!(matches!(err, ControllerError::Crd(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_keycloak_retryability_passes_through() {
        let transient = ControllerError::Keycloak(KeycloakError::Api {
            status: 503,
            message: "unavailable".to_string(),
        });
        assert!(transient.is_retryable());

        let terminal = ControllerError::Keycloak(KeycloakError::Conflict("taken".to_string()));
        assert!(!terminal.is_retryable());
    }
}
