//! Operator configuration
//!
//! All settings come from environment variables so the deployment manifest
//! is the single source of configuration. `from_vars` takes a lookup closure
//! so tests can exercise parsing without touching the process environment.

use crate::error::ControllerError;

/// Runtime configuration for the identity controller.
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Keycloak base URL
    pub keycloak_url: String,
    /// Master realm admin username
    pub keycloak_admin: String,
    /// Master realm admin password
    pub keycloak_admin_password: String,
    /// Realm all identity resources are reconciled into
    pub keycloak_realm: String,
    /// Verify the Keycloak TLS certificate
    pub keycloak_tls_verify: bool,
    /// Maximum concurrent reconciliations across all kinds
    pub worker_limit: usize,
    /// When false, external writes are skipped and recorded as a DryRun condition
    pub posting_enabled: bool,
    /// Per-reconciliation deadline in seconds
    pub operation_timeout_secs: u64,
    /// Periodic full re-list interval in seconds
    pub resync_interval_secs: u64,
    /// Consecutive failures before a resource is marked Degraded
    pub max_retry_attempts: u32,
    /// Install/update CRDs at startup
    pub manage_crds: bool,
    /// Write CRD manifest files at startup
    pub generate_crd_files: bool,
    /// Directory for generated CRD manifests
    pub crd_output_dir: String,
    /// Namespace to watch; unset falls back to "default"
    pub watch_namespace: Option<String>,
}

impl OperatorConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Load configuration through a variable lookup.
    pub fn from_vars<F>(get: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let keycloak_url = get("KEYCLOAK_URL")
            .unwrap_or_else(|| "http://keycloak.keycloak:8080".to_string());
        let keycloak_admin = get("KEYCLOAK_ADMIN").unwrap_or_else(|| "admin".to_string());
        let keycloak_admin_password = get("KEYCLOAK_ADMIN_PASSWORD").ok_or_else(|| {
            ControllerError::InvalidConfig(
                "KEYCLOAK_ADMIN_PASSWORD environment variable is required".to_string(),
            )
        })?;
        let keycloak_realm = get("KEYCLOAK_REALM").unwrap_or_else(|| "karectl".to_string());

        let worker_limit = parse_number(&get, "WORKER_LIMIT", 4)?;
        if worker_limit == 0 {
            return Err(ControllerError::InvalidConfig(
                "WORKER_LIMIT must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            keycloak_url,
            keycloak_admin,
            keycloak_admin_password,
            keycloak_realm,
            keycloak_tls_verify: parse_bool(&get, "KEYCLOAK_TLS_VERIFY", true)?,
            worker_limit,
            posting_enabled: parse_bool(&get, "POSTING_ENABLED", true)?,
            operation_timeout_secs: parse_number(&get, "OPERATION_TIMEOUT_SECS", 60)?,
            resync_interval_secs: parse_number(&get, "RESYNC_INTERVAL_SECS", 300)?,
            max_retry_attempts: parse_number(&get, "MAX_RETRY_ATTEMPTS", 5)?,
            manage_crds: parse_bool(&get, "MANAGE_CRDS", true)?,
            generate_crd_files: parse_bool(&get, "GENERATE_CRD_FILES", false)?,
            crd_output_dir: get("CRD_OUTPUT_DIR").unwrap_or_else(|| "config/crd".to_string()),
            watch_namespace: get("WATCH_NAMESPACE").filter(|v| !v.is_empty()),
        })
    }
}

fn parse_bool<F>(get: &F, name: &str, default: bool) -> Result<bool, ControllerError>
where
    F: Fn(&str) -> Option<String>,
{
    match get(name) {
        None => Ok(default),
        Some(value) => match value.to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            other => Err(ControllerError::InvalidConfig(format!(
                "{name} must be a boolean, got '{other}'"
            ))),
        },
    }
}

fn parse_number<F, T>(get: &F, name: &str, default: T) -> Result<T, ControllerError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match get(name) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| {
            ControllerError::InvalidConfig(format!("{name} must be a number, got '{value}'"))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_with_minimal_env() {
        let config =
            OperatorConfig::from_vars(vars(&[("KEYCLOAK_ADMIN_PASSWORD", "secret")])).unwrap();
        assert_eq!(config.keycloak_url, "http://keycloak.keycloak:8080");
        assert_eq!(config.keycloak_realm, "karectl");
        assert_eq!(config.worker_limit, 4);
        assert!(config.posting_enabled);
        assert!(config.manage_crds);
        assert_eq!(config.max_retry_attempts, 5);
        assert!(config.watch_namespace.is_none());
    }

    #[test]
    fn test_admin_password_is_required() {
        let err = OperatorConfig::from_vars(vars(&[])).unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(_)));
    }

    #[test]
    fn test_overrides() {
        let config = OperatorConfig::from_vars(vars(&[
            ("KEYCLOAK_ADMIN_PASSWORD", "secret"),
            ("POSTING_ENABLED", "false"),
            ("WORKER_LIMIT", "8"),
            ("WATCH_NAMESPACE", "research"),
            ("KEYCLOAK_TLS_VERIFY", "no"),
        ]))
        .unwrap();
        assert!(!config.posting_enabled);
        assert_eq!(config.worker_limit, 8);
        assert_eq!(config.watch_namespace.as_deref(), Some("research"));
        assert!(!config.keycloak_tls_verify);
    }

    #[test]
    fn test_zero_worker_limit_is_rejected() {
        let err = OperatorConfig::from_vars(vars(&[
            ("KEYCLOAK_ADMIN_PASSWORD", "secret"),
            ("WORKER_LIMIT", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(_)));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = OperatorConfig::from_vars(vars(&[
            ("KEYCLOAK_ADMIN_PASSWORD", "secret"),
            ("WORKER_LIMIT", "many"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(_)));

        let err = OperatorConfig::from_vars(vars(&[
            ("KEYCLOAK_ADMIN_PASSWORD", "secret"),
            ("POSTING_ENABLED", "maybe"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(_)));
    }
}
