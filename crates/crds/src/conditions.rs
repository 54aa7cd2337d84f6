//! Shared status types for karectl CRDs
//!
//! Every karectl kind carries the same status shape: a phase, a bounded
//! append-only condition history, the generation and content hash of the last
//! successfully applied spec, and the natural key of the external object.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Maximum number of conditions retained per resource.
///
/// The history is append-only; once full, the oldest entry is dropped.
pub const MAX_CONDITIONS: usize = 8;

/// Lifecycle phase of a reconciled resource.
///
/// Normal path: `Observed -> Validating -> Syncing -> Ready | Degraded`.
/// Deletion overlay: `Deleting -> Removed`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum ResourcePhase {
    /// Resource has been seen but not yet processed
    #[default]
    Observed,

    /// Spec is being validated against the generated schema
    Validating,

    /// External state is being driven toward the spec
    Syncing,

    /// External state matches the spec
    Ready,

    /// A terminal failure stopped automatic retry
    Degraded,

    /// Finalizer-gated teardown is in progress
    Deleting,

    /// External state has been removed, finalizer cleared
    Removed,
}

impl ResourcePhase {
    /// String form matching the serialized enum value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Observed => "Observed",
            Self::Validating => "Validating",
            Self::Syncing => "Syncing",
            Self::Ready => "Ready",
            Self::Degraded => "Degraded",
            Self::Deleting => "Deleting",
            Self::Removed => "Removed",
        }
    }
}

/// A single status condition, Kubernetes style.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type (e.g., "Synced", "Validated", "DryRun")
    #[serde(rename = "type")]
    pub type_: String,

    /// "True", "False", or "Unknown"
    pub status: String,

    /// Machine-readable reason (CamelCase)
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// When this condition was recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    /// Creates a condition stamped with the current time.
    #[must_use]
    pub fn new(type_: &str, status: bool, reason: &str, message: impl Into<String>) -> Self {
        Self {
            type_: type_.to_string(),
            status: if status { "True".to_string() } else { "False".to_string() },
            reason: reason.to_string(),
            message: message.into(),
            last_transition_time: Some(Utc::now()),
        }
    }
}

/// Operator-owned status shared by all karectl kinds.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// Current lifecycle phase
    #[serde(default)]
    pub phase: ResourcePhase,

    /// Append-only condition history, bounded to [`MAX_CONDITIONS`]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// metadata.generation last processed by the controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// When the resource last reconciled successfully
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciled: Option<DateTime<Utc>>,

    /// Content hash of the last successfully applied spec
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_hash: Option<String>,

    /// Natural key of the external object (username, group name, clientId)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_key: Option<String>,

    /// Error message for the most recent failure, cleared on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncStatus {
    /// Appends a condition, dropping the oldest entry once the bound is hit.
    ///
    /// A condition identical to the latest entry of the same type is skipped
    /// so repeated reconciles do not churn the history.
    pub fn push_condition(&mut self, condition: Condition) {
        if let Some(last) = self.conditions.iter().rev().find(|c| c.type_ == condition.type_) {
            if last.status == condition.status
                && last.reason == condition.reason
                && last.message == condition.message
            {
                return;
            }
        }
        self.conditions.push(condition);
        if self.conditions.len() > MAX_CONDITIONS {
            let excess = self.conditions.len() - MAX_CONDITIONS;
            self.conditions.drain(0..excess);
        }
    }

    /// Most recent condition of the given type, if any.
    #[must_use]
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().rev().find(|c| c.type_ == type_)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_history_is_bounded() {
        let mut status = SyncStatus::default();
        for i in 0..20 {
            status.push_condition(Condition::new("Synced", true, "Converged", format!("pass {i}")));
        }
        assert_eq!(status.conditions.len(), MAX_CONDITIONS);
        // Oldest entries dropped, newest kept
        assert_eq!(status.conditions.last().map(|c| c.message.as_str()), Some("pass 19"));
        assert_eq!(status.conditions.first().map(|c| c.message.as_str()), Some("pass 12"));
    }

    #[test]
    fn test_duplicate_condition_is_skipped() {
        let mut status = SyncStatus::default();
        status.push_condition(Condition::new("Synced", true, "Converged", "ok"));
        status.push_condition(Condition::new("Synced", true, "Converged", "ok"));
        assert_eq!(status.conditions.len(), 1);
    }

    #[test]
    fn test_condition_lookup_returns_latest() {
        let mut status = SyncStatus::default();
        status.push_condition(Condition::new("Synced", false, "Retrying", "attempt 1"));
        status.push_condition(Condition::new("Validated", true, "SchemaValid", "ok"));
        status.push_condition(Condition::new("Synced", true, "Converged", "ok"));
        let latest = status.condition("Synced").map(|c| c.status.as_str());
        assert_eq!(latest, Some("True"));
    }
}
