//! Helper functions for common reconciliation patterns
//!
//! Spec hashing, sync gating, membership diffing, and finalizer checks
//! shared by all reconcilers.

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crds::{ResourcePhase, SyncStatus};

/// Finalizer every managed resource carries while its external counterpart exists.
pub const FINALIZER: &str = "karectl.io/cleanup";

/// Hash of a spec's canonical JSON form.
///
/// Stored in status.appliedHash after a successful sync; a matching hash on a
/// later pass short-circuits the external read entirely. serde_json sorts
/// object keys, so semantically equal specs hash equally.
pub fn spec_hash<T: Serialize>(spec: &T) -> String {
    let canonical = serde_json::to_value(spec)
        .and_then(|v| serde_json::to_string(&v))
        .unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    format!("{digest:x}")
}

/// Whether a resource needs an external sync pass.
///
/// A resource is up to date only when it is Ready, its applied hash matches
/// the current spec, and status has caught up with metadata.generation.
/// Degraded resources hold their terminal failure until the spec generation
/// moves; the periodic resync must not hot-loop them.
pub fn needs_sync(status: Option<&SyncStatus>, current_hash: &str, generation: Option<i64>) -> bool {
    let Some(status) = status else {
        return true;
    };
    if status.phase == ResourcePhase::Degraded {
        return status.observed_generation != generation;
    }
    if status.phase != ResourcePhase::Ready {
        return true;
    }
    if status.applied_hash.as_deref() != Some(current_hash) {
        return true;
    }
    status.observed_generation != generation
}

/// Whether a dependency resource has converged.
///
/// Absent resources and resources without a status are not ready; the
/// dependent stays gated until the dependency reaches Ready.
pub fn dependency_ready(status: Option<&SyncStatus>) -> bool {
    status.is_some_and(|s| s.phase == ResourcePhase::Ready)
}

/// The adds and removes that turn `observed` into `desired`.
///
/// Both outputs are sorted so diff summaries and the resulting external
/// calls are deterministic.
pub fn string_set_diff(desired: &[String], observed: &[String]) -> (Vec<String>, Vec<String>) {
    let mut to_add: Vec<String> = desired
        .iter()
        .filter(|item| !observed.contains(item))
        .cloned()
        .collect();
    let mut to_remove: Vec<String> = observed
        .iter()
        .filter(|item| !desired.contains(item))
        .cloned()
        .collect();
    to_add.sort();
    to_add.dedup();
    to_remove.sort();
    to_remove.dedup();
    (to_add, to_remove)
}

/// Human-readable one-liner for a membership diff, used in DryRun conditions.
pub fn diff_summary(to_add: &[String], to_remove: &[String]) -> String {
    match (to_add.is_empty(), to_remove.is_empty()) {
        (true, true) => "no changes".to_string(),
        (false, true) => format!("add [{}]", to_add.join(", ")),
        (true, false) => format!("remove [{}]", to_remove.join(", ")),
        (false, false) => format!("add [{}], remove [{}]", to_add.join(", "), to_remove.join(", ")),
    }
}

/// Whether the object carries the cleanup finalizer.
pub fn has_finalizer(meta: &ObjectMeta) -> bool {
    meta.finalizers
        .as_ref()
        .is_some_and(|finalizers| finalizers.iter().any(|f| f == FINALIZER))
}

/// Whether deletion has been requested for the object.
pub fn deletion_requested(meta: &ObjectMeta) -> bool {
    meta.deletion_timestamp.is_some()
}

/// Merge patch that adds the cleanup finalizer to the current set.
pub fn add_finalizer_patch(meta: &ObjectMeta) -> serde_json::Value {
    let mut finalizers = meta.finalizers.clone().unwrap_or_default();
    if !finalizers.iter().any(|f| f == FINALIZER) {
        finalizers.push(FINALIZER.to_string());
    }
    serde_json::json!({"metadata": {"finalizers": finalizers}})
}

/// Merge patch that removes the cleanup finalizer, keeping any others.
pub fn remove_finalizer_patch(meta: &ObjectMeta) -> serde_json::Value {
    let finalizers: Vec<String> = meta
        .finalizers
        .clone()
        .unwrap_or_default()
        .into_iter()
        .filter(|f| f != FINALIZER)
        .collect();
    serde_json::json!({"metadata": {"finalizers": finalizers}})
}

/// Merge patch body for a full status replacement.
pub fn status_patch(status: &SyncStatus) -> serde_json::Value {
    serde_json::json!({"status": status})
}

/// Stamp a status as freshly reconciled.
pub fn touch(status: &mut SyncStatus, generation: Option<i64>) {
    status.observed_generation = generation;
    status.last_reconciled = Some(Utc::now());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::UserSpec;

    fn spec(groups: &[&str]) -> UserSpec {
        UserSpec {
            username: "ada".to_string(),
            email: "ada@example.org".to_string(),
            enabled: true,
            groups: groups.iter().map(|g| g.to_string()).collect(),
        }
    }

    #[test]
    fn test_spec_hash_is_stable_and_sensitive() {
        let a = spec_hash(&spec(&["engineering"]));
        let b = spec_hash(&spec(&["engineering"]));
        assert_eq!(a, b);
        assert_ne!(a, spec_hash(&spec(&["engineering", "research"])));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_needs_sync_gating() {
        let hash = spec_hash(&spec(&[]));

        // no status at all
        assert!(needs_sync(None, &hash, Some(1)));

        let mut status = SyncStatus {
            phase: ResourcePhase::Ready,
            applied_hash: Some(hash.clone()),
            observed_generation: Some(1),
            ..Default::default()
        };
        assert!(!needs_sync(Some(&status), &hash, Some(1)));

        // spec edit shows up as a hash mismatch
        assert!(needs_sync(Some(&status), "other-hash", Some(1)));

        // generation moved ahead of the status
        assert!(needs_sync(Some(&status), &hash, Some(2)));

        // non-Ready, non-Degraded phases always resync
        status.phase = ResourcePhase::Syncing;
        assert!(needs_sync(Some(&status), &hash, Some(1)));
    }

    #[test]
    fn test_degraded_waits_for_spec_revision() {
        let hash = spec_hash(&spec(&[]));
        let status = SyncStatus {
            phase: ResourcePhase::Degraded,
            observed_generation: Some(3),
            ..Default::default()
        };
        // terminal failure on generation 3: no automatic retry
        assert!(!needs_sync(Some(&status), &hash, Some(3)));
        // spec edit bumps the generation and re-arms reconciliation
        assert!(needs_sync(Some(&status), &hash, Some(4)));
    }

    #[test]
    fn test_dependency_ready_requires_ready_phase() {
        assert!(!dependency_ready(None));

        let mut status = SyncStatus {
            phase: ResourcePhase::Syncing,
            ..Default::default()
        };
        assert!(!dependency_ready(Some(&status)));

        status.phase = ResourcePhase::Degraded;
        assert!(!dependency_ready(Some(&status)));

        status.phase = ResourcePhase::Ready;
        assert!(dependency_ready(Some(&status)));
    }

    #[test]
    fn test_string_set_diff() {
        let desired = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let observed = vec!["b".to_string(), "d".to_string()];
        let (add, remove) = string_set_diff(&desired, &observed);
        assert_eq!(add, vec!["a", "c"]);
        assert_eq!(remove, vec!["d"]);

        let (add, remove) = string_set_diff(&desired, &desired);
        assert!(add.is_empty());
        assert!(remove.is_empty());
    }

    #[test]
    fn test_diff_summary() {
        assert_eq!(diff_summary(&[], &[]), "no changes");
        assert_eq!(
            diff_summary(&["a".to_string()], &["b".to_string()]),
            "add [a], remove [b]"
        );
    }

    #[test]
    fn test_finalizer_patches() {
        let mut meta = ObjectMeta::default();
        assert!(!has_finalizer(&meta));

        let patch = add_finalizer_patch(&meta);
        assert_eq!(patch["metadata"]["finalizers"][0], FINALIZER);

        meta.finalizers = Some(vec!["other/guard".to_string(), FINALIZER.to_string()]);
        assert!(has_finalizer(&meta));
        let patch = remove_finalizer_patch(&meta);
        let remaining = patch["metadata"]["finalizers"].as_array().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0], "other/guard");
    }
}
