//! Worker pool for reconciliation tasks.
//!
//! Bounds how many reconciliations run at once and serializes work per
//! resource so event-driven and periodic-resync reconciliations for the same
//! object never interleave. Each submission carries the resource generation;
//! a stale submission that has already been superseded by a newer one is
//! dropped without running.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::ControllerError;

/// Identity of one reconcilable object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    pub kind: &'static str,
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(kind: &'static str, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// How a submitted task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The task ran to completion
    Completed,
    /// A newer generation for the same key arrived first; the task was dropped
    Superseded,
    /// The pool is draining; the task was dropped
    Draining,
}

/// Bounded, per-key-serialized worker pool.
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    worker_limit: usize,
    timeout: Duration,
    /// Per-key locks; a lock is held for the whole run of one task
    key_locks: Mutex<HashMap<ResourceKey, Arc<tokio::sync::Mutex<()>>>>,
    /// Highest generation seen per key
    latest: Mutex<HashMap<ResourceKey, i64>>,
    draining: AtomicBool,
}

impl WorkerPool {
    /// Create a pool running at most `worker_limit` tasks at once, each
    /// bounded by `timeout`.
    pub fn new(worker_limit: usize, timeout: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(worker_limit)),
            worker_limit,
            timeout,
            key_locks: Mutex::new(HashMap::new()),
            latest: Mutex::new(HashMap::new()),
            draining: AtomicBool::new(false),
        }
    }

    fn key_lock(&self, key: &ResourceKey) -> Arc<tokio::sync::Mutex<()>> {
        self.key_locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Record `generation` as seen and report whether it is still current.
    fn note_generation(&self, key: &ResourceKey, generation: i64) -> bool {
        let mut latest = self
            .latest
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let entry = latest.entry(key.clone()).or_insert(generation);
        if generation < *entry {
            return false;
        }
        *entry = generation;
        true
    }

    fn is_current(&self, key: &ResourceKey, generation: i64) -> bool {
        self.latest
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(key)
            .map_or(true, |latest| generation >= *latest)
    }

    /// Run one reconciliation task.
    ///
    /// The per-key lock is taken before a pool permit so a task waiting on
    /// its sibling does not hold capacity the rest of the pool could use.
    pub async fn run<F>(
        &self,
        key: ResourceKey,
        generation: i64,
        task: F,
    ) -> Result<TaskOutcome, ControllerError>
    where
        F: std::future::Future<Output = Result<(), ControllerError>>,
    {
        if self.draining.load(Ordering::SeqCst) {
            return Ok(TaskOutcome::Draining);
        }
        if !self.note_generation(&key, generation) {
            debug!(%key, generation, "dropping stale reconciliation");
            return Ok(TaskOutcome::Superseded);
        }

        let lock = self.key_lock(&key);
        let _key_guard = lock.lock().await;

        // A newer generation may have arrived while we waited for the lock.
        if !self.is_current(&key, generation) {
            debug!(%key, generation, "superseded while queued");
            return Ok(TaskOutcome::Superseded);
        }
        if self.draining.load(Ordering::SeqCst) {
            return Ok(TaskOutcome::Draining);
        }

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ControllerError::Watch("worker pool closed".to_string()))?;

        match tokio::time::timeout(self.timeout, task).await {
            Ok(result) => result.map(|()| TaskOutcome::Completed),
            Err(_) => {
                warn!(%key, timeout_secs = self.timeout.as_secs(), "reconciliation timed out");
                Err(ControllerError::Timeout(key.to_string()))
            }
        }
    }

    /// Drop the bookkeeping for a key once its object is gone.
    ///
    /// Without this, deleted resources would pin their lock and generation
    /// entries for the lifetime of the pool.
    pub fn forget(&self, key: &ResourceKey) {
        self.key_locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(key);
        self.latest
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(key);
        debug!(%key, "worker pool entry evicted");
    }

    /// Number of keys the pool currently tracks.
    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.latest
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Stop accepting work and wait for in-flight tasks to finish.
    pub async fn drain(&self) {
        self.draining.store(true, Ordering::SeqCst);
        // Taking every permit proves nothing is still running.
        if let Ok(_all) = self.permits.acquire_many(self.worker_limit as u32).await {
            debug!("worker pool drained");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn pool(limit: usize) -> WorkerPool {
        WorkerPool::new(limit, Duration::from_secs(5))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_key_never_interleaves() {
        let pool = Arc::new(pool(4));
        let active = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicBool::new(false));

        let mut handles = Vec::new();
        for generation in 0..4 {
            let pool = pool.clone();
            let active = active.clone();
            let overlap = overlap.clone();
            handles.push(tokio::spawn(async move {
                let key = ResourceKey::new("User", "default", "ada");
                pool.run(key, generation, async {
                    if active.fetch_add(1, Ordering::SeqCst) > 0 {
                        overlap.store(true, Ordering::SeqCst);
                    }
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert!(!overlap.load(Ordering::SeqCst), "same-key tasks overlapped");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_worker_limit_bounds_concurrency() {
        let pool = Arc::new(pool(2));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..6 {
            let pool = pool.clone();
            let active = active.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let key = ResourceKey::new("User", "default", format!("user-{i}"));
                pool.run(key, 1, async {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2, "more tasks ran than the pool allows");
    }

    #[tokio::test]
    async fn test_stale_generation_is_dropped() {
        let pool = pool(2);
        let key = ResourceKey::new("Group", "default", "engineering");
        let ran = Arc::new(AtomicUsize::new(0));

        let ran_new = ran.clone();
        let outcome = pool
            .run(key.clone(), 7, async move {
                ran_new.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(outcome, TaskOutcome::Completed);

        let ran_old = ran.clone();
        let outcome = pool
            .run(key, 3, async move {
                ran_old.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(outcome, TaskOutcome::Superseded);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_forget_evicts_bookkeeping() {
        let pool = pool(2);
        let key = ResourceKey::new("User", "default", "ada");
        let outcome = pool.run(key.clone(), 5, async { Ok(()) }).await.unwrap();
        assert_eq!(outcome, TaskOutcome::Completed);
        assert_eq!(pool.tracked_keys(), 1);

        pool.forget(&key);
        assert_eq!(pool.tracked_keys(), 0);

        // a recreated object starts over at a lower generation
        let outcome = pool.run(key, 1, async { Ok(()) }).await.unwrap();
        assert_eq!(outcome, TaskOutcome::Completed);
    }

    #[tokio::test]
    async fn test_timeout_is_enforced() {
        let pool = WorkerPool::new(2, Duration::from_millis(20));
        let key = ResourceKey::new("User", "default", "slow");
        let result = pool
            .run(key, 1, async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(ControllerError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_drain_rejects_new_work() {
        let pool = pool(2);
        pool.drain().await;
        let outcome = pool
            .run(ResourceKey::new("User", "default", "ada"), 1, async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(outcome, TaskOutcome::Draining);
    }
}
