//! Per-resource exclusive locks.
//!
//! Locks are keyed by resource kind and id, created on first reference and kept for
//! the life of the process. Gateways and phones are a small bounded set; number locks
//! grow with the distinct numbers looked up in realtime.
//! Acquisition hands out a [`ResourceGuard`]; the lock is released when the guard is
//! dropped, so error paths cannot leak a held resource.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, trace};

/// Kind of lockable resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ResourceKind {
    /// A physical or emulated device; only one check may drive it at a time.
    Gateway,
    /// All checks of a single phone number, device and API alike.
    Phone,
    /// Realtime lookups of one normalized number, including creation of its temporary phone.
    Number,
}

type ResourceKey = (ResourceKind, String);

/// Registry of lazily created resource locks.
///
/// Constructed once at startup and shared (`Arc`) between the check service and the
/// scheduler.
#[derive(Debug, Default)]
pub struct ResourceManager {
    locks: DashMap<ResourceKey, Arc<Mutex<()>>>,
}

impl ResourceManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, kind: ResourceKind, id: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.get(&(kind, id.to_string())) {
            return lock.clone();
        }
        self.locks
            .entry((kind, id.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Take the lock without waiting; `None` means another holder has it.
    pub fn try_acquire(&self, kind: ResourceKind, id: &str) -> Option<ResourceGuard> {
        match self.lock_for(kind, id).try_lock_owned() {
            Ok(guard) => {
                trace!(kind = %kind, id = %id, "Resource acquired");
                Some(ResourceGuard {
                    kind,
                    id: id.to_string(),
                    _guard: guard,
                })
            }
            Err(_) => {
                debug!(kind = %kind, id = %id, "Resource busy");
                None
            }
        }
    }

    /// Wait until the lock is free and take it.
    pub async fn acquire(&self, kind: ResourceKind, id: &str) -> ResourceGuard {
        let guard = self.lock_for(kind, id).lock_owned().await;
        trace!(kind = %kind, id = %id, "Resource acquired after wait");
        ResourceGuard {
            kind,
            id: id.to_string(),
            _guard: guard,
        }
    }

    /// Non-blocking acquire, retried `retries` times with `delay` in between.
    pub async fn try_acquire_with_retry(
        &self,
        kind: ResourceKind,
        id: &str,
        retries: u32,
        delay: Duration,
    ) -> Option<ResourceGuard> {
        let mut attempt = 0;
        loop {
            if let Some(guard) = self.try_acquire(kind, id) {
                return Some(guard);
            }
            if attempt >= retries {
                return None;
            }
            attempt += 1;
            tokio::time::sleep(delay).await;
        }
    }

    /// Whether the resource is currently held.
    pub fn is_busy(&self, kind: ResourceKind, id: &str) -> bool {
        self.locks
            .get(&(kind, id.to_string()))
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Ids of all currently held resources of one kind.
    pub fn busy_ids(&self, kind: ResourceKind) -> Vec<String> {
        let mut ids: Vec<String> = self
            .locks
            .iter()
            .filter(|entry| entry.key().0 == kind && entry.value().try_lock().is_err())
            .map(|entry| entry.key().1.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Number of lock objects created so far.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Proof of exclusive access to one resource.
#[derive(Debug)]
pub struct ResourceGuard {
    kind: ResourceKind,
    id: String,
    _guard: OwnedMutexGuard<()>,
}

impl ResourceGuard {
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Release explicitly; equivalent to dropping the guard.
    pub fn release(self) {}
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        trace!(kind = %self.kind, id = %self.id, "Resource released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_try_acquire_is_exclusive() {
        let manager = ResourceManager::new();
        assert!(!manager.is_busy(ResourceKind::Gateway, "g1"));

        let guard = manager.try_acquire(ResourceKind::Gateway, "g1").unwrap();
        assert!(manager.is_busy(ResourceKind::Gateway, "g1"));
        assert!(manager.try_acquire(ResourceKind::Gateway, "g1").is_none());

        // Same id under a different kind is a different lock.
        assert!(manager.try_acquire(ResourceKind::Phone, "g1").is_some());

        guard.release();
        assert!(!manager.is_busy(ResourceKind::Gateway, "g1"));
        assert!(manager.try_acquire(ResourceKind::Gateway, "g1").is_some());
    }

    #[test]
    fn test_locks_are_retained() {
        let manager = ResourceManager::new();
        drop(manager.try_acquire(ResourceKind::Gateway, "a"));
        drop(manager.try_acquire(ResourceKind::Gateway, "a"));
        drop(manager.try_acquire(ResourceKind::Phone, "p"));
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_busy_ids() {
        let manager = ResourceManager::new();
        let _a = manager.try_acquire(ResourceKind::Gateway, "b").unwrap();
        let _b = manager.try_acquire(ResourceKind::Gateway, "a").unwrap();
        drop(manager.try_acquire(ResourceKind::Gateway, "c"));
        assert_eq!(manager.busy_ids(ResourceKind::Gateway), vec!["a", "b"]);
        assert!(manager.busy_ids(ResourceKind::Phone).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gets_lock_after_release() {
        let manager = Arc::new(ResourceManager::new());
        let guard = manager.try_acquire(ResourceKind::Gateway, "g1").unwrap();

        let releaser = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            drop(guard);
        });

        let started = tokio::time::Instant::now();
        let acquired = manager
            .try_acquire_with_retry(ResourceKind::Gateway, "g1", 1, Duration::from_secs(2))
            .await;
        assert!(acquired.is_some());
        assert!(started.elapsed() >= Duration::from_secs(2));
        releaser.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_while_held() {
        let manager = ResourceManager::new();
        let _guard = manager.try_acquire(ResourceKind::Gateway, "g1").unwrap();
        let started = tokio::time::Instant::now();
        let acquired = manager
            .try_acquire_with_retry(ResourceKind::Gateway, "g1", 3, Duration::from_secs(2))
            .await;
        assert!(acquired.is_none());
        assert!(started.elapsed() >= Duration::from_secs(6));
    }

    #[tokio::test]
    async fn test_mutual_exclusion_under_contention() {
        let manager = Arc::new(ResourceManager::new());
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let manager = manager.clone();
            let in_flight = in_flight.clone();
            let max_seen = max_seen.clone();
            tasks.push(tokio::spawn(async move {
                let _guard = manager.acquire(ResourceKind::Gateway, "shared").await;
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
