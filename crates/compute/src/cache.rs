//! Result cache with per-key request coalescing.
//!
//! Ready results live in one concurrent map, in-flight computations in
//! another. The first request for a key inserts an in-flight slot holding a
//! broadcast sender and spawns a driver task; later requests for the same key
//! subscribe to that sender instead of starting their own computation.
//!
//! ```text
//! request A ─┐                      driver task
//! request B ─┼──► in_flight[key] ◄── (timeout ∘ compute)
//! request C ─┘        │                   │
//!                     ▼                   ▼
//!              [A, B, C receive      ready[key] on success,
//!               one broadcast]       slot removed either way
//! ```
//!
//! Failures are delivered to the waiters of that computation and never
//! stored, so the next request for the key starts afresh.
//!
//! A computation that overruns the timeout cannot be interrupted: its module
//! is still running on a blocking thread. Its waiters get a timeout error, but
//! the slot stays in place, marked draining, until the module returns. Requests
//! arriving meanwhile attach to it for at most one more timeout instead of
//! starting a second run of the same key.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vantage_core::SplitName;

use crate::error::TaskError;
use crate::key::ConfigKey;
use crate::types::ModuleResult;

/// Result handle shared by every waiter of a computation.
pub type SharedResult = Arc<ModuleResult>;

type ComputeOutcome = Result<SharedResult, TaskError>;

/// A stored, ready result.
#[derive(Debug, Clone)]
pub struct CachedResult {
    pub key: ConfigKey,
    pub value: SharedResult,
    pub computed_at_version: u64,
    pub computed_at: DateTime<Utc>,
}

/// Observable lifecycle of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    NotStarted,
    Computing,
    /// Timed out but still running; requests attach to it.
    Draining,
    Ready,
}

/// Counters for monitoring cache effectiveness.
#[derive(Debug, Default, Clone)]
pub struct CacheStats {
    /// Requests answered from a ready entry.
    pub hits: u64,
    /// Requests that started a computation.
    pub misses: u64,
    /// Requests that attached to an in-flight computation.
    pub coalesced: u64,
    /// Computations that returned an error.
    pub failures: u64,
    /// Requests answered with a timeout error.
    pub timeouts: u64,
    pub ready_entries: usize,
    pub in_flight: usize,
}

impl CacheStats {
    /// Share of requests that did not trigger a computation (0.0 to 1.0).
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses + self.coalesced;
        if total == 0 {
            0.0
        } else {
            (self.hits + self.coalesced) as f64 / total as f64
        }
    }
}

struct InFlight {
    id: Uuid,
    fingerprint: String,
    tx: broadcast::Sender<ComputeOutcome>,
    draining: bool,
}

struct Inner {
    ready: DashMap<ConfigKey, CachedResult>,
    in_flight: DashMap<ConfigKey, InFlight>,
    timeout: Duration,
    /// Results for versions below this are delivered but not stored.
    version_floor: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
}

impl Inner {
    fn lookup_ready(&self, key: &ConfigKey) -> Option<SharedResult> {
        let entry = self.ready.get(key)?;
        // Keys carry their version, so a mismatch here means a stale entry.
        if entry.computed_at_version == key.dataset_version() {
            Some(Arc::clone(&entry.value))
        } else {
            None
        }
    }

    /// Release the current waiters of an overrunning computation.
    ///
    /// Marking the slot and sending happen under the slot's lock, so a request
    /// either received the timeout or sees the slot as draining.
    fn start_draining(&self, key: &ConfigKey, id: Uuid) {
        if let Some(mut slot) = self.in_flight.get_mut(key) {
            if slot.id == id {
                slot.draining = true;
                let _ = slot.tx.send(Err(TaskError::Timeout(self.timeout)));
            }
        }
    }

    fn store(&self, key: &ConfigKey, value: &SharedResult) {
        if key.dataset_version() < self.version_floor.load(Ordering::SeqCst) {
            debug!(key = %key, "Dropping result for superseded dataset version");
            return;
        }
        self.ready.insert(
            key.clone(),
            CachedResult {
                key: key.clone(),
                value: Arc::clone(value),
                computed_at_version: key.dataset_version(),
                computed_at: value.computed_at,
            },
        );
    }
}

/// Clears the in-flight slot when the driver finishes or is torn down.
///
/// Removal is conditional on the computation id, so a slot created by a
/// later retry of the same key is never touched.
struct InFlightGuard {
    inner: Arc<Inner>,
    key: ConfigKey,
    id: Uuid,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inner
            .in_flight
            .remove_if(&self.key, |_, slot| slot.id == self.id);
    }
}

/// Concurrent result cache keyed by [`ConfigKey`]. Cheap to clone.
#[derive(Clone)]
pub struct ResultCache {
    inner: Arc<Inner>,
}

impl ResultCache {
    /// Create a cache whose computations are bounded by `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                ready: DashMap::new(),
                in_flight: DashMap::new(),
                timeout,
                version_floor: AtomicU64::new(0),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                coalesced: AtomicU64::new(0),
                failures: AtomicU64::new(0),
                timeouts: AtomicU64::new(0),
            }),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Ready value for `key`, without suspending.
    pub fn get_ready(&self, key: &ConfigKey) -> Option<SharedResult> {
        let value = self.inner.lookup_ready(key)?;
        self.inner.hits.fetch_add(1, Ordering::Relaxed);
        Some(value)
    }

    pub fn state(&self, key: &ConfigKey) -> KeyState {
        if let Some(slot) = self.inner.in_flight.get(key) {
            if slot.draining {
                KeyState::Draining
            } else {
                KeyState::Computing
            }
        } else if self.inner.lookup_ready(key).is_some() {
            KeyState::Ready
        } else {
            KeyState::NotStarted
        }
    }

    /// Return the ready value for `key`, or run `compute` to produce it.
    ///
    /// At most one computation per key runs at a time; concurrent callers
    /// wait for that computation's outcome. The computation runs on its own
    /// task, so it completes (and is cached) even if every caller goes away.
    pub async fn get_or_compute<F, Fut>(&self, key: ConfigKey, compute: F) -> ComputeOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ModuleResult, TaskError>> + Send + 'static,
    {
        if let Some(value) = self.get_ready(&key) {
            debug!(key = %key, "Cache hit");
            return Ok(value);
        }

        let (mut rx, lead, draining) = match self.inner.in_flight.entry(key.clone()) {
            Entry::Occupied(slot) => {
                let slot = slot.get();
                self.inner.coalesced.fetch_add(1, Ordering::Relaxed);
                debug!(
                    key = %key,
                    fingerprint = %slot.fingerprint,
                    computation = %slot.id,
                    draining = slot.draining,
                    "Attaching to in-flight computation"
                );
                (slot.tx.subscribe(), None, slot.draining)
            }
            Entry::Vacant(slot) => {
                // A computation may have finished between the first lookup and
                // taking this entry.
                if let Some(value) = self.inner.lookup_ready(&key) {
                    self.inner.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(value);
                }
                // Room for the timeout notice and the final outcome.
                let (tx, rx) = broadcast::channel(2);
                let id = Uuid::new_v4();
                let fingerprint = key.fingerprint();
                slot.insert(InFlight {
                    id,
                    fingerprint: fingerprint.clone(),
                    tx: tx.clone(),
                    draining: false,
                });
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                (rx, Some((id, fingerprint, tx)), false)
            }
        };

        if let Some((id, fingerprint, tx)) = lead {
            self.spawn_driver(key.clone(), id, fingerprint, tx, compute());
        }

        let received = if draining {
            // This computation already overran once; wait one more bound at most.
            match tokio::time::timeout(self.inner.timeout, rx.recv()).await {
                Ok(received) => received,
                Err(_) => {
                    self.inner.timeouts.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %key, "Draining computation still running");
                    return Err(TaskError::Timeout(self.inner.timeout));
                }
            }
        } else {
            rx.recv().await
        };

        match received {
            Ok(outcome) => outcome,
            Err(_) => Err(TaskError::Computation(format!(
                "computation for {} was abandoned",
                key
            ))),
        }
    }

    fn spawn_driver<Fut>(
        &self,
        key: ConfigKey,
        id: Uuid,
        fingerprint: String,
        tx: broadcast::Sender<ComputeOutcome>,
        fut: Fut,
    ) where
        Fut: Future<Output = Result<ModuleResult, TaskError>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let guard = InFlightGuard {
                inner: Arc::clone(&inner),
                key: key.clone(),
                id,
            };
            let timeout = inner.timeout;
            debug!(key = %key, fingerprint = %fingerprint, computation = %id, "Computation started");

            tokio::pin!(fut);
            let finished = match tokio::time::timeout(timeout, &mut fut).await {
                Ok(finished) => finished,
                Err(_) => {
                    inner.timeouts.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        key = %key,
                        fingerprint = %fingerprint,
                        computation = %id,
                        ?timeout,
                        "Computation timed out, draining"
                    );
                    inner.start_draining(&key, id);
                    let finished = fut.await;
                    info!(
                        key = %key,
                        fingerprint = %fingerprint,
                        computation = %id,
                        "Timed-out computation returned"
                    );
                    finished
                }
            };

            let outcome = match finished {
                Ok(result) => {
                    let shared = Arc::new(result);
                    inner.store(&key, &shared);
                    Ok(shared)
                }
                Err(e) => {
                    inner.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        key = %key,
                        fingerprint = %fingerprint,
                        computation = %id,
                        error = %e,
                        "Computation failed"
                    );
                    Err(e)
                }
            };

            // Ready entry (if any) is visible before the slot disappears.
            drop(guard);
            let waiters = tx.receiver_count();
            let _ = tx.send(outcome);
            debug!(key = %key, computation = %id, waiters, "Outcome delivered");
        });
    }

    /// Drop every ready entry for `split`. Returns the number removed.
    pub fn invalidate_split(&self, split: &SplitName) -> usize {
        let before = self.inner.ready.len();
        self.inner.ready.retain(|k, _| k.split() != split);
        let removed = before.saturating_sub(self.inner.ready.len());
        info!(split = %split, removed, "Invalidated split");
        removed
    }

    /// Drop every ready entry computed before `version`, and stop storing
    /// late results for older versions. Returns the number removed.
    pub fn evict_stale(&self, version: u64) -> usize {
        self.inner.version_floor.fetch_max(version, Ordering::SeqCst);
        let before = self.inner.ready.len();
        self.inner.ready.retain(|k, _| k.dataset_version() >= version);
        let removed = before.saturating_sub(self.inner.ready.len());
        if removed > 0 {
            info!(version, removed, "Evicted superseded results");
        }
        removed
    }

    /// Drop every ready entry.
    pub fn clear(&self) {
        self.inner.ready.clear();
    }

    /// Snapshot of ready entries (for inspection).
    pub fn entries(&self) -> Vec<CachedResult> {
        self.inner.ready.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.ready.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            coalesced: self.inner.coalesced.load(Ordering::Relaxed),
            failures: self.inner.failures.load(Ordering::Relaxed),
            timeouts: self.inner.timeouts.load(Ordering::Relaxed),
            ready_entries: self.inner.ready.len(),
            in_flight: self.inner.in_flight.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use vantage_core::ModuleOptions;

    use super::*;
    use crate::modules::SupportedModule;

    fn key(version: u64) -> ConfigKey {
        key_for("validation", version)
    }

    fn key_for(split: &str, version: u64) -> ConfigKey {
        ConfigKey::new(
            SupportedModule::Metrics,
            &SplitName::from(split),
            &ModuleOptions::for_pipeline(0),
            version,
        )
    }

    fn result(version: u64) -> ModuleResult {
        ModuleResult {
            module: SupportedModule::Metrics,
            dataset_version: version,
            responses: Vec::new(),
            computed_at: Utc::now(),
            duration: Duration::from_millis(1),
        }
    }

    fn counting(
        counter: &Arc<AtomicUsize>,
        version: u64,
        delay: Duration,
    ) -> impl FnOnce() -> std::pin::Pin<Box<dyn Future<Output = Result<ModuleResult, TaskError>> + Send>>
    {
        let counter = Arc::clone(counter);
        move || {
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                Ok(result(version))
            })
        }
    }

    #[tokio::test]
    async fn miss_then_hit() {
        let cache = ResultCache::new(Duration::from_secs(5));
        let counter = Arc::new(AtomicUsize::new(0));

        let first = cache
            .get_or_compute(key(1), counting(&counter, 1, Duration::ZERO))
            .await
            .unwrap();
        let second = cache
            .get_or_compute(key(1), counting(&counter, 1, Duration::ZERO))
            .await
            .unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.state(&key(1)), KeyState::Ready);
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_computation() {
        let cache = ResultCache::new(Duration::from_secs(5));
        let counter = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let compute = counting(&counter, 1, Duration::from_millis(50));
            handles.push(tokio::spawn(async move {
                cache.get_or_compute(key(1), compute).await
            }));
        }
        for h in handles {
            assert!(h.await.unwrap().is_ok());
        }

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits + stats.coalesced, 15);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let cache = ResultCache::new(Duration::from_secs(5));

        let err = cache
            .get_or_compute(key(1), || async {
                Err(TaskError::Computation("transient".into()))
            })
            .await
            .unwrap_err();
        assert_eq!(err, TaskError::Computation("transient".into()));
        assert_eq!(cache.state(&key(1)), KeyState::NotStarted);

        let ok = cache.get_or_compute(key(1), || async { Ok(result(1)) }).await;
        assert!(ok.is_ok());
        assert_eq!(cache.stats().failures, 1);
    }

    #[tokio::test]
    async fn retry_after_timeout_joins_the_running_computation() {
        let cache = ResultCache::new(Duration::from_millis(100));
        let counter = Arc::new(AtomicUsize::new(0));

        let err = cache
            .get_or_compute(key(1), counting(&counter, 1, Duration::from_millis(150)))
            .await
            .unwrap_err();
        assert_eq!(err, TaskError::Timeout(Duration::from_millis(100)));
        assert_eq!(cache.state(&key(1)), KeyState::Draining);
        assert_eq!(cache.stats().timeouts, 1);

        // The retry attaches to the overrunning run and gets its result.
        let retry = cache
            .get_or_compute(key(1), counting(&counter, 1, Duration::ZERO))
            .await;
        assert!(retry.is_ok());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(cache.state(&key(1)), KeyState::Ready);
        assert_eq!(cache.stats().in_flight, 0);
    }

    #[tokio::test]
    async fn hung_computation_is_not_started_twice() {
        let cache = ResultCache::new(Duration::from_millis(30));
        let counter = Arc::new(AtomicUsize::new(0));

        let first = cache
            .get_or_compute(key(1), counting(&counter, 1, Duration::from_secs(5)))
            .await;
        let second = cache
            .get_or_compute(key(1), counting(&counter, 1, Duration::ZERO))
            .await;

        assert_eq!(first.unwrap_err(), TaskError::Timeout(Duration::from_millis(30)));
        assert_eq!(second.unwrap_err(), TaskError::Timeout(Duration::from_millis(30)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(cache.state(&key(1)), KeyState::Draining);
        assert_eq!(cache.stats().timeouts, 2);
    }

    #[tokio::test]
    async fn draining_failure_is_not_cached() {
        let cache = ResultCache::new(Duration::from_millis(20));

        let err = cache
            .get_or_compute(key(1), || async {
                tokio::time::sleep(Duration::from_millis(40)).await;
                Err(TaskError::Computation("late failure".into()))
            })
            .await
            .unwrap_err();
        assert_eq!(err, TaskError::Timeout(Duration::from_millis(20)));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(cache.state(&key(1)), KeyState::NotStarted);
        let ok = cache.get_or_compute(key(1), || async { Ok(result(1)) }).await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn computation_survives_dropped_caller() {
        let cache = ResultCache::new(Duration::from_secs(5));
        let counter = Arc::new(AtomicUsize::new(0));

        let pending = {
            let cache = cache.clone();
            let compute = counting(&counter, 1, Duration::from_millis(50));
            tokio::spawn(async move { cache.get_or_compute(key(1), compute).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        pending.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(cache.state(&key(1)), KeyState::Ready);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_split_only_touches_that_split() {
        let cache = ResultCache::new(Duration::from_secs(5));
        cache
            .get_or_compute(key_for("validation", 1), || async { Ok(result(1)) })
            .await
            .unwrap();
        cache
            .get_or_compute(key_for("train", 1), || async { Ok(result(1)) })
            .await
            .unwrap();

        assert_eq!(cache.invalidate_split(&SplitName::from("validation")), 1);
        assert_eq!(cache.state(&key_for("validation", 1)), KeyState::NotStarted);
        assert_eq!(cache.state(&key_for("train", 1)), KeyState::Ready);
    }

    #[tokio::test]
    async fn evict_stale_drops_old_versions_and_late_results() {
        let cache = ResultCache::new(Duration::from_secs(5));
        cache.get_or_compute(key(1), || async { Ok(result(1)) }).await.unwrap();
        cache.get_or_compute(key(2), || async { Ok(result(2)) }).await.unwrap();

        assert_eq!(cache.evict_stale(2), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.entries()[0].computed_at_version, 2);

        // A result for an evicted version is still returned but not stored.
        let late = cache.get_or_compute(key(1), || async { Ok(result(1)) }).await;
        assert!(late.is_ok());
        assert_eq!(cache.state(&key(1)), KeyState::NotStarted);
    }

    #[test]
    fn hit_ratio() {
        let stats = CacheStats {
            hits: 2,
            misses: 1,
            coalesced: 1,
            ..Default::default()
        };
        assert!((stats.hit_ratio() - 0.75).abs() < 1e-9);
        assert_eq!(CacheStats::default().hit_ratio(), 0.0);
    }
}
