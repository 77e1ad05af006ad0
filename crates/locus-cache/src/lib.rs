//! Locus Cache - content-addressed result cache
//!
//! Stores completed results by [`RequestDigest`] with a time-to-live.
//!
//! # Single flight
//! For a given digest at most one computation runs at a time. Callers that
//! arrive while it runs wait on a per-digest mutex and then read the fresh
//! entry instead of recomputing. Different digests never wait on each other.
//!
//! # Expiry
//! Freshness is checked against the tokio clock when an entry is read, so
//! an entry older than its TTL is never returned. moka enforces the same TTL
//! to reclaim memory. Eviction is by age only unless a capacity bound is
//! configured explicitly.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

use dashmap::DashMap;
use locus_model::RequestDigest;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;

/// Default entry lifetime (24 hours)
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Cache settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entry lifetime in seconds
    pub ttl_secs: u64,
    /// Optional upper bound on stored entries, unbounded by default
    pub max_capacity: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_TTL.as_secs(),
            max_capacity: None,
        }
    }
}

impl CacheConfig {
    /// Entry lifetime
    #[inline]
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Whether a lookup may return a stored result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    /// Return a fresh stored result if present
    #[default]
    UseCached,
    /// Always compute, then store the new result
    Refresh,
}

impl CachePolicy {
    /// Policy for a request's skip-cache flag
    #[inline]
    #[must_use]
    pub fn from_skip_cache(skip_cache: bool) -> Self {
        if skip_cache {
            Self::Refresh
        } else {
            Self::UseCached
        }
    }
}

/// A stored result with its age
#[derive(Debug)]
pub struct CacheEntry<V> {
    /// Stored value
    pub value: Arc<V>,
    /// When the value was stored
    pub created_at: Instant,
    /// Lifetime from `created_at`
    pub ttl: Duration,
}

impl<V> Clone for CacheEntry<V> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            created_at: self.created_at,
            ttl: self.ttl,
        }
    }
}

impl<V> CacheEntry<V> {
    /// Whether the entry is still within its TTL at `now`
    #[inline]
    #[must_use]
    pub fn is_fresh_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) < self.ttl
    }
}

/// Result of [`ResultCache::get_or_compute`]
#[derive(Debug)]
pub struct Cached<V> {
    /// The value
    pub value: Arc<V>,
    /// Whether it came from the cache
    pub hit: bool,
}

/// Counters for monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Approximate number of stored entries
    pub entry_count: u64,
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that found nothing fresh
    pub misses: u64,
    /// Computations run
    pub computations: u64,
    /// Digests with a computation running or queued
    pub in_flight: usize,
}

/// Exclusive right to compute one digest
///
/// Dropping it, including on cancellation, unlocks the digest and removes
/// the lock once nobody else is waiting on it.
struct FlightPermit<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    digest: RequestDigest,
    in_flight: &'a DashMap<RequestDigest, Arc<Mutex<()>>>,
}

impl Drop for FlightPermit<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.in_flight
            .remove_if(&self.digest, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Content-addressed TTL cache with per-digest single flight
pub struct ResultCache<V> {
    entries: Cache<RequestDigest, CacheEntry<V>>,
    in_flight: DashMap<RequestDigest, Arc<Mutex<()>>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    computations: AtomicU64,
}

impl<V> std::fmt::Debug for ResultCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("ttl", &self.ttl)
            .field("entries", &self.entries.entry_count())
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

impl<V> ResultCache<V>
where
    V: Send + Sync + 'static,
{
    /// Create cache whose entries expire after `ttl`
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self::build(ttl, None)
    }

    /// Create cache that also evicts once `max_capacity` entries are stored
    #[must_use]
    pub fn bounded(ttl: Duration, max_capacity: u64) -> Self {
        Self::build(ttl, Some(max_capacity))
    }

    fn build(ttl: Duration, max_capacity: Option<u64>) -> Self {
        let mut builder = Cache::builder().time_to_live(ttl);
        if let Some(max_capacity) = max_capacity {
            builder = builder.max_capacity(max_capacity);
        }
        Self {
            entries: builder.build(),
            in_flight: DashMap::new(),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            computations: AtomicU64::new(0),
        }
    }

    /// Create cache from configuration
    #[must_use]
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::build(config.ttl(), config.max_capacity)
    }

    /// Entry lifetime
    #[inline]
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh value for a digest, if any
    ///
    /// A stale entry is left in place: moka reclaims it and the next
    /// [`insert`](Self::insert) overwrites it.
    pub async fn get(&self, digest: &RequestDigest) -> Option<Arc<V>> {
        self.entries
            .get(digest)
            .await
            .filter(|entry| entry.is_fresh_at(Instant::now()))
            .map(|entry| entry.value)
    }

    /// Store a value, replacing any previous one and restarting its TTL
    pub async fn insert(&self, digest: RequestDigest, value: Arc<V>) {
        let entry = CacheEntry {
            value,
            created_at: Instant::now(),
            ttl: self.ttl,
        };
        self.entries.insert(digest, entry).await;
    }

    /// Return the cached value or compute it, at most once per digest at a time
    ///
    /// With [`CachePolicy::Refresh`] the lookup is skipped but the new value
    /// is still stored. Errors are returned unchanged and nothing is stored.
    ///
    /// # Errors
    /// Whatever `compute` returns.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        digest: RequestDigest,
        policy: CachePolicy,
        compute: F,
    ) -> Result<Cached<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if policy == CachePolicy::UseCached {
            if let Some(value) = self.get(&digest).await {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(digest = %digest.short(), "cache hit");
                return Ok(Cached { value, hit: true });
            }
        }

        let _permit = self.acquire(digest).await;

        // the previous holder may have just stored it
        if policy == CachePolicy::UseCached {
            if let Some(value) = self.get(&digest).await {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(digest = %digest.short(), "cache hit after waiting");
                return Ok(Cached { value, hit: true });
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        self.computations.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(digest = %digest.short(), ?policy, "computing");

        let value = Arc::new(compute().await?);
        self.insert(digest, Arc::clone(&value)).await;
        Ok(Cached { value, hit: false })
    }

    async fn acquire(&self, digest: RequestDigest) -> FlightPermit<'_> {
        let lock = Arc::clone(self.in_flight.entry(digest).or_default().value());
        let guard = lock.lock_owned().await;
        FlightPermit {
            guard: Some(guard),
            digest,
            in_flight: &self.in_flight,
        }
    }

    /// Drop the entry for one digest
    pub async fn invalidate(&self, digest: &RequestDigest) {
        self.entries.invalidate(digest).await;
    }

    /// Drop all entries
    pub fn invalidate_all(&self) {
        self.entries.invalidate_all();
    }

    /// Current counters
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.entries.entry_count(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            computations: self.computations.load(Ordering::Relaxed),
            in_flight: self.in_flight.len(),
        }
    }
}

impl<V> Default for ResultCache<V>
where
    V: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use locus_model::ArchiveDigest;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    fn digest(tag: &str) -> RequestDigest {
        RequestDigest::new(&ArchiveDigest::of_bytes(tag.as_bytes()), "desc", false)
    }

    #[tokio::test]
    async fn second_lookup_is_a_hit() {
        let cache: ResultCache<String> = ResultCache::default();
        let calls = AtomicUsize::new(0);
        let calls = &calls;

        let compute = || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ()>("report".to_string())
        };
        let first = cache.get_or_compute(digest("a"), CachePolicy::UseCached, compute).await.unwrap();
        let second = cache.get_or_compute(digest("a"), CachePolicy::UseCached, compute).await.unwrap();

        assert!(!first.hit);
        assert!(second.hit);
        assert_eq!(*second.value, "report");
        assert!(Arc::ptr_eq(&first.value, &second.value));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_computation() {
        let cache = Arc::new(ResultCache::<u64>::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    cache
                        .get_or_compute(digest("same"), CachePolicy::UseCached, || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok::<_, ()>(42)
                        })
                        .await
                        .unwrap()
                })
            })
            .collect();

        let results = futures::future::join_all(tasks).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(results.iter().filter(|r| !r.as_ref().unwrap().hit).count(), 1);
        assert!(results.iter().all(|r| *r.as_ref().unwrap().value == 42));
        assert_eq!(cache.stats().in_flight, 0);
    }

    #[tokio::test]
    async fn different_digests_do_not_serialize() {
        let cache: ResultCache<&'static str> = ResultCache::default();
        let b_started = Notify::new();
        let b_started = &b_started;

        let a = cache.get_or_compute(digest("a"), CachePolicy::UseCached, || async move {
            b_started.notified().await;
            Ok::<_, ()>("a")
        });
        let b = cache.get_or_compute(digest("b"), CachePolicy::UseCached, || async move {
            b_started.notify_one();
            Ok::<_, ()>("b")
        });

        let (a, b) = tokio::join!(a, b);
        assert_eq!(*a.unwrap().value, "a");
        assert_eq!(*b.unwrap().value, "b");
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_recomputed() {
        let cache: ResultCache<u32> = ResultCache::new(Duration::from_secs(60));
        let calls = AtomicUsize::new(0);
        let calls = &calls;
        let compute = || async move { Ok::<_, ()>(calls.fetch_add(1, Ordering::SeqCst) as u32) };

        let first = cache.get_or_compute(digest("t"), CachePolicy::UseCached, compute).await.unwrap();
        tokio::time::advance(Duration::from_secs(59)).await;
        let cached = cache.get_or_compute(digest("t"), CachePolicy::UseCached, compute).await.unwrap();
        assert!(cached.hit);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get(&digest("t")).await.is_none());
        let fresh = cache.get_or_compute(digest("t"), CachePolicy::UseCached, compute).await.unwrap();

        assert_eq!(*first.value, 0);
        assert!(!fresh.hit);
        assert_eq!(*fresh.value, 1);
        assert_eq!(*cache.get(&digest("t")).await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_recomputes_and_restarts_ttl() {
        let cache: ResultCache<u32> = ResultCache::new(Duration::from_secs(60));
        cache
            .get_or_compute(digest("r"), CachePolicy::UseCached, || async { Ok::<_, ()>(1) })
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(50)).await;
        let refreshed = cache
            .get_or_compute(digest("r"), CachePolicy::Refresh, || async { Ok::<_, ()>(2) })
            .await
            .unwrap();
        assert!(!refreshed.hit);

        tokio::time::advance(Duration::from_secs(50)).await;
        assert_eq!(*cache.get(&digest("r")).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let cache: ResultCache<u32> = ResultCache::default();
        let err = cache
            .get_or_compute(digest("e"), CachePolicy::UseCached, || async { Err::<u32, _>("boom") })
            .await
            .unwrap_err();
        assert_eq!(err, "boom");
        assert!(cache.get(&digest("e")).await.is_none());
        assert_eq!(cache.stats().in_flight, 0);

        let ok = cache
            .get_or_compute(digest("e"), CachePolicy::UseCached, || async { Ok::<_, &str>(7) })
            .await
            .unwrap();
        assert_eq!(*ok.value, 7);
    }

    #[tokio::test]
    async fn cancelled_computation_releases_digest() {
        let cache: ResultCache<u32> = ResultCache::default();
        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            cache.get_or_compute(digest("c"), CachePolicy::UseCached, || async {
                std::future::pending::<()>().await;
                Ok::<_, ()>(0)
            }),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(cache.stats().in_flight, 0);

        let value = cache
            .get_or_compute(digest("c"), CachePolicy::UseCached, || async { Ok::<_, ()>(5) })
            .await
            .unwrap();
        assert_eq!(*value.value, 5);
    }

    #[tokio::test]
    async fn invalidation() {
        let cache: ResultCache<u32> = ResultCache::default();
        cache.insert(digest("x"), Arc::new(1)).await;
        cache.insert(digest("y"), Arc::new(2)).await;
        cache.invalidate(&digest("x")).await;
        assert!(cache.get(&digest("x")).await.is_none());
        assert!(cache.get(&digest("y")).await.is_some());

        cache.invalidate_all();
        assert!(cache.get(&digest("y")).await.is_none());
    }

    #[test]
    fn skip_cache_maps_to_refresh() {
        assert_eq!(CachePolicy::from_skip_cache(true), CachePolicy::Refresh);
        assert_eq!(CachePolicy::from_skip_cache(false), CachePolicy::UseCached);
    }

    #[tokio::test]
    async fn live_entries_survive_beyond_any_count() {
        let cache: ResultCache<usize> = ResultCache::default();
        let digests: Vec<_> = (0..300).map(|i| digest(&format!("d{i}"))).collect();

        for _round in 0..2 {
            for (i, d) in digests.iter().enumerate() {
                cache
                    .get_or_compute(*d, CachePolicy::UseCached, || async move { Ok::<_, ()>(i) })
                    .await
                    .unwrap();
                cache.entries.run_pending_tasks().await;
            }
        }

        let stats = cache.stats();
        assert_eq!(stats.computations, 300);
        assert_eq!(stats.hits, 300);
        assert_eq!(CacheConfig::default().max_capacity, None);
    }

    #[tokio::test]
    async fn explicit_bound_still_evicts() {
        let cache: ResultCache<u32> = ResultCache::bounded(Duration::from_secs(3600), 2);
        for tag in ["a", "b", "c", "d"] {
            cache.insert(digest(tag), Arc::new(0)).await;
            cache.entries.run_pending_tasks().await;
        }
        assert!(cache.stats().entry_count <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_read_leaves_storage_untouched() {
        let cache: ResultCache<u32> = ResultCache::new(Duration::from_secs(60));
        cache.insert(digest("s"), Arc::new(1)).await;

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get(&digest("s")).await.is_none());
        // a holder storing a fresh value concurrently must not lose it
        assert!(cache.entries.contains_key(&digest("s")));

        cache.insert(digest("s"), Arc::new(2)).await;
        assert_eq!(*cache.get(&digest("s")).await.unwrap(), 2);
    }
}
