//! Time-bounded key→value store with single-flight compute-if-absent.
//!
//! Backs the golden schema, per-role privileges and per-role compiled
//! GraphQL schemas. Correctness relies only on the access-time expiry check
//! that [`moka`] performs; background reclamation is opportunistic.

use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use moka::future::Cache;

use crate::error::{ApiError, ApiResult};

/// Internal single-flight outcome used to keep the no-value sentinel and
/// producer failures out of the cache.
#[derive(Debug)]
enum FlightError {
    Absent,
    Failed(ApiError),
}

impl fmt::Display for FlightError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlightError::Absent => write!(f, "producer yielded no value"),
            FlightError::Failed(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for FlightError {}

/// Counters exposed by [`TtlCache::stats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: u64,
}

/// TTL cache with single-flight `compute_if_absent`.
///
/// Concurrent callers computing the same key observe exactly one producer
/// invocation and share its result. Producer failures propagate unchanged
/// and are never cached.
pub struct TtlCache<K, V>
where
    K: Hash + Eq + Send + Sync + Clone + 'static,
    V: Clone + Send + Sync + 'static,
{
    inner: Cache<K, V>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq + Send + Sync + Clone + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Cache::builder().time_to_live(ttl).build(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns the cached value, or `None` when missing or expired.
    pub async fn get(&self, key: &K) -> Option<V> {
        let found = self.inner.get(key).await;
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    /// Records `value` with a fresh deadline of now + TTL.
    pub async fn put(&self, key: K, value: V) {
        self.inner.insert(key, value).await;
    }

    /// Single-flight compute. If `producer` yields `Ok(None)` nothing is
    /// cached and every waiter receives `Ok(None)`.
    pub async fn compute_if_absent<F, Fut>(&self, key: K, producer: F) -> ApiResult<Option<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ApiResult<Option<V>>>,
    {
        let ran = Arc::new(AtomicU64::new(0));
        let ran_inner = ran.clone();

        let outcome = self
            .inner
            .try_get_with(key, async move {
                ran_inner.fetch_add(1, Ordering::Relaxed);
                match producer().await {
                    Ok(Some(v)) => Ok(v),
                    Ok(None) => Err(FlightError::Absent),
                    Err(e) => Err(FlightError::Failed(e)),
                }
            })
            .await;

        if ran.load(Ordering::Relaxed) == 0 {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }

        match outcome {
            Ok(v) => Ok(Some(v)),
            Err(arc) => match &*arc {
                FlightError::Absent => Ok(None),
                FlightError::Failed(e) => Err(e.clone()),
            },
        }
    }

    pub async fn remove(&self, key: &K) {
        self.inner.invalidate(key).await;
    }

    pub fn clear(&self) {
        self.inner.invalidate_all();
    }

    pub async fn size(&self) -> u64 {
        self.inner.run_pending_tasks().await;
        self.inner.entry_count()
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.size().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_returns_absent_after_expiry() {
        let cache: TtlCache<String, i32> = TtlCache::new(Duration::from_millis(50));
        cache.put("k".into(), 7).await;
        assert_eq!(cache.get(&"k".into()).await, Some(7));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(cache.get(&"k".into()).await, None);
    }

    #[tokio::test]
    async fn compute_if_absent_is_single_flight() {
        let cache: Arc<TtlCache<String, u64>> = Arc::new(TtlCache::new(Duration::from_secs(60)));
        let invocations = Arc::new(AtomicU64::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let invocations = invocations.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .compute_if_absent("key".to_string(), || async move {
                        invocations.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(Some(42))
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), Some(42));
        }
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_value_sentinel_is_not_cached() {
        let cache: TtlCache<String, i32> = TtlCache::new(Duration::from_secs(60));

        let first = cache
            .compute_if_absent("k".to_string(), || async { Ok(None) })
            .await
            .unwrap();
        assert_eq!(first, None);

        // A later producer still runs and its value is cached.
        let second = cache
            .compute_if_absent("k".to_string(), || async { Ok(Some(5)) })
            .await
            .unwrap();
        assert_eq!(second, Some(5));
        assert_eq!(cache.get(&"k".to_string()).await, Some(5));
    }

    #[tokio::test]
    async fn producer_failure_propagates_and_is_not_cached() {
        let cache: TtlCache<String, i32> = TtlCache::new(Duration::from_secs(60));

        let err = cache
            .compute_if_absent("k".to_string(), || async {
                Err(ApiError::Internal("boom".into()))
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INTERNAL");

        let ok = cache
            .compute_if_absent("k".to_string(), || async { Ok(Some(1)) })
            .await
            .unwrap();
        assert_eq!(ok, Some(1));
    }

    #[tokio::test]
    async fn remove_and_clear() {
        let cache: TtlCache<String, i32> = TtlCache::new(Duration::from_secs(60));
        cache.put("a".into(), 1).await;
        cache.put("b".into(), 2).await;
        cache.remove(&"a".into()).await;
        assert_eq!(cache.get(&"a".into()).await, None);
        cache.clear();
        assert_eq!(cache.get(&"b".into()).await, None);
    }
}
