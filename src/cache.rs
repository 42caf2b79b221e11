use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::trace;

use crate::errors::GeocodeFailure;
use crate::geocoder::{Coordinates, QueryResolution};

/// A memoized answer for one query string. Transient failures are never
/// stored, so a later identical query may try the backend again.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEntry {
    Found(Coordinates),
    Negative(GeocodeFailure),
}

impl CacheEntry {
    fn into_result(self) -> Result<Coordinates, GeocodeFailure> {
        match self {
            CacheEntry::Found(coordinates) => Ok(coordinates),
            CacheEntry::Negative(failure) => Err(failure),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheLookup {
    pub result: Result<Coordinates, GeocodeFailure>,
    pub hit: bool,
    pub calls: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: usize,
    pub misses: usize,
}

/// Query-string keyed memo for a single batch run.
///
/// A lookup in flight owns a write-once cell: concurrent lookups of the same
/// key wait on the first resolver instead of issuing their own request.
/// Only stored answers enter the LRU map, so a transient failure leaves no
/// trace and never evicts a resolved entry. The first stored value for a key
/// is never replaced.
pub struct ResolutionCache {
    slots: Mutex<Slots>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

struct Slots {
    resolved: LruCache<String, CacheEntry>,
    pending: HashMap<String, Arc<OnceCell<CacheEntry>>>,
}

impl ResolutionCache {
    pub fn new(capacity: Option<usize>) -> Self {
        let resolved = match capacity.and_then(NonZeroUsize::new) {
            Some(capacity) => LruCache::new(capacity),
            None => LruCache::unbounded(),
        };
        Self {
            slots: Mutex::new(Slots {
                resolved,
                pending: HashMap::new(),
            }),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    pub fn get(&self, query: &str) -> Option<CacheEntry> {
        self.slots.lock().resolved.get(query).cloned()
    }

    pub async fn get_or_resolve<F, Fut>(&self, query: &str, resolve: F) -> CacheLookup
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = QueryResolution>,
    {
        let cell = {
            let mut slots = self.slots.lock();
            if let Some(entry) = slots.resolved.get(query).cloned() {
                return self.hit(query, entry);
            }
            Arc::clone(slots.pending.entry(query.to_string()).or_default())
        };
        if let Some(entry) = cell.get() {
            return self.hit(query, entry.clone());
        }

        let mut fresh_calls: Option<u32> = None;
        let slot = &mut fresh_calls;
        let stored = cell
            .get_or_try_init(|| async move {
                let resolution = resolve().await;
                *slot = Some(resolution.calls);
                match resolution.result {
                    Ok(coordinates) => Ok(CacheEntry::Found(coordinates)),
                    Err(failure) if failure.is_retryable() => Err(failure),
                    Err(failure) => Ok(CacheEntry::Negative(failure)),
                }
            })
            .await;

        match (stored, fresh_calls) {
            (Ok(entry), Some(calls)) => {
                self.misses.fetch_add(1, Ordering::SeqCst);
                self.settle(query, &cell, Some(entry.clone()));
                CacheLookup {
                    result: entry.clone().into_result(),
                    hit: false,
                    calls,
                }
            }
            // another task filled the cell while we waited
            (Ok(entry), None) => self.hit(query, entry.clone()),
            (Err(failure), calls) => {
                self.misses.fetch_add(1, Ordering::SeqCst);
                self.settle(query, &cell, None);
                CacheLookup {
                    result: Err(failure),
                    hit: false,
                    calls: calls.unwrap_or(0),
                }
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.slots.lock().resolved.len(),
            hits: self.hits.load(Ordering::SeqCst),
            misses: self.misses.load(Ordering::SeqCst),
        }
    }

    /// Retires the in-flight cell for `query`, promoting a stored answer.
    fn settle(&self, query: &str, cell: &Arc<OnceCell<CacheEntry>>, entry: Option<CacheEntry>) {
        let mut slots = self.slots.lock();
        if let Some(entry) = entry {
            if !slots.resolved.contains(query) {
                slots.resolved.put(query.to_string(), entry);
            }
        }
        let ours = slots
            .pending
            .get(query)
            .map_or(false, |pending| Arc::ptr_eq(pending, cell));
        if ours {
            slots.pending.remove(query);
        }
    }

    fn hit(&self, query: &str, entry: CacheEntry) -> CacheLookup {
        self.hits.fetch_add(1, Ordering::SeqCst);
        trace!(query, "resolution cache hit");
        CacheLookup {
            result: entry.into_result(),
            hit: true,
            calls: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    use super::*;

    fn found(calls: u32) -> QueryResolution {
        QueryResolution {
            result: Ok(Coordinates::new(-6.9, 107.6)),
            calls,
        }
    }

    #[tokio::test]
    async fn second_lookup_is_served_from_cache() {
        let cache = ResolutionCache::new(None);
        let invoked = AtomicU32::new(0);
        let counter = &invoked;

        let first = cache
            .get_or_resolve("bandung", || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                found(1)
            })
            .await;
        let second = cache
            .get_or_resolve("bandung", || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                found(1)
            })
            .await;

        assert!(!first.hit);
        assert_eq!(first.calls, 1);
        assert!(second.hit);
        assert_eq!(second.calls, 0);
        assert_eq!(first.result, second.result);
        assert_eq!(invoked.load(Ordering::SeqCst), 1);
        assert_eq!(
            cache.stats(),
            CacheStats {
                entries: 1,
                hits: 1,
                misses: 1
            }
        );
    }

    #[tokio::test]
    async fn negative_results_are_cached_but_transient_ones_are_not() {
        let cache = ResolutionCache::new(None);
        let missing = cache
            .get_or_resolve("atlantis", || async {
                QueryResolution {
                    result: Err(GeocodeFailure::NotFound),
                    calls: 1,
                }
            })
            .await;
        assert_eq!(missing.result, Err(GeocodeFailure::NotFound));
        assert_eq!(
            cache.get("atlantis"),
            Some(CacheEntry::Negative(GeocodeFailure::NotFound))
        );

        let flaky = cache
            .get_or_resolve("medan", || async {
                QueryResolution {
                    result: Err(GeocodeFailure::Timeout),
                    calls: 3,
                }
            })
            .await;
        assert_eq!(flaky.calls, 3);
        assert_eq!(cache.get("medan"), None);

        let retried = cache.get_or_resolve("medan", || async { found(1) }).await;
        assert!(!retried.hit);
        assert!(retried.result.is_ok());
        assert_eq!(cache.stats().entries, 2);
    }

    #[tokio::test]
    async fn concurrent_lookups_coalesce() {
        tokio::time::pause();
        let cache = ResolutionCache::new(None);
        let invoked = AtomicU32::new(0);
        let counter = &invoked;
        let resolve = || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(1)).await;
            found(1)
        };

        let (left, right) = tokio::join!(
            cache.get_or_resolve("depok", resolve),
            cache.get_or_resolve("depok", resolve)
        );

        assert_eq!(invoked.load(Ordering::SeqCst), 1);
        assert_eq!(left.result, right.result);
        assert!(left.hit ^ right.hit);
    }

    #[tokio::test]
    async fn transient_failure_does_not_take_a_bounded_slot() {
        let cache = ResolutionCache::new(Some(1));
        cache.get_or_resolve("bogor", || async { found(1) }).await;

        let flaky = cache
            .get_or_resolve("cirebon", || async {
                QueryResolution {
                    result: Err(GeocodeFailure::ServiceUnavailable("503".into())),
                    calls: 3,
                }
            })
            .await;
        assert!(flaky.result.is_err());

        assert!(cache.get("bogor").is_some());
        assert_eq!(cache.get("cirebon"), None);
        assert_eq!(cache.stats().entries, 1);
        assert!(cache.slots.lock().pending.is_empty());
    }

    #[tokio::test]
    async fn bounded_cache_evicts_least_recently_used() {
        let cache = ResolutionCache::new(Some(2));
        for query in ["a", "b"] {
            cache.get_or_resolve(query, || async { found(1) }).await;
        }
        assert!(cache.get("a").is_some());
        cache.get_or_resolve("c", || async { found(1) }).await;

        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
    }
}
