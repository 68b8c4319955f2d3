use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::error::SyncError;

type SharedFetch<V> = Shared<BoxFuture<'static, Result<V, SyncError>>>;

enum Entry<V> {
    Ready { value: V, fetched_at: Instant },
    InFlight { fetch: SharedFetch<V>, ticket: u64 },
}

/// Keyed async cache with a staleness window.
///
/// Concurrent callers for one key share a single in-flight fetch. Failures
/// are handed to every waiter but never cached.
pub struct QueryCache<V> {
    stale_time: Duration,
    entries: Mutex<HashMap<String, Entry<V>>>,
    tickets: AtomicU64,
}

impl<V> QueryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(stale_time: Duration) -> Self {
        Self {
            stale_time,
            entries: Mutex::new(HashMap::new()),
            tickets: AtomicU64::new(0),
        }
    }

    /// Fresh cached value, the in-flight fetch, or a new fetch from `fetcher`
    pub async fn fetch<F, Fut>(&self, key: &str, fetcher: F) -> Result<V, SyncError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, SyncError>> + Send + 'static,
    {
        let (fetch, ticket) = {
            let mut entries = self.entries.lock();
            let existing = match entries.get(key) {
                Some(Entry::Ready { value, fetched_at }) if fetched_at.elapsed() < self.stale_time => {
                    tracing::trace!("query cache hit: {}", key);
                    return Ok(value.clone());
                }
                Some(Entry::InFlight { fetch, ticket }) => Some((fetch.clone(), *ticket)),
                _ => None,
            };
            match existing {
                Some(in_flight) => in_flight,
                None => {
                    let ticket = self.tickets.fetch_add(1, Ordering::Relaxed) + 1;
                    let fetch = fetcher().boxed().shared();
                    entries.insert(
                        key.to_string(),
                        Entry::InFlight {
                            fetch: fetch.clone(),
                            ticket,
                        },
                    );
                    (fetch, ticket)
                }
            }
        };

        let result = fetch.await;

        // First waiter to finish settles the entry, unless it was invalidated meanwhile
        let mut entries = self.entries.lock();
        let settles = matches!(entries.get(key), Some(Entry::InFlight { ticket: t, .. }) if *t == ticket);
        if settles {
            match &result {
                Ok(value) => {
                    entries.insert(
                        key.to_string(),
                        Entry::Ready {
                            value: value.clone(),
                            fetched_at: Instant::now(),
                        },
                    );
                }
                Err(e) => {
                    tracing::debug!("query '{}' failed, not cached: {}", key, e);
                    entries.remove(key);
                }
            }
        }
        result
    }

    /// Drop the cached value and detach any in-flight fetch from the key
    pub fn invalidate(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    /// Invalidate, then fetch from the network
    pub async fn refetch<F, Fut>(&self, key: &str, fetcher: F) -> Result<V, SyncError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, SyncError>> + Send + 'static,
    {
        self.invalidate(key);
        self.fetch(key, fetcher).await
    }

    /// Drop every entry whose key matches
    pub fn invalidate_where(&self, matches: impl Fn(&str) -> bool) {
        self.entries.lock().retain(|key, _| !matches(key));
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Last settled value, fresh or stale
    pub fn peek(&self, key: &str) -> Option<V> {
        match self.entries.lock().get(key) {
            Some(Entry::Ready { value, .. }) => Some(value.clone()),
            _ => None,
        }
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
