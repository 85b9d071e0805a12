//! # Connection Cache
//!
//! [`IdleCache`] is a typed, capacity-aware map with single-flight async
//! creation per key and idle eviction on a monotonic clock.
//! [`ConnectionCache`] builds the per-owner channel cache on top of it.
//!
//! Concurrency rules:
//!
//! - Lookups for different keys never wait on each other. The map is
//!   sharded and no map lock is held while a value is being created.
//! - Concurrent lookups for the same key share one creation. The first
//!   caller runs the initializer; the rest await its result.
//! - A failed creation hands the slot to callers already waiting on it: the
//!   next waiter runs its own initializer into the same slot. With nobody
//!   waiting the slot is removed, so the next caller starts from scratch.

use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::handle::{LedgerSession, StaleFlag};
use crate::config::{CacheConfig, Endpoint};
use crate::error::GatewayError;
use crate::identity::{Identity, OwnerId};
use crate::ledger::{Connector, LedgerChannel};

// ---------------------------------------------------------------------------
// IdleCache
// ---------------------------------------------------------------------------

struct Slot<V> {
    cell: OnceCell<V>,
    last_used: Mutex<Instant>,
}

impl<V> Slot<V> {
    fn new() -> Self {
        Self {
            cell: OnceCell::new(),
            last_used: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last_used.lock() = Instant::now();
    }

    fn last_used(&self) -> Instant {
        *self.last_used.lock()
    }
}

/// Bounded map from `K` to lazily created `V`, tracking last use.
pub struct IdleCache<K, V> {
    entries: DashMap<K, Arc<Slot<V>>>,
    capacity: usize,
}

impl<K, V> IdleCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of entries, including ones still being created.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the value for `key`, creating it with `init` if absent, and
    /// marks the entry as used.
    pub async fn get_or_try_init<F, Fut, E>(&self, key: &K, init: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let slot = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Slot::new()))
            .value()
            .clone();
        slot.touch();

        match slot.cell.get_or_try_init(init).await {
            Ok(value) => {
                slot.touch();
                Ok(value.clone())
            }
            Err(e) => {
                // The map and this call hold one reference each; any more
                // belong to waiters that will retry on this slot.
                self.entries.remove_if(key, |_, s| {
                    Arc::ptr_eq(s, &slot) && !s.cell.initialized() && Arc::strong_count(s) <= 2
                });
                Err(e)
            }
        }
    }

    /// The value for `key`, without creating it or touching its timestamp.
    pub fn peek(&self, key: &K) -> Option<V> {
        self.entries.get(key).and_then(|s| s.cell.get().cloned())
    }

    /// When `key` was last handed out.
    pub fn last_used(&self, key: &K) -> Option<Instant> {
        self.entries.get(key).map(|s| s.last_used())
    }

    /// Removes `key` if its current value satisfies `predicate`.
    pub fn remove_if(&self, key: &K, predicate: impl Fn(&V) -> bool) -> Option<V> {
        self.entries
            .remove_if(key, |_, slot| slot.cell.get().map_or(false, &predicate))
            .and_then(|(_, slot)| slot.cell.get().cloned())
    }

    /// Removes every created entry unused for strictly longer than `max_age`.
    /// Entries still being created are left alone; empty slots nobody holds
    /// any more are dropped.
    pub fn evict_idle(&self, max_age: Duration) -> Vec<(K, V)> {
        let now = Instant::now();
        let mut expired = Vec::new();
        self.entries.retain(|key, slot| match slot.cell.get() {
            Some(value) if now.saturating_duration_since(slot.last_used()) > max_age => {
                expired.push((key.clone(), value.clone()));
                false
            }
            Some(_) => true,
            None => Arc::strong_count(slot) > 1,
        });
        expired
    }

    /// While over capacity, removes the least recently used created entry
    /// other than `keep`.
    pub fn evict_over_capacity(&self, keep: &K) -> Vec<(K, V)> {
        let mut evicted = Vec::new();
        while self.entries.len() > self.capacity {
            let victim = self
                .entries
                .iter()
                .filter(|e| e.key() != keep && e.value().cell.initialized())
                .min_by_key(|e| e.value().last_used())
                .map(|e| e.key().clone());
            let Some(victim) = victim else { break };

            if let Some((key, slot)) = self.entries.remove(&victim) {
                if let Some(value) = slot.cell.get() {
                    evicted.push((key, value.clone()));
                }
            }
        }
        evicted
    }

    /// Removes and returns every created entry.
    pub fn drain(&self) -> Vec<(K, V)> {
        let keys: Vec<K> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.into_iter()
            .filter_map(|key| self.entries.remove(&key))
            .filter_map(|(key, slot)| slot.cell.get().cloned().map(|v| (key, v)))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// ConnectionCache
// ---------------------------------------------------------------------------

/// One owner's live channel and signing session.
#[derive(Debug, Clone)]
pub struct CachedConnection {
    pub owner_id: OwnerId,
    pub channel: Arc<dyn LedgerChannel>,
    pub session: LedgerSession,
    /// Raised by handles on this connection when a call fails at the
    /// transport level.
    pub stale: StaleFlag,
}

impl CachedConnection {
    /// Open and not marked stale.
    pub fn is_usable(&self) -> bool {
        !self.channel.is_closed() && !self.stale.is_set()
    }
}

/// Per-owner channel cache. At most one live entry per owner.
pub struct ConnectionCache {
    connector: Arc<dyn Connector>,
    endpoint: Endpoint,
    entries: IdleCache<OwnerId, CachedConnection>,
    closed: AtomicBool,
    evicted_total: AtomicU64,
}

impl ConnectionCache {
    pub fn new(connector: Arc<dyn Connector>, endpoint: Endpoint, config: &CacheConfig) -> Self {
        Self {
            connector,
            endpoint,
            entries: IdleCache::new(config.max_connections),
            closed: AtomicBool::new(false),
            evicted_total: AtomicU64::new(0),
        }
    }

    /// Returns the owner's connection, opening one on first use. A cached
    /// channel found closed or stale is discarded and reopened. Calls still
    /// running on a stale channel finish on it.
    pub async fn get_or_create(&self, identity: &Identity) -> Result<CachedConnection, GatewayError> {
        let owner = identity.owner_id().clone();

        for _ in 0..2 {
            self.ensure_open()?;
            let conn = self
                .entries
                .get_or_try_init(&owner, || self.open(identity))
                .await?;

            if !conn.is_usable() {
                warn!(
                    owner = %owner,
                    closed = conn.channel.is_closed(),
                    "cached channel is unusable, recreating"
                );
                self.entries
                    .remove_if(&owner, |c| Arc::ptr_eq(&c.channel, &conn.channel));
                continue;
            }

            // close_all ran while this channel was being opened.
            if self.closed.load(Ordering::SeqCst) {
                self.entries
                    .remove_if(&owner, |c| Arc::ptr_eq(&c.channel, &conn.channel));
                conn.channel.close().await;
                return Err(disconnected());
            }

            for (evicted_owner, evicted) in self.entries.evict_over_capacity(&owner) {
                evicted.channel.close().await;
                self.evicted_total.fetch_add(1, Ordering::Relaxed);
                info!(owner = %evicted_owner, "cache full, closed least recently used connection");
            }

            return Ok(conn);
        }

        Err(GatewayError::Connection(format!(
            "channel for {owner} closed immediately after opening"
        )))
    }

    /// Opens a channel and session for `identity` without caching it.
    pub(crate) async fn open(&self, identity: &Identity) -> Result<CachedConnection, GatewayError> {
        let session = LedgerSession::from_identity(identity)?;
        let channel = self
            .connector
            .connect(&self.endpoint, session.creator())
            .await?;

        info!(
            owner = %identity.owner_id(),
            msp = identity.msp_id(),
            endpoint = %self.endpoint.address,
            "opened ledger channel"
        );

        Ok(CachedConnection {
            owner_id: identity.owner_id().clone(),
            channel,
            session,
            stale: StaleFlag::default(),
        })
    }

    /// Closes and removes connections unused for longer than `max_age`.
    pub async fn evict_idle(&self, max_age: Duration) -> usize {
        let expired = self.entries.evict_idle(max_age);
        let count = expired.len();
        for (owner, conn) in expired {
            conn.channel.close().await;
            debug!(owner = %owner, "evicted idle connection");
        }
        if count > 0 {
            self.evicted_total.fetch_add(count as u64, Ordering::Relaxed);
            info!(evicted = count, remaining = self.len(), "idle sweep finished");
        }
        count
    }

    /// Closes every cached connection and refuses new ones.
    pub async fn close_all(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        let drained = self.entries.drain();
        let count = drained.len();
        for (_, conn) in drained {
            conn.channel.close().await;
        }
        count
    }

    pub fn contains(&self, owner: &OwnerId) -> bool {
        self.entries.peek(owner).is_some()
    }

    pub fn last_used(&self, owner: &OwnerId) -> Option<Instant> {
        self.entries.last_used(owner)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }

    /// Connections removed by idle sweeps or capacity pressure so far.
    pub fn evicted_total(&self) -> u64 {
        self.evicted_total.load(Ordering::Relaxed)
    }

    fn ensure_open(&self) -> Result<(), GatewayError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(disconnected());
        }
        Ok(())
    }
}

fn disconnected() -> GatewayError {
    GatewayError::Connection("connection manager is disconnected".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_single_flight_per_key() {
        let cache: Arc<IdleCache<&str, usize>> = Arc::new(IdleCache::new(8));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let calls = calls.clone();
            tasks.push(tokio::spawn(async move {
                cache
                    .get_or_try_init(&"alice", || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        Ok::<_, ()>(42)
                    })
                    .await
            }));
        }
        for t in tasks {
            assert_eq!(t.await.unwrap(), Ok(42));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_init_leaves_no_entry() {
        let cache: IdleCache<&str, usize> = IdleCache::new(8);
        let err = cache
            .get_or_try_init(&"bob", || async { Err::<usize, _>("boom") })
            .await;
        assert_eq!(err, Err("boom"));
        assert!(cache.is_empty());

        let ok = cache
            .get_or_try_init(&"bob", || async { Ok::<_, &str>(7) })
            .await;
        assert_eq!(ok, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_init_hands_slot_to_waiter() {
        let cache: Arc<IdleCache<&str, usize>> = Arc::new(IdleCache::new(8));
        let first = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_try_init(&"carol", || async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Err::<usize, _>("refused")
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        let second = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_try_init(&"carol", || async { Ok::<_, &str>(5) })
                    .await
            })
        };

        assert_eq!(first.await.unwrap(), Err("refused"));
        assert_eq!(second.await.unwrap(), Ok(5));
        assert_eq!(cache.peek(&"carol"), Some(5));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_idle_boundary() {
        let cache: IdleCache<&str, u8> = IdleCache::new(8);
        cache.get_or_try_init(&"old", || async { Ok::<_, ()>(1) }).await.unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;
        cache.get_or_try_init(&"new", || async { Ok::<_, ()>(2) }).await.unwrap();

        // "old" is exactly at the limit: kept.
        assert!(cache.evict_idle(Duration::from_secs(10)).is_empty());

        tokio::time::advance(Duration::from_millis(1)).await;
        let evicted = cache.evict_idle(Duration::from_secs(10));
        assert_eq!(evicted, vec![("old", 1)]);
        assert_eq!(cache.peek(&"new"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_least_recently_used() {
        let cache: IdleCache<&str, u8> = IdleCache::new(2);
        cache.get_or_try_init(&"a", || async { Ok::<_, ()>(1) }).await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.get_or_try_init(&"b", || async { Ok::<_, ()>(2) }).await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        // Touch "a" so "b" becomes the oldest.
        cache.get_or_try_init(&"a", || async { Ok::<_, ()>(9) }).await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.get_or_try_init(&"c", || async { Ok::<_, ()>(3) }).await.unwrap();

        let evicted = cache.evict_over_capacity(&"c");
        assert_eq!(evicted, vec![("b", 2)]);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.peek(&"a"), Some(1));
    }

    #[tokio::test]
    async fn test_drain_empties_cache() {
        let cache: IdleCache<u32, u32> = IdleCache::new(8);
        for i in 0..3 {
            cache.get_or_try_init(&i, || async move { Ok::<_, ()>(i) }).await.unwrap();
        }
        assert_eq!(cache.drain().len(), 3);
        assert!(cache.is_empty());
    }
}
