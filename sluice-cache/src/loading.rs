use crate::{
    cache::{CacheSettings, CacheStats, Counters},
    maintenance::{Maintenance, Sweep},
};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    future::Future,
    hash::Hash,
    pin::Pin,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, Weak,
        atomic::{AtomicU64, Ordering},
    },
    task::{Context, Poll},
    time::Duration,
};
use tokio::{runtime::Handle, time::Instant};
use tracing::{debug, trace};

type SharedLoad<V, E> = Shared<BoxFuture<'static, Result<V, E>>>;

struct Slot<V, E> {
    load: SharedLoad<V, E>,
    /// Set when the load settles successfully, `None` while it is in flight.
    written_at: Option<Instant>,
    tick: u64,
    load_id: u64,
}

impl<V, E> Slot<V, E> {
    fn is_settled(&self) -> bool {
        self.written_at.is_some()
    }
}

impl<V: Clone, E: Clone> Slot<V, E> {
    // In-flight loads never expire. Failed ones are never served again.
    fn is_stale(&self, now: Instant, ttl: Duration) -> bool {
        match self.written_at {
            Some(written_at) => now.saturating_duration_since(written_at) >= ttl,
            None => false,
        }
    }

    fn is_failed(&self) -> bool {
        matches!(self.load.peek(), Some(Err(_)))
    }

    fn is_live(&self, now: Instant, ttl: Duration) -> bool {
        !self.is_stale(now, ttl) && !self.is_failed()
    }
}

/// Entries plus their access order, oldest tick first.
struct Table<K, V, E> {
    slots: HashMap<K, Slot<V, E>>,
    order: BTreeMap<u64, K>,
    next_tick: u64,
}

impl<K, V, E> Table<K, V, E>
where
    K: Hash + Eq + Clone,
{
    fn new() -> Self {
        Self {
            slots: HashMap::new(),
            order: BTreeMap::new(),
            next_tick: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn touch(&mut self, key: &K) -> Option<SharedLoad<V, E>> {
        let tick = self.tick();
        let slot = self.slots.get_mut(key)?;
        self.order.remove(&slot.tick);
        slot.tick = tick;
        self.order.insert(tick, key.clone());
        Some(slot.load.clone())
    }

    fn insert(&mut self, key: K, load: SharedLoad<V, E>, load_id: u64) {
        let tick = self.tick();
        let slot = Slot {
            load,
            written_at: None,
            tick,
            load_id,
        };
        if let Some(old) = self.slots.insert(key.clone(), slot) {
            self.order.remove(&old.tick);
        }
        self.order.insert(tick, key);
    }

    fn remove(&mut self, key: &K) -> Option<Slot<V, E>> {
        let slot = self.slots.remove(key)?;
        self.order.remove(&slot.tick);
        Some(slot)
    }

    /// Drop least recently used settled entries until at most `max` remain.
    ///
    /// In-flight loads are skipped, so the table can stay above `max` until
    /// they settle.
    fn evict_to(&mut self, max: u64) -> u64 {
        let mut evicted = 0;
        while self.slots.len() as u64 > max {
            let victim = self
                .order
                .iter()
                .find(|(_, key)| self.slots.get(*key).is_some_and(Slot::is_settled))
                .map(|(tick, _)| *tick);
            let Some(key) = victim.and_then(|tick| self.order.remove(&tick)) else {
                break;
            };
            self.slots.remove(&key);
            evicted += 1;
        }
        evicted
    }

    fn clear(&mut self) -> usize {
        let count = self.slots.len();
        self.slots.clear();
        self.order.clear();
        count
    }
}

struct Inner<K, V, E> {
    table: Mutex<Table<K, V, E>>,
    settings: CacheSettings,
    counters: Counters,
    next_load_id: AtomicU64,
}

impl<K, V, E> Inner<K, V, E>
where
    K: Hash + Eq + Clone,
    V: Clone,
    E: Clone,
{
    fn lock(&self) -> MutexGuard<'_, Table<K, V, E>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the outcome of load `load_id` if `key` still belongs to it.
    ///
    /// A success starts the entry's time to live, a failure removes it.
    fn settle(&self, key: &K, load_id: u64, succeeded: bool) {
        let mut table = self.lock();
        let Some(slot) = table
            .slots
            .get_mut(key)
            .filter(|slot| slot.load_id == load_id)
        else {
            return;
        };

        if succeeded {
            slot.written_at = Some(Instant::now());
            let evicted = table.evict_to(self.settings.maximum_size);
            drop(table);
            if evicted > 0 {
                Counters::bump(&self.counters.evictions, evicted);
                debug!(evicted, "cache over capacity");
            }
        } else {
            table.remove(key);
            drop(table);
            Counters::bump(&self.counters.failed_loads, 1);
            debug!(load_id, "failed load dropped from cache");
        }
    }

    fn sweep_at(&self, now: Instant) -> usize {
        let ttl = self.settings.expire_after_write;
        let mut table = self.lock();
        let stale: Vec<K> = table
            .slots
            .iter()
            .filter(|(_, slot)| !slot.is_live(now, ttl))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            table.remove(key);
        }
        drop(table);

        Counters::bump(&self.counters.expirations, stale.len() as u64);
        Counters::bump(&self.counters.sweeps, 1);
        stale.len()
    }
}

impl<K, V, E> Sweep for Inner<K, V, E>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }
}

/// In-memory cache of in-flight and completed loads.
///
/// Concurrent lookups of one key share a single load. Every load is driven to
/// completion on the cache's runtime even when all its waiters are gone. An
/// entry is served until `expire_after_write` has elapsed since its load
/// succeeded, while a load still in flight never expires. A load that fails
/// is removed as soon as it settles. Once `maximum_size` is exceeded the least
/// recently used settled entries are evicted. A background task sweeps
/// expired entries every `cleanup_interval`.
pub struct LoadingCache<K, V, E> {
    inner: Arc<Inner<K, V, E>>,
    handle: Handle,
    maintenance: Maintenance,
}

impl<K, V, E> LoadingCache<K, V, E>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new(settings: CacheSettings, handle: &Handle) -> Self {
        let inner = Arc::new(Inner {
            table: Mutex::new(Table::new()),
            settings,
            counters: Counters::default(),
            next_load_id: AtomicU64::new(0),
        });
        let sweeper: Arc<dyn Sweep> = inner.clone();
        let target: Weak<dyn Sweep> = Arc::downgrade(&sweeper);
        let maintenance = Maintenance::spawn(handle, target, settings.cleanup_interval);
        debug!(?settings, "loading cache started");

        Self {
            inner,
            handle: handle.clone(),
            maintenance,
        }
    }

    /// Return the load for `key`, starting one with `init` when no live entry
    /// exists.
    ///
    /// The check and the insert happen under one lock, so `init` runs at most
    /// once per miss and must not call back into this cache. When `init`
    /// itself fails nothing is stored and its error is returned.
    pub fn get_with<F, Fut>(&self, key: K, init: F) -> Result<CachedLoad<V, E>, E>
    where
        F: FnOnce() -> Result<Fut, E>,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let now = Instant::now();
        let settings = self.inner.settings;
        let mut table = self.inner.lock();

        match table
            .slots
            .get(&key)
            .map(|slot| slot.is_live(now, settings.expire_after_write))
        {
            Some(true) => {
                if let Some(load) = table.touch(&key) {
                    drop(table);
                    Counters::bump(&self.inner.counters.hits, 1);
                    trace!("cache hit");
                    return Ok(CachedLoad::new(load));
                }
            }
            Some(false) => {
                table.remove(&key);
                Counters::bump(&self.inner.counters.expirations, 1);
            }
            None => {}
        }

        let fut = init()?;
        let load_id = self.inner.next_load_id.fetch_add(1, Ordering::Relaxed);
        let owner = Arc::downgrade(&self.inner);
        let settled_key = key.clone();
        let load = async move {
            let result = fut.await;
            if let Some(inner) = owner.upgrade() {
                inner.settle(&settled_key, load_id, result.is_ok());
            }
            result
        }
        .boxed()
        .shared();

        table.insert(key, load.clone(), load_id);
        let evicted = table.evict_to(settings.maximum_size);
        drop(table);

        // settles the entry even if every waiter goes away
        self.handle.spawn(load.clone());

        Counters::bump(&self.inner.counters.misses, 1);
        if evicted > 0 {
            Counters::bump(&self.inner.counters.evictions, evicted);
            debug!(evicted, "cache over capacity");
        }
        Ok(CachedLoad::new(load))
    }

    /// Live entry for `key` without starting a load.
    pub fn get(&self, key: &K) -> Option<CachedLoad<V, E>> {
        let now = Instant::now();
        let mut table = self.inner.lock();
        let ttl = self.inner.settings.expire_after_write;
        let live = table
            .slots
            .get(key)
            .is_some_and(|slot| slot.is_live(now, ttl));
        if !live {
            return None;
        }
        table.touch(key).map(CachedLoad::new)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        let now = Instant::now();
        let ttl = self.inner.settings.expire_after_write;
        self.inner
            .lock()
            .slots
            .get(key)
            .is_some_and(|slot| slot.is_live(now, ttl))
    }

    /// Drop the entry for `key`. Waiters already holding its load are unaffected.
    pub fn invalidate(&self, key: &K) -> bool {
        self.inner.lock().remove(key).is_some()
    }

    pub fn invalidate_all(&self) {
        let removed = self.inner.lock().clear();
        debug!(removed, "cache cleared");
    }

    /// Resident entries, including expired ones not swept yet.
    pub fn entry_count(&self) -> u64 {
        self.inner.lock().slots.len() as u64
    }

    /// Sweep expired entries now, returning how many were removed.
    pub fn cleanup(&self) -> usize {
        self.inner.sweep_at(Instant::now())
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entry_count();
        self.inner.counters.snapshot(entries)
    }

    pub fn settings(&self) -> CacheSettings {
        self.inner.settings
    }

    /// Stop the background sweep. Safe to call more than once.
    pub fn shutdown_maintenance(&self) {
        if self.maintenance.shutdown() {
            debug!("cache maintenance shut down");
        }
    }

    pub fn is_maintenance_running(&self) -> bool {
        self.maintenance.is_running()
    }
}

impl<K, V, E> Drop for LoadingCache<K, V, E> {
    fn drop(&mut self) {
        self.maintenance.shutdown();
    }
}

impl<K, V, E> fmt::Debug for LoadingCache<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadingCache")
            .field("settings", &self.inner.settings)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadingCacheBuilder {
    settings: CacheSettings,
}

impl LoadingCacheBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expire_after_write(mut self, ttl: Duration) -> Self {
        self.settings.expire_after_write = ttl;
        self
    }

    pub fn maximum_size(mut self, maximum_size: u64) -> Self {
        self.settings.maximum_size = maximum_size;
        self
    }

    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.settings.cleanup_interval = interval;
        self
    }

    pub fn settings(mut self, settings: CacheSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build<K, V, E>(self, handle: &Handle) -> LoadingCache<K, V, E>
    where
        K: Hash + Eq + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        LoadingCache::new(self.settings, handle)
    }
}

/// One waiter's view of a cached load.
///
/// Dropping it never affects the load or other waiters.
#[derive(Clone)]
pub struct CachedLoad<V, E> {
    load: SharedLoad<V, E>,
}

impl<V: Clone, E: Clone> CachedLoad<V, E> {
    fn new(load: SharedLoad<V, E>) -> Self {
        Self { load }
    }

    pub fn is_ready(&self) -> bool {
        self.load.peek().is_some()
    }

    pub fn peek(&self) -> Option<&Result<V, E>> {
        self.load.peek()
    }
}

impl<V: Clone, E: Clone> Future for CachedLoad<V, E> {
    type Output = Result<V, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.load).poll(cx)
    }
}

impl<V, E> fmt::Debug for CachedLoad<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedLoad").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::oneshot;

    type Loader = Box<dyn FnOnce() -> Result<BoxFuture<'static, Result<u32, String>>, String>>;

    fn cache(settings: CacheSettings) -> LoadingCache<String, u32, String> {
        LoadingCache::new(settings, &Handle::current())
    }

    fn loader(calls: &Arc<AtomicUsize>, outcome: Result<u32, String>, delay: Duration) -> Loader {
        let calls = calls.clone();
        Box::new(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(async move {
                tokio::time::sleep(delay).await;
                outcome
            }
            .boxed())
        })
    }

    fn key(name: &str) -> String {
        name.to_string()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_lookups_share_one_load() {
        let cache = Arc::new(cache(CacheSettings::default()));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut waiters = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let calls = calls.clone();
            waiters.push(tokio::spawn(async move {
                let load = cache
                    .get_with(key("k"), loader(&calls, Ok(42), Duration::from_millis(50)))
                    .unwrap();
                load.await
            }));
        }
        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), Ok(42));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 15);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_write() {
        let cache = cache(CacheSettings {
            expire_after_write: Duration::from_secs(2),
            cleanup_interval: Duration::from_secs(60),
            ..Default::default()
        });
        let calls = Arc::new(AtomicUsize::new(0));

        let first = cache.get_with(key("k"), loader(&calls, Ok(1), Duration::ZERO));
        assert_eq!(first.unwrap().await, Ok(1));

        tokio::time::advance(Duration::from_millis(1999)).await;
        let cached = cache.get_with(key("k"), loader(&calls, Ok(2), Duration::ZERO));
        assert_eq!(cached.unwrap().await, Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(!cache.contains_key(&key("k")));
        let reloaded = cache.get_with(key("k"), loader(&calls, Ok(2), Duration::ZERO));
        assert_eq!(reloaded.unwrap().await, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().expirations, 1);
    }

    #[tokio::test]
    async fn failed_load_is_shared_then_forgotten() {
        let cache = cache(CacheSettings::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let first = cache
            .get_with(key("k"), loader(&calls, Err("boom".into()), Duration::ZERO))
            .unwrap();
        let second = cache
            .get_with(key("k"), loader(&calls, Ok(9), Duration::ZERO))
            .unwrap();

        assert_eq!(first.await, Err("boom".to_string()));
        assert_eq!(second.await, Err("boom".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!cache.contains_key(&key("k")));
        assert_eq!(cache.stats().failed_loads, 1);

        let third = cache
            .get_with(key("k"), loader(&calls, Ok(9), Duration::ZERO))
            .unwrap();
        assert_eq!(third.await, Ok(9));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_load_is_forgotten_without_waiters() {
        let cache = cache(CacheSettings::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let abandoned = cache
            .get_with(key("k"), loader(&calls, Err("boom".into()), Duration::ZERO))
            .unwrap();
        drop(abandoned);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(cache.entry_count(), 0);
        assert_eq!(cache.stats().failed_loads, 1);

        let retried = cache
            .get_with(key("k"), loader(&calls, Ok(4), Duration::ZERO))
            .unwrap();
        assert_eq!(retried.await, Ok(4));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_load_is_not_expired_while_in_flight() {
        let cache = cache(CacheSettings {
            expire_after_write: Duration::from_secs(2),
            cleanup_interval: Duration::from_millis(500),
            ..Default::default()
        });
        let calls = Arc::new(AtomicUsize::new(0));

        let first = cache
            .get_with(key("k"), loader(&calls, Ok(1), Duration::from_secs(3)))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;

        assert!(cache.contains_key(&key("k")));
        let second = cache
            .get_with(key("k"), loader(&calls, Ok(2), Duration::ZERO))
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.await, Ok(1));
        assert_eq!(second.await, Ok(1));

        // time to live counts from the moment the load settled
        tokio::time::advance(Duration::from_millis(1900)).await;
        assert!(cache.contains_key(&key("k")));
        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(!cache.contains_key(&key("k")));
    }

    #[tokio::test]
    async fn in_flight_loads_are_not_evicted() {
        let cache = cache(CacheSettings {
            maximum_size: 1,
            ..Default::default()
        });
        let calls = Arc::new(AtomicUsize::new(0));

        let a = cache
            .get_with(key("a"), loader(&calls, Ok(1), Duration::from_millis(20)))
            .unwrap();
        let b = cache
            .get_with(key("b"), loader(&calls, Ok(2), Duration::from_millis(20)))
            .unwrap();
        assert_eq!(cache.entry_count(), 2);
        assert_eq!(cache.stats().evictions, 0);

        assert_eq!(a.await, Ok(1));
        assert_eq!(b.await, Ok(2));
        assert_eq!(cache.entry_count(), 1);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn failing_init_stores_nothing() {
        let cache = cache(CacheSettings::default());
        let result = cache.get_with(key("k"), || {
            Err::<BoxFuture<'static, Result<u32, String>>, _>("rejected".to_string())
        });
        assert_eq!(result.unwrap_err(), "rejected");
        assert_eq!(cache.entry_count(), 0);
        assert_eq!(cache.stats().misses, 0);
    }

    #[tokio::test]
    async fn least_recently_used_entry_is_evicted() {
        let cache = cache(CacheSettings {
            maximum_size: 2,
            ..Default::default()
        });
        let calls = Arc::new(AtomicUsize::new(0));

        for (name, value) in [("a", 1), ("b", 2)] {
            let load = cache.get_with(key(name), loader(&calls, Ok(value), Duration::ZERO));
            assert_eq!(load.unwrap().await, Ok(value));
        }
        // touch "a" so "b" becomes the oldest
        assert!(cache.get(&key("a")).is_some());
        let load = cache.get_with(key("c"), loader(&calls, Ok(3), Duration::ZERO));
        assert_eq!(load.unwrap().await, Ok(3));

        assert_eq!(cache.entry_count(), 2);
        assert!(cache.contains_key(&key("a")));
        assert!(!cache.contains_key(&key("b")));
        assert!(cache.contains_key(&key("c")));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn maintenance_sweeps_without_lookups() {
        let cache = cache(CacheSettings {
            expire_after_write: Duration::from_secs(2),
            cleanup_interval: Duration::from_millis(500),
            ..Default::default()
        });
        let calls = Arc::new(AtomicUsize::new(0));

        let load = cache.get_with(key("k"), loader(&calls, Ok(1), Duration::ZERO));
        assert_eq!(load.unwrap().await, Ok(1));
        assert_eq!(cache.entry_count(), 1);

        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(cache.entry_count(), 0);
        let stats = cache.stats();
        assert!(stats.sweeps >= 1);
        assert_eq!(stats.expirations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_sweeping() {
        let cache = cache(CacheSettings {
            cleanup_interval: Duration::from_millis(100),
            ..Default::default()
        });
        assert!(cache.is_maintenance_running());

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(cache.stats().sweeps >= 1);

        cache.shutdown_maintenance();
        assert!(!cache.is_maintenance_running());
        let before = cache.stats().sweeps;

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(cache.stats().sweeps, before);

        cache.shutdown_maintenance();
    }

    #[tokio::test]
    async fn dropping_one_waiter_keeps_the_load() {
        let cache = cache(CacheSettings::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel::<u32>();
        let pending = tokio::spawn(async move { rx.await.map_err(|e| e.to_string()) });

        let first = cache
            .get_with(key("k"), || {
                Ok::<_, String>(async move {
                    match pending.await {
                        Ok(result) => result,
                        Err(e) => Err(e.to_string()),
                    }
                })
            })
            .unwrap();
        let second = cache
            .get_with(key("k"), loader(&calls, Ok(0), Duration::ZERO))
            .unwrap();
        assert!(!second.is_ready());

        drop(first);
        tx.send(5).unwrap();

        assert_eq!(second.await, Ok(5));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn invalidate_removes_entries() {
        let cache = cache(CacheSettings::default());
        let calls = Arc::new(AtomicUsize::new(0));
        for name in ["a", "b", "c"] {
            let load = cache.get_with(key(name), loader(&calls, Ok(1), Duration::ZERO));
            load.unwrap().await.unwrap();
        }

        assert!(cache.invalidate(&key("a")));
        assert!(!cache.invalidate(&key("a")));
        assert_eq!(cache.entry_count(), 2);

        cache.invalidate_all();
        assert_eq!(cache.entry_count(), 0);
        assert!(cache.get(&key("b")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn manual_cleanup_counts_removed_entries() {
        let cache = cache(CacheSettings {
            expire_after_write: Duration::from_secs(1),
            cleanup_interval: Duration::from_secs(3600),
            ..Default::default()
        });
        let calls = Arc::new(AtomicUsize::new(0));
        for name in ["a", "b"] {
            let load = cache.get_with(key(name), loader(&calls, Ok(1), Duration::ZERO));
            load.unwrap().await.unwrap();
        }

        assert_eq!(cache.cleanup(), 0);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.cleanup(), 2);
        assert_eq!(cache.entry_count(), 0);
    }
}
