//! Keyed query cache with optimistic transactions
//!
//! QueryCache holds the JSON projection of server state, addressed by
//! [`QueryKey`]:
//! - Reads share one in-flight request per key
//! - Cached data is served immediately while stale entries refetch in the background
//! - Invalidation marks entries stale and refetches every entry with a registered fetcher
//! - [`OptimisticTransaction`] snapshots keys, patches them, and commits or rolls back
//!
//! A read whose fetch is cancelled does not fail. It follows the key to the
//! fetch or value that replaced it, and while a transaction holds an empty
//! key it waits for that transaction to settle. Only removal of the key ends
//! a read with [`ClientError::Cancelled`].
//!
//! The cache is an explicit object: build it once per session, share it by
//! cloning (clones share state), and `clear()` it on logout.

use futures::future::{AbortHandle, Abortable, BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::retry::RetryPolicy;
use studyboard_api::{ClientError, QueryKey, Result};

/// Produces a fresh value for a key
pub type Fetcher = Arc<dyn Fn() -> BoxFuture<'static, Result<Value>> + Send + Sync>;

type SharedFetch = Shared<BoxFuture<'static, Result<Value>>>;

/// Wraps a typed async function as a [`Fetcher`]
pub fn fetcher<T, F, Fut>(f: F) -> Fetcher
where
    T: Serialize + Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    Arc::new(move || {
        let fut = f();
        async move {
            let value = fut.await?;
            Ok(serde_json::to_value(value)?)
        }
        .boxed()
    })
}

#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Age after which cached data is refetched on the next read
    pub stale_time: Duration,
    /// Retry policy for reads that do not specify one
    pub retry: RetryPolicy,
    pub event_capacity: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            stale_time: Duration::ZERO,
            retry: RetryPolicy::Never,
            event_capacity: 256,
        }
    }
}

/// Change notifications for subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    Updated(QueryKey),
    Invalidated(QueryKey),
    Removed(QueryKey),
    RolledBack(QueryKey),
    /// A transaction ended without commit or rollback
    Released(QueryKey),
    Failed { key: QueryKey, error: ClientError },
}

impl CacheEvent {
    pub fn key(&self) -> &QueryKey {
        match self {
            CacheEvent::Updated(key)
            | CacheEvent::Invalidated(key)
            | CacheEvent::Removed(key)
            | CacheEvent::RolledBack(key)
            | CacheEvent::Released(key) => key,
            CacheEvent::Failed { key, .. } => key,
        }
    }
}

/// Point-in-time view of one key
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryState {
    pub data: Option<Value>,
    pub is_fetching: bool,
    pub is_stale: bool,
    pub error: Option<ClientError>,
}

struct InFlight {
    id: u64,
    future: SharedFetch,
    abort: AbortHandle,
}

struct Entry {
    key: QueryKey,
    data: Option<Value>,
    updated_at: Option<Instant>,
    invalidated: bool,
    error: Option<ClientError>,
    fetcher: Option<Fetcher>,
    retry: Option<RetryPolicy>,
    in_flight: Option<InFlight>,
    /// Open transactions tracking this key
    holds: Arc<AtomicUsize>,
}

/// What a reader does next for a key
enum ReadStep {
    Join(SharedFetch),
    Wait(broadcast::Receiver<CacheEvent>),
}

impl Entry {
    fn new(key: QueryKey) -> Self {
        Self {
            key,
            data: None,
            updated_at: None,
            invalidated: false,
            error: None,
            fetcher: None,
            retry: None,
            in_flight: None,
            holds: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn is_held(&self) -> bool {
        self.holds.load(Ordering::SeqCst) > 0
    }

    fn is_stale(&self, stale_time: Duration) -> bool {
        match self.updated_at {
            _ if self.invalidated => true,
            Some(at) => at.elapsed() >= stale_time,
            None => true,
        }
    }

    fn cancel_in_flight(&mut self) -> bool {
        match self.in_flight.take() {
            Some(in_flight) => {
                in_flight.abort.abort();
                true
            }
            None => false,
        }
    }
}

struct CacheState {
    entries: RwLock<HashMap<String, Entry>>,
    events: broadcast::Sender<CacheEvent>,
    next_fetch_id: AtomicU64,
    options: CacheOptions,
}

#[derive(Clone)]
pub struct QueryCache {
    state: Arc<CacheState>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(CacheOptions::default())
    }
}

impl QueryCache {
    pub fn new(options: CacheOptions) -> Self {
        let (events, _) = broadcast::channel(options.event_capacity.max(1));
        Self {
            state: Arc::new(CacheState {
                entries: RwLock::new(HashMap::new()),
                events,
                next_fetch_id: AtomicU64::new(1),
                options,
            }),
        }
    }

    pub fn options(&self) -> &CacheOptions {
        &self.state.options
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.state.events.subscribe()
    }

    fn emit(&self, event: CacheEvent) {
        // No subscribers is fine
        let _ = self.state.events.send(event);
    }

    pub async fn get_data(&self, key: &QueryKey) -> Option<Value> {
        let entries = self.state.entries.read().await;
        entries.get(&key.hash_key()).and_then(|e| e.data.clone())
    }

    /// Cached data decoded as `T`; `None` when absent or of another shape
    pub async fn get_typed<T: DeserializeOwned>(&self, key: &QueryKey) -> Option<T> {
        let value = self.get_data(key).await?;
        match serde_json::from_value(value) {
            Ok(typed) => Some(typed),
            Err(e) => {
                warn!("[QueryCache] cached value for {} did not decode: {}", key, e);
                None
            }
        }
    }

    pub async fn set_data(&self, key: &QueryKey, value: Value) {
        {
            let mut entries = self.state.entries.write().await;
            let entry = entries
                .entry(key.hash_key())
                .or_insert_with(|| Entry::new(key.clone()));
            entry.data = Some(value);
            entry.updated_at = Some(Instant::now());
            entry.invalidated = false;
            entry.error = None;
        }
        self.emit(CacheEvent::Updated(key.clone()));
    }

    pub async fn state(&self, key: &QueryKey) -> QueryState {
        let entries = self.state.entries.read().await;
        match entries.get(&key.hash_key()) {
            Some(entry) => QueryState {
                data: entry.data.clone(),
                is_fetching: entry.in_flight.is_some(),
                is_stale: entry.is_stale(self.state.options.stale_time),
                error: entry.error.clone(),
            },
            None => QueryState::default(),
        }
    }

    /// Keys currently held, in no particular order
    pub async fn keys(&self) -> Vec<QueryKey> {
        let entries = self.state.entries.read().await;
        entries.values().map(|e| e.key.clone()).collect()
    }

    /// Fetches `key`, joining an in-flight request when there is one.
    ///
    /// The fetcher is remembered so invalidation can refetch the key later.
    pub async fn fetch(&self, key: &QueryKey, fetcher: Fetcher) -> Result<Value> {
        self.fetch_with(key, fetcher, None).await
    }

    pub async fn fetch_with(
        &self,
        key: &QueryKey,
        fetcher: Fetcher,
        retry: Option<RetryPolicy>,
    ) -> Result<Value> {
        {
            let mut entries = self.state.entries.write().await;
            let entry = entries
                .entry(key.hash_key())
                .or_insert_with(|| Entry::new(key.clone()));
            entry.fetcher = Some(fetcher);
            if retry.is_some() {
                entry.retry = retry;
            }
        }
        self.read(key, false).await
    }

    /// Joins or starts the fetch for `key` and follows it across
    /// cancellations. `serve_cached` returns data already held instead of
    /// fetching; it is always set once a fetch was cancelled.
    async fn read(&self, key: &QueryKey, mut serve_cached: bool) -> Result<Value> {
        loop {
            let step = {
                let mut entries = self.state.entries.write().await;
                let entry = match entries.get_mut(&key.hash_key()) {
                    Some(entry) => entry,
                    None => return Err(ClientError::Cancelled),
                };
                if let Some(in_flight) = &entry.in_flight {
                    debug!("[QueryCache] joining in-flight fetch for {}", key);
                    ReadStep::Join(in_flight.future.clone())
                } else if let (true, Some(data)) = (serve_cached, &entry.data) {
                    return Ok(data.clone());
                } else if entry.is_held() {
                    // Subscribed under the lock so the settling event is not missed
                    ReadStep::Wait(self.subscribe())
                } else {
                    ReadStep::Join(self.start_fetch(entry))
                }
            };

            match step {
                ReadStep::Join(future) => match future.await {
                    Err(ClientError::Cancelled) => {
                        debug!("[QueryCache] fetch for {} was cancelled, following the key", key);
                        serve_cached = true;
                    }
                    result => return result,
                },
                ReadStep::Wait(mut events) => wait_for_key(&mut events, key).await?,
            }
        }
    }

    /// Typed read that serves cached data immediately.
    ///
    /// With cached data the value is returned at once and, if stale, a
    /// background refetch is started. Without data the fetch is awaited.
    pub async fn query<T>(&self, key: &QueryKey, fetcher: Fetcher) -> Result<T>
    where
        T: DeserializeOwned,
    {
        self.query_with(key, fetcher, None).await
    }

    pub async fn query_with<T>(
        &self,
        key: &QueryKey,
        fetcher: Fetcher,
        retry: Option<RetryPolicy>,
    ) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let cached = {
            let mut entries = self.state.entries.write().await;
            let entry = entries
                .entry(key.hash_key())
                .or_insert_with(|| Entry::new(key.clone()));
            entry.fetcher = Some(Arc::clone(&fetcher));
            if retry.is_some() {
                entry.retry = retry;
            }
            match entry.data.clone() {
                Some(data) => {
                    let idle = entry.in_flight.is_none() && !entry.is_held();
                    if idle && entry.is_stale(self.state.options.stale_time) {
                        debug!("[QueryCache] serving stale {} while revalidating", key);
                        let future = self.start_fetch(entry);
                        spawn_settle(future);
                    }
                    Some(data)
                }
                None => None,
            }
        };

        let value = match cached {
            Some(value) => value,
            None => self.read(key, false).await?,
        };
        Ok(serde_json::from_value(value)?)
    }

    /// Registers a new in-flight fetch on `entry`. Caller holds the write lock.
    fn start_fetch(&self, entry: &mut Entry) -> SharedFetch {
        let fetch_id = self.state.next_fetch_id.fetch_add(1, Ordering::Relaxed);
        let fetcher = match &entry.fetcher {
            Some(f) => Arc::clone(f),
            None => {
                return futures::future::ready(Err(ClientError::Config {
                    message: format!("no fetcher registered for {}", entry.key),
                }))
                .boxed()
                .shared()
            }
        };
        let retry = entry.retry.unwrap_or(self.state.options.retry);
        let cache = self.clone();
        let key = entry.key.clone();

        let work = async move {
            let result = retry.run(|| fetcher()).await;
            cache.settle(&key, fetch_id, &result).await;
            result
        };
        let (abort, registration) = AbortHandle::new_pair();
        let future = Abortable::new(work, registration)
            .map(|outcome| outcome.unwrap_or(Err(ClientError::Cancelled)))
            .boxed()
            .shared();

        entry.in_flight = Some(InFlight {
            id: fetch_id,
            future: future.clone(),
            abort,
        });
        entry.error = None;
        future
    }

    /// Stores a fetch result unless the fetch was cancelled or superseded
    async fn settle(&self, key: &QueryKey, fetch_id: u64, result: &Result<Value>) {
        let event = {
            let mut entries = self.state.entries.write().await;
            let entry = match entries.get_mut(&key.hash_key()) {
                Some(entry) => entry,
                None => return,
            };
            if entry.in_flight.as_ref().map(|f| f.id) != Some(fetch_id) {
                debug!("[QueryCache] dropping superseded result for {}", key);
                return;
            }
            entry.in_flight = None;
            match result {
                Ok(value) => {
                    entry.data = Some(value.clone());
                    entry.updated_at = Some(Instant::now());
                    entry.invalidated = false;
                    entry.error = None;
                    CacheEvent::Updated(key.clone())
                }
                Err(error) => {
                    entry.error = Some(error.clone());
                    CacheEvent::Failed {
                        key: key.clone(),
                        error: error.clone(),
                    }
                }
            }
        };
        self.emit(event);
    }

    /// Aborts in-flight fetches under `prefix`; their results are never stored.
    /// Returns how many fetches were cancelled.
    pub async fn cancel(&self, prefix: &QueryKey) -> usize {
        let mut entries = self.state.entries.write().await;
        let cancelled = entries
            .values_mut()
            .filter(|e| e.key.starts_with(prefix))
            .filter_map(|e| e.cancel_in_flight().then_some(()))
            .count();
        if cancelled > 0 {
            debug!("[QueryCache] cancelled {} fetches under {}", cancelled, prefix);
        }
        cancelled
    }

    /// Marks entries under `prefix` stale and refetches those with a fetcher
    pub async fn invalidate(&self, prefix: &QueryKey) -> Refetches {
        self.invalidate_all(std::slice::from_ref(prefix)).await
    }

    /// Like [`invalidate`](Self::invalidate) for several prefixes at once;
    /// an entry matched by more than one prefix is refetched once
    pub async fn invalidate_all(&self, prefixes: &[QueryKey]) -> Refetches {
        let (invalidated, futures) = {
            let mut entries = self.state.entries.write().await;
            let mut invalidated = Vec::new();
            let mut futures = Vec::new();
            let matching = entries
                .values_mut()
                .filter(|e| prefixes.iter().any(|p| e.key.starts_with(p)));
            for entry in matching {
                entry.invalidated = true;
                invalidated.push(entry.key.clone());
                // Held keys are refetched when their transaction commits
                if entry.fetcher.is_some() && !entry.is_held() {
                    entry.cancel_in_flight();
                    futures.push(self.start_fetch(entry));
                }
            }
            (invalidated, futures)
        };

        debug!(
            "[QueryCache] invalidated {} keys under {} prefixes ({} refetching)",
            invalidated.len(),
            prefixes.len(),
            futures.len()
        );
        for key in invalidated {
            self.emit(CacheEvent::Invalidated(key));
        }
        Refetches {
            handles: futures.into_iter().map(spawn_settle).collect(),
        }
    }

    /// Drops entries under `prefix` entirely
    pub async fn remove(&self, prefix: &QueryKey) -> usize {
        let removed: Vec<QueryKey> = {
            let mut entries = self.state.entries.write().await;
            let hashes: Vec<String> = entries
                .iter()
                .filter(|(_, e)| e.key.starts_with(prefix))
                .map(|(hash, _)| hash.clone())
                .collect();
            hashes
                .into_iter()
                .filter_map(|hash| entries.remove(&hash))
                .map(|mut entry| {
                    entry.cancel_in_flight();
                    entry.key
                })
                .collect()
        };
        let count = removed.len();
        for key in removed {
            self.emit(CacheEvent::Removed(key));
        }
        count
    }

    /// Empties the cache, cancelling everything in flight
    pub async fn clear(&self) {
        let removed: Vec<QueryKey> = {
            let mut entries = self.state.entries.write().await;
            entries
                .drain()
                .map(|(_, mut entry)| {
                    entry.cancel_in_flight();
                    entry.key
                })
                .collect()
        };
        for key in removed {
            self.emit(CacheEvent::Removed(key));
        }
    }

    /// Starts an optimistic transaction over `keys`: in-flight reads for
    /// each key are cancelled and the current values are snapshotted.
    pub async fn begin(&self, keys: &[QueryKey]) -> OptimisticTransaction {
        let mut tx = OptimisticTransaction {
            cache: self.clone(),
            tracked: Vec::new(),
        };
        for key in keys {
            tx.track(key).await;
        }
        tx
    }

    /// Cancels the in-flight fetch of `key`, marks the key held by one more
    /// transaction, and returns the hold with the current value
    async fn hold(&self, key: &QueryKey) -> (Arc<AtomicUsize>, Option<Value>) {
        let mut entries = self.state.entries.write().await;
        let entry = entries
            .entry(key.hash_key())
            .or_insert_with(|| Entry::new(key.clone()));
        if entry.cancel_in_flight() {
            debug!("[QueryCache] cancelled fetch of {} for a pending mutation", key);
        }
        entry.holds.fetch_add(1, Ordering::SeqCst);
        (Arc::clone(&entry.holds), entry.data.clone())
    }

    async fn restore(&self, key: &QueryKey, snapshot: Option<Value>) {
        {
            let mut entries = self.state.entries.write().await;
            let hash = key.hash_key();
            match snapshot {
                Some(value) => {
                    let entry = entries
                        .entry(hash)
                        .or_insert_with(|| Entry::new(key.clone()));
                    entry.cancel_in_flight();
                    entry.data = Some(value);
                }
                None => {
                    if let Some(entry) = entries.get_mut(&hash) {
                        entry.cancel_in_flight();
                        entry.data = None;
                    }
                }
            }
        }
        self.emit(CacheEvent::RolledBack(key.clone()));
    }
}

fn spawn_settle(future: SharedFetch) -> JoinHandle<Result<Value>> {
    tokio::spawn(future)
}

/// Waits for the next event about `key`
async fn wait_for_key(events: &mut broadcast::Receiver<CacheEvent>, key: &QueryKey) -> Result<()> {
    loop {
        match events.recv().await {
            Ok(event) if event.key() == key => return Ok(()),
            Ok(_) => {}
            // Missed events; the caller re-reads the entry anyway
            Err(broadcast::error::RecvError::Lagged(_)) => return Ok(()),
            Err(broadcast::error::RecvError::Closed) => return Err(ClientError::Cancelled),
        }
    }
}

/// Background refetches started by an invalidation
pub struct Refetches {
    handles: Vec<JoinHandle<Result<Value>>>,
}

impl Refetches {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Waits for every refetch; failures are already recorded on their keys
    pub async fn settled(self) {
        for handle in self.handles {
            match handle.await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) if e.is_cancelled() => {}
                Ok(Err(e)) => warn!("[QueryCache] refetch failed: {}", e),
                Err(e) => warn!("[QueryCache] refetch task failed: {}", e),
            }
        }
    }
}

struct Tracked {
    key: QueryKey,
    snapshot: Option<Value>,
    hold: Option<Arc<AtomicUsize>>,
}

impl Tracked {
    fn release(&mut self) -> bool {
        match self.hold.take() {
            Some(hold) => {
                hold.fetch_sub(1, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }
}

/// Snapshot / apply / commit-or-rollback over a set of keys.
///
/// Tracked keys are held: reads neither revalidate nor refetch them until
/// the transaction commits, rolls back or is dropped.
pub struct OptimisticTransaction {
    cache: QueryCache,
    tracked: Vec<Tracked>,
}

impl OptimisticTransaction {
    async fn track(&mut self, key: &QueryKey) {
        if self.tracked.iter().any(|t| &t.key == key) {
            return;
        }
        let (hold, snapshot) = self.cache.hold(key).await;
        self.tracked.push(Tracked {
            key: key.clone(),
            snapshot,
            hold: Some(hold),
        });
    }

    pub fn keys(&self) -> impl Iterator<Item = &QueryKey> {
        self.tracked.iter().map(|t| &t.key)
    }

    /// Value of `key` when it was first tracked
    pub fn snapshot(&self, key: &QueryKey) -> Option<&Value> {
        self.tracked
            .iter()
            .find(|t| &t.key == key)
            .and_then(|t| t.snapshot.as_ref())
    }

    /// Replaces the cached value of `key` with `patch(current)`.
    /// Returning `None` from the patch clears the data.
    pub async fn apply<F>(&mut self, key: &QueryKey, patch: F)
    where
        F: FnOnce(Option<Value>) -> Option<Value>,
    {
        self.track(key).await;
        let current = self.cache.get_data(key).await;
        match patch(current) {
            Some(next) => self.cache.set_data(key, next).await,
            None => {
                let mut entries = self.cache.state.entries.write().await;
                if let Some(entry) = entries.get_mut(&key.hash_key()) {
                    entry.data = None;
                }
            }
        }
    }

    /// Typed variant of [`apply`](Self::apply); does nothing when the key
    /// holds no data
    pub async fn apply_typed<T, F>(&mut self, key: &QueryKey, patch: F) -> Result<()>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T),
    {
        self.track(key).await;
        let mut typed: T = match self.cache.get_data(key).await {
            Some(value) => serde_json::from_value(value)?,
            None => return Ok(()),
        };
        patch(&mut typed);
        self.cache.set_data(key, serde_json::to_value(typed)?).await;
        Ok(())
    }

    /// Keeps the optimistic values and invalidates every tracked key so a
    /// fresh read reconciles them with the server
    pub async fn commit(self) -> Refetches {
        self.commit_with(&[]).await
    }

    /// [`commit`](Self::commit) that also invalidates the `also` prefixes
    pub async fn commit_with(mut self, also: &[QueryKey]) -> Refetches {
        let mut prefixes = Vec::new();
        for mut tracked in std::mem::take(&mut self.tracked) {
            tracked.release();
            prefixes.push(tracked.key);
        }
        prefixes.extend(also.iter().cloned());
        self.cache.invalidate_all(&prefixes).await
    }

    /// Restores every tracked key to its snapshot
    pub async fn rollback(mut self) {
        let mut tracked = std::mem::take(&mut self.tracked);
        for t in &mut tracked {
            t.release();
        }
        for t in tracked {
            debug!("[OptimisticTransaction] rolling back {}", t.key);
            self.cache.restore(&t.key, t.snapshot).await;
        }
    }
}

impl Drop for OptimisticTransaction {
    fn drop(&mut self) {
        for tracked in &mut self.tracked {
            if tracked.release() {
                warn!(
                    "[OptimisticTransaction] dropped without settling {}",
                    tracked.key
                );
                self.cache.emit(CacheEvent::Released(tracked.key.clone()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    fn key(parts: &[&str]) -> QueryKey {
        QueryKey::new(parts.iter().map(|p| json!(p)).collect())
    }

    fn counting_fetcher(calls: Arc<AtomicUsize>, value: Value) -> Fetcher {
        fetcher(move || {
            let calls = Arc::clone(&calls);
            let value = value.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
                Ok(value)
            }
        })
    }

    #[tokio::test]
    async fn test_concurrent_fetches_share_one_request() {
        let cache = QueryCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let k = key(&["studies", "s1", "detail"]);
        let f = counting_fetcher(Arc::clone(&calls), json!({"id": "s1"}));

        let (a, b) = tokio::join!(cache.fetch(&k, Arc::clone(&f)), cache.fetch(&k, f));
        assert_eq!(a.unwrap(), json!({"id": "s1"}));
        assert_eq!(b.unwrap(), json!({"id": "s1"}));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get_data(&k).await, Some(json!({"id": "s1"})));
    }

    #[tokio::test]
    async fn test_query_serves_stale_data_and_revalidates() {
        let cache = QueryCache::default();
        let k = key(&["studies", "list"]);
        cache.set_data(&k, json!(["old"])).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let mut events = cache.subscribe();

        let value: Vec<String> = cache
            .query(&k, counting_fetcher(Arc::clone(&calls), json!(["new"])))
            .await
            .unwrap();
        assert_eq!(value, vec!["old".to_string()]);

        loop {
            if let CacheEvent::Updated(updated) = events.recv().await.unwrap() {
                if updated == k {
                    break;
                }
            }
        }
        assert_eq!(cache.get_data(&k).await, Some(json!(["new"])));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    fn gated_fetcher(gate: Arc<Notify>, calls: Arc<AtomicUsize>) -> Fetcher {
        fetcher(move || {
            let gate = Arc::clone(&gate);
            let calls = Arc::clone(&calls);
            async move {
                // Only the first request waits for the gate
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    gate.notified().await;
                }
                Ok(json!(["from server"]))
            }
        })
    }

    async fn spawn_reader(
        cache: &QueryCache,
        k: &QueryKey,
        fetch: Fetcher,
    ) -> JoinHandle<Result<Value>> {
        let reader = {
            let cache = cache.clone();
            let k = k.clone();
            tokio::spawn(async move { cache.fetch(&k, fetch).await })
        };
        while !cache.state(k).await.is_fetching {
            tokio::task::yield_now().await;
        }
        reader
    }

    #[tokio::test]
    async fn test_reader_follows_key_to_optimistic_value() {
        let cache = QueryCache::default();
        let k = key(&["steps", "list", "children", "S1"]);
        let gate = Arc::new(Notify::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let reader = spawn_reader(&cache, &k, gated_fetcher(Arc::clone(&gate), calls)).await;

        let mut tx = cache.begin(&[k.clone()]).await;
        assert!(!cache.state(&k).await.is_fetching);
        tx.apply(&k, |_| Some(json!(["optimistic"]))).await;
        gate.notify_waiters();

        assert_eq!(reader.await.unwrap(), Ok(json!(["optimistic"])));
        tokio::task::yield_now().await;
        assert_eq!(cache.get_data(&k).await, Some(json!(["optimistic"])));
        tx.rollback().await;
        assert_eq!(cache.get_data(&k).await, None);
    }

    #[tokio::test]
    async fn test_reader_waits_for_commit_on_empty_held_key() {
        let cache = QueryCache::default();
        let k = key(&["steps", "list", "children", "S1"]);
        let gate = Arc::new(Notify::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let reader = spawn_reader(&cache, &k, gated_fetcher(gate, Arc::clone(&calls))).await;

        let tx = cache.begin(&[k.clone()]).await;
        tokio::task::yield_now().await;
        assert!(!reader.is_finished());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tx.commit().await.settled().await;
        assert_eq!(reader.await.unwrap(), Ok(json!(["from server"])));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dropped_transaction_releases_waiting_reader() {
        let cache = QueryCache::default();
        let k = key(&["steps", "s1", "detail"]);
        let gate = Arc::new(Notify::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let reader = spawn_reader(&cache, &k, gated_fetcher(gate, Arc::clone(&calls))).await;

        let tx = cache.begin(&[k.clone()]).await;
        drop(tx);

        assert_eq!(reader.await.unwrap(), Ok(json!(["from server"])));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_removed_key_ends_read_as_cancelled() {
        let cache = QueryCache::default();
        let k = key(&["steps", "s1", "detail"]);
        let gate = Arc::new(Notify::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let reader = spawn_reader(&cache, &k, gated_fetcher(Arc::clone(&gate), calls)).await;

        assert_eq!(cache.remove(&key(&["steps"])).await, 1);
        gate.notify_waiters();

        assert_eq!(reader.await.unwrap(), Err(ClientError::Cancelled));
        assert_eq!(cache.get_data(&k).await, None);
    }

    #[tokio::test]
    async fn test_held_key_is_not_revalidated_by_reads() {
        let cache = QueryCache::default();
        let k = key(&["studies", "s1", "detail"]);
        let calls = Arc::new(AtomicUsize::new(0));
        cache
            .fetch(&k, counting_fetcher(Arc::clone(&calls), json!({"name": "Pilot"})))
            .await
            .unwrap();

        let mut tx = cache.begin(&[k.clone()]).await;
        tx.apply(&k, |_| Some(json!({"name": "Main"}))).await;
        let served: Value = cache
            .query(&k, counting_fetcher(Arc::clone(&calls), json!({"name": "Pilot"})))
            .await
            .unwrap();
        assert_eq!(served, json!({"name": "Main"}));
        assert!(!cache.state(&k).await.is_fetching);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        tx.rollback().await;
    }

    #[tokio::test]
    async fn test_invalidate_refetches_registered_keys() {
        let cache = QueryCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let k = key(&["steps", "list", "children", "S1"]);
        cache
            .fetch(&k, counting_fetcher(Arc::clone(&calls), json!([1])))
            .await
            .unwrap();
        let unrelated = key(&["scales", "list"]);
        cache.set_data(&unrelated, json!([])).await;

        let refetches = cache.invalidate(&key(&["steps", "list"])).await;
        assert_eq!(refetches.len(), 1);
        refetches.settled().await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let state = cache.state(&k).await;
        assert_eq!(state.data, Some(json!([1])));
        assert!(!state.is_fetching);
        assert!(!cache.state(&unrelated).await.is_fetching);
    }

    #[tokio::test]
    async fn test_overlapping_prefixes_refetch_once() {
        let cache = QueryCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let k = key(&["steps", "list", "children", "S1"]);
        cache
            .fetch(&k, counting_fetcher(Arc::clone(&calls), json!([])))
            .await
            .unwrap();

        let refetches = cache
            .invalidate_all(&[key(&["steps", "list"]), k.clone()])
            .await;
        assert_eq!(refetches.len(), 1);
        refetches.settled().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_remove_drops_entries_under_prefix() {
        let cache = QueryCache::default();
        cache.set_data(&key(&["steps", "a", "detail"]), json!({})).await;
        cache.set_data(&key(&["steps", "a", "summary"]), json!({})).await;
        cache.set_data(&key(&["steps", "b", "detail"]), json!({})).await;

        assert_eq!(cache.remove(&key(&["steps", "a"])).await, 2);
        assert_eq!(cache.keys().await, vec![key(&["steps", "b", "detail"])]);
    }

    #[tokio::test]
    async fn test_rollback_restores_exact_snapshot() {
        let cache = QueryCache::default();
        let list = key(&["steps", "list", "children", "S1"]);
        let detail = key(&["steps", "a", "detail"]);
        let original = json!([{"id": "a", "order_position": 1}, {"id": "b", "order_position": 2}]);
        cache.set_data(&list, original.clone()).await;

        let mut tx = cache.begin(&[list.clone(), detail.clone()]).await;
        tx.apply(&list, |_| Some(json!([]))).await;
        tx.apply(&detail, |_| Some(json!({"id": "a"}))).await;
        assert_eq!(cache.get_data(&list).await, Some(json!([])));

        tx.rollback().await;
        assert_eq!(cache.get_data(&list).await, Some(original));
        assert_eq!(cache.get_data(&detail).await, None);
    }

    #[tokio::test]
    async fn test_apply_typed_patches_in_place() {
        let cache = QueryCache::default();
        let k = key(&["studies", "s1", "detail"]);
        cache.set_data(&k, json!({"name": "Pilot"})).await;

        let mut tx = cache.begin(&[k.clone()]).await;
        tx.apply_typed::<serde_json::Map<String, Value>, _>(&k, |m| {
            m.insert("name".to_string(), json!("Main"));
        })
        .await
        .unwrap();
        assert_eq!(tx.snapshot(&k), Some(&json!({"name": "Pilot"})));
        assert_eq!(cache.get_data(&k).await, Some(json!({"name": "Main"})));
        let refetches = tx.commit().await;
        assert!(refetches.is_empty());
        assert_eq!(cache.get_data(&k).await, Some(json!({"name": "Main"})));
    }
}
