//! Keyed store of fetched resource snapshots.
//!
//! Values are held as serialized JSON so one map serves every record type;
//! callers get typed values back through serde at the fetch boundary. The
//! map and the per-key in-flight markers live behind one mutex, which is
//! never held across an await point.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, trace};

use crate::error::{Error, Result};

use super::key::{KeyPattern, ResourceKey};

/// Erased loader, remembered per key so invalidation can refetch.
type Loader = Arc<dyn Fn() -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Change notification delivered to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEvent {
  /// A fresh value was stored for the key
  Updated,
  /// The entry was marked stale by an invalidation
  Invalidated,
}

#[derive(Default)]
struct Entry {
  value: Option<Value>,
  fresh: bool,
  cached_at: Option<DateTime<Utc>>,
  loader: Option<Loader>,
  /// Present while a loader is running; waiters subscribe to it
  inflight: Option<broadcast::Sender<Result<Value>>>,
  /// Set when an invalidation lands while a loader is running; the running
  /// loader's snapshot predates the invalidation and must not land as fresh
  invalidated_during_load: bool,
  subscribers: Vec<(u64, mpsc::UnboundedSender<CacheEvent>)>,
}

impl Entry {
  fn notify(&mut self, event: CacheEvent) {
    self.subscribers.retain(|(_, tx)| tx.send(event).is_ok());
  }
}

#[derive(Default)]
struct CacheState {
  entries: HashMap<ResourceKey, Entry>,
  next_subscriber_id: u64,
}

/// Keyed query cache with request coalescing and explicit invalidation.
///
/// Entries persist for the process lifetime: no eviction, no staleness
/// timeout. An entry goes stale only through [`QueryCache::invalidate`].
pub struct QueryCache {
  inner: Arc<Mutex<CacheState>>,
  /// Optional cap on loader runtime so coalesced waiters are never left
  /// pending behind a request that never resolves
  loader_timeout: Option<Duration>,
}

impl Clone for QueryCache {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
      loader_timeout: self.loader_timeout,
    }
  }
}

impl Default for QueryCache {
  fn default() -> Self {
    Self::new()
  }
}

enum FetchPlan {
  Hit(Value),
  Wait(broadcast::Receiver<Result<Value>>),
  Load(Loader),
}

impl QueryCache {
  pub fn new() -> Self {
    Self {
      inner: Arc::new(Mutex::new(CacheState::default())),
      loader_timeout: None,
    }
  }

  /// Cap the runtime of any single loader. A timed-out loader resolves the
  /// in-flight slot with a transport failure for the caller and for every
  /// coalesced waiter.
  pub fn with_loader_timeout(mut self, timeout: Duration) -> Self {
    self.loader_timeout = Some(timeout);
    self
  }

  /// Fetch a value: fresh cache hit returns immediately; otherwise the
  /// loader runs, the result is stored and marked fresh, and subscribers are
  /// notified. At most one loader is in flight per key; concurrent fetches
  /// of the same key await that loader's result instead of issuing their
  /// own remote call.
  pub async fn fetch<T, F, Fut>(&self, key: ResourceKey, loader: F) -> Result<T>
  where
    T: Serialize + DeserializeOwned,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let erased = erase_loader(loader);

    let plan = {
      let mut state = self.lock();
      let entry = state.entries.entry(key.clone()).or_default();
      // Remember the latest loader for invalidation-triggered refetches
      entry.loader = Some(Arc::clone(&erased));

      if entry.fresh {
        if let Some(value) = &entry.value {
          trace!(key = %key.description(), "cache hit");
          FetchPlan::Hit(value.clone())
        } else {
          FetchPlan::Load(begin_load(entry, &erased))
        }
      } else if let Some(inflight) = &entry.inflight {
        trace!(key = %key.description(), "coalescing onto in-flight load");
        FetchPlan::Wait(inflight.subscribe())
      } else {
        FetchPlan::Load(begin_load(entry, &erased))
      }
    };

    let value = match plan {
      FetchPlan::Hit(value) => value,
      FetchPlan::Wait(mut rx) => match rx.recv().await {
        Ok(result) => result?,
        Err(_) => {
          return Err(Error::Transport(
            "in-flight request was dropped".to_string(),
          ))
        }
      },
      FetchPlan::Load(loader) => self.run_loader(&key, loader).await?,
    };

    serde_json::from_value(value).map_err(Error::from)
  }

  /// Store a value directly, marking the entry fresh and notifying
  /// subscribers. Used when the caller already holds the data.
  pub fn put<T: Serialize>(&self, key: &ResourceKey, value: &T) -> Result<()> {
    let value = serde_json::to_value(value)?;
    let mut state = self.lock();
    let entry = state.entries.entry(key.clone()).or_default();
    entry.value = Some(value);
    entry.fresh = true;
    entry.cached_at = Some(Utc::now());
    entry.notify(CacheEvent::Updated);
    Ok(())
  }

  /// Store a value and remember the loader that rebuilds it, so an
  /// invalidation-driven refetch reproduces the whole value. Used for data
  /// assembled client-side, e.g. the accumulated pages of an infinite feed,
  /// where refetching only the first page would truncate the entry.
  pub fn put_with_loader<T, F, Fut>(&self, key: &ResourceKey, value: &T, loader: F) -> Result<()>
  where
    T: Serialize,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let erased = erase_loader(loader);
    let value = serde_json::to_value(value)?;
    let mut state = self.lock();
    let entry = state.entries.entry(key.clone()).or_default();
    entry.value = Some(value);
    entry.fresh = true;
    entry.cached_at = Some(Utc::now());
    entry.loader = Some(erased);
    entry.notify(CacheEvent::Updated);
    Ok(())
  }

  /// Mark every entry matching the pattern stale. Entries that have live
  /// subscribers and a remembered loader get one background refetch; the
  /// in-flight marker guarantees it is exactly one even if invalidations
  /// overlap. An entry whose loader is already running is flagged instead:
  /// `run_loader` keeps its snapshot stale and issues the refetch itself.
  pub fn invalidate(&self, pattern: &KeyPattern) {
    let mut refetches = Vec::new();

    {
      let mut state = self.lock();
      for (key, entry) in state
        .entries
        .iter_mut()
        .filter(|(key, _)| pattern.matches(key))
      {
        entry.fresh = false;
        entry.notify(CacheEvent::Invalidated);
        debug!(key = %key.description(), "invalidated");

        if entry.inflight.is_some() {
          entry.invalidated_during_load = true;
        } else if !entry.subscribers.is_empty() {
          if let Some(loader) = entry.loader.clone() {
            let (tx, _) = broadcast::channel(1);
            entry.inflight = Some(tx);
            refetches.push((key.clone(), loader));
          }
        }
      }
    }

    for (key, loader) in refetches {
      self.spawn_refetch(key, loader);
    }
  }

  /// Register for change notification on a key. Dropping the subscription
  /// unregisters it.
  pub fn subscribe(&self, key: ResourceKey) -> Subscription {
    let (tx, rx) = mpsc::unbounded_channel();
    let id = {
      let mut state = self.lock();
      let id = state.next_subscriber_id;
      state.next_subscriber_id += 1;
      state
        .entries
        .entry(key.clone())
        .or_default()
        .subscribers
        .push((id, tx));
      id
    };

    Subscription {
      key,
      id,
      rx,
      inner: Arc::clone(&self.inner),
    }
  }

  /// Whether the key currently holds a fresh value.
  pub fn is_fresh(&self, key: &ResourceKey) -> bool {
    let state = self.lock();
    state
      .entries
      .get(key)
      .map(|e| e.fresh && e.value.is_some())
      .unwrap_or(false)
  }

  /// Current cached value for a key, fresh or stale, without fetching.
  pub fn peek<T: DeserializeOwned>(&self, key: &ResourceKey) -> Option<T> {
    let state = self.lock();
    let value = state.entries.get(key)?.value.clone()?;
    serde_json::from_value(value).ok()
  }

  async fn run_loader(&self, key: &ResourceKey, loader: Loader) -> Result<Value> {
    let fut = loader();
    let result = match self.loader_timeout {
      Some(timeout) => match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Transport(format!(
          "loader for {} timed out after {:?}",
          key.description(),
          timeout
        ))),
      },
      None => fut.await,
    };

    let refetch = {
      let mut state = self.lock();
      let entry = state.entries.entry(key.clone()).or_default();
      let inflight = entry.inflight.take();
      let superseded = std::mem::take(&mut entry.invalidated_during_load);

      if let Ok(value) = &result {
        entry.value = Some(value.clone());
        entry.cached_at = Some(Utc::now());
        if superseded {
          // An invalidation landed mid-load; the snapshot stays stale and
          // subscribers hear about the refetched value instead
          debug!(key = %key.description(), "load superseded by invalidation");
        } else {
          entry.fresh = true;
          entry.notify(CacheEvent::Updated);
        }
      }
      // On failure the entry keeps its previous value and stays stale

      if let Some(tx) = inflight {
        // Waiters may all have given up; that's fine
        let _ = tx.send(result.clone());
      }

      if superseded && !entry.subscribers.is_empty() {
        entry.loader.clone().map(|loader| {
          let (tx, _) = broadcast::channel(1);
          entry.inflight = Some(tx);
          loader
        })
      } else {
        None
      }
    };

    if let Some(loader) = refetch {
      self.spawn_refetch(key.clone(), loader);
    }

    result
  }

  fn spawn_refetch(&self, key: ResourceKey, loader: Loader) {
    let cache = self.clone();
    tokio::spawn(async move {
      debug!(key = %key.description(), "background refetch after invalidation");
      // Failures leave the entry stale; the next fetch retries
      let _ = cache.run_loader(&key, loader).await;
    });
  }

  fn lock(&self) -> MutexGuard<'_, CacheState> {
    match self.inner.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    }
  }
}

fn begin_load(entry: &mut Entry, loader: &Loader) -> Loader {
  let (tx, _) = broadcast::channel(1);
  entry.inflight = Some(tx);
  Arc::clone(loader)
}

fn erase_loader<T, F, Fut>(loader: F) -> Loader
where
  T: Serialize,
  F: Fn() -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<T>> + Send + 'static,
{
  Arc::new(move || {
    let fut = loader();
    Box::pin(async move {
      let value = fut.await?;
      serde_json::to_value(value).map_err(Error::from)
    })
  })
}

/// Handle for change notifications on one key; unsubscribes on drop.
pub struct Subscription {
  key: ResourceKey,
  id: u64,
  rx: mpsc::UnboundedReceiver<CacheEvent>,
  inner: Arc<Mutex<CacheState>>,
}

impl Subscription {
  pub fn key(&self) -> &ResourceKey {
    &self.key
  }

  /// Await the next change notification.
  pub async fn next_event(&mut self) -> Option<CacheEvent> {
    self.rx.recv().await
  }

  /// Non-blocking poll for a pending notification.
  pub fn try_next(&mut self) -> Option<CacheEvent> {
    self.rx.try_recv().ok()
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    if let Ok(mut state) = self.inner.lock() {
      if let Some(entry) = state.entries.get_mut(&self.key) {
        entry.subscribers.retain(|(id, _)| *id != self.id);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};

  fn counting_loader(
    counter: Arc<AtomicUsize>,
    value: i64,
    delay: Duration,
  ) -> impl Fn() -> BoxFuture<'static, Result<i64>> + Send + Sync + 'static {
    move || {
      counter.fetch_add(1, Ordering::SeqCst);
      Box::pin(async move {
        tokio::time::sleep(delay).await;
        Ok(value)
      })
    }
  }

  #[tokio::test]
  async fn fresh_entry_serves_without_a_second_load() {
    let cache = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let loader = counting_loader(calls.clone(), 7, Duration::ZERO);
    let first: i64 = cache.fetch(ResourceKey::RecentPosts, loader).await.unwrap();
    assert_eq!(first, 7);

    let loader = counting_loader(calls.clone(), 8, Duration::ZERO);
    let second: i64 = cache.fetch(ResourceKey::RecentPosts, loader).await.unwrap();

    // Still the cached value; the second loader never ran
    assert_eq!(second, 7);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn concurrent_fetches_coalesce_into_one_call() {
    let cache = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..5 {
      let cache = cache.clone();
      let loader = counting_loader(calls.clone(), 42, Duration::from_millis(50));
      handles.push(tokio::spawn(async move {
        cache.fetch::<i64, _, _>(ResourceKey::RecentPosts, loader).await
      }));
    }

    for handle in handles {
      assert_eq!(handle.await.unwrap().unwrap(), 42);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn invalidate_marks_stale_and_next_fetch_reloads() {
    let cache = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let loader = counting_loader(calls.clone(), 1, Duration::ZERO);
    let _: i64 = cache
      .fetch(ResourceKey::RecentPosts, loader)
      .await
      .unwrap();
    assert!(cache.is_fresh(&ResourceKey::RecentPosts));

    cache.invalidate(&KeyPattern::Exact(ResourceKey::RecentPosts));
    assert!(!cache.is_fresh(&ResourceKey::RecentPosts));

    let loader = counting_loader(calls.clone(), 2, Duration::ZERO);
    let reloaded: i64 = cache.fetch(ResourceKey::RecentPosts, loader).await.unwrap();
    assert_eq!(reloaded, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn invalidate_with_subscriber_refetches_exactly_once() {
    let cache = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let loader = counting_loader(calls.clone(), 5, Duration::ZERO);
    let _: i64 = cache.fetch(ResourceKey::CurrentUser, loader).await.unwrap();

    let mut subscription = cache.subscribe(ResourceKey::CurrentUser);

    cache.invalidate(&KeyPattern::Exact(ResourceKey::CurrentUser));

    assert_eq!(subscription.next_event().await, Some(CacheEvent::Invalidated));
    assert_eq!(subscription.next_event().await, Some(CacheEvent::Updated));

    // Initial load + exactly one background refetch
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(cache.is_fresh(&ResourceKey::CurrentUser));
  }

  #[tokio::test]
  async fn invalidation_during_an_inflight_load_still_refetches() {
    let cache = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let mut subscription = cache.subscribe(ResourceKey::RecentPosts);

    let first = {
      let cache = cache.clone();
      let loader = counting_loader(calls.clone(), 1, Duration::from_millis(50));
      tokio::spawn(async move {
        cache.fetch::<i64, _, _>(ResourceKey::RecentPosts, loader).await
      })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    // A mutation lands while the load is in flight
    cache.invalidate(&KeyPattern::Exact(ResourceKey::RecentPosts));

    // The original caller still gets its value
    assert_eq!(first.await.unwrap().unwrap(), 1);

    assert_eq!(subscription.next_event().await, Some(CacheEvent::Invalidated));
    assert_eq!(subscription.next_event().await, Some(CacheEvent::Updated));

    // The pre-invalidation snapshot never landed as fresh; the subscribed
    // refetch ran once
    assert!(cache.is_fresh(&ResourceKey::RecentPosts));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn midflight_invalidation_without_subscribers_leaves_the_entry_stale() {
    let cache = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let first = {
      let cache = cache.clone();
      let loader = counting_loader(calls.clone(), 1, Duration::from_millis(50));
      tokio::spawn(async move {
        cache.fetch::<i64, _, _>(ResourceKey::RecentPosts, loader).await
      })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    cache.invalidate(&KeyPattern::Exact(ResourceKey::RecentPosts));
    assert_eq!(first.await.unwrap().unwrap(), 1);
    tokio::time::sleep(Duration::from_millis(20)).await;

    // No subscribers: no refetch, and the superseded snapshot stays stale
    assert!(!cache.is_fresh(&ResourceKey::RecentPosts));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.peek::<i64>(&ResourceKey::RecentPosts), Some(1));
  }

  #[tokio::test]
  async fn invalidate_without_subscribers_does_not_refetch() {
    let cache = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let loader = counting_loader(calls.clone(), 5, Duration::ZERO);
    let _: i64 = cache.fetch(ResourceKey::RecentPosts, loader).await.unwrap();

    cache.invalidate(&KeyPattern::Exact(ResourceKey::RecentPosts));
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!cache.is_fresh(&ResourceKey::RecentPosts));
  }

  #[tokio::test]
  async fn namespace_invalidation_hits_every_key_of_the_tag() {
    let cache = QueryCache::new();
    for post in ["p1", "p2"] {
      let key = ResourceKey::Comments(post.to_string());
      let _: i64 = cache.fetch(key, || async { Ok(1) }).await.unwrap();
    }

    cache.invalidate(&KeyPattern::Namespace(super::super::ResourceTag::Comments));

    assert!(!cache.is_fresh(&ResourceKey::Comments("p1".to_string())));
    assert!(!cache.is_fresh(&ResourceKey::Comments("p2".to_string())));
  }

  #[tokio::test]
  async fn loader_failure_reaches_caller_and_waiters() {
    let cache = QueryCache::new();

    let slow_failure = || async {
      tokio::time::sleep(Duration::from_millis(50)).await;
      Err::<i64, _>(Error::Transport("backend down".to_string()))
    };

    let first = {
      let cache = cache.clone();
      tokio::spawn(async move {
        cache
          .fetch::<i64, _, _>(ResourceKey::RecentPosts, slow_failure)
          .await
      })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Coalesced waiter
    let second = cache
      .fetch::<i64, _, _>(ResourceKey::RecentPosts, || async { Ok(9) })
      .await;

    assert!(matches!(first.await.unwrap(), Err(Error::Transport(_))));
    assert!(matches!(second, Err(Error::Transport(_))));
    assert!(!cache.is_fresh(&ResourceKey::RecentPosts));
  }

  #[tokio::test]
  async fn failed_reload_keeps_the_stale_value_peekable() {
    let cache = QueryCache::new();

    let _: i64 = cache
      .fetch(ResourceKey::RecentPosts, || async { Ok(3) })
      .await
      .unwrap();
    cache.invalidate(&KeyPattern::Exact(ResourceKey::RecentPosts));

    let reload = cache
      .fetch::<i64, _, _>(ResourceKey::RecentPosts, || async {
        Err(Error::Transport("down".to_string()))
      })
      .await;
    assert!(reload.is_err());

    // Stale value survives for peekers
    assert_eq!(cache.peek::<i64>(&ResourceKey::RecentPosts), Some(3));
  }

  #[tokio::test]
  async fn loader_timeout_resolves_caller_and_waiters() {
    let cache = QueryCache::new().with_loader_timeout(Duration::from_millis(20));

    let hang = || async {
      tokio::time::sleep(Duration::from_secs(3600)).await;
      Ok(1_i64)
    };

    let first = {
      let cache = cache.clone();
      tokio::spawn(async move { cache.fetch::<i64, _, _>(ResourceKey::Users, hang).await })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = {
      let cache = cache.clone();
      tokio::spawn(async move { cache.fetch::<i64, _, _>(ResourceKey::Users, hang).await })
    };

    assert!(matches!(first.await.unwrap(), Err(Error::Transport(_))));
    assert!(matches!(second.await.unwrap(), Err(Error::Transport(_))));
  }

  #[tokio::test]
  async fn put_stores_a_fresh_value_and_notifies() {
    let cache = QueryCache::new();
    let mut subscription = cache.subscribe(ResourceKey::PostPages);

    cache.put(&ResourceKey::PostPages, &vec![1, 2, 3]).unwrap();

    assert!(cache.is_fresh(&ResourceKey::PostPages));
    assert_eq!(
      cache.peek::<Vec<i64>>(&ResourceKey::PostPages),
      Some(vec![1, 2, 3])
    );
    assert_eq!(subscription.try_next(), Some(CacheEvent::Updated));
  }

  #[tokio::test]
  async fn put_with_loader_refetches_the_assembled_value() {
    let cache = QueryCache::new();
    let mut subscription = cache.subscribe(ResourceKey::PostPages);

    cache
      .put_with_loader(&ResourceKey::PostPages, &vec![1_i64, 2, 3], || async {
        Ok(vec![4_i64, 5, 6])
      })
      .unwrap();
    assert_eq!(subscription.try_next(), Some(CacheEvent::Updated));

    cache.invalidate(&KeyPattern::Exact(ResourceKey::PostPages));

    assert_eq!(subscription.next_event().await, Some(CacheEvent::Invalidated));
    assert_eq!(subscription.next_event().await, Some(CacheEvent::Updated));

    // The remembered loader rebuilt the entry
    assert_eq!(
      cache.peek::<Vec<i64>>(&ResourceKey::PostPages),
      Some(vec![4, 5, 6])
    );
  }

  #[tokio::test]
  async fn dropped_subscription_is_unregistered() {
    let cache = QueryCache::new();
    let _: i64 = cache
      .fetch(ResourceKey::RecentPosts, || async { Ok(1) })
      .await
      .unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    {
      let _subscription = cache.subscribe(ResourceKey::RecentPosts);
    }

    // No live subscribers, so invalidation must not refetch
    cache.invalidate(&KeyPattern::Exact(ResourceKey::RecentPosts));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }
}
