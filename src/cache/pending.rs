//! Coalescing of concurrent requests that share a cache key.

use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::CacheKey;

type SharedRequest<T> = Shared<BoxFuture<'static, T>>;

struct PendingEntry<T> {
  id: u64,
  request: WeakShared<BoxFuture<'static, T>>,
}

struct PendingState<T> {
  entries: HashMap<CacheKey, PendingEntry<T>>,
  next_id: u64,
}

/// Registry of in-flight requests, at most one per cache key.
///
/// Callers arriving while a request for their key is running await that
/// request instead of starting another. The entry is removed as soon as the
/// request settles, fails, or is dropped by every waiter.
pub struct PendingRequests<T> {
  state: Arc<Mutex<PendingState<T>>>,
}

impl<T> Clone for PendingRequests<T> {
  fn clone(&self) -> Self {
    Self {
      state: Arc::clone(&self.state),
    }
  }
}

impl<T> Default for PendingRequests<T> {
  fn default() -> Self {
    Self {
      state: Arc::new(Mutex::new(PendingState {
        entries: HashMap::new(),
        next_id: 0,
      })),
    }
  }
}

/// Removes its registry entry when the wrapped request finishes or is dropped.
struct RemoveOnDrop<T> {
  state: Arc<Mutex<PendingState<T>>>,
  key: CacheKey,
  id: u64,
}

impl<T> Drop for RemoveOnDrop<T> {
  fn drop(&mut self) {
    let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
    // a newer request may already own the key
    if state.entries.get(&self.key).map(|e| e.id) == Some(self.id) {
      state.entries.remove(&self.key);
    }
  }
}

impl<T> PendingRequests<T>
where
  T: Clone + Send + Sync + 'static,
{
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, PendingState<T>> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Await the in-flight request for `key`, or start one with `factory`.
  ///
  /// Every caller joining the same request observes the same result.
  pub async fn coalesce<F, Fut>(&self, key: CacheKey, factory: F) -> T
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = T> + Send + 'static,
  {
    self.join_or_register(key, factory).await
  }

  fn join_or_register<F, Fut>(&self, key: CacheKey, factory: F) -> SharedRequest<T>
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = T> + Send + 'static,
  {
    let mut state = self.lock();

    if let Some(existing) = state
      .entries
      .get(&key)
      .and_then(|entry| entry.request.upgrade())
    {
      tracing::trace!(%key, "Joining in-flight request");
      return existing;
    }

    state.next_id += 1;
    let id = state.next_id;
    let guard = RemoveOnDrop {
      state: Arc::clone(&self.state),
      key: key.clone(),
      id,
    };

    // The factory runs on first poll, outside the registry lock.
    let request = async move {
      let _guard = guard;
      factory().await
    }
    .boxed()
    .shared();

    if let Some(weak) = request.downgrade() {
      state.entries.insert(key, PendingEntry { id, request: weak });
    }

    request
  }

  pub fn is_pending(&self, key: &CacheKey) -> bool {
    self.lock().entries.contains_key(key)
  }

  /// Detach matching requests so later callers start fresh ones.
  ///
  /// Detached requests keep running for the callers already waiting on them.
  pub fn forget<P>(&self, predicate: P) -> usize
  where
    P: Fn(&CacheKey) -> bool,
  {
    let mut state = self.lock();
    let before = state.entries.len();
    state.entries.retain(|key, _| !predicate(key));
    before - state.entries.len()
  }

  pub fn clear(&self) {
    self.forget(|_| true);
  }

  pub fn len(&self) -> usize {
    self.lock().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;

  fn key(name: &str) -> CacheKey {
    CacheKey::new("test", None, &[name.to_string()])
  }

  fn counting(
    calls: &Arc<AtomicUsize>,
    result: Result<u32, String>,
  ) -> impl FnOnce() -> BoxFuture<'static, Result<u32, String>> + Send + 'static {
    let calls = Arc::clone(calls);
    move || {
      async move {
        calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        result
      }
      .boxed()
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_concurrent_calls_share_one_request() {
    let pending = PendingRequests::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let (a, b, c) = tokio::join!(
      pending.coalesce(key("A"), counting(&calls, Ok(7))),
      pending.coalesce(key("A"), counting(&calls, Ok(8))),
      pending.coalesce(key("A"), counting(&calls, Ok(9))),
    );

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!((a, b, c), (Ok(7), Ok(7), Ok(7)));
    assert!(pending.is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn test_distinct_keys_run_independently() {
    let pending = PendingRequests::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let (a, b) = tokio::join!(
      pending.coalesce(key("A"), counting(&calls, Ok(1))),
      pending.coalesce(key("B"), counting(&calls, Ok(2))),
    );

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!((a, b), (Ok(1), Ok(2)));
  }

  #[tokio::test(start_paused = true)]
  async fn test_failure_is_shared_and_cleaned_up() {
    let pending = PendingRequests::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let (a, b) = tokio::join!(
      pending.coalesce(key("A"), counting(&calls, Err("boom".to_string()))),
      pending.coalesce(key("A"), counting(&calls, Ok(1))),
    );
    assert_eq!(a, Err("boom".to_string()));
    assert_eq!(b, Err("boom".to_string()));
    assert!(pending.is_empty());

    // the key is free again
    let c = pending.coalesce(key("A"), counting(&calls, Ok(2))).await;
    assert_eq!(c, Ok(2));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_abandoned_request_releases_key() {
    let pending = PendingRequests::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let task = {
      let pending = pending.clone();
      let factory = counting(&calls, Ok(1));
      tokio::spawn(async move { pending.coalesce(key("A"), factory).await })
    };
    tokio::task::yield_now().await;
    assert!(pending.is_pending(&key("A")));

    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());
    assert!(pending.is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn test_forget_starts_fresh_request() {
    let pending = PendingRequests::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let first = pending.coalesce(key("A"), counting(&calls, Ok(1)));
    let second = async {
      tokio::task::yield_now().await;
      assert_eq!(pending.forget(|_| true), 1);
      pending.coalesce(key("A"), counting(&calls, Ok(2))).await
    };

    let (a, b) = tokio::join!(first, second);
    assert_eq!((a, b), (Ok(1), Ok(2)));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(pending.is_empty());
  }
}
