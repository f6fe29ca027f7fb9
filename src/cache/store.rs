//! TTL store for computed lookup results.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use super::{CacheKey, Invalidation};

/// Invalidations remembered for checking in-flight writes
const INVALIDATION_LOG: usize = 64;

/// A cached result and its validity window.
#[derive(Debug)]
pub struct CacheEntry<V> {
  pub value: Arc<V>,
  pub created_at: Instant,
  /// Always `created_at + ttl`
  pub expires_at: Instant,
}

impl<V> CacheEntry<V> {
  fn new(value: Arc<V>, ttl: Duration) -> Self {
    let created_at = Instant::now();
    Self {
      value,
      created_at,
      expires_at: created_at + ttl,
    }
  }

  pub fn is_valid(&self) -> bool {
    Instant::now() < self.expires_at
  }
}

impl<V> Clone for CacheEntry<V> {
  fn clone(&self) -> Self {
    Self {
      value: Arc::clone(&self.value),
      created_at: self.created_at,
      expires_at: self.expires_at,
    }
  }
}

struct StoreState<V> {
  entries: HashMap<CacheKey, CacheEntry<V>>,
  /// Bumped by every invalidation
  epoch: u64,
  /// Recent invalidations, oldest first, tagged with the epoch they created
  log: VecDeque<(u64, Invalidation)>,
  /// Writes started before this epoch are refused whatever their key
  horizon: u64,
}

/// Keyed store of results with a per-call TTL.
///
/// Expired entries are never returned but stay in place until overwritten
/// or purged. Entries are replaced whole, never mutated.
pub struct RequestCache<V> {
  state: Mutex<StoreState<V>>,
}

impl<V> Default for RequestCache<V> {
  fn default() -> Self {
    Self {
      state: Mutex::new(StoreState {
        entries: HashMap::new(),
        epoch: 0,
        log: VecDeque::new(),
        horizon: 0,
      }),
    }
  }
}

impl<V> RequestCache<V> {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, StoreState<V>> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// The live entry for `key`, if any.
  pub fn get_entry(&self, key: &CacheKey) -> Option<CacheEntry<V>> {
    self
      .lock()
      .entries
      .get(key)
      .filter(|entry| entry.is_valid())
      .cloned()
  }

  /// The live value for `key`; misses when absent or expired.
  pub fn get(&self, key: &CacheKey) -> Option<Arc<V>> {
    self.get_entry(key).map(|entry| entry.value)
  }

  pub fn set(&self, key: CacheKey, value: Arc<V>, ttl: Duration) {
    self.lock().entries.insert(key, CacheEntry::new(value, ttl));
  }

  /// Current invalidation epoch, to be captured before starting a fetch.
  pub fn epoch(&self) -> u64 {
    self.lock().epoch
  }

  /// Store `value` unless an invalidation targeting `key` happened since
  /// `epoch` was read.
  ///
  /// Invalidations of other keys do not block the write. Returns whether the
  /// value was stored.
  pub fn set_if_current(&self, key: CacheKey, value: Arc<V>, ttl: Duration, epoch: u64) -> bool {
    let mut state = self.lock();
    if epoch < state.horizon {
      return false;
    }
    let invalidated = state
      .log
      .iter()
      .any(|(tag, target)| *tag > epoch && target.matches(&key));
    if invalidated {
      return false;
    }
    state.entries.insert(key, CacheEntry::new(value, ttl));
    true
  }

  /// Drop every entry matching `target`. Returns how many were dropped.
  pub fn invalidate(&self, target: &Invalidation) -> usize {
    let mut state = self.lock();
    state.epoch += 1;
    let epoch = state.epoch;

    if let Invalidation::All = target {
      state.log.clear();
      state.horizon = epoch;
    } else {
      state.log.push_back((epoch, target.clone()));
      if state.log.len() > INVALIDATION_LOG {
        // older writes can no longer be checked key by key
        if let Some((tag, _)) = state.log.pop_front() {
          state.horizon = tag;
        }
      }
    }

    let before = state.entries.len();
    state.entries.retain(|key, _| !target.matches(key));
    before - state.entries.len()
  }

  pub fn invalidate_prefix(&self, prefix: &str) -> usize {
    self.invalidate(&Invalidation::Prefix(prefix.to_string()))
  }

  pub fn clear(&self) {
    self.invalidate(&Invalidation::All);
  }

  /// Remove expired entries. Returns how many were removed.
  pub fn purge_expired(&self) -> usize {
    let mut state = self.lock();
    let before = state.entries.len();
    state.entries.retain(|_, entry| entry.is_valid());
    before - state.entries.len()
  }

  /// Number of stored entries, expired ones included.
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
  use crate::source::Scope;
  use tokio::time;

  fn key(kind: &str, scope: Option<&str>) -> CacheKey {
    let scope = scope.map(Scope::new);
    CacheKey::new(kind, scope.as_ref(), &["A".to_string()])
  }

  #[tokio::test(start_paused = true)]
  async fn test_hit_within_ttl() {
    let cache = RequestCache::new();
    cache.set(key("status", None), Arc::new(1), Duration::from_secs(10));

    time::advance(Duration::from_secs(9)).await;
    assert_eq!(cache.get(&key("status", None)).as_deref(), Some(&1));
  }

  #[tokio::test(start_paused = true)]
  async fn test_expired_entry_is_a_miss_but_kept() {
    let cache = RequestCache::new();
    cache.set(key("status", None), Arc::new(1), Duration::from_secs(10));

    time::advance(Duration::from_secs(10)).await;
    assert!(cache.get(&key("status", None)).is_none());
    assert_eq!(cache.len(), 1);

    assert_eq!(cache.purge_expired(), 1);
    assert!(cache.is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn test_entry_expiry_matches_ttl() {
    let cache = RequestCache::new();
    cache.set(key("status", None), Arc::new(1), Duration::from_secs(5));

    let entry = cache.get_entry(&key("status", None)).unwrap();
    assert_eq!(entry.expires_at - entry.created_at, Duration::from_secs(5));
  }

  #[tokio::test(start_paused = true)]
  async fn test_ttl_is_per_call() {
    let cache = RequestCache::new();
    cache.set(key("status", None), Arc::new(1), Duration::from_secs(1));
    cache.set(key("ptp", None), Arc::new(2), Duration::from_secs(60));

    time::advance(Duration::from_secs(2)).await;
    assert!(cache.get(&key("status", None)).is_none());
    assert!(cache.get(&key("ptp", None)).is_some());
  }

  #[test]
  fn test_invalidate_by_predicate_and_prefix() {
    let cache = RequestCache::new();
    let ttl = Duration::from_secs(60);
    cache.set(key("status", Some("2024-05")), Arc::new(1), ttl);
    cache.set(key("status", Some("2024-06")), Arc::new(2), ttl);
    cache.set(key("ptp", Some("2024-05")), Arc::new(3), ttl);

    let may = Scope::new("2024-05");
    assert_eq!(cache.invalidate(&Invalidation::Scope(may)), 2);
    assert_eq!(cache.invalidate_prefix("status:"), 1);
    assert!(cache.is_empty());
  }

  #[test]
  fn test_write_after_invalidation_is_dropped() {
    let cache = RequestCache::new();
    let ttl = Duration::from_secs(60);

    let epoch = cache.epoch();
    cache.clear();
    assert!(!cache.set_if_current(key("status", None), Arc::new(1), ttl, epoch));
    assert!(cache.get(&key("status", None)).is_none());

    let epoch = cache.epoch();
    assert!(cache.set_if_current(key("status", None), Arc::new(2), ttl, epoch));
    assert_eq!(cache.get(&key("status", None)).as_deref(), Some(&2));
  }

  #[test]
  fn test_invalidation_of_other_keys_keeps_write() {
    let cache = RequestCache::new();
    let ttl = Duration::from_secs(60);
    let may = key("status", Some("2024-05"));

    let epoch = cache.epoch();
    cache.invalidate(&Invalidation::Scope(Scope::new("2024-06")));
    cache.invalidate_prefix("ptp:");
    assert!(cache.set_if_current(may.clone(), Arc::new(1), ttl, epoch));

    let epoch = cache.epoch();
    cache.invalidate(&Invalidation::Scope(Scope::new("2024-05")));
    assert!(!cache.set_if_current(may.clone(), Arc::new(2), ttl, epoch));
    assert!(cache.get(&may).is_none());
  }

  #[test]
  fn test_writes_older_than_log_are_refused() {
    let cache = RequestCache::new();
    let ttl = Duration::from_secs(60);
    let epoch = cache.epoch();

    for i in 0..=INVALIDATION_LOG {
      cache.invalidate_prefix(&format!("other{}:", i));
    }

    assert!(!cache.set_if_current(key("status", None), Arc::new(1), ttl, epoch));
    let epoch = cache.epoch();
    assert!(cache.set_if_current(key("status", None), Arc::new(2), ttl, epoch));
  }
}
