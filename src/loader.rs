//! Batched lookups with caching, coalescing and failure isolation.
//!
//! [`BatchLoader`] sits between dashboard views and a [`DataSource`]. A call
//! to [`BatchLoader::fetch_batch`] goes through:
//!
//! 1. id validation (blank ids dropped, duplicates removed)
//! 2. the circuit breaker gate
//! 3. the TTL cache
//! 4. the pending-request registry, so a key has one request in flight
//! 5. chunked, concurrent queries merged into one map
//!
//! It never fails. Every failure mode degrades to a partial or empty map.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::breaker::CircuitBreaker;
use crate::cache::{CacheKey, Invalidation, PendingRequests, RequestCache};
use crate::chunk::{self, DEFAULT_CHUNK_SIZE};
use crate::source::{ChunkQuery, DataSource, EntityId, ResultRecord, Scope};

pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

pub type BatchMap<V> = HashMap<EntityId, V>;

/// Shared result of a batch lookup; coalesced callers and cache hits get
/// the same allocation.
pub type BatchResult<V> = Arc<BatchMap<V>>;

/// Freshness and size limits for one kind of lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupPolicy {
  pub ttl: Duration,
  pub chunk_size: usize,
}

impl Default for LookupPolicy {
  fn default() -> Self {
    Self {
      ttl: DEFAULT_TTL,
      chunk_size: DEFAULT_CHUNK_SIZE,
    }
  }
}

/// Ways a lookup can degrade instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Degradation {
  /// Nothing valid to look up
  Validation,
  /// One chunk's query failed; the rest were merged
  ChunkFailed,
  /// Every chunk failed
  AllChunksFailed,
  /// The breaker is open; the data service was not contacted
  CircuitOpen,
}

impl fmt::Display for Degradation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let text = match self {
      Self::Validation => "no valid ids in request",
      Self::ChunkFailed => "chunk query failed",
      Self::AllChunksFailed => "all chunk queries failed",
      Self::CircuitOpen => "circuit breaker open",
    };
    f.write_str(text)
  }
}

/// Batched, cached lookup service for one kind of per-entity value.
///
/// Owns its cache and pending-request registry. The circuit breaker can be
/// shared between loaders with [`BatchLoader::with_breaker`].
pub struct BatchLoader<S: DataSource> {
  kind: Arc<str>,
  source: Arc<S>,
  policy: LookupPolicy,
  cache: Arc<RequestCache<BatchMap<S::Value>>>,
  pending: PendingRequests<BatchResult<S::Value>>,
  breaker: Arc<CircuitBreaker>,
}

impl<S: DataSource> Clone for BatchLoader<S> {
  fn clone(&self) -> Self {
    Self {
      kind: Arc::clone(&self.kind),
      source: Arc::clone(&self.source),
      policy: self.policy,
      cache: Arc::clone(&self.cache),
      pending: self.pending.clone(),
      breaker: Arc::clone(&self.breaker),
    }
  }
}

impl<S: DataSource> BatchLoader<S> {
  /// Create a loader; `kind` names the operation in cache keys and logs.
  pub fn new(kind: &str, source: S) -> Self {
    Self {
      kind: Arc::from(kind),
      source: Arc::new(source),
      policy: LookupPolicy::default(),
      cache: Arc::new(RequestCache::new()),
      pending: PendingRequests::new(),
      breaker: Arc::new(CircuitBreaker::default()),
    }
  }

  pub fn with_policy(mut self, policy: LookupPolicy) -> Self {
    self.policy = policy;
    self
  }

  pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
    self.breaker = breaker;
    self
  }

  pub fn kind(&self) -> &str {
    &self.kind
  }

  pub fn policy(&self) -> LookupPolicy {
    self.policy
  }

  pub fn source(&self) -> &S {
    &self.source
  }

  pub fn breaker(&self) -> &CircuitBreaker {
    &self.breaker
  }

  pub fn cache(&self) -> &RequestCache<BatchMap<S::Value>> {
    &self.cache
  }

  pub fn pending(&self) -> &PendingRequests<BatchResult<S::Value>> {
    &self.pending
  }

  /// Latest value per id, optionally narrowed by `scope`.
  ///
  /// Ids without a row are absent from the map. Never fails: data service
  /// errors yield a partial or empty map and are logged.
  pub async fn fetch_batch(&self, ids: &[EntityId], scope: Option<&Scope>) -> BatchResult<S::Value> {
    let ids = normalize_ids(ids);
    if ids.is_empty() {
      tracing::debug!(kind = %self.kind, "{}", Degradation::Validation);
      return BatchResult::default();
    }

    if self.breaker.check_open() {
      tracing::debug!(kind = %self.kind, ids = ids.len(), "{}", Degradation::CircuitOpen);
      return BatchResult::default();
    }

    let key = CacheKey::new(&self.kind, scope, &ids);
    if let Some(hit) = self.cache.get(&key) {
      tracing::trace!(%key, "Cache hit");
      return hit;
    }

    let loader = self.clone();
    let scope = scope.cloned();
    self
      .pending
      .coalesce(key.clone(), move || async move {
        loader.load(key, ids, scope).await
      })
      .await
  }

  /// Query every chunk concurrently, merge what succeeded and cache it.
  async fn load(&self, key: CacheKey, ids: Vec<EntityId>, scope: Option<Scope>) -> BatchResult<S::Value> {
    let epoch = self.cache.epoch();
    let chunks = chunk::split(&ids, self.policy.chunk_size);
    let total = chunks.len();

    tracing::debug!(%key, ids = ids.len(), chunks = total, "Fetching batch");

    let queries = chunks.into_iter().map(|chunk| {
      self.source.query(ChunkQuery {
        ids: chunk,
        scope: scope.clone(),
      })
    });
    let results = join_all(queries).await;

    let mut rows = Vec::new();
    let mut failed = 0;
    for (index, result) in results.into_iter().enumerate() {
      match result {
        Ok(chunk_rows) => rows.push(chunk_rows),
        Err(e) => {
          failed += 1;
          tracing::warn!(%key, chunk = index, error = %e, "{}", Degradation::ChunkFailed);
        }
      }
    }

    if failed == total {
      self.breaker.record_failure();
      tracing::warn!(%key, chunks = total, "{}", Degradation::AllChunksFailed);
      return BatchResult::default();
    }

    if failed == 0 {
      self.breaker.record_success();
    } else {
      self.breaker.record_failure();
    }

    let merged = Arc::new(merge_latest(&self.kind, rows));
    if !self
      .cache
      .set_if_current(key.clone(), Arc::clone(&merged), self.policy.ttl, epoch)
    {
      tracing::debug!(%key, "Invalidated while fetching, result not cached");
    }

    merged
  }

  /// Drop cached results and detach in-flight requests matching `target`.
  pub fn invalidate(&self, target: &Invalidation) -> usize {
    let dropped = self.cache.invalidate(target);
    let detached = self.pending.forget(|key| target.matches(key));
    tracing::debug!(kind = %self.kind, ?target, dropped, detached, "Invalidated");
    dropped
  }

  /// Clear cache, registry and breaker.
  ///
  /// A breaker shared with other loaders is reset for them too.
  pub fn reset(&self) {
    self.cache.clear();
    self.pending.clear();
    self.breaker.reset();
  }
}

/// Drop blank ids and duplicates, keeping first occurrences in order.
fn normalize_ids(ids: &[EntityId]) -> Vec<EntityId> {
  let mut seen = HashSet::with_capacity(ids.len());
  ids
    .iter()
    .filter(|id| !id.trim().is_empty())
    .filter(|id| seen.insert(id.as_str()))
    .cloned()
    .collect()
}

struct Latest<V> {
  value: V,
  created_at: DateTime<Utc>,
}

/// Keep the newest record per id.
///
/// Rows arrive newest-first, so the first record seen for an id normally
/// wins. A strictly newer record seen later still replaces it: the result
/// does not depend on the data service honouring the ordering.
fn merge_latest<V>(kind: &str, chunks: Vec<Vec<ResultRecord<V>>>) -> BatchMap<V> {
  let mut latest: HashMap<EntityId, Latest<V>> = HashMap::new();

  for rows in chunks {
    let mut previous: Option<DateTime<Utc>> = None;
    let mut out_of_order = false;

    for row in rows {
      if previous.is_some_and(|p| row.created_at > p) {
        out_of_order = true;
      }
      previous = Some(row.created_at);

      match latest.entry(row.id) {
        Entry::Vacant(slot) => {
          slot.insert(Latest {
            value: row.value,
            created_at: row.created_at,
          });
        }
        Entry::Occupied(mut slot) => {
          if row.created_at > slot.get().created_at {
            slot.insert(Latest {
              value: row.value,
              created_at: row.created_at,
            });
          }
        }
      }
    }

    if out_of_order {
      tracing::debug!(kind, "Rows were not sorted newest-first");
    }
  }

  latest
    .into_iter()
    .map(|(id, entry)| (id, entry.value))
    .collect()
}
