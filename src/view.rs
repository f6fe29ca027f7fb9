//! Dashboard-facing lookup handle.
//!
//! A [`LookupView`] is what a table or detail panel holds: it debounces
//! requests as the visible rows change, exposes a loading flag for spinners
//! and renders missing values as defaults rather than errors.

use std::time::Duration;
use tokio::sync::watch;

use crate::cache::Invalidation;
use crate::debounce::{DebounceState, Debouncer};
use crate::loader::{BatchLoader, BatchResult};
use crate::source::{DataSource, EntityId, Scope};

/// Arguments of one debounced lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupRequest {
  pub ids: Vec<EntityId>,
  pub scope: Option<Scope>,
}

pub type LookupState<V> = DebounceState<BatchResult<V>>;

/// Debounced view over a [`BatchLoader`].
pub struct LookupView<S: DataSource> {
  loader: BatchLoader<S>,
  debouncer: Debouncer<LookupRequest, BatchResult<S::Value>>,
}

impl<S: DataSource> Clone for LookupView<S> {
  fn clone(&self) -> Self {
    Self {
      loader: self.loader.clone(),
      debouncer: self.debouncer.clone(),
    }
  }
}

impl<S: DataSource> LookupView<S> {
  pub fn new(loader: BatchLoader<S>, delay: Duration) -> Self {
    let fetcher = loader.clone();
    let debouncer = Debouncer::new(delay, move |request: LookupRequest, token| {
      let fetcher = fetcher.clone();
      async move {
        tracing::trace!(
          kind = fetcher.kind(),
          generation = token.generation(),
          ids = request.ids.len(),
          "Running lookup"
        );
        Ok(fetcher.fetch_batch(&request.ids, request.scope.as_ref()).await)
      }
    });

    Self { loader, debouncer }
  }

  /// Ask for values of `ids`; rapid successive requests collapse into one.
  ///
  /// Returns the generation of this request.
  pub fn request(&self, ids: Vec<EntityId>, scope: Option<Scope>) -> u64 {
    self.debouncer.trigger(LookupRequest { ids, scope })
  }

  pub fn cancel(&self) {
    self.debouncer.cancel();
  }

  pub fn is_loading(&self) -> bool {
    self.debouncer.is_loading()
  }

  pub fn snapshot(&self) -> LookupState<S::Value> {
    self.debouncer.state()
  }

  pub fn subscribe(&self) -> watch::Receiver<LookupState<S::Value>> {
    self.debouncer.subscribe()
  }

  /// Current value for `id`, or `default` when unknown.
  pub fn value_or(&self, id: &str, default: S::Value) -> S::Value {
    self
      .snapshot()
      .data
      .and_then(|data| data.get(id).cloned())
      .unwrap_or(default)
  }

  /// Forget cached results so the next request hits the data service.
  pub fn invalidate(&self, target: &Invalidation) -> usize {
    self.loader.invalidate(target)
  }

  pub fn loader(&self) -> &BatchLoader<S> {
    &self.loader
  }
}
