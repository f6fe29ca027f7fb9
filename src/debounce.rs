//! Debounced, cancellation-aware execution with last-call-wins semantics.
//!
//! A [`Debouncer`] wraps an async operation. Bursts of [`Debouncer::trigger`]
//! calls collapse into one execution with the arguments of the last trigger,
//! started once the quiet window has passed.
//!
//! Every trigger and every [`Debouncer::cancel`] advances a generation
//! counter. An execution carries its generation in a [`CallToken`] and its
//! result is applied only while that generation is still current. A
//! superseded execution is aborted: its future is dropped, which also drops
//! any transport request it was awaiting.
//!
//! ```text
//! Idle -> Debouncing -> Executing -> Idle (data | error)
//!             |             |
//!             +-------------+--> superseded: nothing applied
//! ```
//!
//! # Example
//!
//! ```ignore
//! let debouncer = Debouncer::new(Duration::from_millis(300), |query: String, _token| async move {
//!     search(&query).await.map_err(|e| e.to_string())
//! });
//!
//! debouncer.trigger("pa".to_string());
//! debouncer.trigger("paid".to_string()); // only this one runs
//! ```

use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

/// How an execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
  Succeeded(T),
  Failed(String),
  /// Superseded by a newer trigger or a cancel
  Aborted,
}

/// Where a debounced operation is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
  #[default]
  Idle,
  /// Waiting for the quiet window to pass
  Debouncing,
  Executing,
}

/// Observable state of a debounced operation.
#[derive(Debug, Clone)]
pub struct DebounceState<T> {
  pub phase: Phase,
  /// Generation of the latest trigger or cancel
  pub generation: u64,
  /// Result of the last applied execution
  pub data: Option<T>,
  /// Error of the last applied execution, cleared by the next success
  pub error: Option<String>,
}

impl<T> Default for DebounceState<T> {
  fn default() -> Self {
    Self {
      phase: Phase::Idle,
      generation: 0,
      data: None,
      error: None,
    }
  }
}

impl<T> DebounceState<T> {
  /// Whether an execution is in flight.
  pub fn is_loading(&self) -> bool {
    self.phase == Phase::Executing
  }

  /// Whether a trigger has not settled yet.
  pub fn is_pending(&self) -> bool {
    self.phase != Phase::Idle
  }
}

/// Identifies one execution; handed to the operation.
#[derive(Debug, Clone)]
pub struct CallToken {
  generation: u64,
  current: watch::Receiver<u64>,
}

impl CallToken {
  pub fn generation(&self) -> u64 {
    self.generation
  }

  /// Whether no newer trigger or cancel happened since this call started.
  pub fn is_current(&self) -> bool {
    *self.current.borrow() == self.generation
  }

  /// Resolves once this call has been superseded.
  pub async fn superseded(&mut self) {
    let generation = self.generation;
    // a closed channel means the debouncer is gone, which supersedes too
    let _ = self.current.wait_for(|current| *current != generation).await;
  }
}

/// Bounded retry of failed executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryPolicy {
  pub max_retries: u32,
  pub backoff: Duration,
}

type OperationFn<A, T> = Box<dyn Fn(A, CallToken) -> BoxFuture<'static, Result<T, String>> + Send + Sync>;

struct Inner<A, T> {
  delay: Duration,
  /// Read when an execution starts
  retry: Mutex<RetryPolicy>,
  operation: OperationFn<A, T>,
  /// Only advanced while holding the `state` lock
  generation: watch::Sender<u64>,
  state: watch::Sender<DebounceState<T>>,
}

/// Debounced async operation.
///
/// Cheap to clone; clones share generation and state.
pub struct Debouncer<A, T> {
  inner: Arc<Inner<A, T>>,
}

impl<A, T> Clone for Debouncer<A, T> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<A, T> Debouncer<A, T>
where
  A: Clone + Send + 'static,
  T: Clone + Send + Sync + 'static,
{
  /// Create a debouncer running `operation` after `delay` of quiet.
  pub fn new<F, Fut>(delay: Duration, operation: F) -> Self
  where
    F: Fn(A, CallToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, String>> + Send + 'static,
  {
    let (generation, _) = watch::channel(0);
    let (state, _) = watch::channel(DebounceState::default());

    Self {
      inner: Arc::new(Inner {
        delay,
        retry: Mutex::new(RetryPolicy::default()),
        operation: Box::new(move |args: A, token: CallToken| operation(args, token).boxed()),
        generation,
        state,
      }),
    }
  }

  /// Retry failed executions.
  pub fn with_retry(self, retry: RetryPolicy) -> Self {
    self.set_retry(retry);
    self
  }

  /// Change the retry policy for every clone; running executions keep theirs.
  pub fn set_retry(&self, retry: RetryPolicy) {
    *self.inner.retry.lock().unwrap_or_else(PoisonError::into_inner) = retry;
  }

  pub fn retry(&self) -> RetryPolicy {
    self.inner.retry()
  }

  /// Schedule an execution with `args`, superseding anything earlier.
  ///
  /// Returns the generation assigned to this trigger.
  pub fn trigger(&self, args: A) -> u64 {
    let mut generation = 0;
    self.inner.state.send_modify(|state| {
      generation = self.inner.advance();
      state.generation = generation;
      state.phase = Phase::Debouncing;
    });

    let inner = Arc::clone(&self.inner);
    tokio::spawn(async move { inner.run(generation, args).await });

    generation
  }

  /// Invalidate pending and in-flight work without scheduling more.
  pub fn cancel(&self) {
    self.inner.state.send_modify(|state| {
      state.generation = self.inner.advance();
      state.phase = Phase::Idle;
    });
    tracing::trace!("Debounced operation cancelled");
  }

  pub fn state(&self) -> DebounceState<T> {
    self.inner.state.borrow().clone()
  }

  pub fn is_loading(&self) -> bool {
    self.inner.state.borrow().is_loading()
  }

  pub fn generation(&self) -> u64 {
    *self.inner.generation.borrow()
  }

  /// Receive every state change, e.g. to re-render.
  pub fn subscribe(&self) -> watch::Receiver<DebounceState<T>> {
    self.inner.state.subscribe()
  }
}

impl<A, T> Inner<A, T> {
  fn retry(&self) -> RetryPolicy {
    *self.retry.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

impl<A, T> Inner<A, T>
where
  A: Clone + Send + 'static,
  T: Clone + Send + Sync + 'static,
{
  fn advance(&self) -> u64 {
    let mut next = 0;
    self.generation.send_modify(|generation| {
      *generation += 1;
      next = *generation;
    });
    next
  }

  fn token(&self, generation: u64) -> CallToken {
    CallToken {
      generation,
      current: self.generation.subscribe(),
    }
  }

  /// Apply `update` only if `generation` is still current.
  fn apply<U>(&self, generation: u64, update: U) -> bool
  where
    U: FnOnce(&mut DebounceState<T>),
  {
    self.state.send_if_modified(|state| {
      if *self.generation.borrow() != generation {
        return false;
      }
      update(state);
      true
    })
  }

  async fn run(&self, generation: u64, args: A) {
    tokio::time::sleep(self.delay).await;

    if !self.apply(generation, |state| state.phase = Phase::Executing) {
      tracing::trace!(generation, "Superseded while debouncing");
      return;
    }

    let retry = self.retry();
    let mut attempt = 0;
    loop {
      match self.execute(generation, args.clone()).await {
        Outcome::Succeeded(data) => {
          self.apply(generation, |state| {
            state.phase = Phase::Idle;
            state.data = Some(data);
            state.error = None;
          });
          return;
        }
        Outcome::Failed(error) if attempt < retry.max_retries => {
          attempt += 1;
          tracing::warn!(generation, attempt, %error, "Debounced operation failed, retrying");
          tokio::time::sleep(retry.backoff).await;
        }
        Outcome::Failed(error) => {
          tracing::warn!(generation, %error, "Debounced operation failed");
          self.apply(generation, |state| {
            state.phase = Phase::Idle;
            state.error = Some(error);
          });
          return;
        }
        Outcome::Aborted => {
          tracing::trace!(generation, "Superseded while executing");
          return;
        }
      }
    }
  }

  async fn execute(&self, generation: u64, args: A) -> Outcome<T> {
    let token = self.token(generation);
    if !token.is_current() {
      return Outcome::Aborted;
    }

    let mut watcher = token.clone();
    let operation = (self.operation)(args, token);

    tokio::select! {
      result = operation => match result {
        _ if !watcher.is_current() => Outcome::Aborted,
        Ok(data) => Outcome::Succeeded(data),
        Err(error) => Outcome::Failed(error),
      },
      _ = watcher.superseded() => Outcome::Aborted,
    }
  }
}
