//! Consecutive-failure circuit breaker.
//!
//! While open, callers skip the data service entirely and degrade to empty
//! results. There is no background timer: the cooldown is checked lazily by
//! the next [`CircuitBreaker::check_open`] call, which closes the breaker and
//! lets that call through as a probe.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_THRESHOLD: u32 = 3;
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BreakerState {
  pub is_open: bool,
  pub consecutive_failures: u32,
  pub last_failure_at: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
  threshold: u32,
  cooldown: Duration,
  state: Mutex<BreakerState>,
}

impl Default for CircuitBreaker {
  fn default() -> Self {
    Self::new(DEFAULT_THRESHOLD, DEFAULT_COOLDOWN)
  }
}

impl CircuitBreaker {
  /// A threshold of zero is treated as one.
  pub fn new(threshold: u32, cooldown: Duration) -> Self {
    Self {
      threshold: threshold.max(1),
      cooldown,
      state: Mutex::new(BreakerState::default()),
    }
  }

  fn lock(&self) -> MutexGuard<'_, BreakerState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Whether calls should be short-circuited right now.
  ///
  /// Closes the breaker first if the cooldown since the last failure has
  /// elapsed.
  pub fn check_open(&self) -> bool {
    let mut state = self.lock();
    if !state.is_open {
      return false;
    }

    let cooled_down = state
      .last_failure_at
      .map_or(true, |at| Instant::now().duration_since(at) > self.cooldown);

    if cooled_down {
      tracing::info!(
        failures = state.consecutive_failures,
        "Circuit breaker cooldown elapsed, closing"
      );
      *state = BreakerState::default();
    }

    state.is_open
  }

  pub fn record_success(&self) {
    let mut state = self.lock();
    if state.consecutive_failures > 0 || state.is_open {
      tracing::debug!(
        failures = state.consecutive_failures,
        "Circuit breaker recovered"
      );
    }
    *state = BreakerState::default();
  }

  pub fn record_failure(&self) {
    let mut state = self.lock();
    state.consecutive_failures = state.consecutive_failures.saturating_add(1);
    state.last_failure_at = Some(Instant::now());

    if !state.is_open && state.consecutive_failures >= self.threshold {
      state.is_open = true;
      tracing::warn!(
        failures = state.consecutive_failures,
        cooldown_secs = self.cooldown.as_secs(),
        "Circuit breaker opened"
      );
    }
  }

  pub fn reset(&self) {
    *self.lock() = BreakerState::default();
  }

  pub fn state(&self) -> BreakerState {
    *self.lock()
  }

  pub fn threshold(&self) -> u32 {
    self.threshold
  }

  pub fn cooldown(&self) -> Duration {
    self.cooldown
  }
}
