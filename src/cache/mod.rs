//! In-memory request caching for batched lookups.
//!
//! This module provides:
//! - Deterministic cache keys built from the lookup kind, scope and id set
//! - A TTL store whose expired entries are ignored rather than evicted
//! - A registry that coalesces concurrent requests for the same key

mod key;
mod pending;
mod store;

pub use key::CacheKey;
pub use pending::PendingRequests;
pub use store::{CacheEntry, RequestCache};

use crate::source::Scope;

/// Which cached results an invalidation targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
  All,
  /// Every key recorded under this scope
  Scope(Scope),
  /// Every key whose rendered form starts with this prefix
  Prefix(String),
}

impl Invalidation {
  pub fn matches(&self, key: &CacheKey) -> bool {
    match self {
      Self::All => true,
      Self::Scope(scope) => key.scope() == Some(scope),
      Self::Prefix(prefix) => key.to_string().starts_with(prefix.as_str()),
    }
  }
}
