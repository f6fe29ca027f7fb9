//! The consumed data-service interface and its record types.

pub mod rest;

#[cfg(test)]
pub mod mock;

use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;

/// Opaque identifier of one loan application record.
pub type EntityId = String;

/// Narrows a lookup, e.g. a month token such as `2024-05`.
///
/// Part of the cache key, never of the entity identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scope(String);

impl Scope {
  pub fn new(value: impl Into<String>) -> Self {
    Self(value.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for Scope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for Scope {
  fn from(value: &str) -> Self {
    Self::new(value)
  }
}

impl From<String> for Scope {
  fn from(value: String) -> Self {
    Self(value)
  }
}

/// A raw row returned by the data service.
///
/// Several records may exist per id (history). The one with the greatest
/// `created_at` is authoritative.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord<V> {
  pub id: EntityId,
  pub value: V,
  pub created_at: DateTime<Utc>,
  pub scope: Option<Scope>,
}

/// One chunk-sized request against the data service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkQuery {
  pub ids: Vec<EntityId>,
  pub scope: Option<Scope>,
}

/// A request/response data service answering `id in (...)` lookups.
///
/// Implementations must return rows sorted by `created_at` descending and
/// simply omit ids that have no row for the requested scope.
pub trait DataSource: Send + Sync + 'static {
  /// Per-entity value type (a status label, a PTP date, ...).
  type Value: Clone + Send + Sync + 'static;

  fn query(
    &self,
    query: ChunkQuery,
  ) -> impl Future<Output = Result<Vec<ResultRecord<Self::Value>>>> + Send;
}
