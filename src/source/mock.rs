//! Scripted in-memory data source for tests.

use chrono::{DateTime, TimeZone, Utc};
use color_eyre::{eyre::eyre, Result};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{ChunkQuery, DataSource, EntityId, ResultRecord, Scope};

/// Timestamp `minutes` after a fixed epoch, for readable fixtures.
pub fn at(minutes: i64) -> DateTime<Utc> {
  Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap() + chrono::Duration::minutes(minutes)
}

pub fn record(id: &str, value: &str, minutes: i64) -> ResultRecord<String> {
  ResultRecord {
    id: id.to_string(),
    value: value.to_string(),
    created_at: at(minutes),
    scope: None,
  }
}

pub fn scoped(id: &str, value: &str, minutes: i64, scope: &str) -> ResultRecord<String> {
  ResultRecord {
    scope: Some(Scope::new(scope)),
    ..record(id, value, minutes)
  }
}

pub fn ids(n: usize) -> Vec<EntityId> {
  (0..n).map(|i| format!("APP-{:04}", i)).collect()
}

#[derive(Default)]
pub struct MockSource {
  rows: Mutex<Vec<ResultRecord<String>>>,
  queries: Mutex<Vec<ChunkQuery>>,
  calls: AtomicUsize,
  fail_all: AtomicBool,
  failing_ids: Mutex<HashSet<EntityId>>,
  /// Return rows in insertion order instead of newest-first.
  unsorted: AtomicBool,
  latency: Mutex<Duration>,
}

impl MockSource {
  pub fn new(rows: Vec<ResultRecord<String>>) -> Self {
    Self {
      rows: Mutex::new(rows),
      ..Self::default()
    }
  }

  pub fn with_latency(self, latency: Duration) -> Self {
    *self.latency.lock().unwrap() = latency;
    self
  }

  pub fn unsorted(self) -> Self {
    self.unsorted.store(true, Ordering::SeqCst);
    self
  }

  /// Any chunk containing `id` fails.
  pub fn fail_chunk_with(&self, id: &str) {
    self.failing_ids.lock().unwrap().insert(id.to_string());
  }

  pub fn set_fail_all(&self, fail: bool) {
    self.fail_all.store(fail, Ordering::SeqCst);
  }

  pub fn push(&self, row: ResultRecord<String>) {
    self.rows.lock().unwrap().push(row);
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn queries(&self) -> Vec<ChunkQuery> {
    self.queries.lock().unwrap().clone()
  }
}

impl DataSource for MockSource {
  type Value = String;

  async fn query(&self, query: ChunkQuery) -> Result<Vec<ResultRecord<String>>> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    self.queries.lock().unwrap().push(query.clone());

    let latency = *self.latency.lock().unwrap();
    if !latency.is_zero() {
      tokio::time::sleep(latency).await;
    }

    if self.fail_all.load(Ordering::SeqCst) {
      return Err(eyre!("connection refused"));
    }
    {
      let failing = self.failing_ids.lock().unwrap();
      if query.ids.iter().any(|id| failing.contains(id)) {
        return Err(eyre!("statement timeout"));
      }
    }

    let mut rows: Vec<ResultRecord<String>> = self
      .rows
      .lock()
      .unwrap()
      .iter()
      .filter(|row| query.ids.contains(&row.id))
      .filter(|row| query.scope.is_none() || row.scope == query.scope)
      .cloned()
      .collect();

    if !self.unsorted.load(Ordering::SeqCst) {
      rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    }

    Ok(rows)
  }
}
