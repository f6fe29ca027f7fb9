//! Cache key derivation.

use sha2::{Digest, Sha256};
use std::fmt;

use crate::source::{EntityId, Scope};

/// Id sets up to this size are spelled out in the key.
const INLINE_IDS_MAX: usize = 10;

/// Deterministic key for one batched lookup.
///
/// Built from the lookup kind, the optional scope and a fingerprint of the
/// id set. The fingerprint ignores id order: the same set always maps to the
/// same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
  kind: String,
  scope: Option<Scope>,
  fingerprint: String,
}

impl CacheKey {
  pub fn new(kind: &str, scope: Option<&Scope>, ids: &[EntityId]) -> Self {
    Self {
      kind: kind.to_string(),
      scope: scope.cloned(),
      fingerprint: fingerprint(ids),
    }
  }

  pub fn kind(&self) -> &str {
    &self.kind
  }

  pub fn scope(&self) -> Option<&Scope> {
    self.scope.as_ref()
  }

  pub fn fingerprint(&self) -> &str {
    &self.fingerprint
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.scope {
      Some(scope) => write!(f, "{}:{}:{}", self.kind, scope, self.fingerprint),
      None => write!(f, "{}:*:{}", self.kind, self.fingerprint),
    }
  }
}

/// Small sets are joined verbatim. Larger ones become
/// `count:first..last:digest`, where the digest is a SHA256 prefix over the
/// sorted set so sets sharing size and endpoints still differ.
fn fingerprint(ids: &[EntityId]) -> String {
  let mut sorted: Vec<&str> = ids.iter().map(String::as_str).collect();
  sorted.sort_unstable();

  let (first, last) = match (sorted.first(), sorted.last()) {
    (Some(first), Some(last)) if sorted.len() > INLINE_IDS_MAX => (*first, *last),
    _ => return sorted.join(","),
  };

  let mut hasher = Sha256::new();
  for id in &sorted {
    hasher.update(id.as_bytes());
    hasher.update([0u8]);
  }
  let digest = hasher.finalize();

  format!(
    "{}:{}..{}:{}",
    sorted.len(),
    first,
    last,
    hex::encode(&digest[..8])
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  fn ids(values: &[&str]) -> Vec<EntityId> {
    values.iter().map(|s| s.to_string()).collect()
  }

  #[test]
  fn test_small_sets_are_inlined() {
    let key = CacheKey::new("payment_status", None, &ids(&["B", "A"]));
    assert_eq!(key.to_string(), "payment_status:*:A,B");
  }

  #[test]
  fn test_order_insensitive() {
    let scope = Scope::new("2024-05");
    let a = CacheKey::new("ptp_date", Some(&scope), &ids(&["1", "2", "3"]));
    let b = CacheKey::new("ptp_date", Some(&scope), &ids(&["3", "1", "2"]));
    assert_eq!(a, b);
  }

  #[test]
  fn test_scope_and_kind_distinguish_keys() {
    let set = ids(&["1", "2"]);
    let may = Scope::new("2024-05");
    let june = Scope::new("2024-06");

    assert_ne!(
      CacheKey::new("payment_status", Some(&may), &set),
      CacheKey::new("payment_status", Some(&june), &set)
    );
    assert_ne!(
      CacheKey::new("payment_status", None, &set),
      CacheKey::new("collection_status", None, &set)
    );
  }

  #[test]
  fn test_large_sets_are_bounded() {
    let set: Vec<EntityId> = (0..500).map(|i| format!("APP-{:04}", i)).collect();
    let key = CacheKey::new("payment_status", None, &set);

    assert!(key.fingerprint().starts_with("500:APP-0000..APP-0499:"));
    assert!(key.to_string().len() < 80);
  }

  #[test]
  fn test_large_sets_with_same_endpoints_differ() {
    let mut a: Vec<EntityId> = (0..20).map(|i| format!("{:02}", i)).collect();
    let mut b = a.clone();
    a[5] = "05a".to_string();
    b[6] = "06a".to_string();

    assert_ne!(
      CacheKey::new("payment_status", None, &a),
      CacheKey::new("payment_status", None, &b)
    );
  }
}
