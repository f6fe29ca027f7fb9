//! Splitting id lists into bounded groups.
//!
//! Each chunk becomes one `id in (...)` query, so the bound keeps the
//! request URL and the backend's parameter list within safe limits.

/// Default number of ids per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 50;

/// Split `ids` into ordered, non-empty chunks of at most `max_size` ids.
///
/// Concatenating the chunks reproduces `ids` exactly. A `max_size` of zero
/// is treated as one.
pub fn split<T: Clone>(ids: &[T], max_size: usize) -> Vec<Vec<T>> {
  ids.chunks(max_size.max(1)).map(<[T]>::to_vec).collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn ids(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("APP-{:04}", i)).collect()
  }

  #[test]
  fn test_split_covers_input_in_order() {
    let input = ids(130);
    let chunks = split(&input, 50);

    assert_eq!(chunks.len(), 3);
    assert_eq!(
      chunks.iter().map(Vec::len).collect::<Vec<_>>(),
      vec![50, 50, 30]
    );
    assert_eq!(chunks.concat(), input);
  }

  #[test]
  fn test_split_exact_multiple() {
    let chunks = split(&ids(100), 50);
    assert_eq!(chunks.len(), 2);
    assert!(chunks.iter().all(|c| c.len() == 50));
  }

  #[test]
  fn test_split_empty_input() {
    assert!(split::<String>(&[], 50).is_empty());
  }

  #[test]
  fn test_split_zero_size_does_not_panic() {
    let chunks = split(&ids(3), 0);
    assert_eq!(chunks.len(), 3);
  }
}
