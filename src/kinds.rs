//! Lookup kinds served by the dashboard and name matching for them.

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// The per-application lookups the dashboard batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupKind {
  PaymentStatus,
  PtpDate,
  CollectionStatus,
}

impl LookupKind {
  /// Stable name, used as the operation kind in cache keys.
  pub fn name(self) -> &'static str {
    self.info().name
  }

  pub fn info(self) -> &'static KindInfo {
    // every variant has an entry in KINDS
    KINDS
      .iter()
      .find(|k| k.kind == self)
      .unwrap_or(&KINDS[0])
  }
}

impl fmt::Display for LookupKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

#[derive(Debug, Clone)]
pub struct KindInfo {
  pub kind: LookupKind,
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub description: &'static str,
}

/// All available lookups
pub const KINDS: &[KindInfo] = &[
  KindInfo {
    kind: LookupKind::PaymentStatus,
    name: "payment_status",
    aliases: &["status", "s", "payment"],
    description: "Latest payment status per application",
  },
  KindInfo {
    kind: LookupKind::PtpDate,
    name: "ptp_date",
    aliases: &["ptp", "p", "promise"],
    description: "Latest promise-to-pay date per application",
  },
  KindInfo {
    kind: LookupKind::CollectionStatus,
    name: "collection_status",
    aliases: &["collection", "c", "coll"],
    description: "Latest collection status per application",
  },
];

/// Rank every lookup against `input`; lower priority is a better match.
fn ranked(input: &str) -> Vec<(&'static KindInfo, u32)> {
  let input_lower = input.trim().to_lowercase();

  if input_lower.is_empty() {
    return KINDS.iter().map(|k| (k, 6)).collect();
  }

  let mut matches: Vec<(&KindInfo, u32)> = Vec::new();

  for info in KINDS {
    let priority = if info.name == input_lower {
      0
    } else if info.aliases.contains(&input_lower.as_str()) {
      1
    } else if info.name.starts_with(&input_lower) {
      2
    } else if info.aliases.iter().any(|a| a.starts_with(&input_lower)) {
      3
    } else if info.name.contains(&input_lower) {
      4
    } else if info.aliases.iter().any(|a| a.contains(&input_lower)) {
      5
    } else {
      continue;
    };
    matches.push((info, priority));
  }

  matches.sort_by_key(|(_, priority)| *priority);
  matches
}

/// Get suggestions for a (possibly partial or misspelled) lookup name.
pub fn get_suggestions(input: &str) -> Vec<&'static KindInfo> {
  ranked(input).into_iter().map(|(info, _)| info).collect()
}

/// Resolve a lookup by name, alias or unambiguous prefix.
pub fn resolve(input: &str) -> Option<LookupKind> {
  ranked(input)
    .into_iter()
    .find(|(_, priority)| *priority <= 3)
    .map(|(info, _)| info.kind)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownLookup {
  pub input: String,
  pub suggestions: Vec<&'static str>,
}

impl fmt::Display for UnknownLookup {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "unknown lookup '{}'", self.input)?;
    if !self.suggestions.is_empty() {
      write!(f, " (did you mean: {}?)", self.suggestions.join(", "))?;
    }
    Ok(())
  }
}

impl std::error::Error for UnknownLookup {}

impl FromStr for LookupKind {
  type Err = UnknownLookup;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    resolve(s).ok_or_else(|| UnknownLookup {
      input: s.to_string(),
      suggestions: get_suggestions(s).iter().map(|k| k.name).collect(),
    })
  }
}
