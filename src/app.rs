use color_eyre::Result;
use loandash::config::Config;
use loandash::kinds::{LookupKind, KINDS};
use loandash::source::rest::RestSource;
use loandash::{BatchLoader, CircuitBreaker, EntityId, Invalidation, LookupView, Phase, Scope};
use std::sync::Arc;
use std::time::Duration;

use crate::event::{Event, EventHandler};

/// Placeholder printed for ids without a value
const UNSET: &str = "-";

/// Command-line application state
pub struct App {
  config: Config,
  /// Shared by every lookup, like the dashboard's single data service
  breaker: Arc<CircuitBreaker>,
  api_key: Option<String>,
}

impl App {
  pub fn new(config: Config) -> Self {
    let breaker = Arc::new(config.breaker.build());
    Self {
      config,
      breaker,
      api_key: Config::get_api_key(),
    }
  }

  fn loader(&self, kind: LookupKind) -> Result<BatchLoader<RestSource>> {
    let lookup = self.config.lookup(kind);
    let source = RestSource::new(&self.config.source, &lookup, self.api_key.clone())?;

    Ok(
      BatchLoader::new(kind.name(), source)
        .with_policy(lookup.policy())
        .with_breaker(Arc::clone(&self.breaker)),
    )
  }

  fn scope(&self, scope: Option<String>) -> Option<Scope> {
    scope.or_else(|| self.config.default_scope.clone()).map(Scope::from)
  }

  /// Look `ids` up `repeat` times and print the last result.
  pub async fn fetch(
    &self,
    kind: LookupKind,
    ids: Vec<EntityId>,
    scope: Option<String>,
    repeat: u32,
  ) -> Result<()> {
    let loader = self.loader(kind)?;
    let scope = self.scope(scope);

    let mut result = None;
    for _ in 0..repeat.max(1) {
      result = Some(loader.fetch_batch(&ids, scope.as_ref()).await);
    }

    if let Some(result) = result {
      for id in &ids {
        println!("{}\t{}", id, result.get(id).map_or(UNSET, String::as_str));
      }
      if result.is_empty() && !ids.is_empty() {
        eprintln!("No values found (see log for degraded lookups)");
      }
    }

    Ok(())
  }

  /// Read id lists from stdin and print each settled lookup.
  ///
  /// Lines are comma or whitespace separated ids. `!cancel` drops the pending
  /// lookup and `!refresh` invalidates cached results.
  pub async fn watch(&self, kind: LookupKind, scope: Option<String>) -> Result<()> {
    let view = LookupView::new(
      self.loader(kind)?,
      Duration::from_millis(self.config.debounce_ms),
    );
    let scope = self.scope(scope);

    let mut events = EventHandler::new();
    let mut updates = view.subscribe();
    let mut requested: Vec<EntityId> = Vec::new();
    let mut printed = 0;
    let mut closed = false;

    loop {
      tokio::select! {
        event = events.next(), if !closed => match event {
          Some(Event::Line(line)) => match line.trim() {
            "" => {}
            "!cancel" => {
              view.cancel();
              // a cancel settles without new data
              printed = view.snapshot().generation;
            }
            "!refresh" => {
              let dropped = view.invalidate(&Invalidation::All);
              eprintln!("Invalidated {} cached result(s)", dropped);
            }
            line => {
              requested = parse_ids(line);
              view.request(requested.clone(), scope.clone());
            }
          },
          Some(Event::Closed) | None => closed = true,
        },
        changed = updates.changed() => {
          if changed.is_err() {
            break;
          }
          let state = updates.borrow_and_update().clone();
          if state.phase == Phase::Idle && state.generation > printed {
            printed = state.generation;
            if let Some(data) = &state.data {
              for id in &requested {
                println!("{}\t{}", id, data.get(id).map_or(UNSET, String::as_str));
              }
              println!();
            }
          }
        }
      }

      if closed && !view.snapshot().is_pending() {
        break;
      }
    }

    Ok(())
  }

  /// Print the available lookups.
  pub fn list_lookups() {
    for info in KINDS {
      println!(
        "{:<20}{:<24}{}",
        info.name,
        info.aliases.join(", "),
        info.description
      );
    }
  }
}

fn parse_ids(line: &str) -> Vec<EntityId> {
  line
    .split(|c: char| c == ',' || c.is_whitespace())
    .filter(|id| !id.is_empty())
    .map(String::from)
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_ids() {
    assert_eq!(parse_ids("A, B C,,D"), vec!["A", "B", "C", "D"]);
    assert!(parse_ids(" , ").is_empty());
  }
}
