use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::breaker::{CircuitBreaker, DEFAULT_COOLDOWN, DEFAULT_THRESHOLD};
use crate::chunk::DEFAULT_CHUNK_SIZE;
use crate::kinds::LookupKind;
use crate::loader::{LookupPolicy, DEFAULT_TTL};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub source: SourceConfig,
  /// Scope applied when none is given on the command line
  pub default_scope: Option<String>,
  #[serde(default)]
  pub breaker: BreakerConfig,
  /// Quiet window for debounced requests
  #[serde(default = "default_debounce_ms")]
  pub debounce_ms: u64,
  /// Per-lookup tables and cache policies; missing kinds use built-in defaults
  #[serde(default)]
  pub lookups: BTreeMap<LookupKind, LookupConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
  /// Base URL of the REST endpoint, e.g. https://db.example.com/rest/v1
  pub url: String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BreakerConfig {
  #[serde(default = "default_threshold")]
  pub threshold: u32,
  #[serde(default = "default_cooldown_secs")]
  pub cooldown_secs: u64,
}

impl Default for BreakerConfig {
  fn default() -> Self {
    Self {
      threshold: default_threshold(),
      cooldown_secs: default_cooldown_secs(),
    }
  }
}

impl BreakerConfig {
  pub fn build(&self) -> CircuitBreaker {
    CircuitBreaker::new(self.threshold, Duration::from_secs(self.cooldown_secs))
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LookupConfig {
  pub table: String,
  #[serde(default = "default_id_column")]
  pub id_column: String,
  pub value_column: String,
  #[serde(default = "default_created_at_column")]
  pub created_at_column: String,
  /// Column compared against the scope token; lookups without one ignore scope
  pub scope_column: Option<String>,
  #[serde(default = "default_ttl_ms")]
  pub ttl_ms: u64,
  #[serde(default = "default_chunk_size")]
  pub chunk_size: usize,
}

impl LookupConfig {
  /// Built-in table layout for a lookup kind.
  pub fn default_for(kind: LookupKind) -> Self {
    let (table, value_column) = match kind {
      LookupKind::PaymentStatus => ("payment_status", "status"),
      LookupKind::PtpDate => ("ptp_dates", "ptp_date"),
      LookupKind::CollectionStatus => ("collection_status", "status"),
    };

    Self {
      table: table.to_string(),
      id_column: default_id_column(),
      value_column: value_column.to_string(),
      created_at_column: default_created_at_column(),
      scope_column: Some("month".to_string()),
      ttl_ms: default_ttl_ms(),
      chunk_size: default_chunk_size(),
    }
  }

  pub fn policy(&self) -> LookupPolicy {
    LookupPolicy {
      ttl: Duration::from_millis(self.ttl_ms),
      chunk_size: self.chunk_size,
    }
  }
}

fn default_debounce_ms() -> u64 {
  300
}

fn default_timeout_secs() -> u64 {
  15
}

fn default_threshold() -> u32 {
  DEFAULT_THRESHOLD
}

fn default_cooldown_secs() -> u64 {
  DEFAULT_COOLDOWN.as_secs()
}

fn default_id_column() -> String {
  "application_id".to_string()
}

fn default_created_at_column() -> String {
  "created_at".to_string()
}

fn default_ttl_ms() -> u64 {
  DEFAULT_TTL.as_millis() as u64
}

fn default_chunk_size() -> usize {
  DEFAULT_CHUNK_SIZE
}

/// Names a config file to load when no path is given on the command line
pub const CONFIG_VAR: &str = "LOANDASH_CONFIG";
/// Overrides `source.url`; enough to run without any config file
pub const URL_VAR: &str = "LOANDASH_URL";
/// Overrides `default_scope`
pub const SCOPE_VAR: &str = "LOANDASH_SCOPE";
/// Overrides `debounce_ms`
pub const DEBOUNCE_VAR: &str = "LOANDASH_DEBOUNCE_MS";

impl Config {
  /// Load configuration from file, then apply environment overrides.
  ///
  /// Search order:
  /// 1. Explicit path if provided, else $LOANDASH_CONFIG
  /// 2. ./loandash.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/loandash/config.yaml
  /// 4. Built-in defaults, if $LOANDASH_URL names the data service
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    Self::load_with(explicit_path, |name| std::env::var(name).ok())
  }

  fn load_with<E>(explicit_path: Option<&Path>, env: E) -> Result<Self>
  where
    E: Fn(&str) -> Option<String>,
  {
    let env = |name: &str| env(name).filter(|value| !value.trim().is_empty());

    let explicit = explicit_path
      .map(Path::to_path_buf)
      .or_else(|| env(CONFIG_VAR).map(PathBuf::from));

    let mut config = match explicit {
      Some(p) if !p.exists() => return Err(eyre!("Config file not found: {}", p.display())),
      Some(p) => Self::load_from_path(&p)?,
      None => match Self::find_config_file() {
        Some(p) => Self::load_from_path(&p)?,
        None => match env(URL_VAR) {
          Some(url) => Self::with_url(url),
          None => {
            return Err(eyre!(
              "No configuration found. Create ~/.config/loandash/config.yaml or set {}",
              URL_VAR
            ))
          }
        },
      },
    };

    config.apply_env(env)?;
    Ok(config)
  }

  /// Defaults for everything but the data service location.
  fn with_url(url: String) -> Self {
    Self {
      source: SourceConfig {
        url,
        timeout_secs: default_timeout_secs(),
      },
      default_scope: None,
      breaker: BreakerConfig::default(),
      debounce_ms: default_debounce_ms(),
      lookups: BTreeMap::new(),
    }
  }

  /// Environment values win over the file, so one deployment can point the
  /// same config at another data service or month.
  fn apply_env<E>(&mut self, env: E) -> Result<()>
  where
    E: Fn(&str) -> Option<String>,
  {
    if let Some(url) = env(URL_VAR) {
      self.source.url = url;
    }
    if let Some(scope) = env(SCOPE_VAR) {
      self.default_scope = Some(scope);
    }
    if let Some(delay) = env(DEBOUNCE_VAR) {
      self.debounce_ms = delay
        .trim()
        .parse()
        .map_err(|e| eyre!("Invalid {} {:?}: {}", DEBOUNCE_VAR, delay, e))?;
    }
    Ok(())
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("loandash.yaml");
    let xdg = dirs::config_dir().map(|dir| dir.join("loandash").join("config.yaml"));

    std::iter::once(local).chain(xdg).find(|path| path.exists())
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;

    if let Some((kind, _)) = config.lookups.iter().find(|(_, l)| l.chunk_size == 0) {
      return Err(eyre!("chunk_size for lookup {} must be positive", kind));
    }

    Ok(config)
  }

  /// Table layout and policy for `kind`, falling back to the built-in layout.
  pub fn lookup(&self, kind: LookupKind) -> LookupConfig {
    self
      .lookups
      .get(&kind)
      .cloned()
      .unwrap_or_else(|| LookupConfig::default_for(kind))
  }

  /// Get the data service API key from the environment.
  ///
  /// Checks LOANDASH_API_KEY. Endpoints without authentication need none.
  pub fn get_api_key() -> Option<String> {
    std::env::var("LOANDASH_API_KEY")
      .ok()
      .filter(|key| !key.is_empty())
  }
}
