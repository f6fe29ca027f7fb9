mod app;
mod event;
mod logging;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use loandash::config::Config;
use loandash::kinds::LookupKind;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "loandash")]
#[command(about = "Batched payment-status lookups for loan collections")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/loandash/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Scope token, e.g. a month such as 2024-05 (default: from config)
  #[arg(short, long, global = true)]
  scope: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Look up values for a list of application ids
  Fetch {
    /// Lookup name or alias (see `lookups`)
    lookup: String,
    /// Application ids
    #[arg(required = true)]
    ids: Vec<String>,
    /// Issue the lookup this many times (repeats are served from cache)
    #[arg(long, default_value_t = 1)]
    repeat: u32,
  },
  /// Read id lists from stdin, one debounced lookup per line
  Watch {
    /// Lookup name or alias (see `lookups`)
    lookup: String,
  },
  /// List available lookups
  Lookups,
}

fn parse_kind(input: &str) -> Result<LookupKind> {
  input.parse::<LookupKind>().map_err(|e| eyre!("{}", e))
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  if let Command::Lookups = args.command {
    app::App::list_lookups();
    return Ok(());
  }

  let _log_guard = logging::init()?;

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let app = app::App::new(config);

  match args.command {
    Command::Fetch {
      lookup,
      ids,
      repeat,
    } => app.fetch(parse_kind(&lookup)?, ids, args.scope, repeat).await?,
    Command::Watch { lookup } => app.watch(parse_kind(&lookup)?, args.scope).await?,
    Command::Lookups => {}
  }

  Ok(())
}
