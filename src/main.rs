mod app;
mod cache;
mod clients;
mod config;
mod net;
mod radix;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rdx")]
#[command(about = "Offline-first number base converter and asset mirror")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/rdx/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Convert a numeral between bases 2, 8, 10 and 16
  Convert {
    /// Numeral to convert
    value: String,

    /// Base the numeral is written in
    #[arg(long)]
    from: u32,

    /// Base to render the result in
    #[arg(long)]
    to: u32,

    /// Also print how the conversion is done by hand
    #[arg(long)]
    explain: bool,
  },
  /// Install and activate the configured cache generation
  Sync,
  /// Serve one asset through the cache, body to stdout
  Get {
    /// Asset URL
    url: String,
  },
  /// Refresh cached assets and print update notices as JSON lines
  Check,
  /// Show cache generations and lifecycle state
  Status,
  /// Delete every cache generation
  Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();

  match args.command {
    Command::Convert {
      value,
      from,
      to,
      explain,
    } => app::convert(&value, from, to, explain),
    command => {
      let config = config::Config::load(args.config.as_deref())?;
      let app = app::App::new(config)?;
      match command {
        Command::Sync => app.sync().await,
        Command::Get { url } => app.get(&url).await,
        Command::Check => app.check().await,
        Command::Status => app.status(),
        Command::Reset => app.reset(),
        // Handled by the outer match.
        Command::Convert { .. } => Ok(()),
      }
    }
  }
}
