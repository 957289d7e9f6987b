mod app;
mod commands;
mod event;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use tuneline::config::Config;

#[derive(Parser, Debug)]
#[command(name = "tuneline")]
#[command(about = "Browse the tuneline catalog, online or off")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/tuneline/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Behave as if the network were down and serve from cache
  #[arg(long, global = true)]
  offline: bool,

  /// Refetch even if cached data is fresh
  #[arg(short, long, global = true)]
  refresh: bool,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  // Keep the guard alive so buffered log lines are flushed on exit
  let _log_guard = tuneline::logging::init_logging(&config.log)?;

  let flags = app::RunFlags {
    offline: args.offline,
    refresh: args.refresh,
  };
  let app = app::App::new(config, flags).await?;
  app.run(args.command).await?;

  Ok(())
}
