mod app;
mod cache;
mod commands;
mod config;
mod db;
mod event;
mod lifecycle;
mod logging;
mod net;
mod store;
mod strategy;
mod worker;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "medcache")]
#[command(about = "Offline caching layer for the hospital appointments app")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/medcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Also log to stderr
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  let _log_guard = logging::init(&config.data_dir()?.join("logs"), args.verbose)?;

  // Initialize and run the app
  let mut app = app::App::new(config)?;
  app.run(args.command).await?;

  Ok(())
}
