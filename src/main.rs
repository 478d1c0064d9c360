mod app;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;

use pcmi_sync::config::Config;
use pcmi_sync::logging;

#[derive(Parser, Debug)]
#[command(name = "pcmi")]
#[command(about = "Offline-first admin client for the PCMI meeting room")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/pcmi/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Meeting room to operate on
  #[arg(short, long)]
  room: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// List all users
  Users {
    /// Ignore the cached list
    #[arg(long)]
    refresh: bool,
  },
  /// Show dashboard counters
  Stats,
  /// Inspect or change admin flags
  #[command(subcommand)]
  Admin(AdminCommand),
  /// Control the meeting room
  #[command(subcommand)]
  Meeting(MeetingCommand),
  /// Ensure the configured identity has a user document
  Sync,
  /// Manage the local cache
  #[command(subcommand)]
  Cache(CacheCommand),
}

#[derive(Subcommand, Debug)]
pub enum AdminCommand {
  Check { uid: String },
  Grant { uid: String },
  Revoke { uid: String },
}

#[derive(Subcommand, Debug)]
pub enum MeetingCommand {
  Status,
  Start {
    /// Admin user id (default: identity.uid)
    #[arg(long)]
    by: Option<String>,
    /// Admin display name
    #[arg(long)]
    name: Option<String>,
  },
  End,
  Participants { count: u32 },
  /// Follow status changes until Ctrl-C
  Watch,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
  /// Drop one key, or everything
  Clear { key: Option<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  // Override room if specified on command line
  let config = if let Some(room_id) = args.room {
    Config { room_id, ..config }
  } else {
    config
  };

  let _log_guard = logging::init(&config.log)?;

  let app = app::App::new(config).await?;
  let result = app.run(args.command).await;
  app.shutdown().await;

  result
}
