//! `bisyncd`: the long-running daemon that drives every enabled profile
//! on its own schedule.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "bisyncd", version, about = "Scheduled daemon for bisync profiles")]
struct Cli {
    /// Directory holding `<profile>.toml` files. Defaults to `~/.config/bisync/profiles`.
    #[arg(long)]
    profiles_dir: Option<PathBuf>,

    /// Directory holding per-profile state JSON. Defaults to `~/.config/bisync/state`.
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Directory holding per-profile log files. Defaults to `~/.config/bisync/logs`.
    #[arg(long)]
    logs_dir: Option<PathBuf>,

    /// Run every currently-due profile once, then exit instead of looping forever.
    #[arg(long)]
    once: bool,

    /// Increase logging verbosity (repeatable).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (repeatable).
    #[arg(short, long, action = clap::ArgAction::Count)]
    quiet: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbosity = cli.verbose as i8 - cli.quiet as i8;
    let logging = bisync_sync::logging::init(verbosity);

    let base = default_config_dir();
    let profiles_dir = cli.profiles_dir.unwrap_or_else(|| base.join("profiles"));
    let state_dir = cli.state_dir.unwrap_or_else(|| base.join("state"));
    let logs_dir = cli.logs_dir.unwrap_or_else(|| base.join("logs"));
    tokio::fs::create_dir_all(&state_dir).await.context("creating state directory")?;
    tokio::fs::create_dir_all(&logs_dir).await.context("creating logs directory")?;

    let daemon = bisync_sync::scheduler::Daemon::new(profiles_dir, logs_dir, state_dir, logging, Vec::new());
    daemon.run_forever(cli.once).await
}

fn default_config_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join(".config").join("bisync"))
        .unwrap_or_else(|| PathBuf::from(".bisync"))
}
