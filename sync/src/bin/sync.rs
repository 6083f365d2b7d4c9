//! `bisync`: run a single profile once, or inspect its recorded conflicts.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "bisync", version, about = "Profile-driven bidirectional file synchronizer")]
struct Cli {
    /// Directory holding `<profile>.toml` files. Defaults to `~/.config/bisync/profiles`.
    #[arg(long, global = true)]
    profiles_dir: Option<PathBuf>,

    /// Directory holding per-profile state JSON. Defaults to `~/.config/bisync/state`.
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Increase logging verbosity (repeatable).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Decrease logging verbosity (repeatable).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    quiet: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute a synchronization run for a profile.
    Run {
        profile: String,
        /// Plan actions without touching the filesystem.
        #[arg(long)]
        dry_run: bool,
    },
    /// List conflicts recorded in a profile's persisted state.
    Conflicts { profile: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbosity = cli.verbose as i8 - cli.quiet as i8;
    bisync_sync::logging::init(verbosity);

    let profiles_dir = cli.profiles_dir.unwrap_or_else(|| default_config_dir().join("profiles"));
    let state_dir = cli.state_dir.unwrap_or_else(|| default_config_dir().join("state"));
    tokio::fs::create_dir_all(&state_dir).await.context("creating state directory")?;

    match cli.command {
        Command::Run { profile, dry_run } => run_profile(&profiles_dir, &state_dir, &profile, dry_run).await,
        Command::Conflicts { profile } => show_conflicts(&state_dir, &profile).await,
    }
}

async fn run_profile(profiles_dir: &std::path::Path, state_dir: &std::path::Path, profile_name: &str, dry_run: bool) -> Result<()> {
    let path = profiles_dir.join(format!("{profile_name}.toml"));
    let profile = bisync_sync::profile_loader::load(&path)
        .await
        .with_context(|| format!("loading profile {profile_name:?}"))?;
    let mut coordinator = bisync_sync::coordinator::Coordinator::new(state_dir.to_path_buf());
    let summary = coordinator.run(&profile, dry_run, &[]).await?;
    if summary.dry_run {
        println!("dry-run: {} operation(s) planned, {} conflict(s)", summary.operations_applied, summary.conflicts_recorded);
    } else {
        println!("applied {} operation(s), {} conflict(s) recorded", summary.operations_applied, summary.conflicts_recorded);
    }
    Ok(())
}

async fn show_conflicts(state_dir: &std::path::Path, profile_name: &str) -> Result<()> {
    let state = bisync_sync::state::load(state_dir, profile_name).await.context("loading profile state")?;
    let conflicts = state.list_conflicts();
    if conflicts.is_empty() {
        println!("No conflicts recorded for {profile_name:?}.");
        return Ok(());
    }
    for conflict in conflicts {
        println!(
            "{} | {} <-> {} | {} | resolution: {}",
            conflict.path,
            conflict.endpoints.0,
            conflict.endpoints.1,
            conflict.reason,
            conflict.resolution.as_deref().unwrap_or("unresolved"),
        );
    }
    Ok(())
}

fn default_config_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join(".config").join("bisync"))
        .unwrap_or_else(|| PathBuf::from(".bisync"))
}
