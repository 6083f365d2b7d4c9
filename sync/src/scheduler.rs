//! The `bisyncd` daemon loop: run every enabled profile on its own
//! interval, forever or once (spec.md §4.J "Daemon mode"), grounded on
//! the Python daemon's `DaemonRunner`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::coordinator::Coordinator;
use crate::logging::LoggingHandle;

#[derive(Debug, Clone)]
struct ScheduledProfile {
    name: String,
    interval_seconds: u64,
    next_run: i64,
}

pub struct Daemon {
    profiles_dir: PathBuf,
    logs_dir: PathBuf,
    state_dir: PathBuf,
    logging: LoggingHandle,
    extra_args: Vec<String>,
}

impl Daemon {
    pub fn new(profiles_dir: PathBuf, logs_dir: PathBuf, state_dir: PathBuf, logging: LoggingHandle, extra_args: Vec<String>) -> Self {
        Daemon { profiles_dir, logs_dir, state_dir, logging, extra_args }
    }

    /// Run the scheduling loop. `run_once` runs every currently-due
    /// profile exactly once and returns instead of looping forever —
    /// used for cron-style invocation and for tests.
    pub async fn run_forever(&self, run_once: bool) -> Result<()> {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .context("installing SIGTERM handler")?;
        let mut sighup = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
            .context("installing SIGHUP handler")?;

        let mut profiles = self.load_scheduled_profiles().await?;
        let mut coordinator = Coordinator::new(self.state_dir.clone());
        loop {
            let now = wall_clock_seconds();
            let mut due: Vec<&mut ScheduledProfile> = profiles.values_mut().filter(|p| p.next_run <= now).collect();
            due.sort_by(|a, b| a.name.cmp(&b.name));

            if !due.is_empty() {
                for scheduled in due {
                    self.run_one(&mut coordinator, &scheduled.name).await;
                    scheduled.next_run = wall_clock_seconds() + scheduled.interval_seconds as i64;
                }
                if run_once {
                    return Ok(());
                }
                continue;
            }
            if run_once {
                return Ok(());
            }

            let sleep_for = next_sleep_duration(&profiles, now);
            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = sigterm.recv() => {
                    tracing::info!("received SIGTERM; shutting down daemon");
                    return Ok(());
                }
                _ = sighup.recv() => {
                    tracing::info!("received SIGHUP; reloading daemon profiles");
                    profiles = self.load_scheduled_profiles().await?;
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("received SIGINT; shutting down daemon");
                    return Ok(());
                }
            }
        }
    }

    async fn run_one(&self, coordinator: &mut Coordinator, profile_name: &str) {
        tracing::info!(profile = profile_name, "running scheduled sync");
        let log_path = self.logs_dir.join(format!("{profile_name}.log"));
        if let Err(e) = self.logging.install_profile_sink(&log_path) {
            tracing::warn!(profile = profile_name, error = %e, "failed to install per-profile log sink");
        }
        let result = self.run_profile(coordinator, profile_name).await;
        if let Err(e) = result {
            tracing::error!(profile = profile_name, error = %e, "scheduled sync failed");
        }
        if let Err(e) = self.logging.clear_profile_sink() {
            tracing::warn!(profile = profile_name, error = %e, "failed to clear per-profile log sink");
        }
    }

    async fn run_profile(&self, coordinator: &mut Coordinator, profile_name: &str) -> Result<()> {
        let path = self.profiles_dir.join(format!("{profile_name}.toml"));
        let profile = crate::profile_loader::load(&path).await.context("loading profile")?;
        coordinator.run(&profile, false, &self.extra_args).await?;
        Ok(())
    }

    async fn load_scheduled_profiles(&self) -> Result<BTreeMap<String, ScheduledProfile>> {
        let mut scheduled = BTreeMap::new();
        let mut entries = match tokio::fs::read_dir(&self.profiles_dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(scheduled),
            Err(e) => return Err(e).context("reading profiles directory"),
        };
        let now = wall_clock_seconds();
        while let Some(entry) = entries.next_entry().await.context("reading profiles directory")? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            let profile = crate::profile_loader::load(&path).await.with_context(|| format!("loading {path:?}"))?;
            if !profile.schedule.enabled {
                continue;
            }
            scheduled.insert(
                profile.name.clone(),
                ScheduledProfile { name: profile.name.clone(), interval_seconds: profile.schedule.interval_seconds, next_run: now },
            );
        }
        Ok(scheduled)
    }
}

fn next_sleep_duration(profiles: &BTreeMap<String, ScheduledProfile>, now: i64) -> std::time::Duration {
    if profiles.is_empty() {
        return std::time::Duration::from_secs(5);
    }
    let earliest = profiles.values().map(|p| p.next_run).min().unwrap_or(now);
    let seconds = (earliest - now).max(1);
    std::time::Duration::from_secs(seconds as u64)
}

fn wall_clock_seconds() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
