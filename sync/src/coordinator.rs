//! The top-level run pipeline: snapshot both endpoints, plan, apply,
//! persist (spec.md §4.J), grounded on the Python CLI's `SyncRunner`.
//!
//! One [`Coordinator`] is built per invocation of the `bisync` binary
//! and reused across every due profile inside `bisyncd` so the
//! pre-connect command only runs once per process, not once per
//! profile — an explicit instance field rather than a module-level
//! static, per spec.md §9's guidance against global mutable state.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use common::entry::StoredEntry;
use common::filter::IgnoreSet;
use common::profile::Profile;

use crate::planner::{self, PlanInput};
use crate::snapshot::{self, Snapshot};
use crate::state::{self, ProfileState};

/// Outcome of one `run()` call, enough for the CLI to decide its exit
/// code and print a summary.
#[derive(Debug)]
pub struct RunSummary {
    pub operations_applied: usize,
    pub conflicts_recorded: usize,
    pub blocking_conflicts: usize,
    pub dry_run: bool,
}

pub struct Coordinator {
    state_dir: PathBuf,
    pre_connect_done: bool,
}

impl Coordinator {
    pub fn new(state_dir: PathBuf) -> Self {
        Coordinator { state_dir, pre_connect_done: false }
    }

    #[tracing::instrument(skip(self, profile), fields(profile = %profile.name))]
    pub async fn run(&mut self, profile: &Profile, dry_run: bool, extra_args: &[String]) -> Result<RunSummary> {
        profile.endpoint_a.ensure_local_root().await.context("preparing endpoint a")?;
        profile.endpoint_b.ensure_local_root().await.context("preparing endpoint b")?;

        self.run_preconnect_if_needed(profile).await?;

        let ignore = IgnoreSet::from_patterns(&profile.ignore.patterns).context("compiling ignore patterns")?;
        let snapshot_a = self.snapshot_endpoint(profile, &profile.endpoint_a, &ignore, extra_args).await?;
        let snapshot_b = self.snapshot_endpoint(profile, &profile.endpoint_b, &ignore, extra_args).await?;

        let state = state::load(&self.state_dir, &profile.name).await.context("loading profile state")?;
        let now = wall_clock_seconds();
        let plan_input = PlanInput {
            endpoint_a_id: profile.endpoint_a.id.as_str(),
            endpoint_b_id: profile.endpoint_b.id.as_str(),
            snapshot_a: &snapshot_a,
            snapshot_b: &snapshot_b,
            state: &state,
            conflict: &profile.conflict,
            now,
        };
        let plan = planner::plan(&plan_input);
        log_plan(&plan);

        let blocking_conflicts: Vec<_> = plan.conflicts.iter().filter(|c| c.is_blocking()).collect();
        if !blocking_conflicts.is_empty() {
            if !dry_run {
                self.persist_state(profile, &ignore, &plan.conflicts, extra_args).await?;
            }
            bail!("Conflicts detected; resolve before rerunning.");
        }
        if !plan.conflicts.is_empty() {
            tracing::warn!("conflicts recorded with manual policy; review generated *.conflict-* files");
        }

        if dry_run {
            tracing::info!("dry-run complete; no filesystem changes applied");
            return Ok(RunSummary {
                operations_applied: 0,
                conflicts_recorded: plan.conflicts.len(),
                blocking_conflicts: 0,
                dry_run: true,
            });
        }

        let operations_applied = plan.operations.len();
        if operations_applied > 0 {
            let executor = crate::executor::Executor::new(&profile.endpoint_a, &profile.endpoint_b, extra_args);
            executor
                .apply(&plan.operations, &state)
                .await
                .map_err(|e| e.reclassify_permission_denied())
                .context("applying planned operations")?;
        } else {
            tracing::info!("no operations required; verifying state");
        }

        self.persist_state(profile, &ignore, &plan.conflicts, extra_args).await?;
        tracing::info!("synchronization complete");
        Ok(RunSummary {
            operations_applied,
            conflicts_recorded: plan.conflicts.len(),
            blocking_conflicts: 0,
            dry_run: false,
        })
    }

    async fn run_preconnect_if_needed(&mut self, profile: &Profile) -> Result<()> {
        if self.pre_connect_done {
            return Ok(());
        }
        let command = profile.ssh.pre_connect_command.clone().or_else(|| {
            [&profile.endpoint_a, &profile.endpoint_b]
                .into_iter()
                .find_map(|e| e.pre_connect_command.clone())
        });
        let Some(command) = command else {
            return Ok(());
        };
        tracing::info!("running pre-connect command");
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&command)
            .envs(&profile.ssh.env)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .output()
            .await
            .context("failed to execute pre-connect command")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let detail = if !stderr.trim().is_empty() { stderr.trim() } else { stdout.trim() };
            bail!("pre-connect command failed: {detail}");
        }
        self.pre_connect_done = true;
        Ok(())
    }

    async fn snapshot_endpoint(
        &self,
        profile: &Profile,
        endpoint: &common::endpoint::Endpoint,
        ignore: &IgnoreSet,
        extra_args: &[String],
    ) -> Result<Snapshot> {
        let _ = profile;
        if endpoint.is_local() {
            snapshot::snapshot_local(Path::new(&endpoint.root_path), ignore)
                .await
                .with_context(|| format!("snapshotting endpoint {}", endpoint.id))
        } else {
            let shell_command = endpoint.shell_command.as_deref().unwrap_or("ssh");
            let host = endpoint.host.as_deref().context("remote endpoint missing host")?;
            snapshot::snapshot_remote(shell_command, extra_args, host, &endpoint.root_path, ignore)
                .await
                .with_context(|| format!("snapshotting endpoint {}", endpoint.id))
        }
    }

    async fn persist_state(
        &self,
        profile: &Profile,
        ignore: &IgnoreSet,
        conflicts: &[common::operation::ConflictRecord],
        extra_args: &[String],
    ) -> Result<()> {
        let snapshot_a = self.snapshot_endpoint(profile, &profile.endpoint_a, ignore, extra_args).await?;
        let snapshot_b = self.snapshot_endpoint(profile, &profile.endpoint_b, ignore, extra_args).await?;
        let executor = crate::executor::Executor::new(&profile.endpoint_a, &profile.endpoint_b, extra_args);
        let mut next_state = ProfileState::new(&profile.name);
        for entry in snapshot_a.values() {
            let mut stored = StoredEntry::from_entry(entry);
            if !entry.is_dir && !entry.is_symlink {
                stored.merge_base = executor.capture_merge_base(&profile.endpoint_a.id, entry.path.as_str()).await;
            }
            next_state.record_entry(&profile.endpoint_a.id, stored);
        }
        for entry in snapshot_b.values() {
            let mut stored = StoredEntry::from_entry(entry);
            if !entry.is_dir && !entry.is_symlink {
                stored.merge_base = executor.capture_merge_base(&profile.endpoint_b.id, entry.path.as_str()).await;
            }
            next_state.record_entry(&profile.endpoint_b.id, stored);
        }
        for conflict in conflicts {
            next_state.record_conflict(conflict.clone());
        }
        state::save(&self.state_dir, &next_state).await.context("saving profile state")?;
        Ok(())
    }
}

fn log_plan(plan: &planner::Plan) {
    tracing::info!(operations = plan.operations.len(), conflicts = plan.conflicts.len(), "plan summary");
    for op in &plan.operations {
        tracing::info!(path = %op.path(), "planned operation");
    }
    for conflict in &plan.conflicts {
        tracing::warn!(path = %conflict.path, reason = %conflict.reason, "conflict");
    }
}

fn wall_clock_seconds() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
