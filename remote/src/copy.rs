//! Single-file and single-symlink transfer to/from a remote host (spec.md
//! §4.D), conceptually `scp`-equivalent. This is a separate child-process
//! invocation from [`crate::shell::run`] — a copy utility, not a command
//! run over the remote shell — but it is held to the same no-prompt
//! discipline: any stderr that looks like an interactive prompt is
//! refused rather than left to block.

use anyhow::{anyhow, Result};

fn looks_like_prompt(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    ["password:", "passphrase", "enter pin", "enter passcode"]
        .iter()
        .any(|needle| lower.contains(needle))
}

const AUTH_PROMPT_MESSAGE: &str = "authentication prompt detected; refusing to block";

#[tracing::instrument]
async fn run_copy(copy_command: &str, extra_args: &[String], source: &str, destination: &str) -> Result<()> {
    tracing::debug!("{copy_command} {source} -> {destination}");
    let output = tokio::process::Command::new(copy_command)
        .args(extra_args)
        .arg(source)
        .arg(destination)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .output()
        .await
        .map_err(|e| anyhow!("failed to launch {copy_command:?}: {e}"))?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if looks_like_prompt(stderr) {
        return Err(anyhow!(AUTH_PROMPT_MESSAGE));
    }
    if stderr.is_empty() {
        return Err(anyhow!("{copy_command} command failed"));
    }
    Err(anyhow!("{}", stderr))
}

/// Push a local path to `host:remote_path`.
pub async fn push(
    copy_command: &str,
    extra_args: &[String],
    host: &str,
    local_path: &std::path::Path,
    remote_path: &str,
) -> Result<()> {
    let destination = format!("{host}:{remote_path}");
    run_copy(copy_command, extra_args, &local_path.to_string_lossy(), &destination).await
}

/// Pull `host:remote_path` down to a local path.
pub async fn pull(
    copy_command: &str,
    extra_args: &[String],
    host: &str,
    remote_path: &str,
    local_path: &std::path::Path,
) -> Result<()> {
    let source = format!("{host}:{remote_path}");
    run_copy(copy_command, extra_args, &source, &local_path.to_string_lossy()).await
}
