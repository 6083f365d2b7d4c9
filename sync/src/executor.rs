//! Applying a planned operation list to the two endpoints (spec.md §4.I).
//!
//! Operations are applied one at a time; a failure aborts the run but
//! never rolls back prior operations — the coordinator's re-snapshot
//! after apply records whatever is actually on disk, not what was
//! planned. Every remote action is routed through [`remote::shell`]'s
//! marker-framed channel; `readlink`/`test -d` probes stand in for the
//! entry metadata an `Operation` doesn't itself carry. Mtimes needed for
//! merge fallback come from the operation's own metadata, captured by the
//! planner at snapshot time, rather than a second remote probe.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use common::endpoint::Endpoint;
use common::error::ExecutionError;
use common::operation::Operation;
use common::path::RelativePath;
use common::profile::{ConflictPolicy, ManualBehavior};

use crate::state::ProfileState;

const DEFAULT_SHELL_COMMAND: &str = "ssh";
const DEFAULT_COPY_COMMAND: &str = "scp";
/// Caps how much text a single path's merge base is allowed to carry in
/// state; anything larger is treated as not captured.
const MAX_MERGE_BASE_BYTES: usize = 1_048_576;

/// Applies a plan's operations against a profile's two endpoints.
pub struct Executor<'a> {
    endpoint_a: &'a Endpoint,
    endpoint_b: &'a Endpoint,
    extra_args: &'a [String],
}

impl<'a> Executor<'a> {
    pub fn new(endpoint_a: &'a Endpoint, endpoint_b: &'a Endpoint, extra_args: &'a [String]) -> Self {
        Executor { endpoint_a, endpoint_b, extra_args }
    }

    fn endpoint(&self, id: &str) -> Result<&'a Endpoint, ExecutionError> {
        if self.endpoint_a.id == id {
            Ok(self.endpoint_a)
        } else if self.endpoint_b.id == id {
            Ok(self.endpoint_b)
        } else {
            Err(ExecutionError::Message(format!("unknown endpoint id {id:?}")))
        }
    }

    #[tracing::instrument(skip(self, state), fields(count = operations.len()))]
    pub async fn apply(&self, operations: &[Operation], state: &ProfileState) -> Result<(), ExecutionError> {
        for op in operations {
            tracing::debug!(path = %op.path(), "applying operation");
            self.apply_one(op, state).await?;
        }
        Ok(())
    }

    async fn apply_one(&self, op: &Operation, state: &ProfileState) -> Result<(), ExecutionError> {
        match op {
            Operation::Copy { path, source, destination, target_suffix, .. } => {
                let source = self.endpoint(source)?;
                let destination = self.endpoint(destination)?;
                let dest_rel = target_suffix.clone().unwrap_or_else(|| path.as_str().to_string());
                self.copy(path, source, destination, &dest_rel).await
            }
            Operation::Delete { path, destination } => {
                let destination = self.endpoint(destination)?;
                self.delete(path, destination).await
            }
            Operation::Mkdir { path, destination } => {
                let destination = self.endpoint(destination)?;
                self.mkdir(path, destination).await
            }
            Operation::Merge {
                path,
                source,
                destination,
                fallback_policy,
                fallback_prefer,
                fallback_manual_behavior,
                metadata,
                merge_base,
            } => {
                let source = self.endpoint(source)?;
                let destination = self.endpoint(destination)?;
                let _ = state;
                self.merge(
                    path,
                    source,
                    destination,
                    merge_base.as_deref(),
                    *fallback_policy,
                    fallback_prefer.as_deref(),
                    *fallback_manual_behavior,
                    metadata,
                )
                .await
            }
        }
    }

    // ---- copy -----------------------------------------------------

    async fn copy(
        &self,
        path: &RelativePath,
        source: &Endpoint,
        destination: &Endpoint,
        dest_rel: &str,
    ) -> Result<(), ExecutionError> {
        match (source.is_local(), destination.is_local()) {
            (true, true) => self.copy_local_to_local(path, source, destination, dest_rel).await,
            (true, false) => self.copy_local_to_remote(path, source, destination, dest_rel).await,
            (false, true) => self.copy_remote_to_local(path, source, destination, dest_rel).await,
            (false, false) => self.copy_remote_to_remote(path, source, destination, dest_rel).await,
        }
    }

    async fn copy_local_to_local(
        &self,
        path: &RelativePath,
        source: &Endpoint,
        destination: &Endpoint,
        dest_rel: &str,
    ) -> Result<(), ExecutionError> {
        let src_path = local_join(&source.root_path, path.as_str());
        let dst_path = local_join(&destination.root_path, dest_rel);
        let meta = tokio::fs::symlink_metadata(&src_path).await?;
        if let Some(parent) = dst_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if meta.file_type().is_symlink() {
            let target = tokio::fs::read_link(&src_path).await?;
            replace_symlink(&target, &dst_path).await?;
        } else if meta.is_dir() {
            tokio::fs::create_dir_all(&dst_path).await?;
        } else {
            tokio::fs::copy(&src_path, &dst_path).await?;
            common::preserve::set_mtime(&dst_path, mtime_secs(&meta))
                .await
                .map_err(|e| ExecutionError::Message(e.to_string()))?;
        }
        Ok(())
    }

    async fn copy_local_to_remote(
        &self,
        path: &RelativePath,
        source: &Endpoint,
        destination: &Endpoint,
        dest_rel: &str,
    ) -> Result<(), ExecutionError> {
        let src_path = local_join(&source.root_path, path.as_str());
        let dest_remote = remote_join(&destination.root_path, dest_rel);
        let meta = tokio::fs::symlink_metadata(&src_path).await?;
        if meta.file_type().is_symlink() {
            let target = tokio::fs::read_link(&src_path).await?;
            self.remote_mkdir_p(destination, &posix_parent(&dest_remote)).await?;
            self.run_remote(
                destination,
                &format!("ln -sfn {} {}", quote(&target.to_string_lossy()), quote(&dest_remote)),
            )
            .await?;
        } else if meta.is_dir() {
            self.remote_mkdir_p(destination, &dest_remote).await?;
        } else {
            self.remote_mkdir_p(destination, &posix_parent(&dest_remote)).await?;
            self.push(destination, &src_path, &dest_remote).await?;
        }
        Ok(())
    }

    async fn copy_remote_to_local(
        &self,
        path: &RelativePath,
        source: &Endpoint,
        destination: &Endpoint,
        dest_rel: &str,
    ) -> Result<(), ExecutionError> {
        let src_remote = remote_join(&source.root_path, path.as_str());
        let dst_path = local_join(&destination.root_path, dest_rel);
        if let Some(target) = self.remote_symlink_target(source, &src_remote).await? {
            if let Some(parent) = dst_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            replace_symlink(Path::new(&target), &dst_path).await?;
            return Ok(());
        }
        if self.remote_is_dir(source, &src_remote).await? {
            tokio::fs::create_dir_all(&dst_path).await?;
            return Ok(());
        }
        if let Some(parent) = dst_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.pull(source, &src_remote, &dst_path).await
    }

    async fn copy_remote_to_remote(
        &self,
        path: &RelativePath,
        source: &Endpoint,
        destination: &Endpoint,
        dest_rel: &str,
    ) -> Result<(), ExecutionError> {
        let src_remote = remote_join(&source.root_path, path.as_str());
        let dest_remote = remote_join(&destination.root_path, dest_rel);
        if let Some(target) = self.remote_symlink_target(source, &src_remote).await? {
            self.remote_mkdir_p(destination, &posix_parent(&dest_remote)).await?;
            self.run_remote(destination, &format!("ln -sfn {} {}", quote(&target), quote(&dest_remote)))
                .await?;
            return Ok(());
        }
        if self.remote_is_dir(source, &src_remote).await? {
            self.remote_mkdir_p(destination, &dest_remote).await?;
            return Ok(());
        }
        let scratch_dir = scratch_dir_path();
        tokio::fs::create_dir_all(&scratch_dir).await?;
        let result = async {
            let file_name = path.as_str().rsplit('/').next().unwrap_or("file");
            let scratch_file = scratch_dir.join(file_name);
            self.pull(source, &src_remote, &scratch_file).await?;
            self.remote_mkdir_p(destination, &posix_parent(&dest_remote)).await?;
            self.push(destination, &scratch_file, &dest_remote).await
        }
        .await;
        let _ = tokio::fs::remove_dir_all(&scratch_dir).await;
        result
    }

    // ---- delete / mkdir --------------------------------------------

    async fn delete(&self, path: &RelativePath, destination: &Endpoint) -> Result<(), ExecutionError> {
        if destination.is_local() {
            let target = local_join(&destination.root_path, path.as_str());
            match tokio::fs::symlink_metadata(&target).await {
                Ok(meta) if meta.is_dir() && !meta.file_type().is_symlink() => {
                    tokio::fs::remove_dir_all(&target).await?
                }
                Ok(_) => tokio::fs::remove_file(&target).await?,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(ExecutionError::Io(e)),
            }
        } else {
            let remote_target = remote_join(&destination.root_path, path.as_str());
            let result = self.run_remote(destination, &format!("rm -rf {}", quote(&remote_target))).await?;
            if !result.success() {
                return Err(ExecutionError::Message(
                    if result.stderr.trim().is_empty() { "remote delete failed".to_string() } else { result.stderr },
                ));
            }
        }
        Ok(())
    }

    async fn mkdir(&self, path: &RelativePath, destination: &Endpoint) -> Result<(), ExecutionError> {
        if destination.is_local() {
            tokio::fs::create_dir_all(local_join(&destination.root_path, path.as_str())).await?;
        } else {
            let remote_target = remote_join(&destination.root_path, path.as_str());
            self.remote_mkdir_p(destination, &remote_target).await?;
        }
        Ok(())
    }

    // ---- merge -------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn merge(
        &self,
        path: &RelativePath,
        source: &Endpoint,
        destination: &Endpoint,
        merge_base: Option<&str>,
        fallback_policy: ConflictPolicy,
        fallback_prefer: Option<&str>,
        fallback_manual_behavior: Option<ManualBehavior>,
        metadata: &BTreeMap<String, String>,
    ) -> Result<(), ExecutionError> {
        let texts = async {
            let left = self.read_text(source, path.as_str()).await?;
            let right = self.read_text(destination, path.as_str()).await?;
            Ok::<_, ExecutionError>((left, right))
        }
        .await;
        let (left, right) = match texts {
            Ok(pair) => pair,
            Err(_) => {
                return self
                    .merge_fallback(path, source, destination, fallback_policy, fallback_prefer, fallback_manual_behavior, metadata)
                    .await
            }
        };
        if crate::merge::looks_binary(left.as_bytes()) || crate::merge::looks_binary(right.as_bytes()) {
            return self
                .merge_fallback(path, source, destination, fallback_policy, fallback_prefer, fallback_manual_behavior, metadata)
                .await;
        }
        // falls back to the degraded two-way merge (empty base) when the
        // prior state never captured this path's content.
        let base = merge_base.unwrap_or("");
        let result = crate::merge::three_way_merge(base, &left, &right);
        if !result.success {
            tracing::warn!(path = %path, "automatic merge failed, applying fallback policy");
            return self
                .merge_fallback(path, source, destination, fallback_policy, fallback_prefer, fallback_manual_behavior, metadata)
                .await;
        }
        let content = result.content.unwrap_or_default();
        self.write_text(source, path.as_str(), &content).await?;
        self.write_text(destination, path.as_str(), &content).await?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn merge_fallback(
        &self,
        path: &RelativePath,
        source: &Endpoint,
        destination: &Endpoint,
        fallback_policy: ConflictPolicy,
        fallback_prefer: Option<&str>,
        fallback_manual_behavior: Option<ManualBehavior>,
        metadata: &BTreeMap<String, String>,
    ) -> Result<(), ExecutionError> {
        let _ = fallback_manual_behavior;
        match fallback_policy {
            ConflictPolicy::Newest => {
                let source_mtime = self.mtime_of(source, path.as_str(), metadata, "source_mtime").await?;
                let dest_mtime = self.mtime_of(destination, path.as_str(), metadata, "destination_mtime").await?;
                let (from, to) = if dest_mtime > source_mtime { (destination, source) } else { (source, destination) };
                self.copy(path, from, to, path.as_str()).await
            }
            ConflictPolicy::Prefer => {
                let preferred = fallback_prefer.ok_or_else(|| {
                    ExecutionError::Message("merge fallback policy is 'prefer' but no endpoint was configured".to_string())
                })?;
                let (from, to) = if preferred == source.id { (source, destination) } else { (destination, source) };
                self.copy(path, from, to, path.as_str()).await
            }
            ConflictPolicy::Manual => Err(ExecutionError::ManualResolutionRequired { path: path.as_str().to_string() }),
        }
    }

    /// Best-effort capture of a path's current text content for use as a
    /// future merge base. Returns `None` for non-textual paths, unreadable
    /// paths, binary content, or content over [`MAX_MERGE_BASE_BYTES`] —
    /// any of which just means the next conflict on this path degrades to
    /// a two-way merge rather than failing the run.
    pub(crate) async fn capture_merge_base(&self, endpoint_id: &str, rel: &str) -> Option<String> {
        if !crate::merge::looks_textual(Path::new(rel)) {
            return None;
        }
        let endpoint = self.endpoint(endpoint_id).ok()?;
        let text = self.read_text(endpoint, rel).await.ok()?;
        if text.len() > MAX_MERGE_BASE_BYTES || crate::merge::looks_binary(text.as_bytes()) {
            return None;
        }
        Some(text)
    }

    async fn read_text(&self, endpoint: &Endpoint, rel: &str) -> Result<String, ExecutionError> {
        if endpoint.is_local() {
            let p = local_join(&endpoint.root_path, rel);
            Ok(tokio::fs::read_to_string(&p).await?)
        } else {
            let remote_path = remote_join(&endpoint.root_path, rel);
            let result = self.run_remote(endpoint, &format!("cat {}", quote(&remote_path))).await?;
            if !result.success() {
                return Err(ExecutionError::Message(result.stderr));
            }
            Ok(result.stdout)
        }
    }

    async fn write_text(&self, endpoint: &Endpoint, rel: &str, content: &str) -> Result<(), ExecutionError> {
        if endpoint.is_local() {
            let p = local_join(&endpoint.root_path, rel);
            if let Some(parent) = p.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&p, content).await?;
            Ok(())
        } else {
            let scratch = scratch_dir_path();
            tokio::fs::create_dir_all(&scratch).await?;
            let file_name = rel.rsplit('/').next().unwrap_or("file");
            let scratch_file = scratch.join(file_name);
            let write_result = tokio::fs::write(&scratch_file, content).await;
            let result = match write_result {
                Ok(()) => {
                    let remote_path = remote_join(&endpoint.root_path, rel);
                    self.remote_mkdir_p(endpoint, &posix_parent(&remote_path)).await?;
                    self.push(endpoint, &scratch_file, &remote_path).await
                }
                Err(e) => Err(ExecutionError::Io(e)),
            };
            let _ = tokio::fs::remove_dir_all(&scratch).await;
            result
        }
    }

    /// Resolves the mtime to compare for the `newest` merge fallback,
    /// preferring the mtime the planner captured in the operation's
    /// metadata (from the snapshot already taken this run) over issuing a
    /// fresh probe; a local path falls back to a direct stat when that
    /// metadata is absent, but a remote path without it is an error —
    /// there is no remote stat primitive in this transport's command set.
    async fn mtime_of(
        &self,
        endpoint: &Endpoint,
        rel: &str,
        metadata: &BTreeMap<String, String>,
        metadata_key: &str,
    ) -> Result<f64, ExecutionError> {
        if let Some(mtime) = metadata.get(metadata_key).and_then(|s| s.parse::<f64>().ok()) {
            return Ok(mtime);
        }
        if endpoint.is_local() {
            let meta = tokio::fs::metadata(local_join(&endpoint.root_path, rel)).await?;
            return Ok(mtime_secs(&meta));
        }
        Err(ExecutionError::Message(format!(
            "cannot resolve mtime for remote path {rel}: operation metadata did not carry {metadata_key}"
        )))
    }

    // ---- remote primitives --------------------------------------------

    async fn run_remote(&self, endpoint: &Endpoint, command: &str) -> Result<remote::shell::ShellResult, ExecutionError> {
        let shell_command = endpoint.shell_command.as_deref().unwrap_or(DEFAULT_SHELL_COMMAND);
        let host = endpoint
            .host
            .as_deref()
            .ok_or_else(|| ExecutionError::Message(format!("endpoint {} is missing a host", endpoint.id)))?;
        let result = remote::shell::run_framed(shell_command, self.extra_args, host, command).await?;
        if result.blocked() {
            return Err(ExecutionError::AuthenticationRequired);
        }
        Ok(result)
    }

    async fn remote_mkdir_p(&self, endpoint: &Endpoint, remote_path: &str) -> Result<(), ExecutionError> {
        let result = self.run_remote(endpoint, &format!("mkdir -p {}", quote(remote_path))).await?;
        if !result.success() {
            return Err(ExecutionError::Message(result.stderr));
        }
        Ok(())
    }

    async fn remote_symlink_target(&self, endpoint: &Endpoint, remote_path: &str) -> Result<Option<String>, ExecutionError> {
        let result = self.run_remote(endpoint, &format!("readlink {}", quote(remote_path))).await?;
        let target = result.stdout.trim();
        if result.success() && !target.is_empty() {
            Ok(Some(target.to_string()))
        } else {
            Ok(None)
        }
    }

    async fn remote_is_dir(&self, endpoint: &Endpoint, remote_path: &str) -> Result<bool, ExecutionError> {
        let result = self.run_remote(endpoint, &format!("test -d {}", quote(remote_path))).await?;
        Ok(result.success())
    }

    async fn push(&self, destination: &Endpoint, local_path: &Path, remote_path: &str) -> Result<(), ExecutionError> {
        let host = destination
            .host
            .as_deref()
            .ok_or_else(|| ExecutionError::Message(format!("endpoint {} is missing a host", destination.id)))?;
        remote::copy::push(DEFAULT_COPY_COMMAND, self.extra_args, host, local_path, remote_path)
            .await
            .map_err(|e| classify_copy_error(e))
    }

    async fn pull(&self, source: &Endpoint, remote_path: &str, local_path: &Path) -> Result<(), ExecutionError> {
        let host = source
            .host
            .as_deref()
            .ok_or_else(|| ExecutionError::Message(format!("endpoint {} is missing a host", source.id)))?;
        remote::copy::pull(DEFAULT_COPY_COMMAND, self.extra_args, host, remote_path, local_path)
            .await
            .map_err(|e| classify_copy_error(e))
    }
}

fn classify_copy_error(e: anyhow::Error) -> ExecutionError {
    if e.to_string().contains("authentication prompt detected") {
        ExecutionError::AuthenticationRequired
    } else {
        ExecutionError::Message(e.to_string())
    }
}

async fn replace_symlink(target: &Path, dst: &Path) -> Result<(), ExecutionError> {
    match tokio::fs::remove_file(dst).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(ExecutionError::Io(e)),
    }
    tokio::fs::symlink(target, dst).await?;
    Ok(())
}

fn local_join(root: &str, rel: &str) -> PathBuf {
    if rel == "." {
        PathBuf::from(root)
    } else {
        Path::new(root).join(rel)
    }
}

fn remote_join(root: &str, rel: &str) -> String {
    let root = root.trim_end_matches('/');
    if rel == "." {
        root.to_string()
    } else {
        format!("{root}/{rel}")
    }
}

fn posix_parent(path: &str) -> String {
    match path.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
        None => ".".to_string(),
    }
}

fn quote(s: &str) -> String {
    remote::shell::quote_command(&[s])
}

fn scratch_dir_path() -> PathBuf {
    std::env::temp_dir().join(format!("bisync-relay-{}", remote::marker::random_token()))
}

fn mtime_secs(metadata: &std::fs::Metadata) -> f64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
