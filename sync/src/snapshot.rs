//! Producing a `path -> entry` map for one endpoint (spec.md §4.E).
//!
//! Local endpoints are walked directly; remote endpoints are snapshotted
//! by running `find` through the marker-framed shell channel and parsing
//! its output. Both paths apply the same ignore-pattern filter and never
//! insert an entry for the root itself.

use std::collections::BTreeMap;
use std::path::Path;

use common::entry::FileEntry;
use common::error::SnapshotError;
use common::filter::IgnoreSet;
use common::path::RelativePath;

pub type Snapshot = BTreeMap<String, FileEntry>;

/// Walk a local directory tree, recording every node's path, kind, size,
/// mtime, and (for symlinks) link target, pruning anything the ignore
/// set matches. Symlinks are read but never followed, including broken
/// ones.
#[async_recursion::async_recursion]
async fn walk_local(root: &Path, relative: &Path, ignore: &IgnoreSet, out: &mut Snapshot) -> Result<(), SnapshotError> {
    let dir_path = root.join(relative);
    let mut entries = tokio::fs::read_dir(&dir_path)
        .await
        .map_err(|source| SnapshotError::LocalWalk { root: root.to_path_buf(), source })?;
    while let Some(dirent) = entries
        .next_entry()
        .await
        .map_err(|source| SnapshotError::LocalWalk { root: root.to_path_buf(), source })?
    {
        let child_relative = relative.join(dirent.file_name());
        let Some(child_relative_str) = child_relative.to_str() else {
            continue;
        };
        let Ok(normalized) = common::path::normalize(child_relative_str) else {
            continue;
        };
        if ignore.is_ignored(Path::new(normalized.as_str())) {
            continue;
        }
        let metadata = tokio::fs::symlink_metadata(root.join(&child_relative))
            .await
            .map_err(|source| SnapshotError::LocalWalk { root: root.to_path_buf(), source })?;
        if metadata.file_type().is_symlink() {
            let target = tokio::fs::read_link(root.join(&child_relative))
                .await
                .map_err(|source| SnapshotError::LocalWalk { root: root.to_path_buf(), source })?;
            out.insert(
                normalized.as_str().to_string(),
                FileEntry {
                    path: normalized,
                    is_dir: false,
                    size: 0,
                    mtime: mtime_secs(&metadata),
                    is_symlink: true,
                    link_target: Some(target.to_string_lossy().into_owned()),
                },
            );
        } else if metadata.is_dir() {
            out.insert(
                normalized.as_str().to_string(),
                FileEntry {
                    path: normalized,
                    is_dir: true,
                    size: 0,
                    mtime: mtime_secs(&metadata),
                    is_symlink: false,
                    link_target: None,
                },
            );
            walk_local(root, &child_relative, ignore, out).await?;
        } else {
            out.insert(
                normalized.as_str().to_string(),
                FileEntry {
                    path: normalized,
                    is_dir: false,
                    size: metadata.len(),
                    mtime: mtime_secs(&metadata),
                    is_symlink: false,
                    link_target: None,
                },
            );
        }
    }
    Ok(())
}

fn mtime_secs(metadata: &std::fs::Metadata) -> f64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

pub async fn snapshot_local(root: &Path, ignore: &IgnoreSet) -> Result<Snapshot, SnapshotError> {
    let mut out = Snapshot::new();
    walk_local(root, Path::new(""), ignore, &mut out).await?;
    Ok(out)
}

/// Parse one `find -printf "%P|%y|%s|%T@|%l\n"` line into an entry.
/// `%y`: `d` -> directory, `l` -> symlink, otherwise a regular file.
fn parse_find_line(line: &str) -> Option<(RelativePath, FileEntry)> {
    if line.is_empty() {
        return None;
    }
    let mut parts = line.splitn(5, '|');
    let raw_path = parts.next()?;
    let kind = parts.next()?;
    let size_str = parts.next()?;
    let mtime_str = parts.next()?;
    let link_target = parts.next().unwrap_or("");
    if raw_path.is_empty() {
        // the root itself, printed with an empty %P; never inserted.
        return None;
    }
    let normalized = common::path::normalize(raw_path).ok()?;
    let is_dir = kind == "d";
    let is_symlink = kind == "l";
    let size: u64 = if is_dir || is_symlink { 0 } else { size_str.parse().ok()? };
    let mtime: f64 = mtime_str.parse().ok()?;
    let entry = FileEntry {
        path: normalized.clone(),
        is_dir,
        size,
        mtime,
        is_symlink,
        link_target: if is_symlink { Some(link_target.to_string()) } else { None },
    };
    Some((normalized, entry))
}

/// Snapshot a remote endpoint by running `find` through the marker-framed
/// shell channel.
pub async fn snapshot_remote(
    shell_command: &str,
    extra_args: &[String],
    host: &str,
    root: &str,
    ignore: &IgnoreSet,
) -> Result<Snapshot, SnapshotError> {
    let find_command = remote::shell::quote_command(&[
        "find",
        root,
        "-printf",
        "%P|%y|%s|%T@|%l\\n",
    ]);
    let result = remote::shell::run_framed(shell_command, extra_args, host, &find_command)
        .await
        .map_err(|e| SnapshotError::Remote(e.to_string()))?;
    if result.blocked() {
        return Err(SnapshotError::Remote(
            "authentication prompt detected; refusing to block".to_string(),
        ));
    }
    if !result.success() {
        return Err(SnapshotError::Remote(result.stderr));
    }
    let mut out = Snapshot::new();
    for line in result.stdout.lines() {
        match parse_find_line(line) {
            Some((path, entry)) => {
                if ignore.is_ignored(Path::new(path.as_str())) {
                    continue;
                }
                out.insert(path.as_str().to_string(), entry);
            }
            None => continue,
        }
    }
    Ok(out)
}
