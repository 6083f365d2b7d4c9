//! mtime preservation for locally-applied copy operations.
//!
//! The planner and state store work in floating-point epoch seconds; this
//! module is the only place that talks to `nix`/`utimensat` to push a
//! stored or observed mtime back onto a file or symlink on disk.

use anyhow::{Context, Result};

/// Set a path's modification time without following a trailing symlink.
///
/// `mtime` is a floating-point epoch-second value, the same representation
/// used by [`crate::entry::FileEntry`]; fractional seconds are preserved.
pub async fn set_mtime(path: &std::path::Path, mtime: f64) -> Result<()> {
    let dst = path.to_owned();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let secs = mtime.floor() as i64;
        let nanos = ((mtime - mtime.floor()) * 1_000_000_000.0).round() as i64;
        let mtime_spec = nix::sys::time::TimeSpec::new(secs, nanos);
        // leave atime untouched: re-stat it and feed it back unchanged
        let current = nix::sys::stat::lstat(&dst)
            .with_context(|| format!("failed to stat {:?} before setting mtime", &dst))?;
        let atime_spec = nix::sys::time::TimeSpec::new(current.st_atime, current.st_atime_nsec);
        nix::sys::stat::utimensat(
            None,
            &dst,
            &atime_spec,
            &mtime_spec,
            nix::sys::stat::UtimensatFlags::NoFollowSymlink,
        )
        .with_context(|| format!("failed setting mtime for {:?}", &dst))?;
        Ok(())
    })
    .await
    .with_context(|| format!("mtime-preservation task for {:?} panicked", path))?
}
