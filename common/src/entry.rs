//! File/symlink metadata records: the value type snapshots and state are
//! built from.

use serde::{Deserialize, Serialize};

use crate::path::RelativePath;

/// One node observed in a snapshot of an endpoint's tree.
///
/// Entries are immutable value objects. Size is `0` for directories and
/// symlinks. Symlinks are always `is_dir = false` — they are atomic link
/// records, never followed, never recursed into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: RelativePath,
    pub is_dir: bool,
    pub size: u64,
    /// floating-point epoch seconds
    pub mtime: f64,
    pub is_symlink: bool,
    pub link_target: Option<String>,
}

impl FileEntry {
    /// Two-way equality used by the planner: same `is_dir`, same `size`,
    /// same integer-truncated mtime. Link targets and sub-second mtime
    /// precision are deliberately excluded.
    pub fn content_equal(&self, other: &FileEntry) -> bool {
        self.is_dir == other.is_dir
            && self.size == other.size
            && (self.mtime.floor() as i64) == (other.mtime.floor() as i64)
    }
}

/// The state-store analogue of a [`FileEntry`]: the "what was last agreed"
/// record for one (endpoint, path) pair. Field-for-field identical; kept
/// as a distinct type because the state store may round-trip a `hash`
/// field the core itself never populates (spec's external interface
/// reserves it).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub path: RelativePath,
    pub is_dir: bool,
    pub size: u64,
    pub mtime: f64,
    pub is_symlink: bool,
    pub link_target: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
    /// Text content captured the last time this path was recorded, used as
    /// the merge base the next time both sides change it. `None` for
    /// directories, symlinks, binary files, content over the capture size
    /// cap, or anything written before this field existed.
    #[serde(default)]
    pub merge_base: Option<String>,
}

impl StoredEntry {
    pub fn from_entry(entry: &FileEntry) -> Self {
        StoredEntry {
            path: entry.path.clone(),
            is_dir: entry.is_dir,
            size: entry.size,
            mtime: entry.mtime,
            is_symlink: entry.is_symlink,
            link_target: entry.link_target.clone(),
            hash: None,
            merge_base: None,
        }
    }

    /// `changed_since_last`: true when there is no stored record (callers
    /// handle the `None` case), `is_dir` flips, `size` differs, or the
    /// integer-truncated mtime differs.
    pub fn changed(&self, current: &FileEntry) -> bool {
        self.is_dir != current.is_dir
            || self.size != current.size
            || (self.mtime.floor() as i64) != (current.mtime.floor() as i64)
    }
}
