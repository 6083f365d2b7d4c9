//! Operation and conflict value types the planner produces and the
//! executor consumes.
//!
//! Modeled as tagged variants with payloads rather than a class
//! hierarchy, per the spec's explicit re-architecture note: the executor
//! dispatches on the variant.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::path::RelativePath;
use crate::profile::{ConflictPolicy, ManualBehavior};

/// A single filesystem mutation the executor applies against one or two
/// endpoints. `metadata` is a free-form string map for bookkeeping that
/// doesn't warrant its own field (e.g. the classification reason, used
/// only for logging).
#[derive(Debug, Clone)]
pub enum Operation {
    Copy {
        path: RelativePath,
        source: String,
        destination: String,
        /// lets a copy land at an alternate path, used by the manual
        /// `copy_both` conflict policy: `<path>.conflict-<endpoint_id>-<ts>`
        target_suffix: Option<String>,
        metadata: BTreeMap<String, String>,
    },
    Delete {
        path: RelativePath,
        destination: String,
    },
    Mkdir {
        path: RelativePath,
        destination: String,
    },
    Merge {
        path: RelativePath,
        source: String,
        destination: String,
        fallback_policy: ConflictPolicy,
        fallback_prefer: Option<String>,
        fallback_manual_behavior: Option<ManualBehavior>,
        /// `source_mtime`/`destination_mtime` (stringified epoch seconds),
        /// the snapshot mtimes captured at plan time — lets the executor's
        /// `newest` fallback pick a side without an extra remote stat.
        metadata: BTreeMap<String, String>,
        /// Content of the prior stored record, if one was captured, used
        /// as the three-way merge base. `None` falls back to the degraded
        /// two-way merge (empty base).
        merge_base: Option<String>,
    },
}

impl Operation {
    pub fn path(&self) -> &RelativePath {
        match self {
            Operation::Copy { path, .. }
            | Operation::Delete { path, .. }
            | Operation::Mkdir { path, .. }
            | Operation::Merge { path, .. } => path,
        }
    }
}

/// `{ path, reason, endpoints:(id,id), timestamp, resolution?, metadata }`
///
/// Accumulated across runs (append-only within one state file) to
/// support the `conflicts` external command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub path: RelativePath,
    pub reason: String,
    pub endpoints: (String, String),
    /// integer wall-clock second, taken once per path
    pub timestamp: i64,
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl ConflictRecord {
    /// `manual_copy_both` conflicts are "soft": logged, but the run is not
    /// failed by them. Every other reason is "blocking".
    pub fn is_blocking(&self) -> bool {
        self.reason != "manual_copy_both"
    }
}
