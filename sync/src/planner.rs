//! Classifying every path across two snapshots and the prior state into
//! an operation or a conflict (spec.md §4.H).
//!
//! The algorithm is deliberately simple: form the union of every path
//! either snapshot or the state has ever seen, then classify each in
//! sorted order. Determinism (spec.md §8 "Planner output equality")
//! falls out of iterating a `BTreeSet` rather than a hash-based one.

use std::collections::{BTreeMap, BTreeSet};

use common::entry::{FileEntry, StoredEntry};
use common::operation::{ConflictRecord, Operation};
use common::path::RelativePath;
use common::profile::{ConflictConfig, ConflictPolicy, ManualBehavior};

use crate::snapshot::Snapshot;
use crate::state::ProfileState;

pub struct PlanInput<'a> {
    pub endpoint_a_id: &'a str,
    pub endpoint_b_id: &'a str,
    pub snapshot_a: &'a Snapshot,
    pub snapshot_b: &'a Snapshot,
    pub state: &'a ProfileState,
    pub conflict: &'a ConflictConfig,
    /// wall-clock integer second, used for `copy_both` conflict-file
    /// suffixes and the matching conflict record; taken once per plan
    /// call so every path in one run shares the same timestamp.
    pub now: i64,
}

#[derive(Debug, Default)]
pub struct Plan {
    pub operations: Vec<Operation>,
    pub conflicts: Vec<ConflictRecord>,
}

fn changed_since_last(current: &FileEntry, stored: Option<&StoredEntry>) -> bool {
    match stored {
        None => true,
        Some(s) => s.changed(current),
    }
}

fn copy_both_suffix(path: &str, endpoint_id: &str, now: i64) -> String {
    format!("{path}.conflict-{endpoint_id}-{now}")
}

fn one_sided_copy(path: &RelativePath, source: &str, destination: &str, reason: &str) -> Operation {
    let mut metadata = BTreeMap::new();
    metadata.insert("reason".to_string(), reason.to_string());
    Operation::Copy {
        path: path.clone(),
        source: source.to_string(),
        destination: destination.to_string(),
        target_suffix: None,
        metadata,
    }
}

#[allow(clippy::too_many_arguments)]
fn resolve_conflict(
    path: &RelativePath,
    a_id: &str,
    b_id: &str,
    entry_a: &FileEntry,
    entry_b: &FileEntry,
    stored_a: Option<&StoredEntry>,
    stored_b: Option<&StoredEntry>,
    conflict: &ConflictConfig,
    now: i64,
    plan: &mut Plan,
) {
    let both_files = !entry_a.is_dir && !entry_b.is_dir;
    let both_tracked = stored_a.is_some() && stored_b.is_some();
    if conflict.merge_text_files && both_files && both_tracked && crate::merge::looks_textual(std::path::Path::new(path.as_str())) {
        let mut metadata = BTreeMap::new();
        metadata.insert("source_mtime".to_string(), entry_a.mtime.to_string());
        metadata.insert("destination_mtime".to_string(), entry_b.mtime.to_string());
        let merge_base = stored_a
            .and_then(|s| s.merge_base.clone())
            .or_else(|| stored_b.and_then(|s| s.merge_base.clone()));
        plan.operations.push(Operation::Merge {
            path: path.clone(),
            source: a_id.to_string(),
            destination: b_id.to_string(),
            fallback_policy: conflict.merge_fallback,
            fallback_prefer: conflict.prefer_endpoint.clone(),
            fallback_manual_behavior: conflict.manual_behavior,
            metadata,
            merge_base,
        });
        return;
    }
    match conflict.policy {
        ConflictPolicy::Newest => {
            let (source, destination) = if entry_b.mtime > entry_a.mtime {
                (b_id, a_id)
            } else {
                (a_id, b_id)
            };
            plan.operations.push(one_sided_copy(path, source, destination, "newest_wins"));
        }
        ConflictPolicy::Prefer => {
            if let Some(preferred) = conflict.prefer_endpoint.as_deref() {
                let (source, destination) = if preferred == a_id { (a_id, b_id) } else { (b_id, a_id) };
                plan.operations.push(one_sided_copy(path, source, destination, "prefer_endpoint"));
            }
        }
        ConflictPolicy::Manual => {
            if conflict.manual_behavior == Some(ManualBehavior::CopyBoth) {
                let suffix_for_b = copy_both_suffix(path.as_str(), b_id, now);
                let suffix_for_a = copy_both_suffix(path.as_str(), a_id, now);
                plan.operations.push(Operation::Copy {
                    path: path.clone(),
                    source: a_id.to_string(),
                    destination: b_id.to_string(),
                    target_suffix: Some(suffix_for_b),
                    metadata: BTreeMap::new(),
                });
                plan.operations.push(Operation::Copy {
                    path: path.clone(),
                    source: b_id.to_string(),
                    destination: a_id.to_string(),
                    target_suffix: Some(suffix_for_a),
                    metadata: BTreeMap::new(),
                });
                plan.conflicts.push(ConflictRecord {
                    path: path.clone(),
                    reason: "manual_copy_both".to_string(),
                    endpoints: (a_id.to_string(), b_id.to_string()),
                    timestamp: now,
                    resolution: None,
                    metadata: BTreeMap::new(),
                });
            } else {
                plan.conflicts.push(ConflictRecord {
                    path: path.clone(),
                    reason: "both_modified".to_string(),
                    endpoints: (a_id.to_string(), b_id.to_string()),
                    timestamp: now,
                    resolution: None,
                    metadata: BTreeMap::new(),
                });
            }
        }
    }
}

pub fn plan(input: &PlanInput) -> Plan {
    let mut plan = Plan::default();
    let mut universe: BTreeSet<&str> = BTreeSet::new();
    universe.extend(input.snapshot_a.keys().map(String::as_str));
    universe.extend(input.snapshot_b.keys().map(String::as_str));
    if let Some(paths) = input.state.endpoints.get(input.endpoint_a_id) {
        universe.extend(paths.keys().map(String::as_str));
    }
    if let Some(paths) = input.state.endpoints.get(input.endpoint_b_id) {
        universe.extend(paths.keys().map(String::as_str));
    }

    for path_str in universe {
        let entry_a = input.snapshot_a.get(path_str);
        let entry_b = input.snapshot_b.get(path_str);
        let stored_a = input.state.last_entry(input.endpoint_a_id, path_str);
        let stored_b = input.state.last_entry(input.endpoint_b_id, path_str);
        let Ok(path) = common::path::normalize(path_str) else { continue };

        match (entry_a, entry_b) {
            (Some(a), None) => {
                if changed_since_last(a, stored_a) || stored_b.is_none() {
                    plan.operations.push(one_sided_copy(&path, input.endpoint_a_id, input.endpoint_b_id, "new_or_modified_on_a"));
                } else {
                    plan.operations.push(Operation::Delete {
                        path: path.clone(),
                        destination: input.endpoint_a_id.to_string(),
                    });
                }
            }
            (None, Some(b)) => {
                if changed_since_last(b, stored_b) || stored_a.is_none() {
                    plan.operations.push(one_sided_copy(&path, input.endpoint_b_id, input.endpoint_a_id, "new_or_modified_on_b"));
                } else {
                    plan.operations.push(Operation::Delete {
                        path: path.clone(),
                        destination: input.endpoint_b_id.to_string(),
                    });
                }
            }
            (Some(a), Some(b)) => {
                if a.content_equal(b) {
                    continue;
                }
                let a_changed = changed_since_last(a, stored_a);
                let b_changed = changed_since_last(b, stored_b);
                if a_changed && !b_changed {
                    plan.operations.push(one_sided_copy(&path, input.endpoint_a_id, input.endpoint_b_id, "modified_on_a"));
                } else if b_changed && !a_changed {
                    plan.operations.push(one_sided_copy(&path, input.endpoint_b_id, input.endpoint_a_id, "modified_on_b"));
                } else {
                    resolve_conflict(
                        &path,
                        input.endpoint_a_id,
                        input.endpoint_b_id,
                        a,
                        b,
                        stored_a,
                        stored_b,
                        input.conflict,
                        input.now,
                        &mut plan,
                    );
                }
            }
            (None, None) => {
                if stored_a.is_some() {
                    plan.operations.push(Operation::Delete {
                        path: path.clone(),
                        destination: input.endpoint_b_id.to_string(),
                    });
                } else if stored_b.is_some() {
                    plan.operations.push(Operation::Delete {
                        path: path.clone(),
                        destination: input.endpoint_a_id.to_string(),
                    });
                }
            }
        }
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn file(size: u64, mtime: f64) -> FileEntry {
        FileEntry {
            path: RelativePath::from_str("f.txt").unwrap(),
            is_dir: false,
            size,
            mtime,
            is_symlink: false,
            link_target: None,
        }
    }

    fn stored(size: u64, mtime: f64) -> StoredEntry {
        StoredEntry {
            path: RelativePath::from_str("f.txt").unwrap(),
            is_dir: false,
            size,
            mtime,
            is_symlink: false,
            link_target: None,
            hash: None,
            merge_base: None,
        }
    }

    fn default_conflict() -> ConflictConfig {
        ConflictConfig {
            policy: ConflictPolicy::Manual,
            prefer_endpoint: None,
            manual_behavior: Some(ManualBehavior::CopyBoth),
            merge_text_files: false,
            merge_fallback: ConflictPolicy::Newest,
        }
    }

    #[test]
    fn new_file_on_a_copies_to_b() {
        let mut snap_a = Snapshot::new();
        snap_a.insert("f.txt".to_string(), file(5, 100.0));
        let snap_b = Snapshot::new();
        let state = ProfileState::new("p");
        let conflict = default_conflict();
        let result = plan(&PlanInput {
            endpoint_a_id: "a",
            endpoint_b_id: "b",
            snapshot_a: &snap_a,
            snapshot_b: &snap_b,
            state: &state,
            conflict: &conflict,
            now: 1700000000,
        });
        assert_eq!(result.operations.len(), 1);
        assert!(matches!(&result.operations[0], Operation::Copy { source, destination, .. } if source == "a" && destination == "b"));
    }

    #[test]
    fn absent_on_both_with_prior_a_record_deletes_on_b() {
        let snap_a = Snapshot::new();
        let snap_b = Snapshot::new();
        let mut state = ProfileState::new("p");
        state.record_entry("a", stored(5, 100.0));
        let conflict = default_conflict();
        let result = plan(&PlanInput {
            endpoint_a_id: "a",
            endpoint_b_id: "b",
            snapshot_a: &snap_a,
            snapshot_b: &snap_b,
            state: &state,
            conflict: &conflict,
            now: 1700000000,
        });
        assert_eq!(result.operations.len(), 1);
        assert!(matches!(&result.operations[0], Operation::Delete { destination, .. } if destination == "b"));
    }

    #[test]
    fn identical_entries_are_a_no_op() {
        let mut snap_a = Snapshot::new();
        snap_a.insert("f.txt".to_string(), file(5, 100.0));
        let mut snap_b = Snapshot::new();
        snap_b.insert("f.txt".to_string(), file(5, 100.4));
        let state = ProfileState::new("p");
        let conflict = default_conflict();
        let result = plan(&PlanInput {
            endpoint_a_id: "a",
            endpoint_b_id: "b",
            snapshot_a: &snap_a,
            snapshot_b: &snap_b,
            state: &state,
            conflict: &conflict,
            now: 1700000000,
        });
        assert!(result.operations.is_empty());
        assert!(result.conflicts.is_empty());
    }

    #[test]
    fn both_changed_with_newest_policy_picks_larger_mtime() {
        let mut snap_a = Snapshot::new();
        snap_a.insert("f.txt".to_string(), file(1, 100.0));
        let mut snap_b = Snapshot::new();
        snap_b.insert("f.txt".to_string(), file(2, 200.0));
        let mut state = ProfileState::new("p");
        state.record_entry("a", stored(0, 1.0));
        state.record_entry("b", stored(0, 1.0));
        let mut conflict = default_conflict();
        conflict.policy = ConflictPolicy::Newest;
        let result = plan(&PlanInput {
            endpoint_a_id: "a",
            endpoint_b_id: "b",
            snapshot_a: &snap_a,
            snapshot_b: &snap_b,
            state: &state,
            conflict: &conflict,
            now: 1700000000,
        });
        assert_eq!(result.operations.len(), 1);
        assert!(matches!(&result.operations[0], Operation::Copy { source, destination, .. } if source == "b" && destination == "a"));
        assert!(result.conflicts.is_empty());
    }

    #[test]
    fn both_changed_with_manual_copy_both_emits_two_copies_and_soft_conflict() {
        let mut snap_a = Snapshot::new();
        snap_a.insert("f.txt".to_string(), file(1, 100.0));
        let mut snap_b = Snapshot::new();
        snap_b.insert("f.txt".to_string(), file(2, 200.0));
        let mut state = ProfileState::new("p");
        state.record_entry("a", stored(0, 1.0));
        state.record_entry("b", stored(0, 1.0));
        let conflict = default_conflict();
        let result = plan(&PlanInput {
            endpoint_a_id: "a",
            endpoint_b_id: "b",
            snapshot_a: &snap_a,
            snapshot_b: &snap_b,
            state: &state,
            conflict: &conflict,
            now: 1700000000,
        });
        assert_eq!(result.operations.len(), 2);
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].reason, "manual_copy_both");
        assert!(!result.conflicts[0].is_blocking());
    }

    #[test]
    fn both_changed_with_manual_no_copy_both_is_blocking() {
        let mut snap_a = Snapshot::new();
        snap_a.insert("f.txt".to_string(), file(1, 100.0));
        let mut snap_b = Snapshot::new();
        snap_b.insert("f.txt".to_string(), file(2, 200.0));
        let mut state = ProfileState::new("p");
        state.record_entry("a", stored(0, 1.0));
        state.record_entry("b", stored(0, 1.0));
        let mut conflict = default_conflict();
        conflict.manual_behavior = None;
        let result = plan(&PlanInput {
            endpoint_a_id: "a",
            endpoint_b_id: "b",
            snapshot_a: &snap_a,
            snapshot_b: &snap_b,
            state: &state,
            conflict: &conflict,
            now: 1700000000,
        });
        assert!(result.operations.is_empty());
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].reason, "both_modified");
        assert!(result.conflicts[0].is_blocking());
    }

    #[test]
    fn textual_files_both_tracked_and_both_changed_emit_merge() {
        let mut snap_a = Snapshot::new();
        snap_a.insert("f.py".to_string(), FileEntry {
            path: RelativePath::from_str("f.py").unwrap(),
            is_dir: false,
            size: 10,
            mtime: 100.0,
            is_symlink: false,
            link_target: None,
        });
        let mut snap_b = Snapshot::new();
        snap_b.insert("f.py".to_string(), FileEntry {
            path: RelativePath::from_str("f.py").unwrap(),
            is_dir: false,
            size: 20,
            mtime: 200.0,
            is_symlink: false,
            link_target: None,
        });
        let mut state = ProfileState::new("p");
        state.record_entry("a", StoredEntry { path: RelativePath::from_str("f.py").unwrap(), is_dir: false, size: 0, mtime: 1.0, is_symlink: false, link_target: None, hash: None, merge_base: None });
        state.record_entry("b", StoredEntry { path: RelativePath::from_str("f.py").unwrap(), is_dir: false, size: 0, mtime: 1.0, is_symlink: false, link_target: None, hash: None, merge_base: None });
        let mut conflict = default_conflict();
        conflict.merge_text_files = true;
        let result = plan(&PlanInput {
            endpoint_a_id: "a",
            endpoint_b_id: "b",
            snapshot_a: &snap_a,
            snapshot_b: &snap_b,
            state: &state,
            conflict: &conflict,
            now: 1700000000,
        });
        assert_eq!(result.operations.len(), 1);
        assert!(matches!(&result.operations[0], Operation::Merge { .. }));
    }

    #[test]
    fn merge_operation_carries_fallback_mtimes_and_prior_merge_base() {
        let mut snap_a = Snapshot::new();
        snap_a.insert("f.py".to_string(), FileEntry {
            path: RelativePath::from_str("f.py").unwrap(),
            is_dir: false,
            size: 10,
            mtime: 150.0,
            is_symlink: false,
            link_target: None,
        });
        let mut snap_b = Snapshot::new();
        snap_b.insert("f.py".to_string(), FileEntry {
            path: RelativePath::from_str("f.py").unwrap(),
            is_dir: false,
            size: 20,
            mtime: 250.0,
            is_symlink: false,
            link_target: None,
        });
        let mut state = ProfileState::new("p");
        let mut stored_a = StoredEntry { path: RelativePath::from_str("f.py").unwrap(), is_dir: false, size: 0, mtime: 1.0, is_symlink: false, link_target: None, hash: None, merge_base: Some("1\n2\n3\n".to_string()) };
        let stored_b = StoredEntry { path: RelativePath::from_str("f.py").unwrap(), is_dir: false, size: 0, mtime: 1.0, is_symlink: false, link_target: None, hash: None, merge_base: None };
        state.record_entry("a", stored_a.clone());
        state.record_entry("b", stored_b);
        let mut conflict = default_conflict();
        conflict.merge_text_files = true;
        let result = plan(&PlanInput {
            endpoint_a_id: "a",
            endpoint_b_id: "b",
            snapshot_a: &snap_a,
            snapshot_b: &snap_b,
            state: &state,
            conflict: &conflict,
            now: 1700000000,
        });
        let Operation::Merge { metadata, merge_base, .. } = &result.operations[0] else {
            panic!("expected a Merge operation");
        };
        assert_eq!(metadata.get("source_mtime").unwrap(), "150");
        assert_eq!(metadata.get("destination_mtime").unwrap(), "250");
        assert_eq!(merge_base.as_deref(), Some("1\n2\n3\n"));

        // with no merge_base recorded on a, b's is used instead
        stored_a.merge_base = None;
        let mut state2 = ProfileState::new("p");
        state2.record_entry("a", stored_a);
        state2.record_entry("b", StoredEntry { path: RelativePath::from_str("f.py").unwrap(), is_dir: false, size: 0, mtime: 1.0, is_symlink: false, link_target: None, hash: None, merge_base: Some("x\n".to_string()) });
        let result2 = plan(&PlanInput {
            endpoint_a_id: "a",
            endpoint_b_id: "b",
            snapshot_a: &snap_a,
            snapshot_b: &snap_b,
            state: &state2,
            conflict: &conflict,
            now: 1700000000,
        });
        let Operation::Merge { merge_base, .. } = &result2.operations[0] else {
            panic!("expected a Merge operation");
        };
        assert_eq!(merge_base.as_deref(), Some("x\n"));
    }

    #[test]
    fn plan_is_deterministic_across_identical_inputs() {
        let mut snap_a = Snapshot::new();
        snap_a.insert("a.txt".to_string(), file(1, 1.0));
        snap_a.insert("z.txt".to_string(), file(2, 2.0));
        let snap_b = Snapshot::new();
        let state = ProfileState::new("p");
        let conflict = default_conflict();
        let input = PlanInput {
            endpoint_a_id: "a",
            endpoint_b_id: "b",
            snapshot_a: &snap_a,
            snapshot_b: &snap_b,
            state: &state,
            conflict: &conflict,
            now: 1700000000,
        };
        let first = plan(&input);
        let second = plan(&input);
        let first_paths: Vec<_> = first.operations.iter().map(|op| op.path().as_str().to_string()).collect();
        let second_paths: Vec<_> = second.operations.iter().map(|op| op.path().as_str().to_string()).collect();
        assert_eq!(first_paths, second_paths);
        assert_eq!(first_paths, vec!["a.txt".to_string(), "z.txt".to_string()]);
    }

    proptest::proptest! {
        /// spec.md §8 "Planner output equality": given identical inputs, the
        /// operation list is byte-for-byte identical, and its path ordering
        /// always matches the sorted union of every path either snapshot or
        /// the state has ever seen — regardless of insertion order.
        #[test]
        fn plan_output_is_deterministic_and_sorted_by_path(
            names in proptest::collection::vec("[a-z]{1,8}\\.txt", 1..12),
            sizes in proptest::collection::vec(1u64..500, 1..12),
        ) {
            let mut snap_a = Snapshot::new();
            for (name, size) in names.iter().zip(sizes.iter()) {
                snap_a.insert(name.clone(), file(*size, 100.0));
            }
            let snap_b = Snapshot::new();
            let state = ProfileState::new("p");
            let conflict = default_conflict();
            let input = PlanInput {
                endpoint_a_id: "a",
                endpoint_b_id: "b",
                snapshot_a: &snap_a,
                snapshot_b: &snap_b,
                state: &state,
                conflict: &conflict,
                now: 1700000000,
            };
            let first = plan(&input);
            let second = plan(&input);
            let first_paths: Vec<_> = first.operations.iter().map(|op| op.path().as_str().to_string()).collect();
            let second_paths: Vec<_> = second.operations.iter().map(|op| op.path().as_str().to_string()).collect();
            proptest::prop_assert_eq!(&first_paths, &second_paths);
            let mut expected: Vec<_> = snap_a.keys().cloned().collect();
            expected.sort();
            expected.dedup();
            proptest::prop_assert_eq!(first_paths, expected);
        }
    }
}
