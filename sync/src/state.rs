//! Per-profile persistent state: the last-agreed snapshot pair plus the
//! accumulated conflict history (spec.md §4.F, §6).
//!
//! One JSON document per profile, named `<profile>.json` under the
//! configured state directory with `/` replaced by `_`. Unknown
//! top-level keys are preserved verbatim across a load/save round trip
//! (spec.md §9 "Dynamic dicts in state") rather than silently dropped.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use common::entry::StoredEntry;
use common::error::StateStoreError;
use common::operation::ConflictRecord;
use serde::{Deserialize, Serialize};

const CURRENT_VERSION: u32 = 1;
const SUPPORTED_VERSIONS: &[u32] = &[1];

/// `endpoint_id -> path -> stored_entry`.
pub type EndpointState = BTreeMap<String, BTreeMap<String, StoredEntry>>;

/// The on-disk document shape. `extra` carries any top-level JSON key
/// this reader doesn't recognize, so that round-tripping an
/// as-yet-unknown future field doesn't drop it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileState {
    pub version: u32,
    pub profile: String,
    pub endpoints: EndpointState,
    pub conflicts: Vec<ConflictRecord>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ProfileState {
    pub fn new(profile: &str) -> Self {
        ProfileState {
            version: CURRENT_VERSION,
            profile: profile.to_string(),
            endpoints: BTreeMap::new(),
            conflicts: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    pub fn last_entry(&self, endpoint_id: &str, path: &str) -> Option<&StoredEntry> {
        self.endpoints.get(endpoint_id).and_then(|paths| paths.get(path))
    }

    pub fn record_entry(&mut self, endpoint_id: &str, entry: StoredEntry) {
        self.endpoints
            .entry(endpoint_id.to_string())
            .or_default()
            .insert(entry.path.as_str().to_string(), entry);
    }

    pub fn record_conflict(&mut self, record: ConflictRecord) {
        self.conflicts.push(record);
    }

    pub fn list_conflicts(&self) -> &[ConflictRecord] {
        &self.conflicts
    }
}

fn state_file_path(state_dir: &Path, profile_name: &str) -> PathBuf {
    let safe_name = profile_name.replace('/', "_");
    state_dir.join(format!("{safe_name}.json"))
}

/// Load a profile's state. A missing file is not an error: returns a
/// fresh, empty state for the profile.
pub async fn load(state_dir: &Path, profile_name: &str) -> Result<ProfileState, StateStoreError> {
    let path = state_file_path(state_dir, profile_name);
    let contents = match tokio::fs::read_to_string(&path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(ProfileState::new(profile_name));
        }
        Err(source) => return Err(StateStoreError::Read { path, source }),
    };
    let state: ProfileState = serde_json::from_str(&contents)
        .map_err(|source| StateStoreError::Parse { path: path.clone(), source })?;
    if !SUPPORTED_VERSIONS.contains(&state.version) {
        return Err(StateStoreError::UnknownVersion {
            found: state.version,
            supported: SUPPORTED_VERSIONS.to_vec(),
        });
    }
    Ok(state)
}

/// Serialize with sorted keys (guaranteed by `BTreeMap`/`serde_json`'s
/// default map ordering) and a trailing newline, written in one shot.
pub async fn save(state_dir: &Path, state: &ProfileState) -> Result<(), StateStoreError> {
    let path = state_file_path(state_dir, &state.profile);
    let mut json = serde_json::to_string_pretty(state)
        .map_err(|source| StateStoreError::Parse { path: path.clone(), source })?;
    json.push('\n');
    tokio::fs::write(&path, json)
        .await
        .map_err(|source| StateStoreError::Write { path, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn entry(path: &str, size: u64, mtime: f64) -> StoredEntry {
        StoredEntry {
            path: common::path::RelativePath::from_str(path).unwrap(),
            is_dir: false,
            size,
            mtime,
            is_symlink: false,
            link_target: None,
            hash: None,
            merge_base: None,
        }
    }

    #[tokio::test]
    async fn missing_file_yields_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let state = load(dir.path(), "myprofile").await.unwrap();
        assert_eq!(state.version, CURRENT_VERSION);
        assert!(state.endpoints.is_empty());
    }

    #[tokio::test]
    async fn round_trips_through_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = ProfileState::new("myprofile");
        state.record_entry("a", entry("hello.txt", 5, 100.0));
        save(dir.path(), &state).await.unwrap();
        let loaded = load(dir.path(), "myprofile").await.unwrap();
        assert_eq!(loaded.last_entry("a", "hello.txt").unwrap().size, 5);
    }

    #[tokio::test]
    async fn saved_file_ends_with_trailing_newline() {
        let dir = tempfile::tempdir().unwrap();
        let state = ProfileState::new("myprofile");
        save(dir.path(), &state).await.unwrap();
        let raw = tokio::fs::read_to_string(state_file_path(dir.path(), "myprofile"))
            .await
            .unwrap();
        assert!(raw.ends_with('\n'));
    }

    #[tokio::test]
    async fn unknown_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = state_file_path(dir.path(), "myprofile");
        tokio::fs::write(&path, r#"{"version":99,"profile":"myprofile","endpoints":{},"conflicts":[]}"#)
            .await
            .unwrap();
        let result = load(dir.path(), "myprofile").await;
        assert!(matches!(result, Err(StateStoreError::UnknownVersion { found: 99, .. })));
    }

    #[tokio::test]
    async fn unrecognized_top_level_field_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = state_file_path(dir.path(), "myprofile");
        tokio::fs::write(
            &path,
            r#"{"version":1,"profile":"myprofile","endpoints":{},"conflicts":[],"future_field":"kept"}"#,
        )
        .await
        .unwrap();
        let state = load(dir.path(), "myprofile").await.unwrap();
        assert_eq!(state.extra.get("future_field").unwrap(), "kept");
        save(dir.path(), &state).await.unwrap();
        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(raw.contains("future_field"));
    }

    #[test]
    fn profile_name_with_slash_is_escaped_in_file_name() {
        let path = state_file_path(Path::new("/state"), "team/laptop");
        assert_eq!(path, Path::new("/state/team_laptop.json"));
    }
}
