//! TOML profile parsing (spec.md §4.J step 1), mapping the on-disk
//! `[profile]`/`[endpoints.*]`/`[conflict]`/`[ignore]`/`[schedule]`/`[ssh]`
//! document shape onto [`common::profile::Profile`].
//!
//! Unlike the rest of the crate, this module is allowed to know about
//! concrete syntax — everything downstream of [`load_from_str`] only
//! ever sees the validated value type.

use std::collections::BTreeMap;
use std::path::Path;

use common::endpoint::{Endpoint, EndpointKind};
use common::error::ConfigError;
use common::profile::{ConflictConfig, ConflictPolicy, IgnoreConfig, ManualBehavior, Profile, ScheduleConfig, SshConfig};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct RawDocument {
    profile: RawProfileBlock,
    endpoints: BTreeMap<String, RawEndpointBlock>,
    conflict: RawConflictBlock,
    #[serde(default)]
    ignore: Option<RawIgnoreBlock>,
    #[serde(default)]
    schedule: Option<RawScheduleBlock>,
    #[serde(default)]
    ssh: Option<RawSshBlock>,
}

#[derive(Debug, Deserialize)]
struct RawProfileBlock {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default = "default_topology")]
    topology: String,
}

fn default_topology() -> String {
    "pair".to_string()
}

#[derive(Debug, Deserialize)]
struct RawEndpointBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    ssh_command: Option<String>,
    #[serde(default)]
    pre_connect_command: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawConflictBlock {
    policy: String,
    #[serde(default)]
    prefer: Option<String>,
    #[serde(default)]
    manual_behavior: Option<String>,
    #[serde(default = "default_true")]
    merge_text_files: bool,
    #[serde(default)]
    merge_fallback: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RawIgnoreBlock {
    #[serde(default)]
    patterns: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawScheduleBlock {
    #[serde(default)]
    enabled: bool,
    #[serde(default = "default_interval")]
    interval_seconds: u64,
    #[serde(default = "default_true")]
    run_on_start: bool,
}

fn default_interval() -> u64 {
    3600
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Default)]
struct RawSshBlock {
    #[serde(default)]
    pre_connect_command: Option<String>,
    #[serde(default)]
    ssh_command: Option<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default = "default_true")]
    use_agent: bool,
}

/// Load and validate a profile file from an explicit path.
pub async fn load(path: &Path) -> Result<Profile, ConfigError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConfigError::InvalidField(format!("unable to read profile file {path:?}: {e}")))?;
    load_from_str(&raw)
}

/// Parse and validate a profile document from TOML text already read
/// into memory.
pub fn load_from_str(raw: &str) -> Result<Profile, ConfigError> {
    let doc: RawDocument =
        toml::from_str(raw).map_err(|e| ConfigError::InvalidField(format!("failed to parse profile: {e}")))?;

    if doc.profile.topology != "pair" {
        return Err(ConfigError::InvalidField(format!(
            "unsupported topology {:?}, only \"pair\" is supported",
            doc.profile.topology
        )));
    }
    if doc.endpoints.len() != 2 {
        return Err(ConfigError::WrongEndpointCount { found: doc.endpoints.len() });
    }

    let mut endpoints = doc
        .endpoints
        .into_iter()
        .map(|(name, block)| build_endpoint(name, block))
        .collect::<Result<Vec<_>, ConfigError>>()?;
    let endpoint_b = endpoints.pop().expect("checked len == 2 above");
    let endpoint_a = endpoints.pop().expect("checked len == 2 above");

    let conflict = build_conflict(doc.conflict)?;
    let ignore = IgnoreConfig { patterns: doc.ignore.unwrap_or_default().patterns };
    let schedule = doc
        .schedule
        .map(|s| ScheduleConfig { enabled: s.enabled, interval_seconds: s.interval_seconds, run_on_start: s.run_on_start })
        .unwrap_or_default();
    let ssh = build_ssh(doc.ssh);

    let profile = Profile {
        name: doc.profile.name,
        description: doc.profile.description,
        endpoint_a,
        endpoint_b,
        conflict,
        ignore,
        schedule,
        ssh,
    };
    profile.validate()?;
    Ok(profile)
}

fn build_endpoint(id: String, block: RawEndpointBlock) -> Result<Endpoint, ConfigError> {
    let kind = match block.kind.as_str() {
        "local" => EndpointKind::Local,
        "ssh" => EndpointKind::Remote,
        other => {
            return Err(ConfigError::InvalidEndpoint {
                id,
                reason: format!("unsupported endpoint type {other:?}, expected \"local\" or \"ssh\""),
            })
        }
    };
    let root_path = block.path.ok_or_else(|| ConfigError::InvalidEndpoint {
        id: id.clone(),
        reason: "endpoint must define 'path'".to_string(),
    })?;
    if kind == EndpointKind::Remote && block.host.is_none() {
        return Err(ConfigError::InvalidEndpoint { id, reason: "ssh endpoint must define 'host'".to_string() });
    }
    Ok(Endpoint {
        id,
        kind,
        root_path,
        host: block.host,
        shell_command: block.ssh_command,
        pre_connect_command: block.pre_connect_command,
    })
}

fn build_conflict(block: RawConflictBlock) -> Result<ConflictConfig, ConfigError> {
    let policy = match block.policy.as_str() {
        "newest" => ConflictPolicy::Newest,
        "prefer" => ConflictPolicy::Prefer,
        "manual" => ConflictPolicy::Manual,
        other => return Err(ConfigError::InvalidField(format!("unsupported conflict policy {other:?}"))),
    };
    let manual_behavior = match block.manual_behavior.as_deref() {
        Some("copy_both") => Some(ManualBehavior::CopyBoth),
        Some(other) => return Err(ConfigError::InvalidField(format!("unsupported manual_behavior {other:?}"))),
        None => None,
    };
    if policy == ConflictPolicy::Manual && manual_behavior.is_none() {
        return Err(ConfigError::MissingManualBehavior);
    }
    let merge_fallback = match block.merge_fallback.as_deref() {
        Some("newest") | None => ConflictPolicy::Newest,
        Some("prefer") => ConflictPolicy::Prefer,
        Some("manual") => ConflictPolicy::Manual,
        Some(other) => return Err(ConfigError::InvalidField(format!("unsupported merge_fallback {other:?}"))),
    };
    Ok(ConflictConfig {
        policy,
        prefer_endpoint: block.prefer,
        manual_behavior,
        merge_text_files: block.merge_text_files,
        merge_fallback,
    })
}

fn build_ssh(block: Option<RawSshBlock>) -> SshConfig {
    match block {
        Some(b) => SshConfig {
            pre_connect_command: b.pre_connect_command,
            shell_command: b.ssh_command,
            env: b.env,
            use_agent: b.use_agent,
        },
        None => SshConfig { use_agent: true, ..SshConfig::default() },
    }
}
