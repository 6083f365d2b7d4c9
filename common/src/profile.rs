//! The validated, in-memory profile value the coordinator consumes.
//!
//! Concrete syntax (TOML) is an external collaborator's concern —
//! `bisync-sync::profile_loader` builds one of these; the core never
//! parses configuration itself.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::endpoint::Endpoint;
use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    Newest,
    Prefer,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManualBehavior {
    CopyBoth,
}

/// `{ policy, prefer_endpoint, manual_behavior, merge_text_files, merge_fallback }`
#[derive(Debug, Clone)]
pub struct ConflictConfig {
    pub policy: ConflictPolicy,
    pub prefer_endpoint: Option<String>,
    pub manual_behavior: Option<ManualBehavior>,
    pub merge_text_files: bool,
    pub merge_fallback: ConflictPolicy,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        ConflictConfig {
            policy: ConflictPolicy::Manual,
            prefer_endpoint: None,
            manual_behavior: Some(ManualBehavior::CopyBoth),
            merge_text_files: true,
            merge_fallback: ConflictPolicy::Newest,
        }
    }
}

impl ConflictConfig {
    pub fn validate(&self, endpoint_ids: &[&str]) -> Result<(), ConfigError> {
        if self.policy == ConflictPolicy::Prefer {
            let preferred = self.prefer_endpoint.as_deref().unwrap_or("");
            if !endpoint_ids.contains(&preferred) {
                return Err(ConfigError::UnknownPreferEndpoint {
                    endpoint: preferred.to_string(),
                });
            }
        }
        if self.policy == ConflictPolicy::Manual && self.manual_behavior.is_none() {
            return Err(ConfigError::MissingManualBehavior);
        }
        Ok(())
    }
}

/// `ignore.patterns`: shell glob patterns applied during snapshotting.
#[derive(Debug, Clone, Default)]
pub struct IgnoreConfig {
    pub patterns: Vec<String>,
}

/// `{ enabled, interval_seconds, run_on_start }`
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
    pub run_on_start: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        ScheduleConfig {
            enabled: false,
            interval_seconds: 3600,
            run_on_start: true,
        }
    }
}

/// `{ pre_connect_command, shell_command, env, use_agent }`: transport
/// defaults, overridable per-endpoint.
#[derive(Debug, Clone, Default)]
pub struct SshConfig {
    pub pre_connect_command: Option<String>,
    pub shell_command: Option<String>,
    pub env: BTreeMap<String, String>,
    pub use_agent: bool,
}

/// The validated profile value: name, description, the two endpoints,
/// and the policy blocks spec.md §6 names.
#[derive(Debug, Clone)]
pub struct Profile {
    pub name: String,
    pub description: Option<String>,
    pub endpoint_a: Endpoint,
    pub endpoint_b: Endpoint,
    pub conflict: ConflictConfig,
    pub ignore: IgnoreConfig,
    pub schedule: ScheduleConfig,
    pub ssh: SshConfig,
}

impl Profile {
    pub fn endpoint_ids(&self) -> [&str; 2] {
        [self.endpoint_a.id.as_str(), self.endpoint_b.id.as_str()]
    }

    pub fn endpoint(&self, id: &str) -> Option<&Endpoint> {
        if self.endpoint_a.id == id {
            Some(&self.endpoint_a)
        } else if self.endpoint_b.id == id {
            Some(&self.endpoint_b)
        } else {
            None
        }
    }

    pub fn other_endpoint_id(&self, id: &str) -> Option<&str> {
        if self.endpoint_a.id == id {
            Some(self.endpoint_b.id.as_str())
        } else if self.endpoint_b.id == id {
            Some(self.endpoint_a.id.as_str())
        } else {
            None
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.endpoint_a.validate()?;
        self.endpoint_b.validate()?;
        if self.endpoint_a.id == self.endpoint_b.id {
            return Err(ConfigError::InvalidField(format!(
                "endpoint ids must be unique, both are {:?}",
                self.endpoint_a.id
            )));
        }
        let ids = self.endpoint_ids();
        self.conflict.validate(&ids)?;
        Ok(())
    }
}
