//! Typed error taxonomy for the synchronizer core.
//!
//! Library code returns these `thiserror` types; coordinator/CLI glue
//! wraps them in `anyhow::Result` with `.context()`, the same split the
//! rest of this workspace uses.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("absolute paths are not allowed: {0}")]
    Absolute(String),
    #[error("path escapes root: {0}")]
    EscapesRoot(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("profile must define exactly two endpoints, found {found}")]
    WrongEndpointCount { found: usize },
    #[error("endpoint {id}: {reason}")]
    InvalidEndpoint { id: String, reason: String },
    #[error("conflict.prefer {endpoint:?} does not match a configured endpoint")]
    UnknownPreferEndpoint { endpoint: String },
    #[error("conflict.manual_behavior is required when conflict.policy = manual")]
    MissingManualBehavior,
    #[error("invalid profile field: {0}")]
    InvalidField(String),
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to walk local root {root:?}: {source}")]
    LocalWalk {
        root: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("remote snapshot failed: {0}")]
    Remote(String),
    #[error("remote find output could not be parsed: {0}")]
    RemoteParse(String),
}

#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("failed to read state file {path:?}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write state file {path:?}: {source}")]
    Write {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("state file {path:?} is not valid JSON: {source}")]
    Parse {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unknown state schema version {found} (supported: {supported:?})")]
    UnknownVersion { found: u32, supported: Vec<u32> },
}

/// Transport-level failure. `AuthFailure`/`PromptDetected` are carried as
/// distinguished flags on a successful [`TransportResult`](crate's
/// transport crate) rather than this variant; this variant is reserved
/// for the child process itself failing to launch.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to launch shell command {command:?}: {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("authentication prompt detected; refusing to block")]
    PromptDetected,
    #[error("authentication failed")]
    AuthFailure,
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("{0}")]
    Message(String),
    #[error("authentication prompt detected; refusing to block")]
    AuthenticationRequired,
    #[error("manual resolution required for {path}")]
    ManualResolutionRequired { path: String },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ExecutionError {
    /// Spec §4.J step 9: an apply failure whose message mentions
    /// "Permission denied" is re-surfaced as an authentication error.
    pub fn reclassify_permission_denied(self) -> Self {
        let looks_like_permission_denied = match &self {
            ExecutionError::Message(m) => m.contains("Permission denied"),
            ExecutionError::Io(e) => e.to_string().contains("Permission denied"),
            _ => false,
        };
        if looks_like_permission_denied {
            ExecutionError::AuthenticationRequired
        } else {
            self
        }
    }
}
