//! Endpoint value type: one side of a sync.

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Local,
    Remote,
}

/// `{ id, kind, root_path, host?, shell_command?, pre_connect_command? }`
///
/// Invariant (enforced by [`Endpoint::validate`]): remote endpoints
/// require a non-empty `host`; local endpoints require a root that
/// exists, or can be created, as a directory.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub id: String,
    pub kind: EndpointKind,
    pub root_path: String,
    pub host: Option<String>,
    pub shell_command: Option<String>,
    pub pre_connect_command: Option<String>,
}

impl Endpoint {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.kind {
            EndpointKind::Remote => {
                if self.host.as_deref().unwrap_or("").is_empty() {
                    return Err(ConfigError::InvalidEndpoint {
                        id: self.id.clone(),
                        reason: "remote endpoint requires a non-empty host".to_string(),
                    });
                }
            }
            EndpointKind::Local => {
                if self.root_path.trim().is_empty() {
                    return Err(ConfigError::InvalidEndpoint {
                        id: self.id.clone(),
                        reason: "local endpoint requires a root path".to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn is_local(&self) -> bool {
        matches!(self.kind, EndpointKind::Local)
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.kind, EndpointKind::Remote)
    }

    /// Ensure a local endpoint's root exists as a directory, creating it
    /// if absent. No-op (and unchecked) for remote endpoints — that is
    /// the remote shell's problem, surfaced as a `SnapshotError` later.
    pub async fn ensure_local_root(&self) -> Result<(), ConfigError> {
        if self.is_remote() {
            return Ok(());
        }
        let path = std::path::Path::new(&self.root_path);
        match tokio::fs::metadata(path).await {
            Ok(md) if md.is_dir() => Ok(()),
            Ok(_) => Err(ConfigError::InvalidEndpoint {
                id: self.id.clone(),
                reason: format!("{:?} exists and is not a directory", path),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tokio::fs::create_dir_all(path).await.map_err(|e| {
                    ConfigError::InvalidEndpoint {
                        id: self.id.clone(),
                        reason: format!("failed to create root {:?}: {}", path, e),
                    }
                })
            }
            Err(e) => Err(ConfigError::InvalidEndpoint {
                id: self.id.clone(),
                reason: format!("failed to stat root {:?}: {}", path, e),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_without_host_is_invalid() {
        let ep = Endpoint {
            id: "b".into(),
            kind: EndpointKind::Remote,
            root_path: "/data".into(),
            host: None,
            shell_command: None,
            pre_connect_command: None,
        };
        assert!(ep.validate().is_err());
    }

    #[tokio::test]
    async fn local_root_created_if_absent() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("nested").join("root");
        let ep = Endpoint {
            id: "a".into(),
            kind: EndpointKind::Local,
            root_path: root.to_string_lossy().into_owned(),
            host: None,
            shell_command: None,
            pre_connect_command: None,
        };
        ep.ensure_local_root().await.unwrap();
        assert!(root.is_dir());
    }
}
