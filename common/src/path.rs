//! Relative-path normalization.
//!
//! This is the only place relative-path hygiene is enforced. Every other
//! component must feed user-supplied or remotely-observed path strings
//! through [`normalize`] before storing or comparing them.

use std::fmt;

use crate::error::PathError;

/// A normalized, forward-slash, root-relative path.
///
/// Construction always goes through [`normalize`]; there is no public
/// constructor that skips validation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct RelativePath(String);

impl RelativePath {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The root of an endpoint's tree, represented as `"."`.
    pub fn root() -> Self {
        RelativePath(".".to_string())
    }

    pub fn is_root(&self) -> bool {
        self.0 == "."
    }

    /// Append a suffix (used for `<path>.conflict-<endpoint>-<ts>` naming).
    pub fn with_suffix(&self, suffix: &str) -> Self {
        RelativePath(format!("{}{}", self.0, suffix))
    }
}

impl fmt::Display for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RelativePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for RelativePath {
    type Err = PathError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        normalize(s)
    }
}

/// Normalize a raw path string into a [`RelativePath`].
///
/// Rules: backslashes become forward slashes; a drive-letter prefix
/// (`C:...`) is rejected as an absolute path; leading `/` is rejected;
/// `.` segments are dropped; `..` segments are rejected outright; an
/// empty result normalizes to `"."` (the endpoint root).
pub fn normalize(raw: &str) -> Result<RelativePath, PathError> {
    let slashed = raw.replace('\\', "/");
    if is_drive_letter_prefixed(&slashed) {
        return Err(PathError::Absolute(raw.to_string()));
    }
    if slashed.starts_with('/') {
        return Err(PathError::Absolute(raw.to_string()));
    }
    let mut parts = Vec::new();
    for part in slashed.split('/') {
        if part.is_empty() || part == "." {
            continue;
        }
        if part == ".." {
            return Err(PathError::EscapesRoot(raw.to_string()));
        }
        parts.push(part);
    }
    if parts.is_empty() {
        return Ok(RelativePath::root());
    }
    Ok(RelativePath(parts.join("/")))
}

fn is_drive_letter_prefixed(s: &str) -> bool {
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), Some(':')) => c.is_ascii_alphabetic(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_leading_dot_slash() {
        assert_eq!(normalize("./a/b").unwrap().as_str(), "a/b");
    }

    #[test]
    fn converts_backslashes() {
        assert_eq!(normalize("a\\b\\c").unwrap().as_str(), "a/b/c");
    }

    #[test]
    fn empty_normalizes_to_root() {
        assert!(normalize("").unwrap().is_root());
        assert!(normalize(".").unwrap().is_root());
        assert!(normalize("./").unwrap().is_root());
    }

    #[test]
    fn rejects_absolute() {
        assert!(normalize("/etc/passwd").is_err());
    }

    #[test]
    fn rejects_drive_letter() {
        assert!(normalize("C:/Windows").is_err());
    }

    #[test]
    fn rejects_dot_dot() {
        assert!(normalize("a/../b").is_err());
        assert!(normalize("..").is_err());
    }

    #[test]
    fn collapses_internal_dot() {
        assert_eq!(normalize("a/./b").unwrap().as_str(), "a/b");
    }

    proptest::proptest! {
        #[test]
        fn normalization_is_idempotent(s in "[a-zA-Z0-9_./]{0,40}") {
            if let Ok(first) = normalize(&s) {
                let second = normalize(first.as_str()).unwrap();
                proptest::prop_assert_eq!(first, second);
            }
        }
    }
}
