//! Pattern-based path filtering, used by the snapshotter to prune
//! ignored files and directories before they ever reach the planner.
//!
//! Matching is Unix shell-style globbing against the relative path as a
//! whole, so `node_modules` matches only a top-level `node_modules`
//! while `*.tmp` matches any such file at any depth.
//!
//! # Pattern syntax
//!
//! - `*` matches any sequence of characters, including `/` — a pattern
//!   with no wildcard therefore only matches a literal full-path (and so
//!   only a top-level name), while a wildcarded pattern can span
//!   directories
//! - `?` matches a single character
//! - `[...]` character classes

use anyhow::{anyhow, Context};
use std::path::Path;

/// A compiled ignore pattern. Matching is always against the full
/// relative path, never a path component in isolation — see the module
/// docs for why that gives `node_modules` and `*.tmp` different reach.
#[derive(Debug, Clone)]
pub struct IgnorePattern {
    pub original: String,
    matcher: globset::GlobMatcher,
}

impl IgnorePattern {
    pub fn parse(pattern: &str) -> Result<Self, anyhow::Error> {
        if pattern.is_empty() {
            return Err(anyhow!("empty ignore pattern is not allowed"));
        }
        let glob = globset::Glob::new(pattern)
            .with_context(|| format!("invalid glob pattern: {}", pattern))?;
        Ok(Self {
            original: pattern.to_string(),
            matcher: glob.compile_matcher(),
        })
    }

    pub fn matches(&self, relative_path: &Path) -> bool {
        self.matcher.is_match(relative_path)
    }
}

/// A set of ignore patterns applied during a snapshot walk.
#[derive(Debug, Clone, Default)]
pub struct IgnoreSet {
    patterns: Vec<IgnorePattern>,
}

impl IgnoreSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_patterns(patterns: &[String]) -> Result<Self, anyhow::Error> {
        let mut set = Self::new();
        for p in patterns {
            set.add(p)?;
        }
        Ok(set)
    }

    pub fn add(&mut self, pattern: &str) -> Result<(), anyhow::Error> {
        self.patterns.push(IgnorePattern::parse(pattern)?);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Returns the first matching pattern's original text, if any.
    pub fn matching(&self, relative_path: &Path) -> Option<&str> {
        self.patterns
            .iter()
            .find(|p| p.matches(relative_path))
            .map(|p| p.original.as_str())
    }

    pub fn is_ignored(&self, relative_path: &Path) -> bool {
        self.matching(relative_path).is_some()
    }
}
