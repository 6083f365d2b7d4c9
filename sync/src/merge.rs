//! Textual classification and three-way merge (spec.md §4.G).
//!
//! The merge itself is a small diff3 over line ranges: diff `base` against
//! each side, and if the touched base-line ranges are pairwise disjoint,
//! splice each side's changes into the untouched base skeleton. Any
//! overlap is a conflict, rendered with standard three-part markers.

use std::ops::Range;

/// Extensions treated as textual without needing to sniff content.
/// `.txt` is deliberately excluded — spec.md §4.G treats it as opaque.
const TEXT_EXTENSIONS: &[&str] = &[
    "py", "rs", "js", "ts", "jsx", "tsx", "go", "java", "c", "h", "cpp", "hpp", "cc", "rb",
    "sh", "bash", "zsh", "toml", "yaml", "yml", "json", "xml", "html", "htm", "css", "scss",
    "md", "markdown", "rst", "ini", "cfg", "conf", "csv", "tsv", "sql", "proto", "gradle",
    "makefile", "dockerfile", "gitignore", "env",
];

/// `looks_textual(path)`: curated extension set, falling back to
/// extension-derived MIME type for anything not on the curated list.
pub fn looks_textual(path: &std::path::Path) -> bool {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    let Some(ext) = ext else { return false };
    if ext == "txt" {
        return false;
    }
    if TEXT_EXTENSIONS.contains(&ext.as_str()) {
        return true;
    }
    let guess = mime_guess::from_path(path).first();
    match guess {
        Some(mime) => {
            mime.type_() == mime_guess::mime::TEXT
                || matches!(
                    mime.essence_str(),
                    "application/json" | "application/xml" | "application/javascript" | "application/toml"
                )
        }
        None => false,
    }
}

/// `looks_binary(bytes)`: a null-byte scan of the first 8 KiB.
pub fn looks_binary(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(8192)];
    window.contains(&0)
}

#[derive(Debug, Clone)]
pub struct MergeResult {
    pub success: bool,
    pub content: Option<String>,
    pub conflicts: Vec<String>,
}

struct Hunk {
    old_range: Range<usize>,
    new_lines: Vec<String>,
}

fn hunks_of(base_lines: &[&str], other_lines: &[&str]) -> Vec<Hunk> {
    let diff = similar::capture_diff_slices(similar::Algorithm::Myers, base_lines, other_lines);
    diff.iter()
        .filter(|op| !matches!(op, similar::DiffOp::Equal { .. }))
        .map(|op| {
            let old_range = op.old_range();
            let new_range = op.new_range();
            Hunk {
                old_range,
                new_lines: other_lines[new_range].iter().map(|s| s.to_string()).collect(),
            }
        })
        .collect()
}

fn ranges_overlap(a: &Range<usize>, b: &Range<usize>) -> bool {
    // pure insertions show up as empty ranges anchored at a base index;
    // two insertions anchored at the same point are still a conflict even
    // though zero-width ranges never satisfy the general overlap test.
    if a.is_empty() && b.is_empty() {
        return a.start == b.start;
    }
    a.start < b.end && b.start < a.end
}

/// Splits `text` into lines, preserving the trailing line ending on each
/// element so rejoining with `concat` reproduces the original content.
fn split_keepends(text: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        match rest.find('\n') {
            Some(idx) => {
                let (line, tail) = rest.split_at(idx + 1);
                lines.push(line);
                rest = tail;
            }
            None => {
                lines.push(rest);
                rest = "";
            }
        }
    }
    lines
}

const CONFLICT_BEGIN: &str = "<<<<<<< LOCAL";
const CONFLICT_MID: &str = "=======";
const CONFLICT_END: &str = ">>>>>>> REMOTE";

fn conflict_marked(left: &str, right: &str) -> String {
    format!("{CONFLICT_BEGIN}\n{left}{CONFLICT_MID}\n{right}{CONFLICT_END}\n")
}

/// Three-way merge of `base`, `left`, and `right` text content. When no
/// prior base is available, pass `""` — the degraded two-way merge
/// described in spec.md §4.G, which treats any overlapping change as a
/// conflict rather than silently concatenating.
pub fn three_way_merge(base: &str, left: &str, right: &str) -> MergeResult {
    let base_lines = split_keepends(base);
    let left_lines = split_keepends(left);
    let right_lines = split_keepends(right);

    let left_hunks = hunks_of(&base_lines, &left_lines);
    let right_hunks = hunks_of(&base_lines, &right_lines);

    if left_hunks.is_empty() {
        return MergeResult {
            success: true,
            content: Some(right.to_string()),
            conflicts: Vec::new(),
        };
    }
    if right_hunks.is_empty() {
        return MergeResult {
            success: true,
            content: Some(left.to_string()),
            conflicts: Vec::new(),
        };
    }

    let conflicting = left_hunks
        .iter()
        .any(|l| right_hunks.iter().any(|r| ranges_overlap(&l.old_range, &r.old_range)));
    if conflicting {
        return MergeResult {
            success: false,
            content: Some(conflict_marked(left, right)),
            conflicts: vec!["overlapping changes in base line range".to_string()],
        };
    }

    // disjoint: walk the base, splicing in whichever side touched each range
    let mut merged = String::new();
    let mut cursor = 0usize;
    let mut combined: Vec<(&Hunk, bool)> = left_hunks
        .iter()
        .map(|h| (h, true))
        .chain(right_hunks.iter().map(|h| (h, false)))
        .collect();
    combined.sort_by_key(|(h, _)| h.old_range.start);
    for (hunk, _is_left) in combined {
        if hunk.old_range.start > cursor {
            merged.push_str(&base_lines[cursor..hunk.old_range.start].concat());
        }
        merged.push_str(&hunk.new_lines.concat());
        cursor = hunk.old_range.end;
    }
    if cursor < base_lines.len() {
        merged.push_str(&base_lines[cursor..].concat());
    }
    MergeResult {
        success: true,
        content: Some(merged),
        conflicts: Vec::new(),
    }
}
