//! Whole-file diff previews.
//!
//! A write is described as one hunk that removes every line of the old
//! text and adds every line of the new. Size and line-count limits in
//! permits are measured against exactly this shape.

use serde::Serialize;

use crate::canonical::{SHA256_PREFIX, sha256_bytes_hex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiffStats {
    pub added_lines: u64,
    pub removed_lines: u64,
    /// Always null: a whole-file hunk has no notion of changed lines.
    pub changed_lines: Option<u64>,
    pub bytes_before: u64,
    pub bytes_after: u64,
    pub bytes_delta: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnifiedDiff {
    pub text: String,
    pub sha256: String,
    pub stats: DiffStats,
}

impl UnifiedDiff {
    pub fn byte_len(&self) -> u64 {
        self.text.len() as u64
    }
}

pub fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

pub fn unified_diff(rel_path: &str, before: &str, after: &str) -> UnifiedDiff {
    let before = normalize_newlines(before);
    let after = normalize_newlines(after);
    // A trailing newline contributes an empty last line on purpose.
    let before_lines: Vec<&str> = before.split('\n').collect();
    let after_lines: Vec<&str> = after.split('\n').collect();

    let mut out = Vec::with_capacity(before_lines.len() + after_lines.len() + 4);
    out.push(format!("--- a/{rel_path}"));
    out.push(format!("+++ b/{rel_path}"));
    out.push(format!(
        "@@ -1,{} +1,{} @@",
        before_lines.len(),
        after_lines.len()
    ));
    out.extend(before_lines.iter().map(|l| format!("-{l}")));
    out.extend(after_lines.iter().map(|l| format!("+{l}")));
    out.push(String::new());
    let text = out.join("\n");

    let bytes_before = before.len() as u64;
    let bytes_after = after.len() as u64;
    UnifiedDiff {
        sha256: format!("{SHA256_PREFIX}{}", sha256_bytes_hex(text.as_bytes())),
        stats: DiffStats {
            added_lines: after_lines.len() as u64,
            removed_lines: before_lines.len() as u64,
            changed_lines: None,
            bytes_before,
            bytes_after,
            bytes_delta: bytes_after as i64 - bytes_before as i64,
        },
        text,
    }
}
