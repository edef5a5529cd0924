//! Repo-relative path rules shared by permits, envelopes and executors.

use std::path::Path;

/// Drive-letter or UNC absolute path anywhere in the string.
pub fn has_abs_windows_path(s: &str) -> bool {
    if s.starts_with("\\\\") {
        return true;
    }
    let bytes = s.as_bytes();
    bytes
        .windows(3)
        .any(|w| w[0].is_ascii_alphabetic() && w[1] == b':' && w[2] == b'\\')
}

fn has_drive_prefix(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

pub fn to_posix(p: &str) -> String {
    p.replace('\\', "/")
}

/// Non-empty, not absolute, no NUL, no `.` or `..` segments.
pub fn is_repo_relative(p: &str) -> bool {
    if has_abs_windows_path(p) {
        return false;
    }
    let posix = to_posix(p);
    let s = posix.trim();
    if s.is_empty() || s.starts_with('/') || s.contains('\0') || has_drive_prefix(s) {
        return false;
    }
    !s.split('/')
        .filter(|seg| !seg.is_empty())
        .any(|seg| seg == "." || seg == "..")
}

/// `path` equals a root or sits beneath it.
pub fn path_within_roots<S: AsRef<str>>(path: &str, roots: &[S]) -> bool {
    let p = to_posix(path);
    roots.iter().any(|root| {
        let r = to_posix(root.as_ref());
        if p == r {
            return true;
        }
        if r.ends_with('/') {
            p.starts_with(&r)
        } else {
            p.strip_prefix(&r).is_some_and(|rest| rest.starts_with('/'))
        }
    })
}

/// Resolve `input` against `repo_root` without touching the filesystem and
/// return it relative to the root, POSIX-style. `None` when it escapes.
/// The root itself resolves to the empty string.
pub fn safe_rel_path(repo_root: &Path, input: &str) -> Option<String> {
    let root_posix = to_posix(&repo_root.to_string_lossy());
    let root = lexical_segments(&root_posix);
    let joined = if input.starts_with('/') {
        input.to_string()
    } else {
        format!("{root_posix}/{input}")
    };
    let target = lexical_segments(&joined);
    if target.len() < root.len() || target[..root.len()] != root[..] {
        return None;
    }
    Some(target[root.len()..].join("/"))
}

fn lexical_segments(p: &str) -> Vec<&str> {
    let mut out = Vec::new();
    for seg in p.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            s => out.push(s),
        }
    }
    out
}
