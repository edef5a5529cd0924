//! Capability diffs and the authority diff derived from them.
//!
//! A capability diff is what a skill says it adds. The authority diff is
//! the normalized grant set the human ratifies: tools, egress targets and
//! write roots, each deduplicated and sorted. Host-only and host:port
//! egress entries are distinct grants and never collapse into each other.

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::{Map, Value};
use url::Url;

use crate::canonical::{canonical_json_string, sha256_text_hex, to_canonical_value};
use crate::error::EglError;

/// Recursively normalize a capability diff: strings are trimmed, arrays of
/// strings are sorted, object keys are sorted by the canonical encoder.
pub fn normalize_capability_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.trim().to_string()),
        Value::Array(items) => {
            let normalized: Vec<Value> = items.iter().map(normalize_capability_value).collect();
            if normalized.iter().all(Value::is_string) {
                let mut sorted = normalized;
                sorted.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
                Value::Array(sorted)
            } else {
                Value::Array(normalized)
            }
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), normalize_capability_value(v)))
                .collect::<Map<String, Value>>(),
        ),
        other => other.clone(),
    }
}

/// Canonical text and SHA-256 hex of a diff-like document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalDigest {
    pub canonical_json: String,
    pub sha256: String,
}

impl CanonicalDigest {
    fn of(value: &Value) -> Self {
        let canonical_json = canonical_json_string(value);
        let sha256 = sha256_text_hex(&canonical_json);
        Self {
            canonical_json,
            sha256,
        }
    }
}

pub fn capability_diff_digest(diff: &Value) -> CanonicalDigest {
    CanonicalDigest::of(&normalize_capability_value(diff))
}

/// `true` when some key holds a non-empty array, a non-blank string or a
/// non-empty object.
pub fn capability_diff_present(diff: &Value) -> bool {
    let Some(map) = diff.as_object() else {
        return false;
    };
    map.values().any(|v| match v {
        Value::Array(items) => !items.is_empty(),
        Value::String(s) => !s.trim().is_empty(),
        Value::Object(inner) => !inner.is_empty(),
        _ => false,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorityDiff {
    pub adds_tools: Vec<String>,
    pub adds_egress: Vec<String>,
    pub adds_write_roots: Vec<String>,
}

impl AuthorityDiff {
    pub fn derive(capability_diff: &Value) -> Self {
        let list = |key: &str| -> Vec<&Value> {
            capability_diff
                .get(key)
                .and_then(Value::as_array)
                .map(|items| items.iter().collect())
                .unwrap_or_default()
        };

        Self {
            adds_tools: unique_sorted(list("adds_tools").into_iter().map(trimmed_text)),
            adds_egress: unique_sorted(
                list("adds_egress")
                    .into_iter()
                    .map(|v| normalize_egress_entry(&trimmed_text(v))),
            ),
            adds_write_roots: unique_sorted(
                list("adds_filesystem_write_roots").into_iter().map(trimmed_text),
            ),
        }
    }

    pub fn digest(&self) -> Result<CanonicalDigest, EglError> {
        Ok(CanonicalDigest::of(&to_canonical_value(self)?))
    }
}

fn trimmed_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        other => other.to_string().trim().to_string(),
    }
}

fn unique_sorted(items: impl Iterator<Item = String>) -> Vec<String> {
    items
        .filter(|s| !s.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Port written in a URL's authority, even when it equals the scheme
/// default (`Url::port` hides those).
pub(crate) fn explicit_url_port(url: &str) -> Option<u32> {
    let scheme_end = url.find("://").filter(|&idx| idx > 0)?;
    let rest = &url[scheme_end + 3..];
    let authority = rest
        .find(['/', '?', '#'])
        .map_or(rest, |end| &rest[..end])
        .trim();
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, hp)| hp).trim();
    if host_port.is_empty() {
        return None;
    }

    let port_part = if let Some(bracketed) = host_port.strip_prefix('[') {
        let close = bracketed.find(']')?;
        bracketed[close + 1..].strip_prefix(':')?.trim()
    } else {
        let (_, port) = host_port.rsplit_once(':')?;
        port.trim()
    };
    if all_digits(port_part) {
        port_part.parse().ok()
    } else {
        None
    }
}

/// Canonical form of one egress grant.
///
/// `https://Example.COM/x` is `example.com`, `https://Example.COM:443/` is
/// `example.com:443`, `Example.COM:0443` is `example.com:443`, and a bare
/// host is lowercased.
pub fn normalize_egress_entry(raw: &str) -> String {
    let s = raw.trim();
    if s.is_empty() {
        return String::new();
    }

    if (s.starts_with("http://") || s.starts_with("https://"))
        && let Ok(url) = Url::parse(s)
    {
        let host = url.host_str().unwrap_or("").to_lowercase();
        if host.is_empty() {
            return String::new();
        }
        return match explicit_url_port(s) {
            Some(port) => format!("{host}:{port}"),
            None => host,
        };
    }

    if let Some((host_part, port_part)) = s.rsplit_once(':')
        && !host_part.is_empty()
        && all_digits(port_part.trim())
        && let Ok(port) = port_part.trim().parse::<u64>()
    {
        let host = host_part.trim().to_lowercase();
        return if host.is_empty() {
            String::new()
        } else {
            format!("{host}:{port}")
        };
    }

    s.to_lowercase()
}
