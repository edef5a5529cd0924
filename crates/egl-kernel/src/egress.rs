//! Egress gate: canonical targets, network zones and allow-list matching.
//!
//! Matching is exact on the canonical target, so `example.com` and
//! `example.com:443` are different grants. A request that names an
//! allow-listed host with a different port shape is reported as drift
//! rather than a plain denial.

use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::capability::explicit_url_port;
use crate::codes::EgressCode;

pub const EGRESS_CHECK_SCHEMA_ID: &str = "EGL.EGRESS_CHECK";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EgressZone {
    Localhost,
    Lan,
    PublicInternet,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct ParsedTarget {
    protocol: Option<String>,
    host: Option<String>,
    port: Option<u32>,
}

impl ParsedTarget {
    /// `host` or `host:port` when the port was written explicitly.
    fn canonical(&self) -> Option<String> {
        let host = self.host.as_deref().filter(|h| !h.is_empty())?;
        Some(match self.port {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        })
    }
}

fn has_url_scheme(raw: &str) -> bool {
    let Some((scheme, _)) = raw.split_once("://") else {
        return false;
    };
    let mut chars = scheme.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '.' | '-'))
}

fn port_digits(s: &str) -> Option<u32> {
    if (1..=5).contains(&s.len()) && s.bytes().all(|b| b.is_ascii_digit()) {
        s.parse().ok()
    } else {
        None
    }
}

/// `host` or `host:port` without whitespace or extra colons.
fn split_host_port(raw: &str) -> Option<(String, Option<u32>)> {
    let (host, port) = match raw.split_once(':') {
        Some((host, port)) => (host, Some(port_digits(port)?)),
        None => (raw, None),
    };
    if host.is_empty() || host.chars().any(char::is_whitespace) {
        return None;
    }
    Some((host.to_lowercase(), port))
}

fn parse_target(input: &str) -> ParsedTarget {
    let raw = input.trim();
    if raw.is_empty() {
        return ParsedTarget::default();
    }

    if has_url_scheme(raw) {
        let Ok(url) = Url::parse(raw) else {
            return ParsedTarget::default();
        };
        return ParsedTarget {
            protocol: Some(url.scheme().to_uppercase()),
            host: url.host_str().map(|h| h.trim().to_lowercase()),
            port: explicit_url_port(raw).filter(|p| *p <= 99_999),
        };
    }

    match split_host_port(raw) {
        Some((host, port)) => ParsedTarget {
            protocol: None,
            host: Some(host),
            port,
        },
        None => ParsedTarget::default(),
    }
}

fn is_private_ipv4(host: &str) -> bool {
    let parts: Vec<&str> = host.split('.').collect();
    if parts.len() != 4 {
        return false;
    }
    let Ok(octets) = parts
        .iter()
        .map(|p| p.parse::<u8>())
        .collect::<Result<Vec<u8>, _>>()
    else {
        return false;
    };
    matches!(
        (octets[0], octets[1]),
        (10, _) | (192, 168) | (172, 16..=31) | (169, 254)
    )
}

pub fn zone_for_host(host: Option<&str>) -> EgressZone {
    let Some(raw) = host.filter(|h| !h.is_empty()) else {
        return EgressZone::Unknown;
    };
    let h = raw.trim().to_lowercase();
    let bare = h.trim_start_matches('[').trim_end_matches(']');
    if matches!(bare, "localhost" | "127.0.0.1" | "::1") {
        EgressZone::Localhost
    } else if is_private_ipv4(bare)
        || bare.starts_with("fc")
        || bare.starts_with("fd")
        || bare.starts_with("fe80:")
    {
        EgressZone::Lan
    } else {
        EgressZone::PublicInternet
    }
}

/// Canonicalize and sort a permit allow-list. Entries that do not parse
/// as a target are dropped.
pub fn canonicalize_allowlist(entries: &[Value]) -> Vec<String> {
    let mut out: Vec<String> = entries
        .iter()
        .filter_map(|entry| {
            let text = match entry {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            parse_target(&text).canonical()
        })
        .collect();
    out.sort();
    out
}

/// Permit egress scope, read leniently: any flag that is not literally
/// `true` is off.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EgressScope {
    pub allow: bool,
    pub allow_http: bool,
    pub allow_localhost: bool,
    pub allow_lan: bool,
    pub allowlist: Vec<Value>,
}

impl EgressScope {
    pub fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        let flag = |key: &str| map.get(key).and_then(Value::as_bool) == Some(true);
        Some(Self {
            allow: flag("allow"),
            allow_http: flag("allow_http"),
            allow_localhost: flag("allow_localhost"),
            allow_lan: flag("allow_lan"),
            allowlist: map
                .get("allowlist")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EgressVerdict {
    pub target_input: String,
    pub canonical_target: Option<String>,
    pub protocol: Option<String>,
    pub zone: EgressZone,
    pub allowlist: Vec<String>,
    pub reason_code: Option<EgressCode>,
}

impl EgressVerdict {
    pub fn is_allowed(&self) -> bool {
        self.reason_code.is_none()
    }

    pub fn status(&self) -> &'static str {
        if self.is_allowed() { "ok" } else { "refused" }
    }
}

/// Evaluate one egress target. Rules apply in a fixed order and the first
/// failure wins: scope, localhost, LAN, protocol, drift, allow-list.
pub fn evaluate_egress(target: &str, protocol: Option<&str>, scope: Option<&EgressScope>) -> EgressVerdict {
    let parsed = parse_target(target);
    let protocol = protocol
        .map(str::to_string)
        .or_else(|| parsed.protocol.clone())
        .map(|p| p.to_uppercase())
        .filter(|p| !p.is_empty());
    let canonical_target = parsed.canonical();
    let zone = zone_for_host(parsed.host.as_deref());

    let mut verdict = EgressVerdict {
        target_input: target.trim().to_string(),
        canonical_target,
        protocol,
        zone,
        allowlist: Vec::new(),
        reason_code: None,
    };

    let Some(scope) = scope.filter(|s| s.allow) else {
        verdict.reason_code = Some(EgressCode::EgressScopeViolation);
        return verdict;
    };
    verdict.allowlist = canonicalize_allowlist(&scope.allowlist);

    verdict.reason_code = if zone == EgressZone::Localhost && !scope.allow_localhost {
        Some(EgressCode::LocalhostDenied)
    } else if zone == EgressZone::Lan && !scope.allow_lan {
        Some(EgressCode::LanDenied)
    } else if verdict.protocol.as_deref() == Some("HTTP") && !scope.allow_http {
        Some(EgressCode::InsecureProtocol)
    } else {
        match verdict.canonical_target.as_deref() {
            Some(t) if verdict.allowlist.iter().any(|a| a == t) => None,
            requested => {
                if requested.is_some_and(|t| is_port_drift(t, &verdict.allowlist)) {
                    Some(EgressCode::EgressDrift)
                } else {
                    Some(EgressCode::EgressDenied)
                }
            }
        }
    };

    if let Some(code) = verdict.reason_code {
        tracing::debug!(
            egress_target = %verdict.target_input,
            code = code.as_str(),
            "egress refused"
        );
    }
    verdict
}

fn split_canonical(target: &str) -> (String, Option<u32>) {
    let s = target.trim().to_lowercase();
    if let Some((host, port)) = s.split_once(':')
        && !host.is_empty()
        && !host.chars().any(char::is_whitespace)
        && let Some(port) = port_digits(port)
    {
        return (host.to_string(), Some(port));
    }
    (s, None)
}

/// Same host granted, but with a different port shape or value.
fn is_port_drift(requested: &str, allowlist: &[String]) -> bool {
    let (host, port) = split_canonical(requested);
    if host.is_empty() {
        return false;
    }
    allowlist.iter().any(|entry| {
        let (grant_host, grant_port) = split_canonical(entry);
        grant_host == host && grant_port != port
    })
}
