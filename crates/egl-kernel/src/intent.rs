//! Intent documents: the requested actions plus binding metadata.
//!
//! An intent is hashed exactly as submitted, so the parsed view keeps the
//! source JSON alongside the typed actions. The typed view is what the
//! compiler and policy read; the raw value is what the hash covers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::canonical::sha3_512_tagged;
use crate::error::EglError;

pub const INTENT_SCHEMA_ID: &str = "EGL.INTENT";
pub const INTENT_VERSION: &str = "0.1.0";

/// Zone label for paths that resolved outside the repository.
pub const ZONE_UNKNOWN: &str = "UNKNOWN";
/// Path placeholder for inputs that resolved outside the repository.
pub const OUTSIDE_REPO: &str = "OUTSIDE_REPO";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAction {
    #[serde(default)]
    pub op: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    #[serde(default)]
    pub path: String,
}

impl FileAction {
    pub fn new(op: &str, zone: &str, path: &str) -> Self {
        Self {
            op: op.to_string(),
            zone: Some(zone.to_string()),
            path: path.to_string(),
        }
    }

    /// Missing, null and `UNKNOWN` zones are all unknown.
    pub fn zone_is_unknown(&self) -> bool {
        matches!(self.zone.as_deref(), None | Some(ZONE_UNKNOWN))
    }

    pub fn zone_str(&self) -> &str {
        self.zone.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessAction {
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetAction {
    #[serde(default)]
    pub url: String,
}

/// Kind-tagged action payload. Serializes as `{"kind": ..., "<kind>": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ActionBody {
    File { file: FileAction },
    Process { process: ProcessAction },
    Net { net: NetAction },
}

impl ActionBody {
    pub fn kind(&self) -> &'static str {
        match self {
            ActionBody::File { .. } => "file",
            ActionBody::Process { .. } => "process",
            ActionBody::Net { .. } => "net",
        }
    }

    pub fn as_file(&self) -> Option<&FileAction> {
        match self {
            ActionBody::File { file } => Some(file),
            _ => None,
        }
    }

    pub fn as_net(&self) -> Option<&NetAction> {
        match self {
            ActionBody::Net { net } => Some(net),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    #[serde(default)]
    pub action_id: String,
    #[serde(default)]
    pub tool_surface_id: String,
    #[serde(flatten)]
    pub body: ActionBody,
}

/// Supply-chain facts about a skill installation, computed before compile.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SkillInstallDescriptor {
    pub skill_id: String,
    pub requested_authority_profile: String,
    pub version_lock: String,
    pub declared_sha256: Option<String>,
    pub observed_sha256: Option<String>,
    pub artifact_size_bytes: Option<u64>,
    pub capability_diff_present: bool,
    pub capability_diff_digest: Option<String>,
    pub authority_diff_sha256: Option<String>,
}

impl SkillInstallDescriptor {
    fn from_value(value: &Value) -> Self {
        let text = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);
        Self {
            skill_id: text("skill_id").unwrap_or_default(),
            requested_authority_profile: text("requested_authority_profile").unwrap_or_default(),
            version_lock: text("version_lock").unwrap_or_default(),
            declared_sha256: text("declared_sha256"),
            observed_sha256: text("observed_sha256"),
            artifact_size_bytes: value.get("artifact_size_bytes").and_then(Value::as_u64),
            capability_diff_present: value
                .get("capability_diff_present")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            capability_diff_digest: text("capability_diff_digest"),
            authority_diff_sha256: text("authority_diff_sha256"),
        }
    }
}

/// Binding metadata lifted from the intent. Never part of the plan.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct IntentMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lane_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_lane_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_plan_hash: Option<String>,
    /// Sorted on read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seen_plan_hashes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prohibit_replay: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skill_install: Option<SkillInstallDescriptor>,
}

impl IntentMeta {
    fn from_value(raw: &Value) -> Self {
        let text = |key: &str| raw.get(key).and_then(Value::as_str).map(str::to_string);
        let seen_plan_hashes = raw.get("seen_plan_hashes").and_then(Value::as_array).map(|items| {
            let mut hashes: Vec<String> = items
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect();
            hashes.sort();
            hashes
        });
        Self {
            lane_id: text("lane_id"),
            expected_lane_id: text("expected_lane_id"),
            expected_plan_hash: text("expected_plan_hash"),
            seen_plan_hashes,
            prohibit_replay: raw.get("prohibit_replay").and_then(Value::as_bool),
            skill_install: raw
                .get("skill_install")
                .filter(|v| v.is_object())
                .map(SkillInstallDescriptor::from_value),
        }
    }
}

/// A parsed intent document.
#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    raw: Value,
    pub intent_id: Option<String>,
    pub actions: Vec<Action>,
    pub meta: IntentMeta,
}

impl Intent {
    /// Parse an intent, keeping the submitted JSON for hashing.
    ///
    /// A missing `actions` array is an empty intent; an action whose kind
    /// or payload cannot be read is a malformed intent.
    pub fn from_value(raw: Value) -> Result<Self, EglError> {
        if !raw.is_object() {
            return Err(EglError::MalformedIntent {
                description: "intent must be a JSON object".to_string(),
            });
        }

        let actions = match raw.get("actions").and_then(Value::as_array) {
            Some(items) => items
                .iter()
                .enumerate()
                .map(|(idx, item)| {
                    Action::deserialize(item).map_err(|e| EglError::MalformedIntent {
                        description: format!("actions[{idx}]: {e}"),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        Ok(Self {
            intent_id: raw.get("intent_id").and_then(Value::as_str).map(str::to_string),
            meta: IntentMeta::from_value(&raw),
            actions,
            raw,
        })
    }

    pub fn from_json_str(text: &str) -> Result<Self, EglError> {
        let raw: Value = serde_json::from_str(text).map_err(|e| EglError::MalformedIntent {
            description: e.to_string(),
        })?;
        Self::from_value(raw)
    }

    /// The document as submitted.
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// `sha3-512` of the canonical submitted document.
    pub fn hash(&self) -> String {
        sha3_512_tagged(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_tagged_actions() {
        let intent = Intent::from_value(json!({
            "schema_id": "EGL.INTENT",
            "version": "0.1.0",
            "intent_id": "I-1",
            "actions": [
                {"action_id": "A2", "kind": "net", "tool_surface_id": "browser.navigate", "net": {"url": "https://example.com"}},
                {"action_id": "A1", "kind": "file", "tool_surface_id": "file.read", "file": {"op": "read", "zone": "repo", "path": "README.md"}}
            ]
        }))
        .expect("intent parses");

        assert_eq!(intent.intent_id.as_deref(), Some("I-1"));
        assert_eq!(intent.actions.len(), 2);
        assert_eq!(intent.actions[0].body.kind(), "net");
        let file = intent.actions[1].body.as_file().expect("file action");
        assert_eq!(file.path, "README.md");
        assert!(!file.zone_is_unknown());
    }

    #[test]
    fn missing_zone_is_unknown() {
        let file: FileAction = serde_json::from_value(json!({"op": "read", "path": "x"})).expect("file");
        assert!(file.zone_is_unknown());
        let null_zone: FileAction =
            serde_json::from_value(json!({"op": "read", "path": "x", "zone": null})).expect("file");
        assert!(null_zone.zone_is_unknown());
    }

    #[test]
    fn unknown_kind_is_malformed() {
        let err = Intent::from_value(json!({
            "actions": [{"action_id": "A1", "kind": "teleport", "tool_surface_id": "x"}]
        }))
        .expect_err("unknown kind");
        assert!(matches!(err, EglError::MalformedIntent { .. }));
    }

    #[test]
    fn meta_sorts_seen_hashes_and_reads_skill_install() {
        let intent = Intent::from_value(json!({
            "actions": [],
            "lane_id": "L1",
            "seen_plan_hashes": ["b", "a"],
            "prohibit_replay": true,
            "skill_install": {"skill_id": "s", "capability_diff_present": true, "artifact_size_bytes": 3}
        }))
        .expect("intent parses");
        assert_eq!(intent.meta.lane_id.as_deref(), Some("L1"));
        assert_eq!(
            intent.meta.seen_plan_hashes,
            Some(vec!["a".to_string(), "b".to_string()])
        );
        let si = intent.meta.skill_install.expect("skill install");
        assert!(si.capability_diff_present);
        assert_eq!(si.artifact_size_bytes, Some(3));
        assert_eq!(si.declared_sha256, None);
    }

    #[test]
    fn hash_covers_the_submitted_document() {
        let a = Intent::from_value(json!({"actions": [], "note": "x"})).expect("a");
        let b = Intent::from_value(json!({"actions": [], "note": "y"})).expect("b");
        assert_ne!(a.hash(), b.hash());
        assert!(a.hash().starts_with("sha3-512:"));
    }
}
