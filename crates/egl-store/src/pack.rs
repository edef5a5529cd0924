//! Test packs and the fixture documents they point at.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use egl_kernel::intent::INTENT_SCHEMA_ID;
use egl_kernel::paths::has_abs_windows_path;
use egl_kernel::EglError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;

/// What a pack author expects one fixture to end in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expectation {
    /// `admitted` or `rejected`.
    pub status: String,
    #[serde(default)]
    pub reason_code: Option<String>,
    #[serde(default)]
    pub refusal_status: Option<String>,
    /// In live proxy runs, swap the fixture's file target for a symlink
    /// between attestation and execution.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stage_toctou_swap: bool,
}

impl Expectation {
    /// Status and reason must match; refusal status only when declared.
    pub fn matches(&self, status: &str, reason_code: Option<&str>, refusal_status: Option<&str>) -> bool {
        self.status == status
            && self.reason_code.as_deref() == reason_code
            && self
                .refusal_status
                .as_deref()
                .is_none_or(|want| Some(want) == refusal_status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Pack {
    pub pack_id: String,
    /// Fixture id to repo-relative document path. Iterates in id order.
    #[serde(default)]
    pub fixtures: BTreeMap<String, String>,
    #[serde(default)]
    pub expectations: BTreeMap<String, Expectation>,
}

impl Pack {
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let text = fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
        let pack: Pack = serde_json::from_str(&text).map_err(|source| StoreError::ParseJson {
            path: path.display().to_string(),
            source,
        })?;
        if pack.pack_id.trim().is_empty() {
            return Err(StoreError::Contract(format!("{}: pack_id missing", path.display())));
        }
        Ok(pack)
    }

    pub fn expectation(&self, fixture_id: &str) -> Option<&Expectation> {
        self.expectations.get(fixture_id)
    }

    /// Fixtures whose target is swapped under a live proxy run.
    pub fn toctou_swap_fixtures(&self) -> BTreeSet<String> {
        self.expectations
            .iter()
            .filter(|(_, exp)| exp.stage_toctou_swap)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// A fixture is either a ready intent or a raw tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum FixtureDocument {
    Intent(Value),
    ToolCall(Value),
}

/// Read one fixture. Text carrying an absolute Windows path is refused
/// before parsing.
pub fn load_fixture(repo_root: &Path, rel_path: &str) -> Result<FixtureDocument, StoreError> {
    let path = repo_root.join(rel_path);
    let text = fs::read_to_string(&path).map_err(|e| StoreError::io(&path, e))?;
    if has_abs_windows_path(&text) {
        return Err(EglError::AbsolutePath {
            location: rel_path.to_string(),
        }
        .into());
    }
    let value: Value = serde_json::from_str(&text).map_err(|source| StoreError::ParseJson {
        path: rel_path.to_string(),
        source,
    })?;
    if value.get("schema_id").and_then(Value::as_str) == Some(INTENT_SCHEMA_ID) {
        return Ok(FixtureDocument::Intent(value));
    }
    if value.get("tool").is_some_and(Value::is_string) {
        return Ok(FixtureDocument::ToolCall(value));
    }
    Err(StoreError::Contract(format!("unsupported fixture format at {rel_path}")))
}
