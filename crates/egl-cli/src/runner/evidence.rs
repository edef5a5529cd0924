//! Evidence gathered while a fixture crosses the governed gates.

use egl_kernel::codes::PermitCode;
use egl_kernel::diff::{DiffStats, UnifiedDiff};
use egl_kernel::permit::{PermitBindings, PermitRejection, PublishSurface};
use egl_kernel::receipt::RatificationSummary;
use egl_kernel::ReasonCode;
use serde_json::{Map, Value, json};

pub const PERMIT_NOT_REQUIRED: &str = "PERMIT_NOT_REQUIRED";
pub const PERMIT_HASH_SCHEMA_ID: &str = "EGL.EXECUTION_PERMIT_HASH";
pub const EGRESS_CHECK_BUNDLE_SCHEMA_ID: &str = "EGL.EGRESS_CHECK_BUNDLE";
pub const GIT_EXECUTION_SCHEMA_ID: &str = "EGL.GIT_EXECUTION";
pub const EVIDENCE_VERSION: &str = "0.1.0";

/// Verdict of permit validation for one fixture.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PermitCheck {
    #[default]
    NotRequired,
    Passed,
    Rejected { code: PermitCode, reason: String },
}

impl PermitCheck {
    pub fn missing() -> Self {
        PermitCheck::Rejected {
            code: PermitCode::PermitRequired,
            reason: "execution permit required".to_string(),
        }
    }

    pub fn is_passed(&self) -> bool {
        matches!(self, PermitCheck::Passed)
    }

    pub fn rejected_code(&self) -> Option<ReasonCode> {
        match self {
            PermitCheck::Rejected { code, .. } => Some((*code).into()),
            _ => None,
        }
    }

    /// `null` when not required, else whether it passed.
    pub fn ok_value(&self) -> Value {
        match self {
            PermitCheck::NotRequired => Value::Null,
            PermitCheck::Passed => json!(true),
            PermitCheck::Rejected { .. } => json!(false),
        }
    }

    pub fn code(&self) -> Option<&'static str> {
        match self {
            PermitCheck::NotRequired => Some(PERMIT_NOT_REQUIRED),
            PermitCheck::Passed => None,
            PermitCheck::Rejected { code, .. } => Some(code.as_str()),
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            PermitCheck::NotRequired => Some("not required"),
            PermitCheck::Passed => None,
            PermitCheck::Rejected { reason, .. } => Some(reason),
        }
    }
}

impl From<PermitRejection> for PermitCheck {
    fn from(rejection: PermitRejection) -> Self {
        PermitCheck::Rejected {
            code: rejection.code,
            reason: rejection.reason,
        }
    }
}

/// A written `diff.preview.json`.
#[derive(Debug, Clone)]
pub struct DiffPreview {
    pub diff: UnifiedDiff,
    pub after_text: String,
    pub preview_hash_sha256: String,
}

impl DiffPreview {
    pub fn record(path: &str, diff: &UnifiedDiff) -> Value {
        json!({
            "path": path,
            "diff_sha256": diff.sha256,
            "diff_stats": diff.stats,
            "diff_unified": diff.text,
        })
    }

    pub fn stats(&self) -> DiffStats {
        self.diff.stats
    }
}

#[derive(Debug, Clone, Default)]
pub struct DraftFacts {
    pub path: Option<String>,
    pub draft_kind: Option<String>,
    pub content_sha256: Option<String>,
}

/// Facts about a governed commit request. Nothing here ever runs git.
#[derive(Debug, Clone, Default)]
pub struct GitFacts {
    pub branch: String,
    pub base_branch: String,
    pub diff_sha256: Option<String>,
    pub diff_preview_hash_sha256: Option<String>,
    pub ratification_token_hash_sha256: Option<String>,
}

impl GitFacts {
    pub fn execution_record(&self, attest_mode: &str, reason_code: Option<&str>) -> Value {
        json!({
            "schema_id": GIT_EXECUTION_SCHEMA_ID,
            "version": EVIDENCE_VERSION,
            "attest_mode": attest_mode,
            "branch_created": false,
            "patch_applied": false,
            "staged": false,
            "committed": false,
            "new_branch": self.branch,
            "base_branch": self.base_branch,
            "reason_code": reason_code,
            "diff_sha256": self.diff_sha256,
            "diff_preview_hash_sha256": self.diff_preview_hash_sha256,
            "ratification_token_hash_sha256": self.ratification_token_hash_sha256,
            "commit_hash": null,
            "changed_files": [],
        })
    }
}

#[derive(Debug, Clone)]
pub struct PostFacts {
    pub surface: PublishSurface,
    pub payload_sha256: Option<String>,
    pub payload_bytes: u64,
    pub source_commit_hash: Option<String>,
    pub source_receipt_hash_sha256: Option<String>,
    pub ratification_token_hash_sha256: Option<String>,
    pub stub_receipt_hash_sha256: Option<String>,
}

impl PostFacts {
    pub fn has_source_binding(&self) -> bool {
        self.source_commit_hash.is_some() || self.source_receipt_hash_sha256.is_some()
    }
}

/// Egress evidence for a navigation, as recorded in the ledger.
#[derive(Debug, Clone, Default)]
pub struct EgressFacts {
    pub canonical_target: Option<String>,
    pub protocol: Option<String>,
    pub zone: Option<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct SkillFacts {
    pub ratification: RatificationSummary,
    pub token_count: usize,
    pub sce_hash_sha256: Option<String>,
    pub stub_receipt_hash_sha256: Option<String>,
}

/// Command facts for test and deps surfaces.
#[derive(Debug, Clone, Default)]
pub struct CommandFacts {
    pub exit_code: Option<i32>,
    pub receipt_hash_sha256: Option<String>,
    pub lockfile_path: String,
    pub lockfile_sha256: Option<String>,
}

/// `permit.validation.json`.
pub fn permit_validation_record(
    check: &PermitCheck,
    permit_sha256: Option<&str>,
    preview: Option<&DiffPreview>,
    git: Option<&GitFacts>,
    expected: Option<&PermitBindings>,
) -> Value {
    let mut map = Map::new();
    map.insert("schema_id".into(), json!(egl_kernel::permit::PERMIT_VALIDATION_SCHEMA_ID));
    map.insert("version".into(), json!(EVIDENCE_VERSION));
    map.insert("ok".into(), check.ok_value());
    map.insert("code".into(), json!(check.code()));
    map.insert("reason".into(), json!(check.reason()));
    map.insert("execution_permit_sha256".into(), json!(permit_sha256));
    if let Some(preview) = preview {
        map.insert("diff_sha256".into(), json!(preview.diff.sha256));
        map.insert("diff_preview_hash_sha256".into(), json!(preview.preview_hash_sha256));
        map.insert("diff_stats".into(), json!(preview.diff.stats));
    }
    if let Some(git) = git {
        map.insert("git_branch".into(), json!(git.branch));
        map.insert("git_diff_sha256".into(), json!(git.diff_sha256));
        map.insert("git_diff_preview_hash_sha256".into(), json!(git.diff_preview_hash_sha256));
        map.insert(
            "ratification_token_hash_sha256".into(),
            json!(git.ratification_token_hash_sha256),
        );
    }
    if let Some(expected) = expected {
        map.insert("expected".into(), expected.to_value());
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permit_check_wire_shapes() {
        let not_required = PermitCheck::NotRequired;
        assert_eq!(not_required.ok_value(), Value::Null);
        assert_eq!(not_required.code(), Some(PERMIT_NOT_REQUIRED));
        assert_eq!(not_required.rejected_code(), None);

        assert_eq!(PermitCheck::Passed.ok_value(), json!(true));
        assert_eq!(PermitCheck::Passed.code(), None);

        let missing = PermitCheck::missing();
        assert_eq!(missing.ok_value(), json!(false));
        assert_eq!(missing.code(), Some("PERMIT_REQUIRED"));
        assert_eq!(missing.rejected_code().map(ReasonCode::as_str), Some("PERMIT_REQUIRED"));
    }

    #[test]
    fn validation_record_adds_expected_only_when_asked() {
        let check = PermitCheck::missing();
        let plain = permit_validation_record(&check, None, None, None, None);
        assert!(plain.get("expected").is_none());
        assert_eq!(plain["ok"], json!(false));

        let expected = PermitBindings {
            lane_id: Some("lane-a".to_string()),
            ..PermitBindings::default()
        };
        let with = permit_validation_record(&check, None, None, None, Some(&expected));
        assert_eq!(with["expected"]["lane_id"], "lane-a");
        assert_eq!(with["expected"]["attestation_nonce"], Value::Null);
    }

    #[test]
    fn git_evidence_never_claims_a_commit() {
        let git = GitFacts {
            branch: "egl/feature".to_string(),
            base_branch: "main".to_string(),
            ..GitFacts::default()
        };
        let record = git.execution_record("mock", Some("HITL_REQUIRED_GIT_COMMIT"));
        for flag in ["branch_created", "patch_applied", "staged", "committed"] {
            assert_eq!(record[flag], json!(false));
        }
        assert_eq!(record["commit_hash"], Value::Null);
    }
}
