//! Receipts and stub results for admitted actions.
//!
//! Nothing here runs anything. Each builder is a pure function of the
//! admitted plan's bindings, so a rerun in mock mode reproduces every
//! receipt byte for byte. Receipt hashes are `sha256:<hex>` of the
//! canonical receipt.

use serde::Serialize;
use serde_json::Value;

use crate::canonical::{SHA256_PREFIX, sha256_bytes_hex, sha256_tagged, sha256_text_hex, to_canonical_value};
use crate::error::EglError;
use crate::guard::AttestMode;

pub const RECEIPT_VERSION: &str = "0.1.0";
pub const SKILL_INSTALL_STUB_RECEIPT_SCHEMA_ID: &str = "EGL.SKILL_INSTALL_STUB_RECEIPT";
pub const POST_STUB_RECEIPT_SCHEMA_ID: &str = "EGL.POST_STUB_RECEIPT";
pub const TEST_RESULT_SCHEMA_ID: &str = "EGL.TEST_RESULT";
pub const TEST_RECEIPT_SCHEMA_ID: &str = "EGL.TEST_RECEIPT";
pub const DEPS_RESULT_SCHEMA_ID: &str = "EGL.DEPS_RESULT";
pub const DEPS_RECEIPT_SCHEMA_ID: &str = "EGL.DEPS_RECEIPT";

const TEST_STUB_STDOUT: &str = "STUB_STDOUT";
const DEPS_STUB_STDOUT: &str = "STUB_DEPS_FETCH";
const NPM_REGISTRY: &str = "registry.npmjs.org";

/// `sha256:<hex>` of any serializable record.
pub fn receipt_hash<T: Serialize + ?Sized>(record: &T) -> Result<String, EglError> {
    Ok(sha256_tagged(&to_canonical_value(record)?))
}

fn tagged_bytes(bytes: &[u8]) -> String {
    format!("{SHA256_PREFIX}{}", sha256_bytes_hex(bytes))
}

/// What every execution receipt is bound to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReceiptBinding {
    pub permit_sha256: Option<String>,
    pub law_bundle_sha256: Option<String>,
    pub plan_hash: Option<String>,
    pub intent_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkillInstallStubReceipt {
    pub schema_id: String,
    pub version: String,
    pub fixture_id: String,
    pub intent_hash: Option<String>,
    pub plan_hash: Option<String>,
    pub lane_id: String,
    pub attestation_nonce: Option<String>,
    pub sce_hash_sha256: String,
    pub authority_diff_sha256: Option<String>,
    pub ratification_token_hashes: Vec<String>,
    pub ratification_approvers: Vec<String>,
    pub status: String,
    pub reason_code: String,
}

/// Accepted ratification, as recorded in receipts and `io.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RatificationSummary {
    pub token_hashes: Vec<String>,
    pub approvers: Vec<String>,
}

impl RatificationSummary {
    /// Pair each token's hash with its approver, drop incomplete pairs and
    /// sort by approver then hash.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (Option<String>, String)>) -> Self {
        let mut complete: Vec<(String, String)> = pairs
            .into_iter()
            .filter_map(|(hash, approver)| match hash {
                Some(h) if !h.is_empty() && !approver.is_empty() => Some((approver, h)),
                _ => None,
            })
            .collect();
        complete.sort();
        let (approvers, token_hashes): (Vec<String>, Vec<String>) = complete.into_iter().unzip();
        Self {
            token_hashes,
            approvers,
        }
    }
}

impl SkillInstallStubReceipt {
    pub fn new(
        fixture_id: &str,
        binding: &ReceiptBinding,
        lane_id: &str,
        attestation_nonce: Option<&str>,
        sce_hash_sha256: &str,
        authority_diff_sha256: Option<&str>,
        ratification: &RatificationSummary,
    ) -> Self {
        Self {
            schema_id: SKILL_INSTALL_STUB_RECEIPT_SCHEMA_ID.to_string(),
            version: RECEIPT_VERSION.to_string(),
            fixture_id: fixture_id.to_string(),
            intent_hash: binding.intent_hash.clone(),
            plan_hash: binding.plan_hash.clone(),
            lane_id: lane_id.to_string(),
            attestation_nonce: attestation_nonce.map(str::to_string),
            sce_hash_sha256: sce_hash_sha256.to_string(),
            authority_diff_sha256: authority_diff_sha256.map(str::to_string),
            ratification_token_hashes: ratification.token_hashes.clone(),
            ratification_approvers: ratification.approvers.clone(),
            status: "ALLOW".to_string(),
            reason_code: crate::codes::AdmissionCode::HitlQuorumAccepted.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostStubReceipt {
    pub schema_id: String,
    pub version: String,
    pub surface: String,
    pub payload_sha256: String,
    pub source_commit_hash: Option<String>,
    pub source_receipt_hash_sha256: Option<String>,
    pub ratification_token_hash_sha256: Option<String>,
    #[serde(flatten)]
    pub binding: ReceiptBinding,
}

impl PostStubReceipt {
    pub fn new(
        surface: &str,
        payload_sha256: &str,
        source_commit_hash: Option<&str>,
        source_receipt_hash_sha256: Option<&str>,
        ratification_token_hash_sha256: Option<&str>,
        binding: ReceiptBinding,
    ) -> Self {
        Self {
            schema_id: POST_STUB_RECEIPT_SCHEMA_ID.to_string(),
            version: RECEIPT_VERSION.to_string(),
            surface: surface.to_string(),
            payload_sha256: payload_sha256.to_string(),
            source_commit_hash: source_commit_hash.map(str::to_string),
            source_receipt_hash_sha256: source_receipt_hash_sha256.map(str::to_string),
            ratification_token_hash_sha256: ratification_token_hash_sha256.map(str::to_string),
            binding,
        }
    }
}

/// Captured output of a stubbed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubRun {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl StubRun {
    pub fn test() -> Self {
        Self {
            exit_code: 0,
            stdout: TEST_STUB_STDOUT.as_bytes().to_vec(),
            stderr: Vec::new(),
        }
    }

    pub fn deps() -> Self {
        Self {
            exit_code: 0,
            stdout: DEPS_STUB_STDOUT.as_bytes().to_vec(),
            stderr: Vec::new(),
        }
    }

    pub fn stdout_sha256(&self) -> String {
        tagged_bytes(&self.stdout)
    }

    pub fn stderr_sha256(&self) -> String {
        tagged_bytes(&self.stderr)
    }
}

/// The command a test or deps action asked for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub cmd: String,
    pub cwd: String,
    pub env_profile: String,
}

impl CommandSpec {
    pub fn cmd_sha256(&self) -> String {
        format!("{SHA256_PREFIX}{}", sha256_text_hex(&self.cmd))
    }

    /// Hosts a dependency fetch reaches. Only npm is recognised.
    pub fn egress_targets(&self) -> Vec<String> {
        if self.cmd.starts_with("npm ") {
            vec![NPM_REGISTRY.to_string()]
        } else {
            Vec::new()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestResult {
    pub schema_id: String,
    pub version: String,
    pub exit_code: i32,
    pub stdout_sha256: String,
    pub stderr_sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestReceipt {
    pub schema_id: String,
    pub version: String,
    pub cmd_sha256: String,
    pub cwd: String,
    pub env_profile: String,
    pub exit_code: i32,
    pub stdout_sha256: String,
    pub stderr_sha256: String,
    #[serde(flatten)]
    pub binding: ReceiptBinding,
}

pub fn test_artifacts(spec: &CommandSpec, run: &StubRun, binding: ReceiptBinding) -> (TestResult, TestReceipt) {
    let result = TestResult {
        schema_id: TEST_RESULT_SCHEMA_ID.to_string(),
        version: RECEIPT_VERSION.to_string(),
        exit_code: run.exit_code,
        stdout_sha256: run.stdout_sha256(),
        stderr_sha256: run.stderr_sha256(),
    };
    let receipt = TestReceipt {
        schema_id: TEST_RECEIPT_SCHEMA_ID.to_string(),
        version: RECEIPT_VERSION.to_string(),
        cmd_sha256: spec.cmd_sha256(),
        cwd: spec.cwd.clone(),
        env_profile: spec.env_profile.clone(),
        exit_code: run.exit_code,
        stdout_sha256: run.stdout_sha256(),
        stderr_sha256: run.stderr_sha256(),
        binding,
    };
    (result, receipt)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepsResult {
    pub schema_id: String,
    pub version: String,
    pub exit_code: i32,
    pub stdout_sha256: String,
    pub stderr_sha256: String,
    pub lockfile_path: String,
    pub lockfile_sha256: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepsReceipt {
    pub schema_id: String,
    pub version: String,
    pub cmd_sha256: String,
    pub cwd: String,
    pub env_profile: String,
    pub exit_code: i32,
    pub stdout_sha256: String,
    pub stderr_sha256: String,
    pub lockfile_path: String,
    pub lockfile_sha256: Option<String>,
    pub egress_targets: Vec<String>,
    #[serde(flatten)]
    pub binding: ReceiptBinding,
}

pub fn deps_artifacts(
    spec: &CommandSpec,
    run: &StubRun,
    lockfile_path: &str,
    lockfile_sha256: Option<String>,
    binding: ReceiptBinding,
) -> (DepsResult, DepsReceipt) {
    let result = DepsResult {
        schema_id: DEPS_RESULT_SCHEMA_ID.to_string(),
        version: RECEIPT_VERSION.to_string(),
        exit_code: run.exit_code,
        stdout_sha256: run.stdout_sha256(),
        stderr_sha256: run.stderr_sha256(),
        lockfile_path: lockfile_path.to_string(),
        lockfile_sha256: lockfile_sha256.clone(),
    };
    let receipt = DepsReceipt {
        schema_id: DEPS_RECEIPT_SCHEMA_ID.to_string(),
        version: RECEIPT_VERSION.to_string(),
        cmd_sha256: spec.cmd_sha256(),
        cwd: spec.cwd.clone(),
        env_profile: spec.env_profile.clone(),
        exit_code: run.exit_code,
        stdout_sha256: run.stdout_sha256(),
        stderr_sha256: run.stderr_sha256(),
        lockfile_path: lockfile_path.to_string(),
        lockfile_sha256,
        egress_targets: spec.egress_targets(),
        binding,
    };
    (result, receipt)
}

/// Result of the generic stub executor for surfaces with no dedicated one.
pub fn stub_result(tool_surface_id: &str, file_path: Option<&str>) -> Value {
    if tool_surface_id == "file.read" {
        let path = file_path.unwrap_or("");
        return serde_json::json!({
            "kind": "stub_result",
            "op": "read",
            "path": path,
            "content_sha256": sha256_text_hex(&format!("STUB_READ:{path}")),
            "bytes": 17,
        });
    }
    serde_json::json!({
        "kind": "stub_result",
        "op": tool_surface_id,
        "note": "STUB_ONLY_NOT_IMPLEMENTED",
        "content_sha256": sha256_text_hex(&format!("STUB:{tool_surface_id}")),
    })
}

/// `execution.json`: what ran, under which binding, and what it changed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionRecord {
    pub executor_invoked: bool,
    pub execution_kind: Option<String>,
    pub attest_mode: AttestMode,
    pub lane_id: String,
    pub expiry_ts: Option<String>,
    pub attestation_nonce: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binding: Option<Value>,
    pub execution_permit_sha256: Option<String>,
    pub permit_validated: bool,
    pub permit_validation_code: Option<String>,
    pub pre_state_hash_sha256: Option<String>,
    pub post_state_hash_sha256: Option<String>,
    pub side_effect_detected: bool,
    pub result_hash_sha256: Option<String>,
    pub file_receipt_hash_sha256: Option<String>,
}

impl ExecutionRecord {
    /// A record for an action that did not reach an executor.
    pub fn not_invoked(attest_mode: AttestMode, lane_id: &str) -> Self {
        Self {
            executor_invoked: false,
            execution_kind: None,
            attest_mode,
            lane_id: lane_id.to_string(),
            expiry_ts: None,
            attestation_nonce: None,
            binding: None,
            execution_permit_sha256: None,
            permit_validated: false,
            permit_validation_code: None,
            pre_state_hash_sha256: None,
            post_state_hash_sha256: None,
            side_effect_detected: false,
            result_hash_sha256: None,
            file_receipt_hash_sha256: None,
        }
    }

    pub fn to_value(&self) -> Result<Value, EglError> {
        to_canonical_value(self)
    }
}
