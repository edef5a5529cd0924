//! Permit-scoped file executor for the sandbox.
//!
//! The executor trusts nothing it was handed: it re-checks deny, read and
//! write roots against the permit before touching disk and refuses any
//! path that resolves outside the repository.

use std::fs;
use std::path::{Path, PathBuf};

use egl_kernel::canonical::{SHA256_PREFIX, sha256_bytes_hex};
use egl_kernel::codes::{GateCode, PermitCode, ReasonCode};
use egl_kernel::compiler::PlanAction;
use egl_kernel::diff::{DiffStats, normalize_newlines};
use egl_kernel::intent::ActionBody;
use egl_kernel::paths::{safe_rel_path, to_posix};
use egl_kernel::receipt::{RECEIPT_VERSION, ReceiptBinding};
use egl_kernel::PermitGrant;
use serde::Serialize;

pub const FILE_RECEIPT_SCHEMA_ID: &str = "EGL.FILE_RECEIPT";

/// Surfaces whose `write` op the executor applies.
const WRITE_SURFACES: &[&str] = &[
    "file.write",
    "code.patch.apply",
    "publish.draft.create",
    "publish.draft.bundle",
    "publish.draft.commit",
];

/// Content and preview evidence for a governed write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WritePayload {
    pub after_text: Option<String>,
    pub diff_sha256: Option<String>,
    pub diff_stats: Option<DiffStats>,
    pub diff_preview_hash_sha256: Option<String>,
    pub draft_kind: Option<String>,
    pub content_sha256: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileResult {
    pub kind: &'static str,
    pub op: String,
    pub path: String,
    pub bytes: u64,
    pub content_sha256: Option<String>,
    pub before_hash_sha256: Option<String>,
    pub after_hash_sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<&'static str>,
}

/// `EGL.FILE_RECEIPT`: evidence of one applied file action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileReceipt {
    pub schema_id: String,
    pub version: String,
    pub op: String,
    pub path: String,
    pub bytes: u64,
    pub before_hash_sha256: Option<String>,
    pub after_hash_sha256: Option<String>,
    pub diff_sha256: Option<String>,
    pub diff_stats: Option<DiffStats>,
    pub diff_preview_hash_sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draft_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_sha256: Option<String>,
    #[serde(flatten)]
    pub binding: ReceiptBinding,
    pub execution_permit_sha256: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub tool_surface_id: String,
    pub result: FileResult,
    pub receipt: FileReceipt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRefusal {
    pub code: ReasonCode,
    pub note: String,
}

impl ExecRefusal {
    fn unsupported(note: impl Into<String>) -> Self {
        Self {
            code: GateCode::UnsupportedAction.into(),
            note: note.into(),
        }
    }

    fn scope(note: impl Into<String>) -> Self {
        Self {
            code: PermitCode::PermitScopeViolation.into(),
            note: note.into(),
        }
    }
}

fn tagged(bytes: &[u8]) -> String {
    format!("{SHA256_PREFIX}{}", sha256_bytes_hex(bytes))
}

#[derive(Debug, Clone)]
pub struct SandboxExecutor {
    repo_root: PathBuf,
}

impl SandboxExecutor {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    fn resolve(&self, rel_path: &str) -> Option<PathBuf> {
        safe_rel_path(&self.repo_root, &to_posix(rel_path))
            .filter(|rel| !rel.is_empty())
            .map(|rel| self.repo_root.join(rel))
    }

    /// `sha256:<hex>` of the file's bytes; `None` when it is missing,
    /// unreadable or outside the repository.
    pub fn file_state_sha256(&self, rel_path: &str) -> Option<String> {
        let abs = self.resolve(rel_path)?;
        fs::read(abs).ok().map(|bytes| tagged(&bytes))
    }

    /// Apply the plan's first action. `binding` is stamped into the receipt
    /// alongside the permit's own hash.
    pub fn apply(
        &self,
        action: &PlanAction,
        permit: &PermitGrant<'_>,
        binding: ReceiptBinding,
        payload: &WritePayload,
    ) -> Result<Applied, ExecRefusal> {
        let ActionBody::File { file } = &action.body else {
            return Err(ExecRefusal::unsupported("Only file actions are supported"));
        };
        let surface = action.tool_surface_id.as_str();
        let rel_path = to_posix(&file.path);

        if permit.check_filesystem("", &rel_path).is_err() {
            return Err(ExecRefusal::scope("deny_path"));
        }

        let before_hash_sha256 = self.file_state_sha256(&rel_path);
        let permit_sha256 = permit.permit_sha256();
        let binding = ReceiptBinding {
            permit_sha256: Some(permit_sha256.clone()),
            ..binding
        };

        match (surface, file.op.as_str()) {
            ("file.read", "read") => {
                if permit.check_filesystem("read", &rel_path).is_err() {
                    return Err(ExecRefusal::scope("path not within read_roots"));
                }
                let abs = self
                    .resolve(&rel_path)
                    .ok_or_else(|| ExecRefusal::scope("path escapes repository"))?;
                let bytes = fs::read(&abs).map_err(|e| ExecRefusal::unsupported(format!("read failed: {e}")))?;
                let size = bytes.len() as u64;
                tracing::info!(path = %rel_path, bytes = size, "sandbox read");
                Ok(Applied {
                    tool_surface_id: surface.to_string(),
                    result: FileResult {
                        kind: "file_result",
                        op: "read".to_string(),
                        path: rel_path.clone(),
                        bytes: size,
                        content_sha256: Some(tagged(&bytes)),
                        before_hash_sha256: before_hash_sha256.clone(),
                        after_hash_sha256: before_hash_sha256.clone(),
                        note: None,
                    },
                    receipt: FileReceipt {
                        schema_id: FILE_RECEIPT_SCHEMA_ID.to_string(),
                        version: RECEIPT_VERSION.to_string(),
                        op: "read".to_string(),
                        path: rel_path,
                        bytes: size,
                        before_hash_sha256: before_hash_sha256.clone(),
                        after_hash_sha256: before_hash_sha256,
                        diff_sha256: None,
                        diff_stats: None,
                        diff_preview_hash_sha256: None,
                        draft_kind: None,
                        content_sha256: None,
                        binding,
                        execution_permit_sha256: Some(permit_sha256),
                    },
                })
            }
            (surface, "write") if WRITE_SURFACES.contains(&surface) => {
                let Some(after_text) = payload.after_text.as_deref() else {
                    return Err(ExecRefusal::unsupported("write requires after_text"));
                };
                if permit.check_filesystem("write", &rel_path).is_err() {
                    return Err(ExecRefusal::scope("path not within write_roots"));
                }
                let abs = self
                    .resolve(&rel_path)
                    .ok_or_else(|| ExecRefusal::scope("path escapes repository"))?;
                if let Some(parent) = abs.parent() {
                    fs::create_dir_all(parent)
                        .map_err(|e| ExecRefusal::unsupported(format!("mkdir failed: {e}")))?;
                }
                let normalized = normalize_newlines(after_text);
                fs::write(&abs, normalized.as_bytes())
                    .map_err(|e| ExecRefusal::unsupported(format!("write failed: {e}")))?;
                let after_hash = tagged(normalized.as_bytes());
                let size = normalized.len() as u64;
                tracing::info!(path = %rel_path, bytes = size, surface, "sandbox write applied");
                Ok(Applied {
                    tool_surface_id: surface.to_string(),
                    result: FileResult {
                        kind: "file_result",
                        op: "write".to_string(),
                        path: rel_path.clone(),
                        bytes: size,
                        content_sha256: Some(after_hash.clone()),
                        before_hash_sha256: before_hash_sha256.clone(),
                        after_hash_sha256: Some(after_hash.clone()),
                        note: Some("APPLIED_PERMIT_SCOPED_PATCH"),
                    },
                    receipt: FileReceipt {
                        schema_id: FILE_RECEIPT_SCHEMA_ID.to_string(),
                        version: RECEIPT_VERSION.to_string(),
                        op: "write".to_string(),
                        path: rel_path,
                        bytes: size,
                        before_hash_sha256,
                        after_hash_sha256: Some(after_hash),
                        diff_sha256: payload.diff_sha256.clone(),
                        diff_stats: payload.diff_stats,
                        diff_preview_hash_sha256: payload.diff_preview_hash_sha256.clone(),
                        draft_kind: payload.draft_kind.clone(),
                        content_sha256: payload.content_sha256.clone(),
                        binding,
                        execution_permit_sha256: Some(permit_sha256),
                    },
                })
            }
            (surface, op) => Err(ExecRefusal::unsupported(format!("unsupported tool/op: {surface}/{op}"))),
        }
    }
}
