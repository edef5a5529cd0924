//! Nonce replay and TOCTOU guards.
//!
//! `ReplayGuard` owns the nonces admitted during one run. It is handed to
//! the pipeline by reference, so two runs never share replay state unless
//! the caller seeds one from the other's registry.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::canonical::sha256_text_hex;
use crate::codes::GuardCode;

pub const FILE_ATTESTATION_SCHEMA_ID: &str = "MVM.FILE";
pub const FILE_ATTESTATION_VERSION: &str = "0.1.0";

/// Zone label for a path inside the repository.
pub const ZONE_WORKSPACE: &str = "WORKSPACE";
/// Path placeholder for an attestation target outside the repository.
pub const OUTSIDE_REPO_MARKER: &str = "[OUTSIDE_REPO]";
pub const ABSOLUTE_REDACTED: &str = "[ABSOLUTE_REDACTED]";

/// Live-mode directive: bind to the last admitted nonce.
pub const REUSE_LAST_NONCE: &str = "REUSE_LAST_NONCE";
/// Mock-mode prefix for nonces pinned by a fixture.
pub const FIXTURE_NONCE_PREFIX: &str = "FIXTURE:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardRejection {
    pub code: GuardCode,
    pub reason: String,
}

impl fmt::Display for GuardRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.reason)
    }
}

/// One line of the nonce registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceRecord {
    pub nonce: String,
    pub intent_hash: Option<String>,
    pub fixture_id: String,
    pub lane_id: Option<String>,
    pub ts: String,
}

#[derive(Debug, Clone, Default)]
pub struct ReplayGuard {
    seen: HashSet<String>,
    last_admitted: Option<String>,
}

impl ReplayGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from previously registered nonces.
    pub fn with_seen<I, S>(nonces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            seen: nonces.into_iter().map(Into::into).collect(),
            last_admitted: None,
        }
    }

    pub fn contains(&self, nonce: &str) -> bool {
        self.seen.contains(nonce)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn last_admitted(&self) -> Option<&str> {
        self.last_admitted.as_deref()
    }

    /// Remember the nonce of a fixture that went on to execute.
    pub fn note_admitted(&mut self, nonce: &str) {
        self.last_admitted = Some(nonce.to_string());
    }

    /// Refuse an empty or reused nonce; otherwise record it and return the
    /// registry line to persist.
    pub fn check_and_record(&mut self, record: NonceRecord) -> Result<NonceRecord, GuardRejection> {
        if record.nonce.is_empty() {
            return Err(GuardRejection {
                code: GuardCode::NonceReplay,
                reason: "attestation nonce missing".to_string(),
            });
        }
        if !self.seen.insert(record.nonce.clone()) {
            tracing::debug!(
                fixture_id = %record.fixture_id,
                code = GuardCode::NonceReplay.as_str(),
                "nonce already admitted"
            );
            return Err(GuardRejection {
                code: GuardCode::NonceReplay,
                reason: "attestation nonce already used".to_string(),
            });
        }
        Ok(record)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttestMode {
    Mock,
    Live,
}

impl AttestMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AttestMode::Mock => "mock",
            AttestMode::Live => "live",
        }
    }

    pub fn is_live(self) -> bool {
        self == AttestMode::Live
    }
}

/// Nonce a fixture's tokens and permit must bind to.
///
/// Mock runs derive it from the intent hash, so reruns bind identically.
/// Live runs draw a fresh UUID unless the fixture forces one. `None` only
/// when a live fixture asks to reuse a nonce and none was admitted yet.
pub fn binding_nonce(
    mode: AttestMode,
    intent_hash: &str,
    force_nonce: Option<&str>,
    guard: &ReplayGuard,
) -> Option<String> {
    match mode {
        AttestMode::Live => match force_nonce.filter(|n| !n.is_empty()) {
            Some(REUSE_LAST_NONCE) => guard.last_admitted().map(str::to_string),
            Some(forced) => Some(forced.to_string()),
            None => Some(uuid::Uuid::new_v4().to_string()),
        },
        AttestMode::Mock => match force_nonce {
            Some(forced) if forced.starts_with(FIXTURE_NONCE_PREFIX) => Some(forced.to_string()),
            _ => Some(deterministic_nonce(intent_hash)),
        },
    }
}

pub fn deterministic_nonce(intent_hash: &str) -> String {
    sha256_text_hex(&format!("nonce:{intent_hash}"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIdentity {
    pub absolute_path: String,
    pub requested_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileClassification {
    pub zone: String,
    pub is_symlink: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIntegrity {
    pub content_hash: Option<String>,
    pub size_bytes: Option<u64>,
}

/// `MVM.FILE`: what a live probe saw at one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttestation {
    pub schema_id: String,
    pub version: String,
    pub op: String,
    pub zone: String,
    pub path: String,
    pub exists: bool,
    pub identity: FileIdentity,
    pub classification: FileClassification,
    pub integrity: FileIntegrity,
}

impl FileAttestation {
    /// Fields a TOCTOU recheck compares.
    fn fingerprint(&self) -> (&str, &str, bool, Option<&str>, Option<u64>) {
        (
            &self.zone,
            &self.path,
            self.classification.is_symlink,
            self.integrity.content_hash.as_deref(),
            self.integrity.size_bytes,
        )
    }
}

/// Probe of real filesystem state. Implementations must fail closed on
/// symlinks: zone `UNKNOWN`, no content hash.
pub trait LiveAttestation {
    fn file(&self, op: &str, path: &str) -> FileAttestation;
}

/// Re-attest the path of an admitted file action and compare with the
/// snapshot taken at admission.
pub fn toctou_recheck<A: LiveAttestation + ?Sized>(
    probe: &A,
    snapshot: &FileAttestation,
    op: &str,
    path: &str,
) -> Result<FileAttestation, (FileAttestation, GuardRejection)> {
    let recheck = probe.file(op, path);
    if recheck.fingerprint() == snapshot.fingerprint() {
        return Ok(recheck);
    }
    tracing::warn!(path, code = GuardCode::ToctouDetected.as_str(), "file changed after admission");
    Err((
        recheck,
        GuardRejection {
            code: GuardCode::ToctouDetected,
            reason: "file identity changed between attestation and execution".to_string(),
        },
    ))
}
