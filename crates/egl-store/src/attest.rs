//! Live filesystem attestation.

use std::fs;
use std::path::{Path, PathBuf};

use egl_kernel::canonical::sha256_bytes_hex;
use egl_kernel::compiler::Plan;
use egl_kernel::guard::{
    ABSOLUTE_REDACTED, FILE_ATTESTATION_SCHEMA_ID, FILE_ATTESTATION_VERSION, FileAttestation, FileClassification,
    FileIdentity, FileIntegrity, OUTSIDE_REPO_MARKER, ZONE_WORKSPACE,
};
use egl_kernel::intent::{ActionBody, ZONE_UNKNOWN};
use egl_kernel::paths::{has_abs_windows_path, safe_rel_path, to_posix};
use egl_kernel::LiveAttestation;
use serde::Serialize;

pub const LIVE_BUNDLE_SCHEMA_ID: &str = "EGL.ATTESTATION_LIVE_BUNDLE";

/// Probes real files under one repository root.
#[derive(Debug, Clone)]
pub struct FsAttestation {
    repo_root: PathBuf,
}

impl FsAttestation {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    fn resolve(&self, rel: Option<&str>, input: &str) -> PathBuf {
        match rel {
            Some(rel) => self.repo_root.join(rel),
            None if Path::new(input).is_absolute() => PathBuf::from(input),
            None => self.repo_root.join(input),
        }
    }
}

fn redact_if_absolute(input: &str) -> String {
    if input.starts_with('/') || has_abs_windows_path(input) {
        ABSOLUTE_REDACTED.to_string()
    } else {
        to_posix(input)
    }
}

fn attestation(op: &str, zone: &str, path: String, requested: String, exists: bool, is_symlink: bool) -> FileAttestation {
    FileAttestation {
        schema_id: FILE_ATTESTATION_SCHEMA_ID.to_string(),
        version: FILE_ATTESTATION_VERSION.to_string(),
        op: op.to_string(),
        zone: zone.to_string(),
        path: path.clone(),
        exists,
        identity: FileIdentity {
            absolute_path: path,
            requested_path: requested,
        },
        classification: FileClassification {
            zone: zone.to_string(),
            is_symlink,
        },
        integrity: FileIntegrity {
            content_hash: None,
            size_bytes: None,
        },
    }
}

impl LiveAttestation for FsAttestation {
    fn file(&self, op: &str, path: &str) -> FileAttestation {
        let requested = redact_if_absolute(path);
        let rel = safe_rel_path(&self.repo_root, &to_posix(path));
        let resolved = self.resolve(rel.as_deref(), path);
        let zone = if rel.is_some() { ZONE_WORKSPACE } else { ZONE_UNKNOWN };
        let normalized = rel.unwrap_or_else(|| OUTSIDE_REPO_MARKER.to_string());

        let Ok(meta) = fs::symlink_metadata(&resolved) else {
            return attestation(op, zone, normalized, requested, false, false);
        };

        if meta.file_type().is_symlink() {
            tracing::warn!(path = %normalized, "symlink at attestation time; failing closed");
            return attestation(op, ZONE_UNKNOWN, normalized, requested, true, true);
        }

        let mut out = attestation(op, zone, normalized, requested, meta.is_file() || meta.is_dir(), false);
        if meta.is_file() {
            match fs::read(&resolved) {
                Ok(bytes) => {
                    out.integrity.content_hash = Some(sha256_bytes_hex(&bytes));
                    out.integrity.size_bytes = Some(meta.len());
                }
                Err(err) => {
                    tracing::warn!(path = %out.path, error = %err, "unreadable file at attestation time");
                    out.exists = false;
                }
            }
        }
        out
    }
}

/// Live probe results for a plan. Only file actions are probed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiveAttestationBundle {
    pub schema_id: String,
    pub version: String,
    pub entries: Vec<FileAttestation>,
}

impl LiveAttestationBundle {
    pub fn probe<A: LiveAttestation + ?Sized>(probe: &A, plan: &Plan) -> Self {
        let entries = plan
            .actions
            .iter()
            .filter_map(|action| match &action.body {
                ActionBody::File { file } => {
                    let op = if file.op.is_empty() { "unknown" } else { file.op.as_str() };
                    Some(probe.file(op, &file.path))
                }
                _ => None,
            })
            .collect();
        Self {
            schema_id: LIVE_BUNDLE_SCHEMA_ID.to_string(),
            version: FILE_ATTESTATION_VERSION.to_string(),
            entries,
        }
    }

    /// The first file entry, the snapshot a TOCTOU recheck compares with.
    pub fn file_entry(&self) -> Option<&FileAttestation> {
        self.entries.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_repo(prefix: &str) -> PathBuf {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be after unix epoch")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("egl-attest-{prefix}-{}-{unique}", std::process::id()));
        fs::create_dir_all(dir.join("sandbox")).expect("create repo");
        dir
    }

    #[test]
    fn regular_file_is_measured() {
        let repo = temp_repo("file");
        fs::write(repo.join("sandbox/a.txt"), "SAFE\n").expect("write");
        let probe = FsAttestation::new(&repo);
        let att = probe.file("read", "sandbox/a.txt");
        assert_eq!(att.zone, ZONE_WORKSPACE);
        assert_eq!(att.path, "sandbox/a.txt");
        assert!(att.exists);
        assert_eq!(att.integrity.size_bytes, Some(5));
        assert_eq!(att.integrity.content_hash, Some(sha256_bytes_hex(b"SAFE\n")));
        let _ = fs::remove_dir_all(repo);
    }

    #[test]
    fn missing_file_is_workspace_but_absent() {
        let repo = temp_repo("missing");
        let att = FsAttestation::new(&repo).file("read", "sandbox/none.txt");
        assert_eq!(att.zone, ZONE_WORKSPACE);
        assert!(!att.exists);
        assert_eq!(att.integrity.content_hash, None);
        let _ = fs::remove_dir_all(repo);
    }

    #[test]
    fn outside_repo_is_unknown_and_redacted() {
        let repo = temp_repo("outside");
        let att = FsAttestation::new(&repo).file("read", "/etc/hostname");
        assert_eq!(att.zone, ZONE_UNKNOWN);
        assert_eq!(att.path, OUTSIDE_REPO_MARKER);
        assert_eq!(att.identity.requested_path, ABSOLUTE_REDACTED);
        let att = FsAttestation::new(&repo).file("read", "../escape.txt");
        assert_eq!(att.path, OUTSIDE_REPO_MARKER);
        assert_eq!(att.identity.requested_path, "../escape.txt");
        let _ = fs::remove_dir_all(repo);
    }

    #[cfg(unix)]
    #[test]
    fn symlink_fails_closed() {
        let repo = temp_repo("symlink");
        fs::write(repo.join("sandbox/secret.txt"), "SECRET\n").expect("write");
        std::os::unix::fs::symlink("secret.txt", repo.join("sandbox/target.txt")).expect("symlink");
        let att = FsAttestation::new(&repo).file("read", "sandbox/target.txt");
        assert_eq!(att.zone, ZONE_UNKNOWN);
        assert!(att.classification.is_symlink);
        assert_eq!(att.integrity.content_hash, None);
        assert_eq!(att.path, "sandbox/target.txt");
        let _ = fs::remove_dir_all(repo);
    }
}
