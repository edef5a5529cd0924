//! Deterministic sandbox state for runs that execute real file actions.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::StoreError;

pub const SANDBOX_RESET_SCHEMA_ID: &str = "EGL.SANDBOX_RESET";
pub const TOCTOU_PATHS_SCHEMA_ID: &str = "EGL.TOCTOU_PATHS";
pub const TOCTOU_SWAP_SCHEMA_ID: &str = "EGL.TOCTOU_SWAP";
pub const SANDBOX_VERSION: &str = "0.1.0";

pub const TMP_ROOT: &str = "sandbox/_th_tmp";
pub const SEED_FILE: &str = "sandbox/_th_tmp/seed.txt";
pub const SEED_TEXT: &str = "EGL_SANDBOX_SEED:seed.txt";
pub const TOCTOU_DIR: &str = "sandbox/_th_tmp/toctou_symlink_swap";
pub const TOCTOU_TARGET: &str = "sandbox/_th_tmp/toctou_symlink_swap/target.txt";
pub const DRAFTS_DIR: &str = "sandbox/_publish_drafts";

const SAFE_TEXT: &str = "SAFE\n";
const SECRET_TEXT: &str = "SECRET\n";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SandboxReset {
    pub schema_id: String,
    pub version: String,
    pub root: String,
    pub seeded_files: Vec<String>,
    pub cleaned_roots: Vec<String>,
}

fn recreate_dir(path: &Path) -> Result<(), StoreError> {
    if path.exists() {
        fs::remove_dir_all(path).map_err(|e| StoreError::io(path, e))?;
    }
    fs::create_dir_all(path).map_err(|e| StoreError::io(path, e))
}

fn write_file(path: &Path, text: &str) -> Result<(), StoreError> {
    fs::write(path, text).map_err(|e| StoreError::io(path, e))
}

/// Wipe and reseed the scratch tree and the drafts directory.
pub fn reset_sandbox(repo_root: &Path) -> Result<SandboxReset, StoreError> {
    recreate_dir(&repo_root.join(TMP_ROOT))?;
    write_file(&repo_root.join(SEED_FILE), SEED_TEXT)?;
    let toctou = repo_root.join(TOCTOU_DIR);
    fs::create_dir_all(&toctou).map_err(|e| StoreError::io(&toctou, e))?;
    write_file(&repo_root.join(TOCTOU_TARGET), SAFE_TEXT)?;
    recreate_dir(&repo_root.join(DRAFTS_DIR))?;
    tracing::info!(root = TMP_ROOT, "sandbox reset");

    Ok(SandboxReset {
        schema_id: SANDBOX_RESET_SCHEMA_ID.to_string(),
        version: SANDBOX_VERSION.to_string(),
        root: TMP_ROOT.to_string(),
        seeded_files: vec![SEED_FILE.to_string(), TOCTOU_TARGET.to_string()],
        cleaned_roots: vec![format!("{DRAFTS_DIR}/")],
    })
}

/// Files used to stage a symlink swap against one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToctouPaths {
    pub dir: PathBuf,
    pub target: PathBuf,
    pub secret: PathBuf,
    pub target_rel: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToctouPathsRecord {
    pub schema_id: String,
    pub version: String,
    pub target_path: String,
}

impl ToctouPaths {
    pub fn record(&self) -> ToctouPathsRecord {
        ToctouPathsRecord {
            schema_id: TOCTOU_PATHS_SCHEMA_ID.to_string(),
            version: SANDBOX_VERSION.to_string(),
            target_path: self.target_rel.clone(),
        }
    }
}

/// Write `safe.txt`, `secret.txt` and a `target.txt` copy of the safe file.
pub fn prepare_toctou(repo_root: &Path) -> Result<ToctouPaths, StoreError> {
    let dir = repo_root.join(TOCTOU_DIR);
    fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
    let safe = dir.join("safe.txt");
    let secret = dir.join("secret.txt");
    let target = dir.join("target.txt");
    write_file(&safe, SAFE_TEXT)?;
    write_file(&secret, SECRET_TEXT)?;
    if target.symlink_metadata().is_ok() {
        fs::remove_file(&target).map_err(|e| StoreError::io(&target, e))?;
    }
    fs::copy(&safe, &target).map_err(|e| StoreError::io(&target, e))?;
    Ok(ToctouPaths {
        dir,
        target,
        secret,
        target_rel: TOCTOU_TARGET.to_string(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SwapMethod {
    Symlink,
    Replace,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToctouSwapRecord {
    pub schema_id: String,
    pub version: String,
    pub method: SwapMethod,
    pub target_path: String,
}

/// Replace the target with a symlink to the secret file. Where symlinks
/// are unavailable the secret's bytes are copied over instead.
pub fn simulate_toctou_swap(paths: &ToctouPaths) -> Result<ToctouSwapRecord, StoreError> {
    if paths.target.symlink_metadata().is_ok() {
        fs::remove_file(&paths.target).map_err(|e| StoreError::io(&paths.target, e))?;
    }
    let method = match symlink_file(Path::new("secret.txt"), &paths.target) {
        Ok(()) => SwapMethod::Symlink,
        Err(err) => {
            tracing::warn!(error = %err, "symlink unavailable; swapping file contents");
            fs::copy(&paths.secret, &paths.target).map_err(|e| StoreError::io(&paths.target, e))?;
            SwapMethod::Replace
        }
    };
    Ok(ToctouSwapRecord {
        schema_id: TOCTOU_SWAP_SCHEMA_ID.to_string(),
        version: SANDBOX_VERSION.to_string(),
        method,
        target_path: paths.target_rel.clone(),
    })
}

#[cfg(unix)]
fn symlink_file(original: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(original, link)
}

#[cfg(windows)]
fn symlink_file(original: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_file(original, link)
}

#[cfg(not(any(unix, windows)))]
fn symlink_file(_original: &Path, _link: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(std::io::ErrorKind::Unsupported, "symlinks unsupported"))
}
