//! Canonical JSON artifact files for one run.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use egl_kernel::canonical::{canonical_json_string, sha256_tagged, to_canonical_value};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::error::StoreError;

/// Writes artifacts under one directory. Every file is canonical JSON with
/// no trailing newline; each write returns the `sha256:` digest of the
/// value it wrote.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    root: PathBuf,
}

impl ArtifactWriter {
    /// Create a fresh output directory. An existing directory is an error:
    /// run artifacts are never overwritten.
    pub fn create_new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        if root.exists() {
            return Err(StoreError::OutputExists {
                path: root.display().to_string(),
            });
        }
        fs::create_dir_all(&root).map_err(|e| StoreError::io(&root, e))?;
        Ok(Self { root })
    }

    /// Writer over an existing or not-yet-created directory.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn child(&self, rel: impl AsRef<Path>) -> Self {
        Self {
            root: self.root.join(rel),
        }
    }

    pub fn path(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.root.join(rel)
    }

    pub fn exists(&self, rel: impl AsRef<Path>) -> bool {
        self.root.join(rel).is_file()
    }

    pub fn write_value(&self, rel: impl AsRef<Path>, value: &Value) -> Result<String, StoreError> {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        fs::write(&path, canonical_json_string(value)).map_err(|e| StoreError::io(&path, e))?;
        tracing::debug!(artifact = %path.display(), "artifact written");
        Ok(sha256_tagged(value))
    }

    /// Write already-canonical text verbatim.
    pub fn write_text(&self, rel: impl AsRef<Path>, text: &str) -> Result<(), StoreError> {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        fs::write(&path, text).map_err(|e| StoreError::io(&path, e))
    }

    pub fn write<T: Serialize + ?Sized>(&self, rel: impl AsRef<Path>, record: &T) -> Result<String, StoreError> {
        let value = to_canonical_value(record)?;
        self.write_value(rel, &value)
    }

    pub fn read_value(&self, rel: impl AsRef<Path>) -> Result<Value, StoreError> {
        let path = self.root.join(rel);
        let text = fs::read_to_string(&path).map_err(|e| StoreError::io(&path, e))?;
        serde_json::from_str(&text).map_err(|source| StoreError::ParseJson {
            path: path.display().to_string(),
            source,
        })
    }
}

fn absolute_path_leak_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[A-Za-z]:\\|\\\\\?\\|\\\\[A-Za-z0-9_.-]+\\|/Users/|/home/")
            .expect("absolute-path regex must compile")
    })
}

/// Drive, UNC or Unix home-directory paths anywhere in the text.
pub fn contains_absolute_path_leak(text: &str) -> bool {
    absolute_path_leak_re().is_match(text)
}

/// Every `.json`/`.jsonl` file under `roots` whose text leaks an absolute
/// path, as paths relative to the root they were found in. Missing roots
/// are skipped.
pub fn scan_for_path_leaks(roots: &[PathBuf]) -> Result<Vec<String>, StoreError> {
    let mut leaks = Vec::new();
    for root in roots {
        if !root.exists() {
            continue;
        }
        for file in list_files_recursive(root)? {
            let is_json = matches!(
                file.extension().and_then(|e| e.to_str()),
                Some("json") | Some("jsonl")
            );
            if !is_json {
                continue;
            }
            let text = fs::read_to_string(&file).map_err(|e| StoreError::io(&file, e))?;
            if contains_absolute_path_leak(&text) {
                let rel = file.strip_prefix(root).unwrap_or(&file);
                leaks.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
    }
    Ok(leaks)
}

/// Regular files under `root`, sorted.
pub fn list_files_recursive(root: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = fs::read_dir(&dir).map_err(|e| StoreError::io(&dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&dir, e))?;
            let file_type = entry.file_type().map_err(|e| StoreError::io(&entry.path(), e))?;
            if file_type.is_dir() {
                stack.push(entry.path());
            } else if file_type.is_file() {
                out.push(entry.path());
            }
        }
    }
    out.sort();
    Ok(out)
}
