//! Workspace configuration (`egl.toml`).

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

pub const CONFIG_FILE: &str = "egl.toml";
pub const DEFAULT_TOOL_SURFACE_MAP: &str = "harness/tool_surface_map.toml";
pub const DEFAULT_OUT_DIR: &str = "out";
pub const DEFAULT_MOCK_NOW: &str = "2026-02-13T00:00:00Z";

/// Repo-relative files hashed into the law bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LawBundleFiles {
    pub policies: Vec<String>,
    pub authority_profiles: Vec<String>,
    pub tool_surface_map: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EglConfig {
    pub tool_surface_map: String,
    pub out_dir: String,
    pub mock_now: String,
    pub law_bundle: LawBundleFiles,
}

impl Default for EglConfig {
    fn default() -> Self {
        Self {
            tool_surface_map: DEFAULT_TOOL_SURFACE_MAP.to_string(),
            out_dir: DEFAULT_OUT_DIR.to_string(),
            mock_now: DEFAULT_MOCK_NOW.to_string(),
            law_bundle: LawBundleFiles::default(),
        }
    }
}

impl EglConfig {
    /// Read `egl.toml` under `repo_root`; defaults when the file is absent.
    pub fn load(repo_root: &Path) -> Result<Self, StoreError> {
        let path = repo_root.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(&path).map_err(|e| StoreError::io(&path, e))?;
        Self::parse(&text, &path)
    }

    pub fn parse(text: &str, path: &Path) -> Result<Self, StoreError> {
        toml::from_str(text).map_err(|source| StoreError::ParseToml {
            path: path.display().to_string(),
            source,
        })
    }

    /// Law-bundle files, with the surface map standing in when no map file
    /// is listed.
    pub fn law_bundle_files(&self) -> LawBundleFiles {
        let mut files = self.law_bundle.clone();
        if files.tool_surface_map.is_empty() {
            files.tool_surface_map.push(self.tool_surface_map.clone());
        }
        files
    }
}
