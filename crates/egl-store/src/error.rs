//! Storage faults.

use std::path::Path;

use egl_kernel::EglError;

use crate::jsonl::JsonlError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid json at {path}: {source}")]
    ParseJson {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid toml at {path}: {source}")]
    ParseToml {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("lock busy: {lock_path}")]
    LockBusy { lock_path: String },

    #[error("output directory already exists: {path}")]
    OutputExists { path: String },

    #[error(transparent)]
    Jsonl(#[from] JsonlError),

    #[error(transparent)]
    Kernel(#[from] EglError),

    #[error("{0}")]
    Contract(String),
}

impl StoreError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}
