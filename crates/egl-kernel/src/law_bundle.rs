//! Law bundle: the hashed set of policy, authority-profile and surface-map
//! files a run was governed by.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::canonical::{SHA256_PREFIX, sha256_tagged, sha256_text_hex, to_canonical_value};
use crate::error::EglError;

pub const LAW_BUNDLE_SCHEMA_ID: &str = "EGL.LAW_BUNDLE";
pub const LAW_BUNDLE_VERSION: &str = "0.1.0";

/// Strip a BOM, use LF endings and drop trailing spaces and tabs per line.
pub fn canonicalize_text(text: &str) -> String {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .split('\n')
        .map(|line| line.trim_end_matches([' ', '\t']))
        .collect::<Vec<_>>()
        .join("\n")
}

/// `sha256:<hex>` of the canonical text.
pub fn text_sha256(text: &str) -> String {
    format!("{SHA256_PREFIX}{}", sha256_text_hex(&canonicalize_text(text)))
}

/// Relative path to file hash, sorted by path.
pub type ComponentHashes = BTreeMap<String, String>;

fn hash_files<'a>(files: impl IntoIterator<Item = (&'a str, &'a str)>) -> ComponentHashes {
    files
        .into_iter()
        .map(|(path, text)| (path.to_string(), text_sha256(text)))
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LawComponents {
    pub policies: ComponentHashes,
    pub authority_profiles: ComponentHashes,
    pub tool_surface_map: ComponentHashes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LawBundle {
    pub schema_id: String,
    pub version: String,
    pub components: LawComponents,
}

/// Digests a fixture binds to. All `sha256:<hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LawBinding {
    pub law_bundle_sha256: String,
    pub policy_bundle_sha256: String,
    pub authority_profiles_sha256: String,
    pub tool_surface_map_sha256: String,
}

impl LawBundle {
    pub fn new(components: LawComponents) -> Self {
        Self {
            schema_id: LAW_BUNDLE_SCHEMA_ID.to_string(),
            version: LAW_BUNDLE_VERSION.to_string(),
            components,
        }
    }

    /// Hash each `(relative path, file text)` pair into a bundle.
    pub fn from_texts<'a>(
        policies: impl IntoIterator<Item = (&'a str, &'a str)>,
        authority_profiles: impl IntoIterator<Item = (&'a str, &'a str)>,
        tool_surface_map: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        Self::new(LawComponents {
            policies: hash_files(policies),
            authority_profiles: hash_files(authority_profiles),
            tool_surface_map: hash_files(tool_surface_map),
        })
    }

    pub fn sha256(&self) -> Result<String, EglError> {
        Ok(sha256_tagged(&to_canonical_value(self)?))
    }

    /// The surface-map digest is the first map file's hash; with no map
    /// file it falls back to the hash of the empty component.
    pub fn binding(&self) -> Result<LawBinding, EglError> {
        let map = &self.components.tool_surface_map;
        let tool_surface_map_sha256 = match map.values().next() {
            Some(hash) => hash.clone(),
            None => sha256_tagged(&to_canonical_value(map)?),
        };
        Ok(LawBinding {
            law_bundle_sha256: self.sha256()?,
            policy_bundle_sha256: sha256_tagged(&to_canonical_value(&self.components.policies)?),
            authority_profiles_sha256: sha256_tagged(&to_canonical_value(&self.components.authority_profiles)?),
            tool_surface_map_sha256,
        })
    }
}
