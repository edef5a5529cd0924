//! Tool surface registry: the allow-list of surfaces the compiler may emit.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::EglError;

pub const TOOL_SURFACE_MAP_SCHEMA_ID: &str = "EGL.TOOL_SURFACE_MAP";

/// Surface that triggers the supply-chain gate.
pub const SKILL_INSTALL_SURFACE: &str = "skill.install";

/// Surface map document as read from disk. Every field is optional here so
/// that validation, not deserialization, reports what is missing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolSurfaceMap {
    pub schema_id: Option<String>,
    pub version: Option<String>,
    #[serde(default)]
    pub surfaces: Vec<RawSurfaceEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSurfaceEntry {
    pub surface_id: Option<String>,
    pub kind: Option<String>,
    pub schema_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SurfaceEntry {
    pub surface_id: String,
    pub kind: String,
    pub schema_ref: String,
}

/// Validated registry keyed by surface id.
#[derive(Debug, Clone, Default)]
pub struct ToolSurfaceRegistry {
    version: String,
    surfaces: BTreeMap<String, SurfaceEntry>,
}

impl ToolSurfaceRegistry {
    /// Validate a surface map: schema id must match, version must be set,
    /// and at least one complete surface entry is required.
    pub fn from_map(map: ToolSurfaceMap) -> Result<Self, EglError> {
        if map.schema_id.as_deref() != Some(TOOL_SURFACE_MAP_SCHEMA_ID) {
            return Err(EglError::InvalidRegistry {
                description: "tool surface map schema_id mismatch".to_string(),
            });
        }
        let version = match map.version {
            Some(v) if !v.is_empty() => v,
            _ => {
                return Err(EglError::InvalidRegistry {
                    description: "tool surface map missing version".to_string(),
                });
            }
        };
        if map.surfaces.is_empty() {
            return Err(EglError::InvalidRegistry {
                description: "tool surface map must declare at least one surface".to_string(),
            });
        }

        let mut surfaces = BTreeMap::new();
        for raw in map.surfaces {
            let non_empty = |v: Option<String>| v.filter(|s| !s.is_empty());
            let (Some(surface_id), Some(kind), Some(schema_ref)) = (
                non_empty(raw.surface_id),
                non_empty(raw.kind),
                non_empty(raw.schema_ref),
            ) else {
                return Err(EglError::InvalidRegistry {
                    description: "tool surface entries require surface_id, kind, schema_ref"
                        .to_string(),
                });
            };
            surfaces.insert(
                surface_id.clone(),
                SurfaceEntry {
                    surface_id,
                    kind,
                    schema_ref,
                },
            );
        }

        Ok(Self { version, surfaces })
    }

    /// A registry with no surfaces. Compiling against it refuses everything.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_mapped(&self, surface_id: &str) -> bool {
        self.surfaces.contains_key(surface_id)
    }

    pub fn entry(&self, surface_id: &str) -> Option<&SurfaceEntry> {
        self.surfaces.get(surface_id)
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Entries sorted by surface id.
    pub fn surfaces(&self) -> impl Iterator<Item = &SurfaceEntry> {
        self.surfaces.values()
    }
}
