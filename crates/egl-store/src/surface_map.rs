//! Tool surface map loading from TOML.

use std::fs;
use std::path::Path;

use egl_kernel::{ToolSurfaceMap, ToolSurfaceRegistry};

use crate::error::StoreError;

/// A validated registry plus the text it came from (the text feeds the
/// law bundle).
#[derive(Debug, Clone)]
pub struct LoadedSurfaceMap {
    pub registry: ToolSurfaceRegistry,
    pub text: String,
}

pub fn parse_tool_surface_map(text: &str, path: &Path) -> Result<ToolSurfaceRegistry, StoreError> {
    let map: ToolSurfaceMap = toml::from_str(text).map_err(|source| StoreError::ParseToml {
        path: path.display().to_string(),
        source,
    })?;
    Ok(ToolSurfaceRegistry::from_map(map)?)
}

pub fn load_tool_surface_map(path: &Path) -> Result<LoadedSurfaceMap, StoreError> {
    let text = fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
    let registry = parse_tool_surface_map(&text, path)?;
    tracing::debug!(map = %path.display(), version = registry.version(), "tool surface map loaded");
    Ok(LoadedSurfaceMap { registry, text })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAP: &str = r#"
schema_id = "EGL.TOOL_SURFACE_MAP"
version = "1.1.1"

[[surfaces]]
surface_id = "file.write"
kind = "file"
schema_ref = "schemas/file.write.json"

[[surfaces]]
surface_id = "file.read"
kind = "file"
schema_ref = "schemas/file.read.json"
"#;

    #[test]
    fn parses_and_sorts_surfaces() {
        let registry = parse_tool_surface_map(MAP, Path::new("map.toml")).expect("parse");
        let ids: Vec<&str> = registry.surfaces().map(|s| s.surface_id.as_str()).collect();
        assert_eq!(ids, vec!["file.read", "file.write"]);
        assert!(registry.is_mapped("file.write"));
        assert!(!registry.is_mapped("process.unknown"));
    }

    #[test]
    fn empty_surface_list_is_rejected() {
        let text = "schema_id = \"EGL.TOOL_SURFACE_MAP\"\nversion = \"1\"\nsurfaces = []\n";
        match parse_tool_surface_map(text, Path::new("map.toml")) {
            Err(StoreError::Kernel(_)) => {}
            other => panic!("expected registry error, got {other:?}"),
        }
    }

    #[test]
    fn wrong_schema_is_rejected() {
        let text = MAP.replace("EGL.TOOL_SURFACE_MAP", "OTHER");
        assert!(parse_tool_surface_map(&text, Path::new("map.toml")).is_err());
    }
}
