//! Reads the configured law files and hashes them into a bundle.

use std::fs;
use std::path::Path;

use egl_kernel::LawBundle;

use crate::config::LawBundleFiles;
use crate::error::StoreError;

fn read_all(repo_root: &Path, rel_paths: &[String]) -> Result<Vec<(String, String)>, StoreError> {
    rel_paths
        .iter()
        .map(|rel| {
            let path = repo_root.join(rel);
            let text = fs::read_to_string(&path).map_err(|e| StoreError::io(&path, e))?;
            Ok((rel.replace('\\', "/"), text))
        })
        .collect()
}

fn pairs(files: &[(String, String)]) -> impl Iterator<Item = (&str, &str)> {
    files.iter().map(|(path, text)| (path.as_str(), text.as_str()))
}

/// Every listed file must exist; a missing law file is a fault, never an
/// empty component.
pub fn load_law_bundle(repo_root: &Path, files: &LawBundleFiles) -> Result<LawBundle, StoreError> {
    let policies = read_all(repo_root, &files.policies)?;
    let authority_profiles = read_all(repo_root, &files.authority_profiles)?;
    let tool_surface_map = read_all(repo_root, &files.tool_surface_map)?;
    Ok(LawBundle::from_texts(
        pairs(&policies),
        pairs(&authority_profiles),
        pairs(&tool_surface_map),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use egl_kernel::law_bundle::text_sha256;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_repo() -> PathBuf {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be after unix epoch")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("egl-law-{}-{unique}", std::process::id()));
        fs::create_dir_all(dir.join("policies")).expect("mkdir");
        fs::create_dir_all(dir.join("harness")).expect("mkdir");
        dir
    }

    #[test]
    fn hashes_listed_files_and_fails_on_missing() {
        let repo = temp_repo();
        fs::write(repo.join("policies/default.toml"), "deny = []\r\n").expect("write");
        fs::write(repo.join("harness/map.toml"), "version = \"1\"\n").expect("write");
        let files = LawBundleFiles {
            policies: vec!["policies/default.toml".to_string()],
            authority_profiles: Vec::new(),
            tool_surface_map: vec!["harness/map.toml".to_string()],
        };
        let bundle = load_law_bundle(&repo, &files).expect("bundle");
        assert_eq!(
            bundle.components.policies.get("policies/default.toml"),
            Some(&text_sha256("deny = []\n"))
        );
        let binding = bundle.binding().expect("binding");
        assert_eq!(binding.tool_surface_map_sha256, text_sha256("version = \"1\"\n"));

        let missing = LawBundleFiles {
            authority_profiles: vec!["authority/none.toml".to_string()],
            ..files
        };
        assert!(matches!(load_law_bundle(&repo, &missing), Err(StoreError::Io { .. })));
        let _ = fs::remove_dir_all(repo);
    }
}
