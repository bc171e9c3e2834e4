//! Service and shared-module discovery on disk

use crate::error::{Error, Result};
use levelrun::ServiceDescriptor;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Extension of engine definition files
pub const DEFINITION_EXTENSION: &str = "tf";

/// Find every service directly under `root`
///
/// A service is a non-hidden directory holding at least one definition
/// file. Dependencies come from `dependency_map`; services missing from
/// the map have none.
pub fn discover_services(
    root: &Path,
    dependency_map: &BTreeMap<String, Vec<String>>,
) -> Result<BTreeMap<String, ServiceDescriptor>> {
    if !root.is_dir() {
        return Err(Error::RootNotFound(root.to_path_buf()));
    }

    let mut services = BTreeMap::new();
    for dir in child_directories(root)? {
        let Some(id) = dir.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if definition_files(&dir).is_empty() {
            log::debug!("Skipping {id}: no .{DEFINITION_EXTENSION} files");
            continue;
        }

        let deps = dependency_map.get(id).map_or(&[][..], Vec::as_slice);
        services.insert(id.to_string(), ServiceDescriptor::new(id, dir.clone(), deps));
    }

    log::debug!("Discovered {} services under {}", services.len(), root.display());
    Ok(services)
}

/// Names of the shared modules under `modules_root`
///
/// A missing modules directory is an empty registry.
pub fn discover_modules(modules_root: &Path) -> Result<BTreeSet<String>> {
    if !modules_root.is_dir() {
        log::debug!("No modules directory at {}", modules_root.display());
        return Ok(BTreeSet::new());
    }

    Ok(child_directories(modules_root)?
        .iter()
        .filter_map(|dir| dir.file_name().and_then(|n| n.to_str()))
        .map(str::to_string)
        .collect())
}

/// Definition files directly inside `dir`, sorted
pub fn definition_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|path| path.extension().is_some_and(|ext| ext == DEFINITION_EXTENSION))
        .collect();
    files.sort();
    files
}

fn child_directories(root: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        if !entry.file_type().is_dir() || is_hidden(&entry) {
            continue;
        }
        dirs.push(entry.into_path());
    }
    Ok(dirs)
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.file_name().to_str().is_some_and(|name| name.starts_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "").unwrap();
    }

    #[test]
    fn test_discover_services_requires_definition_files() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "network/main.tf");
        touch(temp.path(), "compute/main.tf");
        touch(temp.path(), "docs/README.md");
        touch(temp.path(), ".terraform/providers.tf");
        touch(temp.path(), "loose.tf");

        let mut map = BTreeMap::new();
        map.insert("compute".to_string(), vec!["network".to_string()]);

        let services = discover_services(temp.path(), &map).unwrap();
        assert_eq!(
            services.keys().collect::<Vec<_>>(),
            vec!["compute", "network"]
        );
        assert_eq!(services["compute"].dependencies, vec!["network"]);
        assert!(services["network"].dependencies.is_empty());
        assert_eq!(services["network"].path, temp.path().join("network"));
    }

    #[test]
    fn test_discover_services_missing_root() {
        let err = discover_services(Path::new("/nonexistent/toronto"), &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, Error::RootNotFound(_)));
    }

    #[test]
    fn test_discover_modules() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "modules/compute/main.tf");
        touch(temp.path(), "modules/network/main.tf");
        touch(temp.path(), "modules/README.md");

        let modules = discover_modules(&temp.path().join("modules")).unwrap();
        assert_eq!(modules.into_iter().collect::<Vec<_>>(), vec!["compute", "network"]);

        assert!(discover_modules(&temp.path().join("absent")).unwrap().is_empty());
    }

    #[test]
    fn test_definition_files_are_top_level_only() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "b.tf");
        touch(temp.path(), "a.tf");
        touch(temp.path(), "vars.tfvars");
        touch(temp.path(), "nested/c.tf");

        let files = definition_files(temp.path());
        assert_eq!(files, vec![temp.path().join("a.tf"), temp.path().join("b.tf")]);
    }
}
