//! Revision range to changed services

use crate::error::{Error, ReferenceError, Result};
use crate::vcs::VersionControl;
use levelrun::ServiceDescriptor;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path};

/// Files and services that differ between two revisions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedChanges {
    pub base: String,
    pub head: String,
    /// Every changed repo-relative path, including ones outside the configuration root
    pub files: Vec<String>,
    /// Services owning at least one changed file
    pub services: BTreeSet<String>,
}

/// Map `base..head` to the services whose files changed
///
/// `config_prefix` is the configuration root relative to the repository,
/// `/` separated, empty when they coincide. A path counts for a service
/// when its first segment under the prefix names a discovered service;
/// anything else is logged and ignored.
pub fn detect<V: VersionControl + ?Sized>(
    vcs: &V,
    base: &str,
    head: &str,
    config_prefix: &str,
    services: &BTreeMap<String, ServiceDescriptor>,
) -> Result<DetectedChanges> {
    if !vcs.has_common_history(base, head)? {
        return Err(ReferenceError::Unrelated {
            base: base.to_string(),
            head: head.to_string(),
        }
        .into());
    }

    let files = vcs.changed_files(base, head)?;
    log::debug!("{} files changed between {base} and {head}", files.len());

    let mut changed = BTreeSet::new();
    for file in &files {
        match service_segment(file, config_prefix) {
            Some(id) if services.contains_key(id) => {
                changed.insert(id.to_string());
            }
            Some(id) => log::debug!("Ignoring {file}: {id} is not a known service"),
            None => log::trace!("Ignoring {file}: outside the configuration root"),
        }
    }

    Ok(DetectedChanges {
        base: base.to_string(),
        head: head.to_string(),
        files,
        services: changed,
    })
}

/// First path segment of `file` under `prefix`, if `file` lies in a subdirectory of it
pub fn service_segment<'a>(file: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = strip_dir_prefix(file, prefix)?;
    let (segment, remainder) = rest.split_once('/')?;
    if segment.is_empty() || remainder.is_empty() {
        return None;
    }
    Some(segment)
}

/// `file` with the leading directory `prefix` removed
fn strip_dir_prefix<'a>(file: &'a str, prefix: &str) -> Option<&'a str> {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        return Some(file);
    }
    file.strip_prefix(prefix)?.strip_prefix('/')
}

/// Repo-relative, `/` separated form of `path`
///
/// Both paths are canonicalized so symlinked checkouts compare equal.
pub fn repo_relative(repo_root: &Path, path: &Path) -> Result<String> {
    let root = std::fs::canonicalize(repo_root)?;
    let target = std::fs::canonicalize(path).map_err(|_| Error::RootNotFound(path.to_path_buf()))?;

    let relative = target
        .strip_prefix(&root)
        .map_err(|_| Error::OutsideRepository {
            path: target.clone(),
            repo: root.clone(),
        })?;

    let segments: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    Ok(segments.join("/"))
}
