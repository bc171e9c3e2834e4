//! Shared-module impact expansion
//!
//! A change under the shared-modules root affects every service whose
//! definition files name that module's path. Matching is textual: a
//! `source` built from variables or locals is not seen, so the expansion
//! can only under-approximate. It never fails; unreadable files are
//! logged and skipped.

use crate::detector::{DetectedChanges, service_segment};
use crate::discovery::definition_files;
use levelrun::ServiceDescriptor;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// The services affected by a revision range, frozen after construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    base: String,
    head: String,
    files: Vec<String>,
    direct: BTreeSet<String>,
    modules: BTreeSet<String>,
    via_modules: BTreeMap<String, BTreeSet<String>>,
    services: BTreeSet<String>,
}

impl ChangeSet {
    /// A change set naming `services` outright, with no diff behind it
    pub fn selected(
        base: impl Into<String>,
        head: impl Into<String>,
        services: impl IntoIterator<Item = String>,
    ) -> Self {
        let direct: BTreeSet<String> = services.into_iter().collect();
        Self {
            base: base.into(),
            head: head.into(),
            files: Vec::new(),
            services: direct.clone(),
            direct,
            modules: BTreeSet::new(),
            via_modules: BTreeMap::new(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn head(&self) -> &str {
        &self.head
    }

    /// Every changed repo-relative path
    pub fn files(&self) -> &[String] {
        &self.files
    }

    /// Affected services: direct changes plus module expansions
    pub fn services(&self) -> &BTreeSet<String> {
        &self.services
    }

    /// Services with changed files of their own
    pub fn direct(&self) -> &BTreeSet<String> {
        &self.direct
    }

    /// Shared modules with changed files
    pub fn changed_modules(&self) -> &BTreeSet<String> {
        &self.modules
    }

    /// Services added only through module references, with the modules responsible
    pub fn via_modules(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.via_modules
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Affected services in lexicographic order
    pub fn service_list(&self) -> Vec<String> {
        self.services.iter().cloned().collect()
    }
}

/// Union the services referencing changed shared modules into `detected`
///
/// `modules_prefix` is the repo-relative shared-modules root; its last
/// segment is the directory name looked for in definition files.
/// `registry` holds the known module names; changed paths naming
/// anything else are ignored.
pub fn expand(
    detected: DetectedChanges,
    modules_prefix: &str,
    registry: &BTreeSet<String>,
    services: &BTreeMap<String, ServiceDescriptor>,
) -> ChangeSet {
    let modules = changed_modules(&detected.files, modules_prefix, registry);
    let modules_dir = modules_prefix
        .trim_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();

    let mut via_modules: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    if !modules.is_empty() {
        log::info!(
            "Shared modules changed: {}",
            modules.iter().cloned().collect::<Vec<_>>().join(", ")
        );
        for module in &modules {
            let Some(pattern) = reference_pattern(modules_dir, module) else {
                continue;
            };
            for (id, svc) in services {
                if detected.services.contains(id) {
                    continue;
                }
                if references_module(&svc.path, &pattern) {
                    log::debug!("{id} references module {module}");
                    via_modules.entry(id.clone()).or_default().insert(module.clone());
                }
            }
        }
    }

    let mut all = detected.services.clone();
    all.extend(via_modules.keys().cloned());

    ChangeSet {
        base: detected.base,
        head: detected.head,
        files: detected.files,
        direct: detected.services,
        modules,
        via_modules,
        services: all,
    }
}

/// Registered modules with at least one changed file under `modules_prefix`
pub fn changed_modules(
    files: &[String],
    modules_prefix: &str,
    registry: &BTreeSet<String>,
) -> BTreeSet<String> {
    let mut changed = BTreeSet::new();
    for file in files {
        let Some(module) = service_segment(file, modules_prefix) else {
            continue;
        };
        if registry.contains(module) {
            changed.insert(module.to_string());
        } else {
            log::debug!("Ignoring {file}: {module} is not a registered module");
        }
    }
    changed
}

/// `<modules_dir>/<module>` as a whole path segment pair
fn reference_pattern(modules_dir: &str, module: &str) -> Option<Regex> {
    let needle = if modules_dir.is_empty() {
        regex::escape(module)
    } else {
        format!("{}/{}", regex::escape(modules_dir), regex::escape(module))
    };
    let pattern = format!(r#"(?:^|[/"'\s=])(?:{needle})(?:[/"'\s?]|$)"#);
    match Regex::new(&pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            log::warn!("Cannot build reference pattern for module {module}: {e}");
            None
        }
    }
}

fn references_module(service_dir: &Path, pattern: &Regex) -> bool {
    definition_files(service_dir).iter().any(|file| {
        match std::fs::read_to_string(file) {
            Ok(content) => pattern.is_match(&content),
            Err(e) => {
                log::warn!("Skipping unreadable {}: {e}", file.display());
                false
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        services: BTreeMap<String, ServiceDescriptor>,
    }

    fn fixture(defs: &[(&str, &str)]) -> Fixture {
        let temp = TempDir::new().unwrap();
        let mut services = BTreeMap::new();
        for (id, body) in defs {
            let dir = temp.path().join("toronto").join(id);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("main.tf"), body).unwrap();
            services.insert((*id).to_string(), ServiceDescriptor::new(*id, dir, &[]));
        }
        Fixture {
            _temp: temp,
            services,
        }
    }

    fn detected(files: &[&str], direct: &[&str]) -> DetectedChanges {
        DetectedChanges {
            base: "origin/main".into(),
            head: "HEAD".into(),
            files: files.iter().map(ToString::to_string).collect(),
            services: direct.iter().map(ToString::to_string).collect(),
        }
    }

    fn registry(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_module_change_pulls_in_referencing_services() {
        let fx = fixture(&[
            ("compute", r#"module "vm" { source = "../../modules/compute" }"#),
            ("oke", r#"module "nodes" { source = "../../modules/compute" }"#),
            ("database", "module \"db_host\" {\n  source = \"../../modules/compute/\"\n}\n"),
            ("dns", r#"module "zone" { source = "../../modules/dns" }"#),
        ]);
        let changes = expand(
            detected(
                &["toronto/compute/main.tf", "modules/compute/variables.tf"],
                &["compute"],
            ),
            "modules",
            &registry(&["compute", "dns"]),
            &fx.services,
        );

        assert_eq!(
            changes.service_list(),
            vec!["compute", "database", "oke"]
        );
        assert_eq!(changes.direct().iter().collect::<Vec<_>>(), vec!["compute"]);
        assert_eq!(
            changes.via_modules().keys().collect::<Vec<_>>(),
            vec!["database", "oke"]
        );
        assert!(changes.via_modules()["oke"].contains("compute"));
        assert_eq!(changes.changed_modules().len(), 1);
    }

    #[test]
    fn test_module_name_prefix_does_not_match() {
        let fx = fixture(&[
            ("batch", r#"module "x" { source = "../../modules/compute-extra" }"#),
            ("web", r#"module "x" { source = "../../modules/compute_v2" }"#),
        ]);
        let changes = expand(
            detected(&["modules/compute/main.tf"], &[]),
            "modules",
            &registry(&["compute", "compute-extra", "compute_v2"]),
            &fx.services,
        );
        assert!(changes.is_empty());
    }

    #[test]
    fn test_git_source_with_ref_matches() {
        let fx = fixture(&[(
            "oke",
            r#"source = "git::https://example.com/infra.git//modules/compute?ref=v1.2""#,
        )]);
        let changes = expand(
            detected(&["modules/compute/main.tf"], &[]),
            "modules",
            &registry(&["compute"]),
            &fx.services,
        );
        assert_eq!(changes.service_list(), vec!["oke"]);
    }

    #[test]
    fn test_variable_indirection_is_not_detected() {
        let fx = fixture(&[(
            "oke",
            r#"source = "${var.modules_root}/compute""#,
        )]);
        let changes = expand(
            detected(&["modules/compute/main.tf"], &[]),
            "modules",
            &registry(&["compute"]),
            &fx.services,
        );
        assert!(changes.is_empty());
    }

    #[test]
    fn test_unregistered_and_loose_module_files_ignored() {
        let files: Vec<String> = vec![
            "modules/README.md".into(),
            "modules/legacy/main.tf".into(),
            "modules/network/main.tf".into(),
            "toronto/modules/network/main.tf".into(),
        ];
        let changed = changed_modules(&files, "modules", &registry(&["network"]));
        assert_eq!(changed.into_iter().collect::<Vec<_>>(), vec!["network"]);
    }

    #[test]
    fn test_no_module_changes_keeps_detected_set() {
        let fx = fixture(&[("network", "")]);
        let changes = expand(
            detected(&["toronto/network/main.tf"], &["network"]),
            "modules",
            &registry(&["compute"]),
            &fx.services,
        );
        assert_eq!(changes.service_list(), vec!["network"]);
        assert!(changes.via_modules().is_empty());
        assert_eq!(changes.files().len(), 1);
        assert_eq!(changes.base(), "origin/main");
        assert_eq!(changes.head(), "HEAD");
    }

    #[test]
    fn test_selected_change_set() {
        let changes = ChangeSet::selected("", "HEAD", vec!["dns".to_string(), "compute".to_string()]);
        assert_eq!(changes.service_list(), vec!["compute", "dns"]);
        assert!(changes.files().is_empty());
    }
}
