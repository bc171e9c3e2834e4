//! Configuration root, repository and service selection shared by commands

use anyhow::{Context as _, Result, bail};
use changeset::{
    ChangeSet, ChangedFilesList, GitCli, VersionControl, detect, discover_modules,
    discover_services, expand, repo_relative,
};
use levelrun::ServiceDescriptor;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::cli::SelectionArgs;
use crate::config::OrchestratorConfig;

/// The configuration root a command operates on
pub struct Workspace {
    /// Canonical configuration root
    pub working_dir: PathBuf,
    /// Repository root, or the current directory outside a repository
    pub repo_root: PathBuf,
    pub git: Option<GitCli>,
    pub config: OrchestratorConfig,
}

impl Workspace {
    pub fn open(working_dir: &Path, config: Option<&Path>) -> Result<Self> {
        let working_dir = std::fs::canonicalize(working_dir)
            .with_context(|| format!("Working directory not found: {}", working_dir.display()))?;
        if !working_dir.is_dir() {
            bail!("Not a directory: {}", working_dir.display());
        }

        let git = match GitCli::discover(&working_dir) {
            Ok(git) => Some(git),
            Err(e) => {
                log::debug!("{} is not inside a git repository: {e}", working_dir.display());
                None
            }
        };
        let repo_root = match &git {
            Some(git) => std::fs::canonicalize(git.repo_root())
                .with_context(|| format!("Could not resolve {}", git.repo_root().display()))?,
            None => std::env::current_dir().context("Could not determine current directory")?,
        };

        let config = OrchestratorConfig::load(config, git.as_ref().map(|_| repo_root.as_path()))?;

        Ok(Self {
            working_dir,
            repo_root,
            git,
            config,
        })
    }

    pub fn services(&self) -> Result<BTreeMap<String, ServiceDescriptor>> {
        let services = discover_services(&self.working_dir, &self.config.dependencies)?;
        log::info!(
            "Found {} services in {}",
            services.len(),
            self.working_dir.display()
        );
        Ok(services)
    }

    /// Work out which services the selection flags cover
    pub fn select(
        &self,
        args: &SelectionArgs,
        services: &BTreeMap<String, ServiceDescriptor>,
    ) -> Result<ChangeSet> {
        let base = args.base_ref.clone().unwrap_or_default();

        if args.all {
            return Ok(ChangeSet::selected(base, &args.head_ref, services.keys().cloned()));
        }

        let vcs: Box<dyn VersionControl> = if let Some(list) = &args.changed_files {
            Box::new(ChangedFilesList::load(list)?)
        } else {
            let Some(git) = &self.git else {
                bail!(
                    "{} is not inside a git repository; use --changed-files or --all",
                    self.working_dir.display()
                );
            };
            if base.is_empty() {
                bail!("--base-ref is required unless --changed-files or --all is given");
            }
            Box::new(git.clone())
        };

        let prefix = repo_relative(&self.repo_root, &self.working_dir)?;
        let detected = detect(vcs.as_ref(), &base, &args.head_ref, &prefix, services)?;

        let modules_prefix = self.config.settings.modules_dir.trim_matches('/');
        let registry = discover_modules(&self.repo_root.join(modules_prefix))?;
        let changes = expand(detected, modules_prefix, &registry, services);

        log::info!(
            "{} changed files, {} affected services ({} through shared modules)",
            changes.files().len(),
            changes.services().len(),
            changes.via_modules().len()
        );
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn selection(working_dir: &Path) -> SelectionArgs {
        SelectionArgs {
            working_dir: working_dir.to_path_buf(),
            base_ref: None,
            head_ref: "HEAD".into(),
            changed_files: None,
            all: false,
            config: None,
        }
    }

    fn tree() -> TempDir {
        let temp = TempDir::new().unwrap();
        for (rel, body) in [
            ("toronto/network/main.tf", ""),
            ("toronto/compute/main.tf", r#"source = "../../modules/compute""#),
            ("toronto/oke/main.tf", r#"source = "../../modules/compute""#),
            ("toronto/dns/main.tf", ""),
            ("modules/compute/main.tf", ""),
        ] {
            let path = temp.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, body).unwrap();
        }
        temp
    }

    fn open(temp: &TempDir) -> Workspace {
        let working_dir = fs::canonicalize(temp.path().join("toronto")).unwrap();
        Workspace {
            working_dir,
            repo_root: fs::canonicalize(temp.path()).unwrap(),
            git: None,
            config: OrchestratorConfig::default(),
        }
    }

    #[test]
    fn test_select_all() {
        let temp = tree();
        let ws = open(&temp);
        let services = ws.services().unwrap();

        let mut args = selection(&ws.working_dir);
        args.all = true;
        let changes = ws.select(&args, &services).unwrap();
        assert_eq!(changes.service_list(), vec!["compute", "dns", "network", "oke"]);
    }

    #[test]
    fn test_select_from_changed_files_list() {
        let temp = tree();
        let ws = open(&temp);
        let services = ws.services().unwrap();

        let list = temp.path().join("changes.txt");
        fs::write(&list, "toronto/network/main.tf\nmodules/compute/variables.tf\n").unwrap();
        let mut args = selection(&ws.working_dir);
        args.changed_files = Some(list);

        let changes = ws.select(&args, &services).unwrap();
        assert_eq!(changes.service_list(), vec!["compute", "network", "oke"]);
        assert_eq!(changes.direct().len(), 1);
    }

    #[test]
    fn test_select_without_git_needs_a_list() {
        let temp = tree();
        let ws = open(&temp);
        let services = ws.services().unwrap();

        let mut args = selection(&ws.working_dir);
        args.base_ref = Some("origin/main".into());
        assert!(ws.select(&args, &services).is_err());
    }
}
