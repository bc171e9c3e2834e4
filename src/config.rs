//! Orchestrator configuration
//!
//! Resolution order:
//! 1. `--config <FILE>`
//! 2. `<repo root>/stackrun.toml`
//! 3. `~/.config/stackrun/config.toml`
//! 4. Built-in defaults
//!
//! A file replaces the built-in dependency table only when it declares a
//! `[dependencies]` table of its own.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// File name looked up at the repository root
pub const REPO_CONFIG_FILE: &str = "stackrun.toml";

/// Service dependency table used when no configuration provides one
const DEFAULT_DEPENDENCIES: &[(&str, &[&str])] = &[
    ("identity", &[]),
    ("kms", &[]),
    ("network", &["identity"]),
    ("dns", &["identity"]),
    ("compute", &["network", "identity"]),
    ("oke", &["network", "identity"]),
    ("database", &["network", "identity"]),
    ("managementservices", &["network", "identity"]),
    ("loadbalancer", &["network", "identity"]),
    ("firewall", &["network", "identity"]),
    ("nsg", &["network", "identity"]),
    ("fss", &["network", "identity"]),
    ("oss", &["identity"]),
    ("security", &["identity"]),
    ("tagging", &["identity"]),
    ("quota", &["identity"]),
    ("budget", &["identity"]),
    ("vlan", &["network", "identity"]),
    ("ocvs", &["network", "identity"]),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub settings: Settings,

    /// Service id to the ids it depends on
    #[serde(default = "default_dependencies")]
    pub dependencies: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Worker pool size when running in parallel
    pub max_workers: usize,
    /// Budget per service, all engine steps included
    pub timeout_secs: u64,
    /// Budget for the engine's init step
    pub init_timeout_secs: u64,
    /// Shared modules root, relative to the repository root
    pub modules_dir: String,
    /// Engine binary
    pub engine: String,
    pub report_path: String,
    pub audit_path: String,
    /// Append-only JSON lines history
    pub history_path: String,
    /// Characters of engine output kept per service in the report
    pub excerpt_chars: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_workers: levelrun::DEFAULT_MAX_WORKERS,
            timeout_secs: levelrun::DEFAULT_TIMEOUT.as_secs(),
            init_timeout_secs: 300,
            modules_dir: "modules".to_string(),
            engine: "terraform".to_string(),
            report_path: "terraform-results.md".to_string(),
            audit_path: "terraform-audit.json".to_string(),
            history_path: ".stackrun/audit-history.jsonl".to_string(),
            excerpt_chars: 500,
        }
    }
}

fn default_dependencies() -> BTreeMap<String, Vec<String>> {
    DEFAULT_DEPENDENCIES
        .iter()
        .map(|(id, deps)| {
            (
                (*id).to_string(),
                deps.iter().map(|d| (*d).to_string()).collect(),
            )
        })
        .collect()
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            settings: Settings::default(),
            dependencies: default_dependencies(),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration following the resolution order
    pub fn load(explicit: Option<&Path>, repo_root: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        let candidates = repo_root
            .map(|root| root.join(REPO_CONFIG_FILE))
            .into_iter()
            .chain(user_config_path());

        for path in candidates {
            if path.is_file() {
                return Self::from_file(&path);
            }
        }

        log::debug!("No configuration file found, using built-in defaults");
        Ok(Self::default())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Invalid TOML format in {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.settings.max_workers == 0 {
            bail!("settings.max_workers must be at least 1");
        }
        if self.settings.timeout_secs == 0 {
            bail!("settings.timeout_secs must be at least 1");
        }
        if self.settings.init_timeout_secs == 0 {
            bail!("settings.init_timeout_secs must be at least 1");
        }
        if self.settings.engine.trim().is_empty() {
            bail!("settings.engine must not be empty");
        }

        for (service, deps) in &self.dependencies {
            if service.trim().is_empty() {
                bail!("Dependency table has an empty service name");
            }
            if deps.iter().any(|d| d.trim().is_empty()) {
                bail!("Service '{service}' lists an empty dependency name");
            }
        }

        Ok(())
    }
}

impl Settings {
    /// Resolve a configured path against `base` after tilde expansion
    pub fn resolve_path(raw: &str, base: &Path) -> PathBuf {
        let expanded = PathBuf::from(shellexpand::tilde(raw).as_ref());
        if expanded.is_absolute() {
            expanded
        } else {
            base.join(expanded)
        }
    }
}

fn user_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".config").join("stackrun").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = OrchestratorConfig::default();
        config.validate().unwrap();
        assert_eq!(config.dependencies.len(), 19);
        assert_eq!(config.dependencies["compute"], vec!["network", "identity"]);
        assert!(config.dependencies["identity"].is_empty());
        assert_eq!(config.settings.max_workers, 3);
        assert_eq!(config.settings.timeout_secs, 1800);
    }

    #[test]
    fn test_parse_partial_settings() {
        let toml = r#"
[settings]
max_workers = 6
report_path = "out/results.md"
"#;
        let config: OrchestratorConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.settings.max_workers, 6);
        assert_eq!(config.settings.report_path, "out/results.md");
        assert_eq!(config.settings.engine, "terraform");
        assert_eq!(config.dependencies.len(), 19);
    }

    #[test]
    fn test_dependency_table_replaces_defaults() {
        let toml = r#"
[dependencies]
network = []
app = ["network"]
"#;
        let config: OrchestratorConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.dependencies.len(), 2);
        assert_eq!(config.dependencies["app"], vec!["network"]);
    }

    #[test]
    fn test_validation_rejects_zero_workers() {
        let mut config = OrchestratorConfig::default();
        config.settings.max_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_empty_names() {
        let mut config = OrchestratorConfig::default();
        config.dependencies.insert("app".into(), vec![" ".into()]);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("app"));
    }

    #[test]
    fn test_load_prefers_explicit_then_repo_file() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(REPO_CONFIG_FILE),
            "[settings]\nmax_workers = 2\n",
        )
        .unwrap();
        let explicit = temp.path().join("other.toml");
        std::fs::write(&explicit, "[settings]\nmax_workers = 9\n").unwrap();

        let from_repo = OrchestratorConfig::load(None, Some(temp.path())).unwrap();
        assert_eq!(from_repo.settings.max_workers, 2);

        let from_flag = OrchestratorConfig::load(Some(&explicit), Some(temp.path())).unwrap();
        assert_eq!(from_flag.settings.max_workers, 9);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bad.toml");
        std::fs::write(&path, "[settings]\ntimeout_secs = 0\n").unwrap();
        assert!(OrchestratorConfig::from_file(&path).is_err());

        std::fs::write(&path, "not toml at all [").unwrap();
        assert!(OrchestratorConfig::from_file(&path).is_err());
    }

    #[test]
    fn test_resolve_path() {
        let base = Path::new("/srv/infra");
        assert_eq!(
            Settings::resolve_path("out/report.md", base),
            PathBuf::from("/srv/infra/out/report.md")
        );
        assert_eq!(
            Settings::resolve_path("/tmp/audit.json", base),
            PathBuf::from("/tmp/audit.json")
        );
    }
}
