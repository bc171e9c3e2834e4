//! Core types for level-ordered service execution

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default number of concurrent workers per level
pub const DEFAULT_MAX_WORKERS: usize = 3;

/// Default per-service timeout (30 minutes)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// A directory-scoped unit of infrastructure configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Unique identifier, taken from the directory name
    pub id: String,
    /// Directory holding the service definition files
    pub path: PathBuf,
    /// Declared direct dependencies, declaration order, no duplicates
    pub dependencies: Vec<String>,
}

impl ServiceDescriptor {
    /// Create a descriptor, dropping repeated dependency names
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>, dependencies: &[String]) -> Self {
        let mut deduped: Vec<String> = Vec::with_capacity(dependencies.len());
        for dep in dependencies {
            if !deduped.contains(dep) {
                deduped.push(dep.clone());
            }
        }

        Self {
            id: id.into(),
            path: path.into(),
            dependencies: deduped,
        }
    }
}

/// What the provisioning engine is asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// Compute changes without touching infrastructure
    Inspect,
    /// Mutate infrastructure
    Apply,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inspect => "inspect",
            Self::Apply => "apply",
        }
    }

    pub fn is_mutating(&self) -> bool {
        matches!(self, Self::Apply)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource changes reported by the engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceCounts {
    pub added: u64,
    pub changed: u64,
    pub destroyed: u64,
}

impl ResourceCounts {
    pub fn total(&self) -> u64 {
        self.added + self.changed + self.destroyed
    }

    /// Merge another set of counts into this one
    pub fn merge(&mut self, other: &ResourceCounts) {
        self.added += other.added;
        self.changed += other.changed;
        self.destroyed += other.destroyed;
    }
}

impl fmt::Display for ResourceCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{} ~{} -{}", self.added, self.changed, self.destroyed)
    }
}

/// Why a single service failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureCause {
    /// The engine exited with a code outside its success set
    NonZeroExit { step: String, code: i32 },
    /// The engine was killed by a signal
    Terminated { step: String },
    /// The per-service timeout elapsed and the process was killed
    TimedOut { step: String, after_secs: u64 },
    /// The engine process could not be started
    SpawnFailed { step: String, message: String },
    /// The service directory is not reachable
    MissingDirectory { path: PathBuf },
    /// The runner panicked while handling the service
    Panicked { message: String },
}

impl FailureCause {
    /// Short machine-friendly label
    pub fn label(&self) -> &'static str {
        match self {
            Self::NonZeroExit { .. } => "exit",
            Self::Terminated { .. } => "signal",
            Self::TimedOut { .. } => "timeout",
            Self::SpawnFailed { .. } => "spawn",
            Self::MissingDirectory { .. } => "missing-directory",
            Self::Panicked { .. } => "panic",
        }
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonZeroExit { step, code } => write!(f, "{step} exited with code {code}"),
            Self::Terminated { step } => write!(f, "{step} was terminated by a signal"),
            Self::TimedOut { step, after_secs } => {
                write!(f, "{step} timed out after {after_secs}s")
            }
            Self::SpawnFailed { step, message } => {
                write!(f, "{step} could not be started: {message}")
            }
            Self::MissingDirectory { path } => {
                write!(f, "service directory not found: {}", path.display())
            }
            Self::Panicked { message } => write!(f, "runner panicked: {message}"),
        }
    }
}

/// Outcome of running the engine for one service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub service: String,
    pub action: ActionKind,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    #[serde(rename = "elapsed_secs", with = "duration_secs")]
    pub elapsed: Duration,
    /// `None` when the engine output carried no recognizable summary
    pub counts: Option<ResourceCounts>,
    pub cause: Option<FailureCause>,
}

impl ExecutionResult {
    /// Build a failed result that never reached the engine
    pub fn failed(service: &str, action: ActionKind, cause: FailureCause) -> Self {
        Self {
            service: service.to_string(),
            action,
            success: false,
            stdout: String::new(),
            stderr: String::new(),
            elapsed: Duration::ZERO,
            counts: None,
            cause: Some(cause),
        }
    }
}

/// Options for execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Engine action to run for every service
    pub action: ActionKind,
    /// Size of the worker pool
    pub max_workers: usize,
    /// Budget for a single service, all engine steps included
    pub timeout: Duration,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            action: ActionKind::Inspect,
            max_workers: DEFAULT_MAX_WORKERS,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Serialize durations as fractional seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
