//! # Levelrun
//!
//! Dependency-aware, level-ordered execution of external actions.
//!
//! This crate turns a set of services and a static dependency map into an
//! ordered list of levels, then runs every level through a bounded worker
//! pool, stopping at the first level that has a failure.
//!
//! ## Core Concepts
//!
//! - **ServiceDescriptor**: A directory-scoped unit handed to the engine
//! - **ExecutionPlan**: Levels of services; members of a level are independent
//! - **ActionRunner**: Runs the provisioning engine for one service
//! - **RunRecord**: Per-level outcomes with one result per executed service
//!
//! ## Example
//!
//! ```ignore
//! use levelrun::{
//!     resolve, execute, ActionKind, ActionRunner, ExecuteOptions, Invocation,
//!     NoProgress, ServiceDescriptor,
//! };
//!
//! struct Echo;
//!
//! impl ActionRunner for Echo {
//!     fn invoke(&self, svc: &ServiceDescriptor, action: ActionKind, _t: Duration) -> Invocation {
//!         Invocation::succeeded(format!("{action} {}", svc.id), "")
//!     }
//! }
//!
//! let plan = resolve(&["compute", "network"], &dependency_map);
//! let record = execute(&plan, &services, &ExecuteOptions::default(), &Echo, &NoProgress)?;
//! assert!(record.success());
//! ```
//!
//! ## Provider Traits
//!
//! - [`ActionRunner`]: Invokes the external engine, owns process lifecycle
//! - [`ProgressCallback`]: Receives level and service notifications
//!
//! Both are called from worker threads and must be `Send + Sync`.

pub mod context;
pub mod executor;
pub mod planner;
pub mod process;
pub mod summary;
pub mod types;

// Re-export main types at crate root
pub use context::{ActionRunner, Invocation, InvocationOutcome, NoProgress, ProgressCallback};
pub use executor::{ExecuteError, LevelOutcome, LevelStatus, RunRecord, execute};
pub use planner::{DependencyGraph, ExecutionPlan, Level, resolve, resolve_graph};
pub use process::{ProcessOutput, ProcessStatus, run_with_timeout};
pub use summary::parse_resource_counts;
pub use types::{
    ActionKind, DEFAULT_MAX_WORKERS, DEFAULT_TIMEOUT, ExecuteOptions, ExecutionResult,
    FailureCause, ResourceCounts, ServiceDescriptor,
};
