//! Provider traits for running services and reporting progress
//!
//! These traits keep the coordinator independent of any particular
//! provisioning engine or terminal UI.

use crate::executor::LevelStatus;
use crate::types::{ActionKind, ExecutionResult, FailureCause, ServiceDescriptor};
use std::time::Duration;

/// How an engine invocation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationOutcome {
    Succeeded,
    Failed(FailureCause),
}

/// Captured result of invoking the engine for one service
#[derive(Debug, Clone)]
pub struct Invocation {
    pub outcome: InvocationOutcome,
    pub stdout: String,
    pub stderr: String,
}

impl Invocation {
    pub fn succeeded(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            outcome: InvocationOutcome::Succeeded,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn failed(cause: FailureCause, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            outcome: InvocationOutcome::Failed(cause),
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }
}

/// Runs the external provisioning action for a single service
///
/// Called concurrently from worker threads. Implementations own the
/// process lifecycle and must honour `timeout`; a failure is reported
/// through the returned [`Invocation`], never by panicking.
pub trait ActionRunner: Send + Sync {
    fn invoke(
        &self,
        service: &ServiceDescriptor,
        action: ActionKind,
        timeout: Duration,
    ) -> Invocation;
}

/// Progress callback for execution operations
///
/// Service notifications arrive from worker threads, so implementations
/// must be thread-safe.
pub trait ProgressCallback: Send + Sync {
    /// Called when a level is dispatched
    fn on_level_start(&self, index: usize, total: usize, services: &[String]);

    /// Called when a worker picks up a service
    fn on_service_start(&self, service: &str);

    /// Called when a service finishes
    fn on_service_complete(&self, result: &ExecutionResult);

    /// Called after every member of a level has finished
    fn on_level_complete(&self, index: usize, status: LevelStatus);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_level_start(&self, _index: usize, _total: usize, _services: &[String]) {}
    fn on_service_start(&self, _service: &str) {}
    fn on_service_complete(&self, _result: &ExecutionResult) {}
    fn on_level_complete(&self, _index: usize, _status: LevelStatus) {}
}
