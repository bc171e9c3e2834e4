//! Execution coordinator - runs plan levels through a bounded worker pool

use crate::context::{ActionRunner, InvocationOutcome, ProgressCallback};
use crate::planner::ExecutionPlan;
use crate::summary::parse_resource_counts;
use crate::types::{ActionKind, ExecuteOptions, ExecutionResult, FailureCause, ServiceDescriptor};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;
use thiserror::Error;

/// Contract violations by the caller. Service failures are never errors.
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("execution plan is empty")]
    EmptyPlan,

    #[error("max_workers must be at least 1")]
    ZeroWorkers,

    #[error("plan references unknown service: {0}")]
    UnknownService(String),

    #[error("failed to create worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Final state of a level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelStatus {
    Succeeded,
    Failed,
    /// Never dispatched because an earlier level failed
    Skipped,
}

/// A level as it was executed (or skipped)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelOutcome {
    pub index: usize,
    pub services: Vec<String>,
    pub cycle: bool,
    pub status: LevelStatus,
    /// One result per member, plan order; empty when skipped
    pub results: Vec<ExecutionResult>,
}

/// Everything the coordinator observed during one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub action: ActionKind,
    pub levels: Vec<LevelOutcome>,
}

impl RunRecord {
    /// Logical AND of every recorded result; a stopped run is never successful
    pub fn success(&self) -> bool {
        self.levels
            .iter()
            .all(|l| l.status == LevelStatus::Succeeded)
    }

    /// All recorded results in plan order
    pub fn results(&self) -> impl Iterator<Item = &ExecutionResult> {
        self.levels.iter().flat_map(|l| l.results.iter())
    }

    pub fn failed_services(&self) -> Vec<&str> {
        self.results()
            .filter(|r| !r.success)
            .map(|r| r.service.as_str())
            .collect()
    }

    pub fn skipped_services(&self) -> Vec<&str> {
        self.levels
            .iter()
            .filter(|l| l.status == LevelStatus::Skipped)
            .flat_map(|l| l.services.iter().map(String::as_str))
            .collect()
    }
}

/// Execute a plan level by level
///
/// Every member of a level is dispatched to the worker pool and the level
/// is joined before the next one starts. A failing service does not cancel
/// its siblings; once a level has a failure, the remaining levels are
/// recorded as skipped.
pub fn execute<R, P>(
    plan: &ExecutionPlan,
    services: &BTreeMap<String, ServiceDescriptor>,
    opts: &ExecuteOptions,
    runner: &R,
    progress: &P,
) -> Result<RunRecord, ExecuteError>
where
    R: ActionRunner + ?Sized,
    P: ProgressCallback + ?Sized,
{
    if plan.is_empty() {
        return Err(ExecuteError::EmptyPlan);
    }
    if opts.max_workers == 0 {
        return Err(ExecuteError::ZeroWorkers);
    }
    let levels: Vec<Vec<&ServiceDescriptor>> = plan
        .levels
        .iter()
        .map(|level| {
            level
                .services
                .iter()
                .map(|id| {
                    services
                        .get(id)
                        .ok_or_else(|| ExecuteError::UnknownService(id.clone()))
                })
                .collect::<Result<Vec<_>, _>>()
        })
        .collect::<Result<_, _>>()?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(opts.max_workers)
        .thread_name(|i| format!("levelrun-worker-{i}"))
        .build()?;

    let total = plan.levels.len();
    let mut outcomes = Vec::with_capacity(total);
    let mut halted = false;

    for (index, (level, members)) in plan.levels.iter().zip(&levels).enumerate() {
        if halted {
            log::info!("Level {}/{total} skipped: {}", index + 1, level.services.join(", "));
            outcomes.push(LevelOutcome {
                index,
                services: level.services.clone(),
                cycle: level.cycle,
                status: LevelStatus::Skipped,
                results: Vec::new(),
            });
            continue;
        }

        log::info!("Level {}/{total}: {}", index + 1, level.services.join(", "));
        progress.on_level_start(index, total, &level.services);

        // One slot per member, each written by exactly one worker
        let results: Vec<ExecutionResult> = pool.install(|| {
            members
                .par_iter()
                .with_max_len(1)
                .map(|service| run_service(service, opts, runner, progress))
                .collect()
        });

        let status = if results.iter().all(|r| r.success) {
            LevelStatus::Succeeded
        } else {
            let failed: Vec<&str> = results
                .iter()
                .filter(|r| !r.success)
                .map(|r| r.service.as_str())
                .collect();
            log::warn!(
                "Level {}/{total} had failures ({}), stopping execution",
                index + 1,
                failed.join(", ")
            );
            halted = true;
            LevelStatus::Failed
        };

        progress.on_level_complete(index, status);
        outcomes.push(LevelOutcome {
            index,
            services: level.services.clone(),
            cycle: level.cycle,
            status,
            results,
        });
    }

    Ok(RunRecord {
        action: opts.action,
        levels: outcomes,
    })
}

/// Run a single service and turn whatever happens into a result
fn run_service<R, P>(
    service: &ServiceDescriptor,
    opts: &ExecuteOptions,
    runner: &R,
    progress: &P,
) -> ExecutionResult
where
    R: ActionRunner + ?Sized,
    P: ProgressCallback + ?Sized,
{
    progress.on_service_start(&service.id);

    let result = if service.path.is_dir() {
        let started = Instant::now();
        let invoked = panic::catch_unwind(AssertUnwindSafe(|| {
            runner.invoke(service, opts.action, opts.timeout)
        }));
        let elapsed = started.elapsed();

        match invoked {
            Ok(invocation) => {
                let counts = parse_resource_counts(&invocation.stdout, opts.action);
                let (success, cause) = match invocation.outcome {
                    InvocationOutcome::Succeeded => (true, None),
                    InvocationOutcome::Failed(cause) => (false, Some(cause)),
                };
                ExecutionResult {
                    service: service.id.clone(),
                    action: opts.action,
                    success,
                    stdout: invocation.stdout,
                    stderr: invocation.stderr,
                    elapsed,
                    counts,
                    cause,
                }
            }
            Err(payload) => {
                let mut result = ExecutionResult::failed(
                    &service.id,
                    opts.action,
                    FailureCause::Panicked {
                        message: panic_message(payload.as_ref()),
                    },
                );
                result.elapsed = elapsed;
                result
            }
        }
    } else {
        ExecutionResult::failed(
            &service.id,
            opts.action,
            FailureCause::MissingDirectory {
                path: service.path.clone(),
            },
        )
    };

    match &result.cause {
        None => log::info!(
            "{} {} succeeded in {:.1}s",
            result.service,
            result.action,
            result.elapsed.as_secs_f64()
        ),
        Some(cause) => log::warn!("{} {} failed: {cause}", result.service, result.action),
    }

    progress.on_service_complete(&result);
    result
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
