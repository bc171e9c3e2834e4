use anyhow::{Context as _, Result, bail};
use changeset::ChangeSet;
use chrono::{DateTime, Utc};
use levelrun::{ActionKind, ActionRunner, ExecuteOptions, ExecutionPlan, RunRecord, resolve};
use std::io::{self, IsTerminal};
use std::path::Path;
use std::time::{Duration, Instant};

use crate::Context;
use crate::audit::{AuditContext, AuditRecord, resolve_actor};
use crate::cli::RunArgs;
use crate::commands::order::print_plan;
use crate::commands::workspace::Workspace;
use crate::config::Settings;
use crate::engine::{SimulatedRunner, TerraformEngine, command_exists};
use crate::progress::LevelProgress;
use crate::report::{self, ReportInput};
use crate::ui;

/// How a run ended, mapped to the process exit code in `main`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Succeeded,
    NothingToDo,
    Failed,
    /// The operator declined the apply prompt
    Declined,
    Interrupted,
}

pub fn run(ctx: &Context, args: RunArgs) -> Result<RunStatus> {
    let ws = Workspace::open(&args.selection.working_dir, args.selection.config.as_deref())?;
    let cwd = std::env::current_dir().context("Could not determine current directory")?;
    run_in(ctx, &ws, &args, &cwd, engine_for)
}

/// Select, resolve and execute inside an opened workspace
///
/// Output paths resolve against `cwd`. `runner_for` is only called once
/// there is something to execute.
fn run_in<F>(ctx: &Context, ws: &Workspace, args: &RunArgs, cwd: &Path, runner_for: F) -> Result<RunStatus>
where
    F: FnOnce(&RunArgs, &Settings) -> Box<dyn ActionRunner>,
{
    let action = ActionKind::from(args.action);
    let settings = &ws.config.settings;
    let started = Instant::now();

    let services = ws.services()?;
    let changes = ws.select(&args.selection, &services)?;

    let report_path = Settings::resolve_path(&settings.report_path, cwd);

    if changes.is_empty() {
        ui::info("No infrastructure changes detected");
        let timestamp = Utc::now();
        let md = report::render_no_changes(action, args.dry_run, timestamp, &changes);
        if let Err(e) = report::write(&report_path, &md) {
            ui::warn(&format!("{e:#}"));
        }

        let plan = ExecutionPlan::new();
        let record = RunRecord {
            action,
            levels: Vec::new(),
        };
        let audit_ctx = audit_context(ws, args, timestamp, &changes, &plan, started.elapsed());
        write_audit(&AuditRecord::build(&audit_ctx, &record), settings, cwd);
        return Ok(RunStatus::NothingToDo);
    }

    let plan = resolve(&changes.service_list(), &ws.config.dependencies);
    if !ctx.quiet {
        print_plan(&plan, &changes);
    }

    let opts = execute_options(args, settings, action)?;

    if action.is_mutating() && !args.dry_run && !args.yes && io::stdin().is_terminal() {
        match confirm_apply(plan.service_count()) {
            Ok(true) => {}
            Ok(false) => {
                ui::info("Aborted");
                return Ok(RunStatus::Declined);
            }
            Err(dialoguer::Error::IO(e)) if e.kind() == io::ErrorKind::Interrupted => {
                return Ok(RunStatus::Interrupted);
            }
            Err(e) => return Err(e).context("Failed to read confirmation"),
        }
    }

    let runner = runner_for(args, settings);

    ui::section(&format!(
        "Running {action} on {} service(s) with {} worker(s)",
        plan.service_count(),
        opts.max_workers
    ));

    let progress = LevelProgress::new(!ctx.quiet);
    let record = levelrun::execute(&plan, &services, &opts, runner.as_ref(), &progress)?;
    let wall = started.elapsed();
    let timestamp = Utc::now();

    let md = report::render(&ReportInput {
        action,
        dry_run: args.dry_run,
        timestamp,
        changes: &changes,
        plan: &plan,
        record: &record,
        wall,
        excerpt_chars: settings.excerpt_chars,
    });
    match report::write(&report_path, &md) {
        Ok(()) => ui::dim(&format!("Report written to {}", report_path.display())),
        Err(e) => ui::warn(&format!("{e:#}")),
    }

    let audit_ctx = audit_context(ws, args, timestamp, &changes, &plan, wall);
    write_audit(&AuditRecord::build(&audit_ctx, &record), settings, cwd);

    if !ctx.quiet {
        report::print_console_summary(&record, wall);
    }

    Ok(if record.success() {
        RunStatus::Succeeded
    } else {
        RunStatus::Failed
    })
}

/// The simulated runner for dry runs, the configured engine otherwise
fn engine_for(args: &RunArgs, settings: &Settings) -> Box<dyn ActionRunner> {
    if args.dry_run {
        ui::info("Dry run: the engine will not be invoked");
        return Box::new(SimulatedRunner);
    }
    if !command_exists(&settings.engine) {
        ui::warn(&format!("{} not found in PATH", settings.engine));
    }
    Box::new(TerraformEngine::new(
        settings.engine.clone(),
        Duration::from_secs(settings.init_timeout_secs),
    ))
}

fn audit_context<'a>(
    ws: &Workspace,
    args: &RunArgs,
    timestamp: DateTime<Utc>,
    changes: &'a ChangeSet,
    plan: &'a ExecutionPlan,
    wall: Duration,
) -> AuditContext<'a> {
    AuditContext {
        timestamp,
        actor: resolve_actor(args.actor.as_deref(), |key| std::env::var(key).ok()),
        environment: args
            .environment
            .clone()
            .unwrap_or_else(|| dir_name(&ws.working_dir)),
        dry_run: args.dry_run,
        changes,
        plan,
        wall,
    }
}

fn write_audit(audit: &AuditRecord, settings: &Settings, cwd: &Path) {
    let audit_path = Settings::resolve_path(&settings.audit_path, cwd);
    let history_path = Settings::resolve_path(&settings.history_path, cwd);
    match audit.write(&audit_path, &history_path) {
        Ok(()) => ui::dim(&format!("Audit record written to {}", audit_path.display())),
        Err(e) => ui::warn(&format!("{e:#}")),
    }
}

fn execute_options(args: &RunArgs, settings: &Settings, action: ActionKind) -> Result<ExecuteOptions> {
    let max_workers = if args.parallel {
        args.max_workers.unwrap_or(settings.max_workers)
    } else {
        1
    };
    if max_workers == 0 {
        bail!("--max-workers must be at least 1");
    }

    let timeout_secs = args.timeout_secs.unwrap_or(settings.timeout_secs);
    if timeout_secs == 0 {
        bail!("--timeout-secs must be at least 1");
    }

    Ok(ExecuteOptions {
        action,
        max_workers,
        timeout: Duration::from_secs(timeout_secs),
    })
}

/// Confirm with user
fn confirm_apply(count: usize) -> Result<bool, dialoguer::Error> {
    dialoguer::Confirm::new()
        .with_prompt(format!("Apply changes to {count} service(s)?"))
        .default(false)
        .interact()
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| "unknown".to_string(), |n| n.to_string_lossy().into_owned())
}
