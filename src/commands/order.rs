use anyhow::Result;
use changeset::ChangeSet;
use colored::Colorize;
use levelrun::{ExecutionPlan, resolve};

use crate::Context;
use crate::cli::SelectionArgs;
use crate::commands::workspace::Workspace;
use crate::ui;

pub fn run(_ctx: &Context, args: &SelectionArgs) -> Result<()> {
    let ws = Workspace::open(&args.working_dir, args.config.as_deref())?;
    let services = ws.services()?;
    let changes = ws.select(args, &services)?;

    if changes.is_empty() {
        ui::info("No infrastructure changes detected");
        return Ok(());
    }

    let plan = resolve(&changes.service_list(), &ws.config.dependencies);
    print_plan(&plan, &changes);
    Ok(())
}

/// Print the levels of `plan` and why each service is in it
pub fn print_plan(plan: &ExecutionPlan, changes: &ChangeSet) {
    ui::header("Execution Order");

    let total = plan.levels.len();
    for (i, level) in plan.levels.iter().enumerate() {
        let mut names: Vec<String> = Vec::with_capacity(level.services.len());
        for svc in &level.services {
            if let Some(modules) = changes.via_modules().get(svc) {
                let via: Vec<&str> = modules.iter().map(String::as_str).collect();
                names.push(format!("{svc} {}", format!("(via {})", via.join(", ")).dimmed()));
            } else {
                names.push(svc.clone());
            }
        }

        let mut line = names.join(", ");
        if level.cycle {
            line.push_str(&format!(" {}", "[cycle]".yellow()));
        } else if level.services.len() > 1 {
            line.push_str(&format!(" {}", "[parallel]".dimmed()));
        }
        ui::step(i + 1, total, &line);
    }

    for warning in &plan.warnings {
        ui::warn(warning);
    }
}
