use anyhow::Result;
use colored::Colorize;

use crate::Context;
use crate::cli::ServicesArgs;
use crate::commands::workspace::Workspace;
use crate::ui;

pub fn run(_ctx: &Context, args: &ServicesArgs) -> Result<()> {
    let ws = Workspace::open(&args.working_dir, args.config.as_deref())?;
    let services = ws.services()?;

    ui::header(&format!("Services in {}", ws.working_dir.display()));
    if services.is_empty() {
        ui::warn("No service directories with .tf files found");
        return Ok(());
    }

    for svc in services.values() {
        let deps: Vec<String> = svc
            .dependencies
            .iter()
            .map(|dep| {
                if services.contains_key(dep) {
                    dep.clone()
                } else {
                    format!("{dep}{}", "?".dimmed())
                }
            })
            .collect();

        if deps.is_empty() {
            ui::kv(&svc.id, &"no dependencies".dimmed().to_string());
        } else {
            ui::kv(&svc.id, &deps.join(", "));
        }
    }

    let undeclared: Vec<&str> = services
        .keys()
        .filter(|id| !ws.config.dependencies.contains_key(*id))
        .map(String::as_str)
        .collect();
    if !undeclared.is_empty() {
        println!();
        ui::dim(&format!(
            "Not in the dependency table (treated as independent): {}",
            undeclared.join(", ")
        ));
    }

    Ok(())
}
