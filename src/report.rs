//! Markdown run report and console summary

use crate::audit::Aggregates;
use crate::ui;
use anyhow::{Context, Result};
use changeset::ChangeSet;
use chrono::{DateTime, Utc};
use colored::Colorize;
use levelrun::{ActionKind, ExecutionPlan, ExecutionResult, LevelOutcome, LevelStatus, RunRecord};
use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;

/// Everything a report is rendered from
pub struct ReportInput<'a> {
    pub action: ActionKind,
    pub dry_run: bool,
    pub timestamp: DateTime<Utc>,
    pub changes: &'a ChangeSet,
    pub plan: &'a ExecutionPlan,
    pub record: &'a RunRecord,
    pub wall: Duration,
    pub excerpt_chars: usize,
}

fn title(action: ActionKind, dry_run: bool) -> String {
    let mut title = format!("# Terraform {} Results", capitalize(action.as_str()));
    if dry_run {
        title.push_str(" (dry run)");
    }
    title
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    chars
        .next()
        .map(|first| first.to_uppercase().chain(chars).collect())
        .unwrap_or_default()
}

/// Report for a run where nothing changed
pub fn render_no_changes(
    action: ActionKind,
    dry_run: bool,
    timestamp: DateTime<Utc>,
    changes: &ChangeSet,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}\n", title(action, dry_run));
    let _ = writeln!(out, "**Timestamp:** {}  ", timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
    if !changes.base().is_empty() {
        let _ = writeln!(out, "**Range:** `{}..{}`  ", changes.base(), changes.head());
    }
    let _ = writeln!(out, "\nNo infrastructure changes detected. Nothing to {action}.");
    out
}

pub fn render(input: &ReportInput<'_>) -> String {
    let record = input.record;
    let agg = Aggregates::from_record(record, input.wall);
    let mut out = String::new();

    let _ = writeln!(out, "{}\n", title(input.action, input.dry_run));
    let _ = writeln!(
        out,
        "**Timestamp:** {}  ",
        input.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if !input.changes.base().is_empty() {
        let _ = writeln!(
            out,
            "**Range:** `{}..{}`  ",
            input.changes.base(),
            input.changes.head()
        );
    }
    let _ = writeln!(out, "**Orchestrator Version:** {}\n", env!("CARGO_PKG_VERSION"));

    if record.success() {
        let _ = writeln!(out, "**Status: all {} service(s) succeeded**\n", agg.succeeded);
    } else {
        let _ = writeln!(
            out,
            "**Status: {} failed, {} succeeded, {} skipped of {} service(s)**\n",
            agg.failed, agg.succeeded, agg.skipped, agg.services_total
        );
    }

    if !input.plan.warnings.is_empty() || !input.changes.via_modules().is_empty() {
        out.push_str("## Warnings\n\n");
        for warning in &input.plan.warnings {
            let _ = writeln!(out, "- {warning}");
        }
        for (svc, modules) in input.changes.via_modules() {
            let modules: Vec<&str> = modules.iter().map(String::as_str).collect();
            let _ = writeln!(out, "- {svc} included through shared module(s): {}", modules.join(", "));
        }
        out.push('\n');
    }

    out.push_str("## Execution Order\n\n");
    for level in &record.levels {
        let _ = write!(
            out,
            "**Level {}:** {} ({})",
            level.index + 1,
            level.services.join(", "),
            level_label(level)
        );
        if level.services.len() > 1 {
            out.push_str(" *parallel*");
        }
        out.push_str("  \n");
    }
    out.push('\n');

    out.push_str("## Service Results\n\n");
    out.push_str("| Service | Level | Status | Duration | Changes |\n");
    out.push_str("|---------|-------|--------|----------|---------|\n");
    for level in &record.levels {
        if level.status == LevelStatus::Skipped {
            for svc in &level.services {
                let _ = writeln!(out, "| {svc} | {} | skipped | - | - |", level.index + 1);
            }
            continue;
        }
        for result in &level.results {
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} | {} |",
                result.service,
                level.index + 1,
                if result.success { "succeeded" } else { "failed" },
                ui::format_duration(result.elapsed),
                changes_cell(result)
            );
        }
    }
    out.push('\n');

    out.push_str("## Details\n\n");
    for level in record.levels.iter().filter(|l| l.status != LevelStatus::Skipped) {
        let _ = writeln!(out, "### Level {}\n", level.index + 1);
        for result in &level.results {
            render_detail(&mut out, result, input.excerpt_chars);
        }
    }

    out.push_str("---\n");
    let _ = writeln!(
        out,
        "*Generated by stackrun v{} in {}*",
        env!("CARGO_PKG_VERSION"),
        ui::format_duration(input.wall)
    );
    out
}

fn level_label(level: &LevelOutcome) -> String {
    let status = match level.status {
        LevelStatus::Succeeded => "succeeded",
        LevelStatus::Failed => "failed",
        LevelStatus::Skipped => "skipped",
    };
    if level.cycle {
        format!("{status}, cycle")
    } else {
        status.to_string()
    }
}

fn changes_cell(result: &ExecutionResult) -> String {
    match &result.counts {
        Some(counts) if counts.total() == 0 => "no changes".to_string(),
        Some(counts) => counts.to_string(),
        None => "unknown".to_string(),
    }
}

fn render_detail(out: &mut String, result: &ExecutionResult, limit: usize) {
    if result.success {
        let _ = writeln!(out, "#### {} succeeded\n", result.service);
        if !result.stdout.trim().is_empty() {
            push_fenced(out, &excerpt(&result.stdout, limit, Keep::Head));
        }
        return;
    }

    let _ = writeln!(out, "#### {} failed\n", result.service);
    if let Some(cause) = &result.cause {
        let _ = writeln!(out, "**Error:** {cause}\n");
    }
    let text = if result.stderr.trim().is_empty() {
        &result.stdout
    } else {
        &result.stderr
    };
    if !text.trim().is_empty() {
        push_fenced(out, &excerpt(text, limit, Keep::Tail));
    }
}

/// Which end of the output an excerpt keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keep {
    Head,
    Tail,
}

/// At most `limit` characters of `text`, marked when truncated
pub fn excerpt(text: &str, limit: usize, keep: Keep) -> String {
    let text = text.trim_end();
    let total = text.chars().count();
    if total <= limit {
        return text.to_string();
    }

    match keep {
        Keep::Head => {
            let head: String = text.chars().take(limit).collect();
            format!("{head}\n... (truncated, {total} chars total)")
        }
        Keep::Tail => {
            let tail: String = text.chars().skip(total - limit).collect();
            format!("... (truncated, {total} chars total)\n{tail}")
        }
    }
}

/// Fence `body` with more backticks than any run inside it
fn push_fenced(out: &mut String, body: &str) {
    let longest = body
        .split(|c: char| c != '`')
        .map(str::len)
        .max()
        .unwrap_or(0);
    let fence = "`".repeat(longest.max(2) + 1);
    let _ = writeln!(out, "{fence}\n{body}\n{fence}\n");
}

pub fn write(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Could not create {}", parent.display()))?;
    }
    std::fs::write(path, content).with_context(|| format!("Could not write {}", path.display()))
}

/// Resource totals, with services whose counts are unknown called out
fn resources_line(agg: &Aggregates) -> String {
    let known = agg.succeeded.saturating_sub(agg.unknown_counts);
    if agg.succeeded > 0 && known == 0 {
        return "unknown".to_string();
    }
    let totals = format!(
        "+{} ~{} -{}",
        agg.resources_added, agg.resources_changed, agg.resources_destroyed
    );
    if agg.unknown_counts > 0 {
        format!("{totals} ({} unknown)", agg.unknown_counts)
    } else {
        totals
    }
}

/// Print final summary
pub fn print_console_summary(record: &RunRecord, wall: Duration) {
    let agg = Aggregates::from_record(record, wall);

    ui::header("Summary");
    ui::kv("Services", &agg.services_total.to_string());
    ui::kv("Succeeded", &agg.succeeded.to_string().green().to_string());
    if agg.failed > 0 {
        ui::kv("Failed", &agg.failed.to_string().red().to_string());
    }
    if agg.skipped > 0 {
        ui::kv("Skipped", &agg.skipped.to_string().yellow().to_string());
    }
    ui::kv("Levels", &record.levels.len().to_string());
    ui::kv("Duration", &ui::format_duration(wall));
    ui::kv("Resources", &resources_line(&agg));

    println!();
    if record.success() {
        ui::success(&format!("All {} service(s) succeeded", agg.succeeded));
    } else {
        ui::error(&format!(
            "Failed: {}",
            record.failed_services().join(", ")
        ));
        let skipped = record.skipped_services();
        if !skipped.is_empty() {
            ui::warn(&format!("Skipped: {}", skipped.join(", ")));
        }
    }
}
