//! Run audit record
//!
//! One JSON document per run, overwritten at `audit_path`, plus the same
//! record appended as a single line to the history file.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use changeset::ChangeSet;
use levelrun::{ActionKind, ExecutionPlan, ExecutionResult, LevelStatus, ResourceCounts, RunRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::time::Duration;

/// CI variables copied into the record when set
const CONTEXT_VARS: &[&str] = &["GITHUB_REF", "GITHUB_SHA", "OCI_REGION"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub orchestrator_version: String,
    pub actor: String,
    pub environment: String,
    pub action: ActionKind,
    pub dry_run: bool,
    pub base_ref: String,
    pub head_ref: String,
    pub changed_files: Vec<String>,
    /// Service pulled in through module references, to the modules responsible
    pub module_expansions: BTreeMap<String, Vec<String>>,
    pub plan: Vec<PlannedLevel>,
    pub warnings: Vec<String>,
    pub results: Vec<ExecutionResult>,
    pub skipped: Vec<String>,
    pub aggregates: Aggregates,
    pub success: bool,
    pub context: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedLevel {
    pub index: usize,
    pub services: Vec<String>,
    pub cycle: bool,
    pub status: LevelStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Aggregates {
    pub services_total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Wall-clock time of the whole run
    pub total_duration_secs: f64,
    pub resources_added: u64,
    pub resources_changed: u64,
    pub resources_destroyed: u64,
    /// Succeeded services whose output carried no summary
    pub unknown_counts: usize,
}

impl Aggregates {
    pub fn from_record(record: &RunRecord, wall: Duration) -> Self {
        let mut agg = Self {
            total_duration_secs: wall.as_secs_f64(),
            skipped: record.skipped_services().len(),
            ..Self::default()
        };

        let mut resources = ResourceCounts::default();
        for result in record.results() {
            agg.services_total += 1;
            if result.success {
                agg.succeeded += 1;
            } else {
                agg.failed += 1;
            }
            match &result.counts {
                Some(c) => resources.merge(c),
                None if result.success => agg.unknown_counts += 1,
                None => {}
            }
        }
        agg.services_total += agg.skipped;
        agg.resources_added = resources.added;
        agg.resources_changed = resources.changed;
        agg.resources_destroyed = resources.destroyed;
        agg
    }
}

/// Inputs of an audit record that do not come from the run itself
pub struct AuditContext<'a> {
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub environment: String,
    pub dry_run: bool,
    pub changes: &'a ChangeSet,
    pub plan: &'a ExecutionPlan,
    pub wall: Duration,
}

impl AuditRecord {
    pub fn build(ctx: &AuditContext<'_>, record: &RunRecord) -> Self {
        let plan = record
            .levels
            .iter()
            .map(|l| PlannedLevel {
                index: l.index,
                services: l.services.clone(),
                cycle: l.cycle,
                status: l.status,
            })
            .collect();

        let module_expansions = ctx
            .changes
            .via_modules()
            .iter()
            .map(|(svc, modules)| (svc.clone(), modules.iter().cloned().collect()))
            .collect();

        Self {
            timestamp: ctx.timestamp,
            orchestrator_version: env!("CARGO_PKG_VERSION").to_string(),
            actor: ctx.actor.clone(),
            environment: ctx.environment.clone(),
            action: record.action,
            dry_run: ctx.dry_run,
            base_ref: ctx.changes.base().to_string(),
            head_ref: ctx.changes.head().to_string(),
            changed_files: ctx.changes.files().to_vec(),
            module_expansions,
            plan,
            warnings: ctx.plan.warnings.clone(),
            results: record.results().cloned().collect(),
            skipped: record.skipped_services().iter().map(ToString::to_string).collect(),
            aggregates: Aggregates::from_record(record, ctx.wall),
            success: record.success(),
            context: ci_context(|key| std::env::var(key).ok()),
        }
    }

    /// Overwrite the audit file and append a line to the history
    pub fn write(&self, audit_path: &Path, history_path: &Path) -> Result<()> {
        ensure_parent(audit_path)?;
        let pretty = serde_json::to_string_pretty(self).context("Failed to serialize audit record")?;
        fs::write(audit_path, pretty)
            .with_context(|| format!("Could not write {}", audit_path.display()))?;

        ensure_parent(history_path)?;
        let line = serde_json::to_string(self).context("Failed to serialize audit record")?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(history_path)
            .with_context(|| format!("Could not open {}", history_path.display()))?;
        writeln!(file, "{line}")
            .with_context(|| format!("Could not append to {}", history_path.display()))?;

        Ok(())
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Could not create {}", parent.display()))?;
    }
    Ok(())
}

/// Actor recorded for the run: flag, then `GITHUB_ACTOR`, then `USER`
///
/// Empty values fall through to the next source.
pub fn resolve_actor(flag: Option<&str>, env: impl Fn(&str) -> Option<String>) -> String {
    let present = |s: &String| !s.is_empty();
    flag.map(ToString::to_string)
        .filter(present)
        .or_else(|| env("GITHUB_ACTOR").filter(present))
        .or_else(|| env("USER").filter(present))
        .unwrap_or_else(|| "unknown".to_string())
}

fn ci_context(env: impl Fn(&str) -> Option<String>) -> BTreeMap<String, String> {
    CONTEXT_VARS
        .iter()
        .filter_map(|key| env(key).map(|v| ((*key).to_string(), v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use levelrun::{FailureCause, LevelOutcome, resolve};
    use tempfile::TempDir;

    fn result(service: &str, success: bool, counts: Option<ResourceCounts>) -> ExecutionResult {
        ExecutionResult {
            service: service.to_string(),
            action: ActionKind::Inspect,
            success,
            stdout: String::new(),
            stderr: String::new(),
            elapsed: Duration::from_secs(2),
            counts,
            cause: (!success).then(|| FailureCause::NonZeroExit {
                step: "plan".into(),
                code: 1,
            }),
        }
    }

    fn sample_record() -> RunRecord {
        RunRecord {
            action: ActionKind::Inspect,
            levels: vec![
                LevelOutcome {
                    index: 0,
                    services: vec!["network".into()],
                    cycle: false,
                    status: LevelStatus::Failed,
                    results: vec![result("network", false, None)],
                },
                LevelOutcome {
                    index: 1,
                    services: vec!["compute".into(), "oke".into()],
                    cycle: false,
                    status: LevelStatus::Skipped,
                    results: Vec::new(),
                },
            ],
        }
    }

    #[test]
    fn test_aggregates_totals() {
        let record = RunRecord {
            action: ActionKind::Inspect,
            levels: vec![LevelOutcome {
                index: 0,
                services: vec!["a".into(), "b".into(), "c".into()],
                cycle: false,
                status: LevelStatus::Succeeded,
                results: vec![
                    result("a", true, Some(ResourceCounts { added: 2, changed: 1, destroyed: 0 })),
                    result("b", true, Some(ResourceCounts { added: 1, changed: 0, destroyed: 4 })),
                    result("c", true, None),
                ],
            }],
        };
        let agg = Aggregates::from_record(&record, Duration::from_secs(3));
        assert_eq!(agg.services_total, 3);
        assert_eq!(agg.succeeded, 3);
        assert_eq!(agg.resources_added, 3);
        assert_eq!(agg.resources_destroyed, 4);
        assert_eq!(agg.unknown_counts, 1);
        assert!((agg.total_duration_secs - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_aggregates_count_skipped_services() {
        let agg = Aggregates::from_record(&sample_record(), Duration::from_secs(1));
        assert_eq!(agg.services_total, 3);
        assert_eq!(agg.failed, 1);
        assert_eq!(agg.skipped, 2);
        assert_eq!(agg.unknown_counts, 0);
    }

    #[test]
    fn test_resolve_actor() {
        let env = |key: &str| match key {
            "GITHUB_ACTOR" => Some("octocat".to_string()),
            "USER" => Some("runner".to_string()),
            _ => None,
        };
        assert_eq!(resolve_actor(Some("alice"), env), "alice");
        assert_eq!(resolve_actor(None, env), "octocat");
        assert_eq!(resolve_actor(None, |k| (k == "USER").then(|| "runner".to_string())), "runner");
        assert_eq!(resolve_actor(None, |_| None), "unknown");
    }

    #[test]
    fn test_resolve_actor_skips_empty_values() {
        let env = |key: &str| match key {
            "GITHUB_ACTOR" => Some(String::new()),
            "USER" => Some("runner".to_string()),
            _ => None,
        };
        assert_eq!(resolve_actor(None, env), "runner");
        assert_eq!(resolve_actor(Some(""), env), "runner");
        assert_eq!(resolve_actor(Some(""), |_| Some(String::new())), "unknown");
    }

    #[test]
    fn test_ci_context_only_present_vars() {
        let ctx = ci_context(|key| (key == "GITHUB_SHA").then(|| "abc123".to_string()));
        assert_eq!(ctx.len(), 1);
        assert_eq!(ctx["GITHUB_SHA"], "abc123");
    }

    #[test]
    fn test_write_overwrites_audit_and_appends_history() {
        let temp = TempDir::new().unwrap();
        let audit_path = temp.path().join("terraform-audit.json");
        let history_path = temp.path().join(".stackrun").join("audit-history.jsonl");

        let mut deps = BTreeMap::new();
        deps.insert("compute".to_string(), vec!["network".to_string()]);
        let plan = resolve(&["network", "compute", "oke"], &deps);
        let changes = ChangeSet::selected("origin/main", "HEAD", plan.as_lists().concat());
        let ctx = AuditContext {
            timestamp: Utc::now(),
            actor: "ci".into(),
            environment: "toronto".into(),
            dry_run: false,
            changes: &changes,
            plan: &plan,
            wall: Duration::from_secs(5),
        };
        let record = AuditRecord::build(&ctx, &sample_record());
        assert!(!record.success);
        assert_eq!(record.skipped, vec!["compute", "oke"]);

        record.write(&audit_path, &history_path).unwrap();
        record.write(&audit_path, &history_path).unwrap();

        let audit: AuditRecord =
            serde_json::from_str(&fs::read_to_string(&audit_path).unwrap()).unwrap();
        assert_eq!(audit, record);

        let history = fs::read_to_string(&history_path).unwrap();
        let lines: Vec<&str> = history.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: AuditRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.actor, "ci");
    }
}
