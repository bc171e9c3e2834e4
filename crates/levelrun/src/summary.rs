//! Best-effort parsing of resource-change summaries from engine output
//!
//! A summary that cannot be found yields `None` (unknown), never zero.

use crate::types::{ActionKind, ResourceCounts};
use regex::Regex;
use std::sync::LazyLock;

static PLAN_LINE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"Plan:\s+(?:\d+ to import, )?(\d+) to add, (\d+) to change, (\d+) to destroy").ok()
});

static APPLY_LINE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?:Apply|Destroy) complete! Resources:\s+(?:(\d+) added, )?(?:(\d+) changed, )?(\d+) destroyed").ok()
});

/// Parse resource counts from engine stdout for the given action
pub fn parse_resource_counts(stdout: &str, action: ActionKind) -> Option<ResourceCounts> {
    let pattern = match action {
        ActionKind::Inspect => PLAN_LINE.as_ref()?,
        ActionKind::Apply => APPLY_LINE.as_ref()?,
    };

    let mut found = None;
    for line in stdout.lines() {
        if let Some(caps) = pattern.captures(line) {
            let number = |idx: usize| {
                caps.get(idx)
                    .map_or(Some(0), |m| m.as_str().parse::<u64>().ok())
            };
            if let (Some(added), Some(changed), Some(destroyed)) = (number(1), number(2), number(3))
            {
                found = Some(ResourceCounts {
                    added,
                    changed,
                    destroyed,
                });
            }
        } else if action == ActionKind::Inspect && line.trim_start().starts_with("No changes.") {
            found = Some(ResourceCounts::default());
        }
    }

    if found.is_none() {
        log::debug!("no {action} summary found in engine output");
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plan_summary() {
        let out = "Terraform will perform the following actions:\n\n\
                   Plan: 3 to add, 1 to change, 2 to destroy.\n";
        assert_eq!(
            parse_resource_counts(out, ActionKind::Inspect),
            Some(ResourceCounts {
                added: 3,
                changed: 1,
                destroyed: 2
            })
        );
    }

    #[test]
    fn test_parse_plan_summary_with_imports() {
        let out = "Plan: 1 to import, 2 to add, 0 to change, 0 to destroy.\n";
        assert_eq!(
            parse_resource_counts(out, ActionKind::Inspect),
            Some(ResourceCounts {
                added: 2,
                changed: 0,
                destroyed: 0
            })
        );
    }

    #[test]
    fn test_parse_plan_no_changes() {
        let out = "No changes. Your infrastructure matches the configuration.\n";
        assert_eq!(
            parse_resource_counts(out, ActionKind::Inspect),
            Some(ResourceCounts::default())
        );
    }

    #[test]
    fn test_parse_apply_summary() {
        let out = "module.vcn: Creation complete after 2s\n\
                   Apply complete! Resources: 4 added, 0 changed, 1 destroyed.\n";
        assert_eq!(
            parse_resource_counts(out, ActionKind::Apply),
            Some(ResourceCounts {
                added: 4,
                changed: 0,
                destroyed: 1
            })
        );
    }

    #[test]
    fn test_parse_destroy_summary() {
        let out = "Destroy complete! Resources: 7 destroyed.\n";
        assert_eq!(
            parse_resource_counts(out, ActionKind::Apply),
            Some(ResourceCounts {
                added: 0,
                changed: 0,
                destroyed: 7
            })
        );
    }

    #[test]
    fn test_unparseable_output_is_unknown() {
        assert_eq!(parse_resource_counts("Error: bad config", ActionKind::Inspect), None);
        assert_eq!(parse_resource_counts("", ActionKind::Apply), None);
    }

    #[test]
    fn test_plan_line_ignored_for_apply() {
        let out = "Plan: 1 to add, 0 to change, 0 to destroy.\n";
        assert_eq!(parse_resource_counts(out, ActionKind::Apply), None);
    }
}
