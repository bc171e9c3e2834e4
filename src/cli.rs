use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use levelrun::ActionKind;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stackrun")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Dependency-aware orchestrator for multi-service Terraform changes", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable debug logging
    #[arg(long, global = true, env = "ORCHESTRATOR_DEBUG")]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Detect changed services and run the engine over them in dependency order
    Run(RunArgs),

    /// Print the execution order without running anything
    Order(SelectionArgs),

    /// List discovered services and their dependencies
    Services(ServicesArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Run
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ActionArg {
    /// Alias of inspect
    Plan,
    Inspect,
    Apply,
}

impl From<ActionArg> for ActionKind {
    fn from(arg: ActionArg) -> Self {
        match arg {
            ActionArg::Plan | ActionArg::Inspect => Self::Inspect,
            ActionArg::Apply => Self::Apply,
        }
    }
}

#[derive(Args)]
pub struct RunArgs {
    /// Engine action to run
    #[arg(short, long, value_enum)]
    pub action: ActionArg,

    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Run independent services of a level concurrently
    #[arg(long)]
    pub parallel: bool,

    /// Worker pool size when --parallel is set
    #[arg(long)]
    pub max_workers: Option<usize>,

    /// Budget per service in seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Simulate engine invocations
    #[arg(short, long)]
    pub dry_run: bool,

    /// Skip the apply confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Actor recorded in the audit trail
    #[arg(long)]
    pub actor: Option<String>,

    /// Environment recorded in the audit trail
    #[arg(long)]
    pub environment: Option<String>,
}

/// Flags choosing which services a run covers
#[derive(Args)]
pub struct SelectionArgs {
    /// Configuration root holding one directory per service
    #[arg(short = 'w', long)]
    pub working_dir: PathBuf,

    /// Base revision of the change range
    #[arg(long)]
    pub base_ref: Option<String>,

    /// Head revision of the change range
    #[arg(long, default_value = "HEAD")]
    pub head_ref: String,

    /// Read changed paths from a file instead of git
    #[arg(long, conflicts_with = "all")]
    pub changed_files: Option<PathBuf>,

    /// Select every discovered service
    #[arg(long)]
    pub all: bool,

    /// Configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(Args)]
pub struct ServicesArgs {
    /// Configuration root holding one directory per service
    #[arg(short = 'w', long)]
    pub working_dir: PathBuf,

    /// Configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "stackrun",
            "run",
            "--action",
            "plan",
            "--working-dir",
            "toronto",
            "--base-ref",
            "origin/main",
            "--parallel",
            "--max-workers",
            "4",
        ])
        .unwrap();

        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(ActionKind::from(args.action), ActionKind::Inspect);
        assert_eq!(args.selection.head_ref, "HEAD");
        assert_eq!(args.selection.base_ref.as_deref(), Some("origin/main"));
        assert!(args.parallel);
        assert_eq!(args.max_workers, Some(4));
        assert!(!args.dry_run);
    }

    #[test]
    fn test_changed_files_conflicts_with_all() {
        let result = Cli::try_parse_from([
            "stackrun",
            "order",
            "-w",
            "toronto",
            "--all",
            "--changed-files",
            "changes.txt",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_action_is_required() {
        assert!(Cli::try_parse_from(["stackrun", "run", "-w", "toronto"]).is_err());
    }
}
