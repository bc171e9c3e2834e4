mod audit;
mod cli;
mod commands;
mod config;
mod engine;
mod progress;
mod report;
mod ui;

use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use commands::run::RunStatus;
use std::io;
use std::process::ExitCode;

/// Global context for the application
pub struct Context {
    pub quiet: bool,
}

/// Exit code for a service failure
const EXIT_FAILED: u8 = 1;
/// Exit code for bad input: working dir, references, configuration
const EXIT_STRUCTURAL: u8 = 2;
/// Exit code when interrupted, as a shell reports SIGINT
const EXIT_INTERRUPTED: u8 = 130;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 if cli.debug => log::LevelFilter::Debug,
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet && !cli.debug {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context { quiet: cli.quiet };

    let outcome = match cli.command {
        Command::Run(args) => commands::run::run(&ctx, args),
        Command::Order(args) => commands::order::run(&ctx, &args).map(|()| RunStatus::Succeeded),
        Command::Services(args) => {
            commands::services::run(&ctx, &args).map(|()| RunStatus::Succeeded)
        }
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "stackrun", &mut io::stdout());
            Ok(RunStatus::Succeeded)
        }
    };

    match outcome {
        Ok(RunStatus::Succeeded | RunStatus::NothingToDo | RunStatus::Declined) => ExitCode::SUCCESS,
        Ok(RunStatus::Failed) => ExitCode::from(EXIT_FAILED),
        Ok(RunStatus::Interrupted) => ExitCode::from(EXIT_INTERRUPTED),
        Err(e) => {
            ui::error(&format!("{e:#}"));
            ExitCode::from(EXIT_STRUCTURAL)
        }
    }
}
