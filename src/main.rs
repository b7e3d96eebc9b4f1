mod agents;
mod cli;
mod commands;
mod config;
mod inference;
mod market;
mod operator;
mod paths;
mod progress;
mod runner;
mod ui;

use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command, StateCommand};
use converge::{ConvergeError, ExitStatus};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub spec: Option<PathBuf>,
    pub state: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        spec: cli.spec,
        state: cli.state,
        config: cli.config,
    };

    let result = match cli.command {
        Command::Init { force } => commands::init::run(&ctx, force),
        Command::Validate => commands::validate::run(&ctx),
        Command::Plan(args) => commands::plan::run(&ctx, &args),
        Command::Apply(args) => commands::apply::run(&ctx, args),
        Command::Mark(args) => commands::mark::run(&ctx, args),
        Command::Refresh(args) => commands::refresh::run(&ctx, &args),
        Command::State(cmd) => match cmd {
            StateCommand::List { kind } => commands::state::list(&ctx, kind.as_deref()),
            StateCommand::Show { address } => commands::state::show(&ctx, &address),
            StateCommand::Rm { address } => commands::state::rm(&ctx, &address),
        },
        Command::ForceUnlock { lock_id } => commands::unlock::run(&ctx, &lock_id),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "driftless", &mut io::stdout());
            Ok(ExitStatus::Success)
        }
    };

    match result {
        Ok(status) => exit_code(status),
        Err(e) => {
            ui::error(&format!("{e:#}"));
            let status = e
                .downcast_ref::<ConvergeError>()
                .map_or(ExitStatus::ExecutionError, ConvergeError::exit_status);
            exit_code(status)
        }
    }
}

fn exit_code(status: ExitStatus) -> ExitCode {
    ExitCode::from(u8::try_from(status.code()).unwrap_or(1))
}
