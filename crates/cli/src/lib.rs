pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "vendabot",
    about = "Vendabot operator CLI",
    long_about = "Operate Vendabot migrations, config inspection, readiness checks, reminder sweeps, and event recovery.",
    after_help = "Examples:\n  vendabot doctor --json\n  vendabot config\n  vendabot requeue-failed --limit 50"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, WhatsApp credentials, and DB connectivity checks")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Run one pass of session expiry and reminder sweeps")]
    Sweep,
    #[command(about = "Return failed webhook events to pending so workers retry them")]
    RequeueFailed {
        #[arg(long, default_value_t = 100, help = "Maximum number of events to requeue")]
        limit: u32,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Sweep => commands::sweep::run(),
        Command::RequeueFailed { limit } => commands::requeue::run(limit),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
