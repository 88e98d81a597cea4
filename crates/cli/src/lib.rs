pub mod commands;
pub mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use rehabdesk_core::config::{ConfigOverrides, LoadOptions, RuntimeConfig};
use tracing::warn;

#[derive(Debug, Parser)]
#[command(
    name = "rehabdesk",
    about = "Sports injury rehab assistant",
    long_about = "Collect an athlete intake, run a short model-led interview and produce a phased rehabilitation plan. Educational guidance only.",
    after_help = "Examples:\n  rehabdesk intake --intake athlete.yaml\n  rehabdesk session --intake athlete.yaml --image ankle.jpg\n  rehabdesk doctor --json"
)]
pub struct Cli {
    #[arg(long, global = true, help = "YAML config file (defaults to RECOVERY_CONFIG_PATH or ./config.local.yaml)")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Override the model name for this run")]
    model: Option<String>,
    #[arg(long, global = true, help = "Override the log level for this run")]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Run the interview and plan steps for an intake file")]
    Session {
        #[arg(long, help = "Intake record as YAML")]
        intake: PathBuf,
        #[arg(long, help = "Injury photo, replaces image_path from the intake file")]
        image: Option<PathBuf>,
    },
    #[command(about = "Print the formatted intake block and required-field status")]
    Intake {
        #[arg(long, help = "Intake record as YAML")]
        intake: PathBuf,
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Check config file, API key, base URL and proxy readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = LoadOptions {
        config_path: cli.config,
        overrides: ConfigOverrides { model: cli.model, log_level: cli.log_level },
    };

    let resolved = RuntimeConfig::resolve(options.clone());
    logging::init(&resolved.config.logging);
    for warning in &resolved.warnings {
        warn!(event_name = "config.file_ignored", error = %warning, "config file ignored");
    }

    let result = match cli.command {
        Command::Session { intake, image } => {
            commands::session::run(&intake, image.as_deref(), options)
        }
        Command::Intake { intake, json } => commands::intake::run(&intake, json),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run(options) }
        }
        Command::Doctor { json } => commands::doctor::run(options, json),
    };

    if !result.output.is_empty() {
        println!("{}", result.output);
    }
    ExitCode::from(result.exit_code)
}
