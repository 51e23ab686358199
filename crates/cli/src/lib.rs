pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use dialsync_core::config::LoadOptions;

#[derive(Debug, Parser)]
#[command(
    name = "dialsync",
    about = "Dialsync operator CLI",
    long_about = "Operate the dialsync control plane: schema migrations, config inspection, readiness checks, maintenance sweeps, and drift reconciliation.",
    after_help = "Examples:\n  dialsync doctor --json\n  dialsync config\n  dialsync reconcile --tenant acme --apply"
)]
pub struct Cli {
    #[arg(long, global = true, value_name = "PATH", help = "Read configuration from this TOML file")]
    config: Option<PathBuf>,

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
    #[command(about = "Validate config, provider and webhook readiness, DB connectivity and schema")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Purge expired idempotency records and stale rate-limit windows once")]
    Sweep,
    #[command(about = "Compare one tenant's resources with the provider and report drift")]
    Reconcile {
        #[arg(long, help = "Tenant whose resources are checked")]
        tenant: String,
        #[arg(long, help = "Push local state to the provider where it drifted")]
        apply: bool,
    },
}

impl Cli {
    fn load_options(&self) -> LoadOptions {
        LoadOptions {
            config_path: self.config.clone(),
            require_file: self.config.is_some(),
            ..LoadOptions::default()
        }
    }
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = cli.load_options();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(options),
        Command::Config => commands::config::run(options),
        Command::Doctor { json } => commands::doctor::run(json, options),
        Command::Sweep => commands::sweep::run(options),
        Command::Reconcile { tenant, apply } => commands::reconcile::run(options, &tenant, apply),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
