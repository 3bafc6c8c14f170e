pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

use cirrus_core::domain::credentials::DEFAULT_PROFILE;

#[derive(Debug, Parser)]
#[command(
    name = "cirrus",
    about = "Cirrus operator CLI",
    long_about = "Inspect configuration, run migrations and readiness checks, and drive sessions from the terminal.",
    after_help = "Examples:\n  cirrus doctor --json\n  cirrus query --user 7 --session 42 \"I need a private S3 bucket\"\n  cirrus deploy --user 7 --session 42"
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
    #[command(about = "Validate config, DB connectivity, provider binary and prompt templates")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Route one message through a session, as the HTTP /query endpoint does")]
    Query {
        #[arg(long)]
        user: String,
        #[arg(long)]
        session: String,
        message: String,
    },
    #[command(about = "Deploy the configuration stored for a session")]
    Deploy {
        #[arg(long)]
        user: String,
        #[arg(long)]
        session: String,
    },
    #[command(subcommand, about = "Manage provider credentials stored per user")]
    Credentials(CredentialsCommand),
}

#[derive(Debug, Subcommand)]
enum CredentialsCommand {
    #[command(about = "Store or replace a user's provider credentials")]
    Set {
        #[arg(long)]
        user: String,
        #[arg(long)]
        access_key_id: String,
        #[arg(long)]
        secret_access_key: String,
        #[arg(long, default_value = DEFAULT_PROFILE)]
        profile: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Query { user, session, message } => {
            commands::query::run(&user, &session, &message)
        }
        Command::Deploy { user, session } => commands::deploy::run(&user, &session),
        Command::Credentials(CredentialsCommand::Set {
            user,
            access_key_id,
            secret_access_key,
            profile,
        }) => commands::credentials::set(commands::credentials::CredentialInput {
            user_id: &user,
            access_key_id: &access_key_id,
            secret_access_key: &secret_access_key,
            profile: &profile,
        }),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
