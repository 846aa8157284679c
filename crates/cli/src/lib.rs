pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "orderly",
    about = "Orderly operator CLI",
    long_about = "Inspect configuration, prepare the database, and run natural-language order instructions.",
    after_help = "Examples:\n  orderly doctor --json\n  orderly seed\n  orderly order --account acct-demo --token $TOKEN \"Order 300 units of SK001 for Luxe Beauty Gallery\""
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, caller tokens, model endpoint settings, and database schema")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the demo catalog (companies and products) idempotently")]
    Seed,
    #[command(about = "Run one natural-language order instruction through the agent")]
    Order {
        #[arg(long, help = "Account the order is placed in")]
        account: String,
        #[arg(long, help = "Caller token configured under auth.callers")]
        token: String,
        #[arg(long, help = "Correlation id for progress lines; generated when omitted")]
        run_id: Option<String>,
        #[arg(required = true, help = "Instruction text")]
        prompt: Vec<String>,
    },
    #[command(about = "List the progress lines recorded for a run")]
    Progress { run_id: String },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Order { account, token, run_id, prompt } => {
            commands::order::run(commands::order::OrderArgs {
                account_id: account,
                caller_token: token,
                run_id,
                prompt: prompt.join(" "),
            })
        }
        Command::Progress { run_id } => commands::progress::run(&run_id),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
