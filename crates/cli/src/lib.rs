pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "gestflow",
    about = "GestFlow operator CLI",
    long_about = "Apply migrations, bootstrap the first tenant, and inspect effective configuration.",
    after_help = "Examples:\n  gestflow migrate\n  gestflow seed --demo\n  gestflow config"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Create the first company and its owner user if they do not exist yet")]
    Seed {
        #[arg(long, help = "Also load a small demo catalog and customer list")]
        demo: bool,
    },
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed { demo } => commands::seed::run(demo),
        Command::Config => commands::config::run(),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
