//! Breedlog CLI - record cattle-breed predictions from the terminal
//!
//! Predictions are saved locally first and uploaded on `breedlog sync`.

mod auth;
mod cli;
mod commands;
mod config_profiles;
mod error;
#[cfg(test)]
mod tests;

use clap::{CommandFactory, Parser};
use tracing_subscriber::filter::Directive;

use crate::cli::{Cli, Commands};
use crate::commands::add::run_add;
use crate::commands::auth_cmd::run_auth;
use crate::commands::clear::run_clear;
use crate::commands::common::resolve_db_path;
use crate::commands::completions::run_completions;
use crate::commands::config::run_config;
use crate::commands::list::run_list;
use crate::commands::sync::run_sync;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "breedlog=info".parse::<Directive>() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let profile = cli.profile.as_deref();

    match cli.command {
        Some(Commands::Add { image, result }) => {
            let db_path = resolve_db_path(cli.db_path)?;
            run_add(&image, result.as_deref(), &db_path, profile).await
        }
        Some(Commands::List { limit, json }) => {
            let db_path = resolve_db_path(cli.db_path)?;
            run_list(limit, json, &db_path, profile).await
        }
        Some(Commands::Sync { offline, json }) => {
            let db_path = resolve_db_path(cli.db_path)?;
            run_sync(offline, json, &db_path, profile).await
        }
        Some(Commands::Clear { yes }) => {
            let db_path = resolve_db_path(cli.db_path)?;
            run_clear(yes, &db_path, profile).await
        }
        Some(Commands::Completions { shell, output }) => {
            run_completions(shell, output.as_deref())
        }
        Some(Commands::Config { command }) => run_config(command, profile),
        Some(Commands::Auth { command }) => run_auth(command, profile).await,
        None => {
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    }
}
