mod cli;
mod commands;
mod display;

use clap::Parser;
use snapinator_config::paths;
use snapinator_models::errors::SendableError;
use snapinator_utilities::startup::startup;

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<(), SendableError> {
    let cli = Cli::parse();
    let config = cli.config.unwrap_or_else(paths::default_config_path);

    // The daemon always logs to a file; one-shot commands only when asked.
    let log_file = match &cli.command {
        Commands::Run { .. } => Some(cli.log_file.unwrap_or_else(paths::default_log_path)),
        _ => cli.log_file,
    };
    startup("Snapinator", log_file.as_deref(), cli.verbose)?;

    match cli.command {
        Commands::Run { engine } => commands::run_daemon(&config, engine).await?,
        Commands::Add(args) => commands::add_task(&config, args)?,
        Commands::Update(args) => commands::update_task(&config, args)?,
        Commands::Remove { id } => commands::remove_task(&config, &id)?,
        Commands::Enable { id } => commands::set_enabled(&config, &id, true)?,
        Commands::Disable { id } => commands::set_enabled(&config, &id, false)?,
        Commands::List => commands::list_tasks(&config)?,
        Commands::Status { id } => commands::show_status(&config, id.as_deref())?,
        Commands::Settings(args) => commands::change_settings(&config, args)?,
        Commands::Capture { id, engine } => commands::capture_once(&config, &id, engine).await?,
        Commands::Next { expression, count } => commands::preview_next(&expression, count)?,
    }

    Ok(())
}
