use std::path::Path;

use log::{LevelFilter, info};
use snapinator_models::errors::SendableError;

use crate::logger::{self, print_env};

/// Installs logging and the panic hook, then announces the process.
pub fn startup(name: &str, log_file: Option<&Path>, verbose: bool) -> Result<(), SendableError> {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    logger::setup_logger(log_file, level)?;
    log_panics::init();

    info!("--- {} ---", name);
    if let Some(path) = log_file {
        info!("Logging to {}", path.display());
    }
    print_env()?;

    Ok(())
}
