use std::env;
use log::LevelFilter;
use crate::error::AppRunError;

pub mod cli;
pub mod config;
pub mod device;
pub mod error;
pub mod permission;
pub mod spectrometer;
pub mod telemetry;

/**
 * Logs to stderr, and also to the file named by `LOG_FILE` when it is set.
 */
pub fn init_logging(level: LevelFilter) -> Result<(), AppRunError> {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        // filtering happens through log::set_max_level so the config can change it later
        .level(LevelFilter::Trace)
        .chain(std::io::stderr());

    if let Ok(log_file) = env::var("LOG_FILE") {
        let file = fern::log_file(&log_file).map_err(|err| AppRunError::Logging {
            message: format!("Failed to open LOG_FILE {}: {}", log_file, err),
        })?;
        dispatch = dispatch.chain(file);
    }

    dispatch.apply().map_err(|err| AppRunError::Logging { message: err.to_string() })?;
    log::set_max_level(level);
    Ok(())
}

pub fn run(args: env::Args) -> Result<(), AppRunError> {
    cli::run(args)
}
