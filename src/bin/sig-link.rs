use std::env;
use std::process::ExitCode;
use log::{error, info, LevelFilter};
use sig_link::{init_logging, run};
use sig_link::error::{AppRunError, ConfigError};

fn main() -> ExitCode {
    if let Err(err) = init_logging(LevelFilter::Info) {
        eprintln!("{}", err);
        return ExitCode::FAILURE;
    }
    info!(concat!("sig-link ", env!("CARGO_PKG_VERSION")));

    let args = env::args();

    match run(args) {
        Err(AppRunError::ConfigError { source: ConfigError::CanNotLock { .. } }) => {
            error!("Another sig-link instance is already running");
            ExitCode::FAILURE
        },
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        },
        Ok(_) => ExitCode::SUCCESS,
    }
}
