//! Log output for a run: human readable lines on stderr, the same lines
//! without colors appended to the configured log file.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use std::fs::OpenOptions;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use validator::ValidationError;

pub fn parse_log_level<S: AsRef<str>>(level: S) -> Result<LevelFilter> {
    LevelFilter::from_str(level.as_ref().trim())
        .map_err(|e| Error::config("LOG_LEVEL", format!("{:?}: {e}", level.as_ref())))
}

pub fn validate_log_level<S: AsRef<str>>(level: S) -> std::result::Result<(), ValidationError> {
    parse_log_level(level.as_ref()).map(|_| ()).map_err(|e| {
        ValidationError::new("InvalidLogLevel").with_message(e.to_string().into())
    })
}

/// Installs the global subscriber. Fails if the log file cannot be opened or a
/// subscriber is already installed.
pub fn init_logging<P: AsRef<Path>>(log_file: P, level: &str) -> Result<()> {
    let log_file = log_file.as_ref();
    let level = parse_log_level(level)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .map_err(Error::from)
        .with_msg(format!("Opening log file {:?} failed", log_file))?;

    tracing_subscriber::registry()
        .with(level)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .try_init()
        .map_err(|e| Error::from(std::io::Error::other(e)))
        .with_msg("Installing log subscriber failed")
}

/// Console-only logging, used when the configuration itself cannot be read.
pub fn init_console_logging() {
    let _ = tracing_subscriber::fmt().with_writer(std::io::stderr).try_init();
}
