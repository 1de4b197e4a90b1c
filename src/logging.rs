//! File logging
//!
//! The library logs through the `log` facade; the binary installs a
//! `simplelog` file logger writing to `~/.local/share/termish/logs/termish.log`.
//! Failing to set up the log never stops the shell.

use log::LevelFilter;
use simplelog::{ConfigBuilder, WriteLogger};
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

use crate::config::home_dir;

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("unknown log level: {0}")]
    Level(String),
    #[error("no home directory for the log file")]
    NoHome,
    #[error("cannot open log file {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("logger already installed")]
    AlreadyInstalled(#[from] log::SetLoggerError),
}

/// Directory holding `termish.log`
pub fn log_dir() -> Option<PathBuf> {
    home_dir().map(|h| h.join(".local").join("share").join("termish").join("logs"))
}

pub fn parse_level(level: &str) -> Result<LevelFilter, LoggingError> {
    LevelFilter::from_str(level.trim()).map_err(|_| LoggingError::Level(level.to_string()))
}

/// Install the file logger at the given level. `off` installs nothing.
pub fn init(level: &str) -> Result<(), LoggingError> {
    let level = parse_level(level)?;
    if level == LevelFilter::Off {
        return Ok(());
    }

    let dir = log_dir().ok_or(LoggingError::NoHome)?;
    let path = dir.join("termish.log");
    let file = fs::create_dir_all(&dir)
        .and_then(|_| OpenOptions::new().create(true).append(true).open(&path))
        .map_err(|source| LoggingError::Open { path, source })?;

    let config = ConfigBuilder::new()
        .set_thread_level(LevelFilter::Off)
        .build();
    WriteLogger::init(level, config, file)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels() {
        assert_eq!(parse_level("debug").unwrap(), LevelFilter::Debug);
        assert_eq!(parse_level("OFF").unwrap(), LevelFilter::Off);
        assert!(matches!(parse_level("loud"), Err(LoggingError::Level(_))));
    }

    #[test]
    fn off_installs_nothing() {
        assert!(init("off").is_ok());
    }
}
