//! User configuration
//!
//! Read from `$TERMISH_CONFIG` or `~/.config/termish/config.toml`. Missing
//! keys take their defaults, and a handful of environment variables
//! override the file:
//!
//! ```text
//! TERMISH_LOG=debug              log level (off, error, warn, info, debug, trace)
//! TERMISH_BANNER=1               print the banner on REPL start
//! TERMISH_BRIDGE_CAPACITY=4096   ring size for built-in pipelines
//! TERMISH_MAX_RECURSION=200      function call depth limit
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::bridge::DEFAULT_CAPACITY;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Log level for `~/.local/share/termish/logs/termish.log`
    pub log_level: String,
    /// History file; `~/.termish_history` when unset
    pub history_file: Option<PathBuf>,
    pub history_size: usize,
    /// Ring size of each stream bridge between built-in stages
    pub bridge_capacity: usize,
    pub max_recursion: usize,
    pub safe_mode: bool,
    pub banner: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: "warn".to_string(),
            history_file: None,
            history_size: 1000,
            bridge_capacity: DEFAULT_CAPACITY,
            max_recursion: 200,
            safe_mode: false,
            banner: false,
        }
    }
}

pub(crate) fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME").map(PathBuf::from)
}

impl Config {
    /// Where the config file is looked up
    pub fn path() -> Option<PathBuf> {
        if let Some(path) = env::var_os("TERMISH_CONFIG") {
            return Some(PathBuf::from(path));
        }
        home_dir().map(|h| h.join(".config").join("termish").join("config.toml"))
    }

    /// Load the config file (if any) and apply environment overrides.
    ///
    /// A missing file is not an error; an unreadable or malformed one is
    /// reported to the caller, who usually falls back to [`Config::default`].
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match Self::path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Config::default(),
        };
        config.apply_env();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    fn apply_env(&mut self) {
        if let Ok(level) = env::var("TERMISH_LOG") {
            self.log_level = level;
        }
        if let Ok(banner) = env::var("TERMISH_BANNER") {
            self.banner = banner == "1" || banner.eq_ignore_ascii_case("true");
        }
        if let Some(cap) = env::var("TERMISH_BRIDGE_CAPACITY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
        {
            self.bridge_capacity = cap;
        }
        if let Some(depth) = env::var("TERMISH_MAX_RECURSION")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
        {
            self.max_recursion = depth;
        }
    }

    pub fn history_path(&self) -> Option<PathBuf> {
        self.history_file
            .clone()
            .or_else(|| home_dir().map(|h| h.join(".termish_history")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn empty_file_gives_defaults() {
        assert_eq!(Config::from_toml("").unwrap(), Config::default());
    }

    #[test]
    fn partial_file_overrides_only_given_keys() {
        let config = Config::from_toml("bridge_capacity = 64\nsafe_mode = true\n").unwrap();
        assert_eq!(config.bridge_capacity, 64);
        assert!(config.safe_mode);
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.history_size, 1000);
    }

    #[test]
    fn malformed_file_is_reported() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "bridge_capacity = \"lots\"").unwrap();
        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().starts_with("invalid config"));
    }

    #[test]
    fn history_file_setting() {
        let config = Config::from_toml("history_file = \"/tmp/h\"").unwrap();
        assert_eq!(config.history_path(), Some(PathBuf::from("/tmp/h")));
    }
}
