use std::path::PathBuf;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// Outputs receiving the messages of one kind of logging, and the verbosity `L` they are
/// written at.
///
/// Missing fields take their [default](LoggerConfig::default) values when read from a file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, bound = "")]
pub struct LoggerConfig<L: LogLevel> {
    pub file: Option<PathBuf>,
    /// Keep the existing content of `file` instead of truncating it when the logger opens.
    pub append: bool,
    pub stdout: bool,
    pub stderr: bool,
    /// Forward every message to the `log` facade at this level.
    pub log: Option<LogCrateLevel>,
    pub level: L,
}

impl<L: LogLevel> Default for LoggerConfig<L> {
    fn default() -> Self {
        Self {
            file: None,
            append: true,
            stdout: false,
            stderr: false,
            log: None,
            level: L::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogCrateLevel {
    #[default]
    Info,
    Debug,
    Trace,
}

/// Verbosity of a [LoggerConfig], read from the `level` key.
pub trait LogLevel: DeserializeOwned + Serialize + Default {}
