use core::fmt::Display;
use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::Path,
};

use crate::config::{CompilationLogLevel, LogCrateLevel, LoggerConfig};

/// Reports lowered kernels to every output enabled in a [logger config](LoggerConfig).
#[derive(Debug)]
pub struct CompilationLogger {
    loggers: Vec<LoggerKind>,
    level: CompilationLogLevel,
}

impl CompilationLogger {
    /// Open the outputs of `config`. Nothing is opened when logging is disabled.
    ///
    /// A log file that can't be opened is skipped with a warning.
    pub fn new(config: &LoggerConfig<CompilationLogLevel>) -> Self {
        let mut loggers = Vec::new();

        if config.level != CompilationLogLevel::Disabled {
            if let Some(path) = &config.file {
                match FileLogger::new(path, config.append) {
                    Ok(logger) => loggers.push(LoggerKind::File(logger)),
                    Err(err) => log::warn!(
                        "Can't open the compilation log file {}: {err}",
                        path.display()
                    ),
                }
            }
            if config.stdout {
                loggers.push(LoggerKind::Stdout);
            }
            if config.stderr {
                loggers.push(LoggerKind::Stderr);
            }
            if let Some(level) = config.log {
                loggers.push(LoggerKind::Log(level));
            }
        }

        Self {
            loggers,
            level: config.level,
        }
    }

    pub fn log_level(&self) -> CompilationLogLevel {
        self.level
    }

    /// Whether messages at `level` reach at least one output.
    pub fn is_enabled(&self, level: CompilationLogLevel) -> bool {
        !self.loggers.is_empty() && level != CompilationLogLevel::Disabled && self.level >= level
    }

    /// Log a message to every output.
    pub fn log<S: Display>(&mut self, msg: &S) {
        match self.loggers.as_mut_slice() {
            [] => {}
            [logger] => logger.log(msg),
            loggers => {
                let msg = msg.to_string();
                for logger in loggers {
                    logger.log(&msg);
                }
            }
        }
    }
}

#[derive(Debug)]
enum LoggerKind {
    File(FileLogger),
    Stdout,
    Stderr,
    Log(LogCrateLevel),
}

impl LoggerKind {
    fn log<S: Display>(&mut self, msg: &S) {
        match self {
            LoggerKind::File(file_logger) => file_logger.log(msg),
            LoggerKind::Stdout => println!("{msg}"),
            LoggerKind::Stderr => eprintln!("{msg}"),
            LoggerKind::Log(level) => match level {
                LogCrateLevel::Info => log::info!("{msg}"),
                LogCrateLevel::Debug => log::debug!("{msg}"),
                LogCrateLevel::Trace => log::trace!("{msg}"),
            },
        }
    }
}

#[derive(Debug)]
struct FileLogger {
    writer: BufWriter<File>,
}

impl FileLogger {
    fn new(path: &Path, append: bool) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .append(append)
            .truncate(!append)
            .create(true)
            .open(path)?;

        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    // Flushed after every message.
    fn log<S: Display>(&mut self, msg: &S) {
        let result = writeln!(self.writer, "{msg}").and_then(|_| self.writer.flush());
        if let Err(err) = result {
            log::warn!("Failed to write to the compilation log: {err}");
        }
    }
}
