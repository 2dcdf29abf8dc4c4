use super::logger::{LogLevel, LoggerConfig};

/// Settings of the compilation logger, which reports every lowered matmul.
#[derive(Default, Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct CompilationConfig {
    #[serde(default)]
    pub logger: LoggerConfig<CompilationLogLevel>,
}

/// How much of each lowering is reported.
#[derive(
    Default,
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum CompilationLogLevel {
    /// Nothing is logged.
    #[default]
    #[serde(rename = "disabled")]
    Disabled,

    /// Tiling, launch dimensions and resource usage of each kernel.
    #[serde(rename = "basic")]
    Basic,

    /// Everything from [Basic](CompilationLogLevel::Basic) plus the emitted program.
    #[serde(rename = "full")]
    Full,
}

impl LogLevel for CompilationLogLevel {}
