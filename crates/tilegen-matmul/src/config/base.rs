use std::path::Path;
use std::sync::Arc;

use super::{
    compilation::{CompilationConfig, CompilationLogLevel},
    lowering::LoweringConfig,
};

/// Static mutex holding the global configuration, initialized as `None`.
static TILEGEN_GLOBAL_CONFIG: spin::Mutex<Option<Arc<GlobalConfig>>> = spin::Mutex::new(None);

/// File names searched for, in order, by [GlobalConfig::get].
const CONFIG_FILE_NAMES: [&str; 2] = ["tilegen.toml", "Tilegen.toml"];

/// Process-wide configuration: lowering tunables and compilation logging.
#[derive(Default, Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct GlobalConfig {
    /// Tunables of the matmul lowering.
    #[serde(default)]
    pub lowering: LoweringConfig,

    /// Configuration of the compilation logger.
    #[serde(default)]
    pub compilation: CompilationConfig,
}

impl GlobalConfig {
    /// Retrieves the current global configuration, loading it from the current directory if not
    /// set.
    ///
    /// If no configuration is set, it attempts to load one from `tilegen.toml` or `Tilegen.toml`
    /// in the current directory or its parents, then applies the environment overrides. If no
    /// file is found, a default configuration is used.
    ///
    /// # Notes
    ///
    /// Every call takes a global lock. Read the configuration once, when building
    /// [lowering options](crate::kernels::LoweringOptions), rather than once per kernel.
    pub fn get() -> Arc<Self> {
        let mut state = TILEGEN_GLOBAL_CONFIG.lock();
        match state.as_ref() {
            Some(config) => config.clone(),
            None => {
                let config = Arc::new(Self::from_current_dir().override_from_env());
                *state = Some(config.clone());
                config
            }
        }
    }

    /// Sets the global configuration to the provided value.
    ///
    /// # Panics
    /// Panics if the configuration has already been set or read, as it cannot be overridden.
    pub fn set(config: Self) {
        let mut state = TILEGEN_GLOBAL_CONFIG.lock();
        if state.is_some() {
            panic!("Cannot set the global configuration multiple times.");
        }
        *state = Some(Arc::new(config));
    }

    /// Save the current configuration to the provided file path.
    pub fn save_default<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
        let config = Self::get();
        let content = toml::to_string_pretty(config.as_ref())
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
        std::fs::write(path, content)
    }

    /// Overrides configuration fields based on environment variables.
    ///
    /// - `TILEGEN_DEBUG_LOG`: `stdout`, `stderr`, `1`/`true` (log to `/tmp/tilegen.log`),
    ///   `0`/`false` (disable) or a file path. Any value other than `0`/`false` enables full
    ///   compilation logging.
    /// - `TILEGEN_COMPLEXITY_LIMIT`: ceiling of the tiling complexity heuristic.
    pub fn override_from_env(mut self) -> Self {
        if let Ok(val) = std::env::var("TILEGEN_DEBUG_LOG") {
            let logger = &mut self.compilation.logger;
            logger.level = CompilationLogLevel::Full;

            match val.as_str() {
                "stdout" => logger.stdout = true,
                "stderr" => logger.stderr = true,
                "1" | "true" => logger.file = Some("/tmp/tilegen.log".into()),
                "0" | "false" => logger.level = CompilationLogLevel::Disabled,
                file_path => logger.file = Some(file_path.into()),
            }
        }

        if let Ok(val) = std::env::var("TILEGEN_COMPLEXITY_LIMIT") {
            match val.parse::<u64>() {
                Ok(limit) => self.lowering.complexity_limit = limit,
                Err(err) => log::warn!("Ignoring TILEGEN_COMPLEXITY_LIMIT={val}: {err}"),
            }
        }

        self
    }

    // Traverses up the directory tree until a configuration file is found or the root is
    // reached.
    fn from_current_dir() -> Self {
        let Ok(mut dir) = std::env::current_dir() else {
            return Self::default();
        };

        loop {
            for name in CONFIG_FILE_NAMES {
                if let Ok(content) = Self::from_file_path(dir.join(name)) {
                    return content;
                }
            }

            if !dir.pop() {
                break;
            }
        }

        Self::default()
    }

    /// Loads the configuration from a file.
    ///
    /// # Panics
    ///
    /// If the file exists but isn't a valid configuration.
    pub fn from_file_path<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = match toml::from_str(&content) {
            Ok(val) => val,
            Err(err) => panic!("The file provided doesn't have the right format => {err:?}"),
        };

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;
    use crate::config::LogCrateLevel;

    #[test]
    fn partial_files_fall_back_to_defaults() {
        let config: GlobalConfig = toml::from_str(
            r#"
            [lowering]
            complexity_limit = 12000

            [compilation.logger]
            stderr = true
            log = "debug"
            level = "basic"
            "#,
        )
        .unwrap();

        assert_eq!(config.lowering.complexity_limit, 12000);
        assert_eq!(config.lowering.group_m, 8);
        assert_eq!(config.lowering.argument_alignment, 16);
        assert!(config.compilation.logger.stderr);
        assert!(config.compilation.logger.append);
        assert_eq!(config.compilation.logger.log, Some(LogCrateLevel::Debug));
        assert_eq!(config.compilation.logger.level, CompilationLogLevel::Basic);
    }

    #[test]
    fn config_file_is_found_by_path() {
        let path = std::env::temp_dir().join(format!("tilegen-config-{}.toml", std::process::id()));
        std::fs::write(&path, "[lowering]\ngroup_m = 4\n").unwrap();

        let config = GlobalConfig::from_file_path(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.lowering.group_m, 4);
        assert!(GlobalConfig::from_file_path(&path).is_err());
    }

    #[test]
    #[serial]
    fn environment_overrides_file_values() {
        // SAFETY: environment accesses are serialized across the test-suite.
        unsafe {
            std::env::set_var("TILEGEN_DEBUG_LOG", "stderr");
            std::env::set_var("TILEGEN_COMPLEXITY_LIMIT", "4096");
        }
        let config = GlobalConfig::default().override_from_env();
        unsafe {
            std::env::remove_var("TILEGEN_DEBUG_LOG");
            std::env::remove_var("TILEGEN_COMPLEXITY_LIMIT");
        }

        assert_eq!(config.lowering.complexity_limit, 4096);
        assert!(config.compilation.logger.stderr);
        assert_eq!(config.compilation.logger.level, CompilationLogLevel::Full);
    }

    #[test]
    #[serial]
    fn invalid_environment_values_are_ignored() {
        // SAFETY: environment accesses are serialized across the test-suite.
        unsafe {
            std::env::set_var("TILEGEN_DEBUG_LOG", "0");
            std::env::set_var("TILEGEN_COMPLEXITY_LIMIT", "lots");
        }
        let config = GlobalConfig::default().override_from_env();
        unsafe {
            std::env::remove_var("TILEGEN_DEBUG_LOG");
            std::env::remove_var("TILEGEN_COMPLEXITY_LIMIT");
        }

        assert_eq!(config.lowering.complexity_limit, 9000);
        assert_eq!(
            config.compilation.logger.level,
            CompilationLogLevel::Disabled
        );
    }
}
