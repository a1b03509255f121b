//! Configuration Loader
//!
//! Environment-aware loading: a base TOML file, an optional per-environment
//! override file, then `SLICER__SECTION__FIELD` environment variables.

use config::{Config, Environment, File, FileFormat};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::error::ConfigResult;
use super::FleetConfig;

const ENV_PREFIX: &str = "SLICER";
const BASE_FILE_NAME: &str = "slicer";

/// Loaded, validated configuration plus where it came from
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: FleetConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection from `./config`
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));

        debug!(
            environment = environment,
            directory = %config_directory.display(),
            "Loading slicer fleet configuration"
        );

        let base = config_directory.join(format!("{BASE_FILE_NAME}.toml"));
        let overlay = config_directory.join(format!("{BASE_FILE_NAME}.{environment}.toml"));

        let config = Config::builder()
            .add_source(Self::optional_file(&base))
            .add_source(Self::optional_file(&overlay))
            .add_source(Self::environment_source())
            .build()?
            .try_deserialize::<FleetConfig>()?;

        config.validate()?;

        info!(
            environment = environment,
            max_concurrent_jobs = config.scheduler.max_concurrent_jobs,
            poll_interval_seconds = config.scheduler.poll_interval_seconds,
            startup_mode = ?config.health.startup_mode,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Load a single explicit file (plus environment overrides)
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Arc<ConfigManager>> {
        let path = path.as_ref();
        let config = Config::builder()
            .add_source(File::from(path).format(FileFormat::Toml).required(true))
            .add_source(Self::environment_source())
            .build()?
            .try_deserialize::<FleetConfig>()?;

        config.validate()?;

        Ok(Arc::new(ConfigManager {
            config,
            environment: Self::detect_environment(),
            config_directory: path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        }))
    }

    /// Wrap an already-built configuration (tests, embedding)
    pub fn from_config(config: FleetConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: Self::detect_environment(),
            config_directory: PathBuf::from("config"),
        }))
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    fn detect_environment() -> String {
        crate::logging::get_environment()
    }

    fn optional_file(path: &Path) -> File<config::FileSourceFile, FileFormat> {
        File::from(path).format(FileFormat::Toml).required(false)
    }

    fn environment_source() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
    }
}
