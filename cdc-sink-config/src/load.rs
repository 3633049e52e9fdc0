use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::environment::Environment;
use crate::shared::ValidationError;

/// Directory holding the configuration files, relative to the working directory.
const CONFIGURATION_DIR: &str = "configuration";

/// Stem of the file every environment starts from.
const BASE_FILE_STEM: &str = "base";

/// Extensions tried, in order, for each configuration file.
const CONFIG_FILE_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Prefix of environment variable overrides, as in `APP_WORKER_COUNT`.
const ENV_PREFIX: &str = "APP";

/// Separator of nested keys in environment variable overrides.
const ENV_SEPARATOR: &str = "__";

/// Configuration that can be loaded from files and checked once assembled.
pub trait Config: DeserializeOwned {
    /// Rejects values that would make the delivery core misbehave.
    fn validate(&self) -> Result<(), ValidationError>;
}

/// Errors returned by [`load_config`] and [`load_config_from_dir`].
#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("failed to determine the current directory: {0}")]
    CurrentDir(#[source] io::Error),

    #[error("failed to determine the runtime environment: {0}")]
    Environment(#[source] io::Error),

    #[error("configuration directory `{}` does not exist", .0.display())]
    MissingDirectory(PathBuf),

    /// Neither `<stem>.yaml`, `<stem>.yml` nor `<stem>.json` exists.
    #[error("no `{stem}` configuration file in `{}`", directory.display())]
    MissingFile { stem: String, directory: PathBuf },

    /// A file could not be parsed or an override could not be merged.
    #[error("failed to read configuration sources: {0}")]
    Sources(#[source] config::ConfigError),

    #[error("failed to deserialize configuration: {0}")]
    Deserialize(#[source] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(#[from] ValidationError),
}

/// Loads and validates `T` from `./configuration` for the environment named by `APP_ENVIRONMENT`.
///
/// See [`load_config_from_dir`] for the layering.
pub fn load_config<T>() -> Result<T, LoadConfigError>
where
    T: Config,
{
    let directory = std::env::current_dir()
        .map_err(LoadConfigError::CurrentDir)?
        .join(CONFIGURATION_DIR);
    let environment = Environment::load().map_err(LoadConfigError::Environment)?;

    load_config_from_dir(&directory, environment)
}

/// Loads and validates `T` from `directory`.
///
/// Values come from `base.<ext>`, then `<environment>.<ext>`, then `APP_`-prefixed environment
/// variables, later layers overriding earlier ones. Nested keys are separated by a double
/// underscore, so `APP_MEMORY_QUOTA__TOTAL_BYTES` sets `memory_quota.total_bytes`.
pub fn load_config_from_dir<T>(
    directory: &Path,
    environment: Environment,
) -> Result<T, LoadConfigError>
where
    T: Config,
{
    if !directory.is_dir() {
        return Err(LoadConfigError::MissingDirectory(directory.to_path_buf()));
    }

    let base_file = find_file(directory, BASE_FILE_STEM)?;
    let environment_file = find_file(directory, &environment.to_string())?;

    let settings = config::Config::builder()
        .add_source(config::File::from(base_file))
        .add_source(config::File::from(environment_file))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator(ENV_SEPARATOR),
        )
        .build()
        .map_err(LoadConfigError::Sources)?;

    let config = settings
        .try_deserialize::<T>()
        .map_err(LoadConfigError::Deserialize)?;
    config.validate()?;

    Ok(config)
}

fn find_file(directory: &Path, stem: &str) -> Result<PathBuf, LoadConfigError> {
    CONFIG_FILE_EXTENSIONS
        .iter()
        .map(|extension| directory.join(format!("{stem}.{extension}")))
        .find(|path| path.is_file())
        .ok_or_else(|| LoadConfigError::MissingFile {
            stem: stem.to_owned(),
            directory: directory.to_path_buf(),
        })
}
