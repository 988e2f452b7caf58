use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::environment::Environment;

/// Directory, relative to the working directory, that holds the configuration files.
pub const CONFIGURATION_DIR: &str = "configuration";

/// Configuration file loaded in every environment.
const BASE_CONFIG_FILE: &str = "base.yaml";

const ENV_PREFIX: &str = "APP";
const ENV_PREFIX_SEPARATOR: &str = "_";

/// Separator for nested keys in environment variables.
///
/// `APP_APPLICATION__PORT=8080` sets `application.port`.
const ENV_SEPARATOR: &str = "__";

/// Separator for list values in environment variables.
///
/// `APP_API_KEYS=abc,def` sets the `api_keys` list.
const LIST_SEPARATOR: &str = ",";

/// Keys of a configuration type that must be parsed as lists when they come from the
/// environment.
pub trait Config {
    const LIST_PARSE_KEYS: &'static [&'static str];
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("could not determine the current directory: {0}")]
    CurrentDir(#[source] std::io::Error),

    #[error("could not determine the runtime environment: {0}")]
    Environment(#[source] std::io::Error),

    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

/// Returns `<current dir>/configuration`.
pub fn configuration_dir() -> Result<PathBuf, ConfigLoadError> {
    let base_path = std::env::current_dir().map_err(ConfigLoadError::CurrentDir)?;

    Ok(base_path.join(CONFIGURATION_DIR))
}

/// Path of the file holding the overrides of `environment` inside `dir`.
///
/// This is also the file that runtime state such as the active cluster is written back to.
pub fn environment_config_path(dir: &Path, environment: Environment) -> PathBuf {
    dir.join(environment.config_file_name())
}

/// Loads configuration from `./configuration` for the environment named by `APP_ENVIRONMENT`.
///
/// See [`load_config_from`] for the layering rules.
pub fn load_config<T>() -> Result<T, ConfigLoadError>
where
    T: Config + DeserializeOwned,
{
    let environment = Environment::load().map_err(ConfigLoadError::Environment)?;

    load_config_from(&configuration_dir()?, environment)
}

/// Loads layered configuration from `dir`.
///
/// Sources, later ones overriding earlier ones:
/// 1. `base.yaml` (required)
/// 2. `{environment}.yaml` (optional)
/// 3. environment variables prefixed with `APP_`, `__` separating nested keys
pub fn load_config_from<T>(dir: &Path, environment: Environment) -> Result<T, ConfigLoadError>
where
    T: Config + DeserializeOwned,
{
    let mut environment_source = config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .separator(ENV_SEPARATOR);

    if !<T as Config>::LIST_PARSE_KEYS.is_empty() {
        environment_source = environment_source
            .try_parsing(true)
            .list_separator(LIST_SEPARATOR);

        for key in <T as Config>::LIST_PARSE_KEYS {
            environment_source = environment_source.with_list_parse_key(key);
        }
    }

    let settings = config::Config::builder()
        .add_source(config::File::from(dir.join(BASE_CONFIG_FILE)))
        .add_source(config::File::from(environment_config_path(dir, environment)).required(false))
        .add_source(environment_source)
        .build()?;

    Ok(settings.try_deserialize::<T>()?)
}
