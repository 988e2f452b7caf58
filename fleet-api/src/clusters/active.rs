use std::io;
use std::path::{Path, PathBuf};

use fleet_config::{Environment, environment_config_path};
use serde_yaml::{Mapping, Value};
use thiserror::Error;
use uuid::Uuid;

/// Key the active cluster id is persisted under.
pub const ACTIVE_ID_KEY: &str = "active_id";

/// Older spellings of [`ACTIVE_ID_KEY`], dropped whenever the file is rewritten.
const ACTIVE_ID_ALIASES: [&str; 2] = ["activeCluster", "active_cluster"];

#[derive(Debug, Error)]
pub enum ActiveFileError {
    #[error("failed to access configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("configuration file {path} is not valid YAML: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("configuration file {0} does not hold a mapping at its top level")]
    NotAMapping(PathBuf),

    #[error("the task writing the configuration file failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// The configuration file the active cluster selection is written back to.
///
/// Every key other than the active id is preserved when the file is rewritten.
#[derive(Debug, Clone)]
pub struct ActiveClusterFile {
    path: PathBuf,
}

impl ActiveClusterFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The environment-specific file of `configuration_dir`, which is loaded after `base.yaml`
    /// and therefore wins over it.
    pub fn for_environment(configuration_dir: &Path, environment: Environment) -> Self {
        Self::new(environment_config_path(configuration_dir, environment))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes `active_id` into the file, removing the key when `None`.
    pub async fn persist(&self, active_id: Option<Uuid>) -> Result<(), ActiveFileError> {
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || write_active_id(&path, active_id)).await?
    }
}

fn write_active_id(path: &Path, active_id: Option<Uuid>) -> Result<(), ActiveFileError> {
    let io_error = |source| ActiveFileError::Io {
        path: path.to_path_buf(),
        source,
    };

    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => String::new(),
        Err(err) => return Err(io_error(err)),
    };

    let document: Value = if raw.trim().is_empty() {
        Value::Mapping(Mapping::new())
    } else {
        serde_yaml::from_str(&raw).map_err(|source| ActiveFileError::Parse {
            path: path.to_path_buf(),
            source,
        })?
    };

    let mut mapping = match document {
        Value::Mapping(mapping) => mapping,
        Value::Null => Mapping::new(),
        _ => return Err(ActiveFileError::NotAMapping(path.to_path_buf())),
    };

    for alias in ACTIVE_ID_ALIASES {
        mapping.remove(alias);
    }
    match active_id {
        Some(id) => {
            mapping.insert(Value::from(ACTIVE_ID_KEY), Value::from(id.to_string()));
        }
        None => {
            mapping.remove(ACTIVE_ID_KEY);
        }
    }

    let updated = serde_yaml::to_string(&Value::Mapping(mapping)).map_err(|source| {
        ActiveFileError::Parse {
            path: path.to_path_buf(),
            source,
        }
    })?;

    // Write next to the target and rename so readers never observe a half-written file.
    let staging = path.with_extension("yaml.tmp");
    std::fs::write(&staging, updated).map_err(io_error)?;
    std::fs::rename(&staging, path).map_err(io_error)?;

    Ok(())
}
