use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    #[error("invalid environment override: {0}")]
    ConfigEnv(#[from] envy::Error),

    #[error("invalid config: {0}")]
    ConfigValidation(String),

    #[error("failed to prepare output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Render {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("template error: {0}")]
    Template(String),

    #[error("malformed composite service identity: {0}")]
    MalformedIdentity(String),

    #[error("error talking to registry: {0}")]
    Registry(#[source] reqwest::Error),

    #[error("registry returned status {0}: {1}")]
    RegistryStatus(u16, String),

    #[error("registry connection lost: {0}")]
    RegistryLost(String),

    #[error("notification delivery failed: {0}")]
    Notify(#[source] reqwest::Error),

    #[error("io error: {0}")]
    IOError(#[from] std::io::Error),
}

impl<T> Into<Result<T>> for SyncError {
    fn into(self) -> Result<T> {
        Err(self)
    }
}
