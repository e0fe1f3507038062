use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the logger tree and registry.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("logger registry has been shut down")]
    RegistryShutDown,
    #[error("logger `{name}` already reported its result")]
    AlreadyFinished { name: String },
    #[error("logger `{name}` is terminal and no longer accepts output")]
    Terminal { name: String },
    #[error("logger `{name}` cannot hold child loggers")]
    NotAContainer { name: String },
    #[error("unit placeholder `{name}` is already bound")]
    PlaceholderBound { name: String },
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors raised while persisting a finished result.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to prepare results directory `{path}`: {source}")]
    PrepareDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write result `{path}`: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize result for `{name}`: {source}")]
    Serialize {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to format result timestamp: {0}")]
    Timestamp(#[from] time::error::Format),
}

/// Errors raised while loading [`crate::LogConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse log configuration: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid severity map: {0}")]
    InvalidSeverityMap(String),
}
