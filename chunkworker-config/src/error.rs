//! Errors raised while loading or validating configuration

use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// An environment override could not be parsed
    #[error("Invalid value for {variable}: {reason}")]
    InvalidEnv { variable: String, reason: String },

    #[error("Invalid {domain} configuration: {message}")]
    DomainError { domain: String, message: String },
}
