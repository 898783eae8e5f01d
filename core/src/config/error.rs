use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or validating the audit configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found at path: {0}")]
    FileNotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration value: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
