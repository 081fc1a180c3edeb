//! Unified error types for nodewatch

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for nodewatch operations
#[derive(Error, Debug)]
pub enum Error {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // Config errors
    #[error("Failed to read config file '{path}': {source}")]
    ConfigRead { path: PathBuf, source: io::Error },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config validation failed: {0}")]
    ConfigValidation(String),

    // External command errors
    #[error("Failed to spawn '{command}': {source}")]
    CommandSpawn { command: String, source: io::Error },

    #[error("Command '{command}' failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("Command '{command}' timed out after {secs} seconds")]
    CommandTimeout { command: String, secs: u64 },

    // Session errors
    #[error("Not attached to a materialization")]
    NotAttached,

    #[error("Attached, but no materialization information in output")]
    SessionUnparsed,

    // Health monitoring errors
    #[error("Reachability probe failed: {0}")]
    ProbeFailed(String),

    #[error("Failed to power cycle '{host}': {message}")]
    RebootFailed { host: String, message: String },

    #[error("Failed to encode JSON output: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for nodewatch operations
pub type Result<T> = std::result::Result<T, Error>;
