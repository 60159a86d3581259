//! Error types for sensevoice.

use crate::stt::worker::WorkerState;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Classified failure of a model fetch.
///
/// Each variant maps to a stable code so callers (and the CLI's JSON output)
/// can branch on it without parsing messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// The named model or file does not exist on the hub.
    #[error("Model not found: {message}")]
    InvalidModelName { message: String },

    /// Transfer failed or the downloaded file did not verify.
    #[error("Model download failed: {message}")]
    Network { message: String },

    /// Malformed parameters or anything else.
    #[error("Unexpected model error: {message}")]
    Unexpected { message: String },
}

impl ModelError {
    pub const INVALID_MODEL_NAME: &'static str = "E_INVALID_MODEL_NAME";
    pub const NETWORK_ERROR: &'static str = "E_NETWORK_ERROR";
    pub const UNEXPECTED_ERROR: &'static str = "E_UNEXPECTED_ERROR";

    /// Stable error code for this failure.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidModelName { .. } => Self::INVALID_MODEL_NAME,
            Self::Network { .. } => Self::NETWORK_ERROR,
            Self::Unexpected { .. } => Self::UNEXPECTED_ERROR,
        }
    }
}

/// Result of a model fetch in the `{"status", "message"}` shape.
///
/// `message` carries the local path on success and the error code on failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchReport {
    pub status: &'static str,
    pub message: String,
}

impl FetchReport {
    pub fn from_result(result: &std::result::Result<PathBuf, ModelError>) -> Self {
        match result {
            Ok(path) => Self {
                status: "ok",
                message: path.display().to_string(),
            },
            Err(e) => Self {
                status: "error",
                message: e.code().to_string(),
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

#[derive(Error, Debug)]
pub enum SenseVoiceError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Engine startup errors
    #[error("Failed to launch engine {executable}: {source}")]
    Spawn {
        executable: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Engine did not become ready within {timeout:?}")]
    StartupTimeout { timeout: Duration },

    #[error("Engine exited before becoming ready (exit code {code:?}): {stderr}")]
    StartupFailed { code: Option<i32>, stderr: String },

    // Session errors
    #[error("Engine worker stopped while relaying a response: {message}")]
    WorkerCrashed { message: String },

    #[error("Session is closed (worker {state})")]
    SessionClosed { state: WorkerState },

    #[error("Invalid record path {path:?}: {message}")]
    InvalidRecordPath { path: String, message: String },

    // Model acquisition errors
    #[error(transparent)]
    Model(#[from] ModelError),

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, SenseVoiceError>;
