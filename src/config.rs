use crate::defaults;
use crate::error::{Result, SenseVoiceError};
use crate::stt::protocol::Language;
use crate::stt::session::SessionConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub timeouts: TimeoutConfig,
    pub model: ModelConfig,
}

/// How to launch the engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub executable: PathBuf,
    /// Explicit model file. When unset, `[model]` decides where it lives.
    pub model: Option<PathBuf>,
    pub language: Language,
    pub itn: bool,
    /// Keep time ranges and tag tokens in the output.
    pub raw: bool,
}

/// Session timing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    pub startup_secs: u64,
    pub poll_interval_ms: u64,
    pub exit_grace_ms: u64,
    pub shutdown_secs: u64,
}

/// Model hub location and local download directory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    pub endpoint: String,
    pub id: String,
    pub file: String,
    pub dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from(defaults::DEFAULT_EXECUTABLE),
            model: None,
            language: Language::default(),
            itn: defaults::DEFAULT_ITN,
            raw: false,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            startup_secs: defaults::STARTUP_TIMEOUT.as_secs(),
            poll_interval_ms: defaults::POLL_INTERVAL.as_millis() as u64,
            exit_grace_ms: defaults::EXIT_GRACE.as_millis() as u64,
            shutdown_secs: defaults::SHUTDOWN_TIMEOUT.as_secs(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: defaults::MODEL_ENDPOINT.to_string(),
            id: defaults::MODEL_ID.to_string(),
            file: defaults::MODEL_FILE.to_string(),
            dir: PathBuf::from(defaults::MODEL_DIR),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SenseVoiceError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                SenseVoiceError::Io(e)
            }
        })?;
        toml::from_str(&contents).map_err(|e| SenseVoiceError::ConfigParse {
            message: format!("{}: {e}", path.display()),
        })
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(SenseVoiceError::ConfigFileNotFound { .. }) => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - SENSEVOICE_EXECUTABLE → engine.executable
    /// - SENSEVOICE_MODEL → engine.model
    /// - SENSEVOICE_LANGUAGE → engine.language
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(executable) = std::env::var("SENSEVOICE_EXECUTABLE")
            && !executable.is_empty()
        {
            self.engine.executable = PathBuf::from(executable);
        }

        if let Ok(model) = std::env::var("SENSEVOICE_MODEL")
            && !model.is_empty()
        {
            self.engine.model = Some(PathBuf::from(model));
        }

        if let Ok(language) = std::env::var("SENSEVOICE_LANGUAGE")
            && !language.is_empty()
        {
            self.engine.language = language.parse()?;
        }

        Ok(self)
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/sensevoice/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("sensevoice")
            .join("config.toml")
    }

    /// Reject values the session cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |key: &str, message: &str| {
            Err(SenseVoiceError::ConfigInvalidValue {
                key: key.to_string(),
                message: message.to_string(),
            })
        };

        if self.engine.executable.as_os_str().is_empty() {
            return invalid("engine.executable", "must not be empty");
        }
        if self.engine.model.as_ref().is_some_and(|m| m.as_os_str().is_empty()) {
            return invalid("engine.model", "must not be empty when set");
        }
        if self.timeouts.startup_secs == 0 {
            return invalid("timeouts.startup_secs", "must be greater than zero");
        }
        if self.timeouts.poll_interval_ms == 0 {
            return invalid("timeouts.poll_interval_ms", "must be greater than zero");
        }
        if self.model.file.trim().is_empty() {
            return invalid("model.file", "must not be empty");
        }
        Ok(())
    }

    /// Model file the engine should load: `engine.model` if set, else
    /// `<model.dir>/<model.file>`.
    pub fn model_path(&self) -> PathBuf {
        self.engine
            .model
            .clone()
            .unwrap_or_else(|| self.model.dir.join(&self.model.file))
    }

    /// Session settings for this configuration.
    pub fn to_session_config(&self, model_path: &Path) -> SessionConfig {
        SessionConfig::new(&self.engine.executable, model_path)
            .with_language(self.engine.language)
            .with_itn(self.engine.itn)
            .with_raw_output(self.engine.raw)
            .with_startup_timeout(Duration::from_secs(self.timeouts.startup_secs))
            .with_poll_interval(Duration::from_millis(self.timeouts.poll_interval_ms))
            .with_exit_grace(Duration::from_millis(self.timeouts.exit_grace_ms))
            .with_shutdown_timeout(Duration::from_secs(self.timeouts.shutdown_secs))
    }

    /// Hub coordinates of the configured model.
    #[cfg(feature = "model-download")]
    pub fn model_source(&self) -> crate::models::ModelSource {
        crate::models::ModelSource::new(&self.model.id, &self.model.file)
            .with_endpoint(&self.model.endpoint)
    }
}
