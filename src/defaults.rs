//! Default configuration constants for sensevoice.
//!
//! Shared between the config file layer, the session builder and the CLI so
//! every entry point agrees on the same values.

use std::time::Duration;

/// Default engine executable, looked up on `PATH`.
pub const DEFAULT_EXECUTABLE: &str = "sense-voice-main";

/// Default language code. "auto" lets the engine detect the spoken language.
pub const DEFAULT_LANGUAGE: &str = "auto";

/// Inverse text normalization is on unless disabled.
pub const DEFAULT_ITN: bool = true;

/// How long `start` waits for the engine's ready line.
///
/// Loading a GGUF model from a cold disk cache can take a while on slow
/// machines, so this is generous.
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Request queue poll interval. Bounds how quickly an idle worker notices
/// that the engine process has died.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Time the engine gets to exit on its own after `exit` before it is terminated.
pub const EXIT_GRACE: Duration = Duration::from_secs(1);

/// How long `shutdown` waits for the worker thread before killing the engine.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Number of trailing stderr lines kept for diagnostics.
pub const STDERR_TAIL_LINES: usize = 64;

/// Model hub serving the GGUF artifacts.
pub const MODEL_ENDPOINT: &str = "https://www.modelscope.cn";

/// Hub repository holding the SenseVoice GGUF conversions.
pub const MODEL_ID: &str = "lovemefan/SenseVoiceGGUF";

/// Model file fetched when none is configured.
pub const MODEL_FILE: &str = "sense-voice-small-fp16.gguf";

/// Local directory models are downloaded into.
pub const MODEL_DIR: &str = "model";

/// Hub revision used for listings and downloads.
pub const MODEL_REVISION: &str = "master";
