//! sensevoice - managed sessions over the SenseVoice speech engine
//!
//! Keeps one `sense-voice-main` process loaded and feeds it audio files one
//! request at a time over its line protocol.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
#[cfg(feature = "model-download")]
pub mod models;
pub mod stt;

// Composition root - needs everything
#[cfg(feature = "cli")]
pub mod app;

// Session
pub use stt::post_process::remove_metadata;
pub use stt::process::ProcessState;
pub use stt::protocol::Language;
pub use stt::session::{SenseVoiceSession, SessionConfig, Transcription};
pub use stt::transcriber::Transcriber;
pub use stt::worker::WorkerState;

// Error handling
pub use error::{FetchReport, ModelError, Result, SenseVoiceError};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
