//! File transcription entry point.
//!
//! Orchestrates the command-line flow:
//! resolve model → start session → transcribe each file → shut down

use crate::config::Config;
use crate::error::{Result, SenseVoiceError};
use crate::models::download::fetch_model_from;
use crate::stt::protocol::Language;
use crate::stt::session::SenseVoiceSession;
use crate::stt::transcriber::Transcriber;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line overrides for `transcribe`.
#[derive(Debug, Clone, Default)]
pub struct TranscribeOptions {
    pub executable: Option<PathBuf>,
    pub model: Option<PathBuf>,
    pub language: Option<Language>,
    pub raw: bool,
    pub no_download: bool,
    pub startup_timeout: Option<Duration>,
    pub quiet: bool,
}

/// Outcome of a batch of files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
}

/// Run the transcribe command: one engine session serves every file in order.
///
/// Lines go to stdout. A missing or rejected file is reported and skipped;
/// a dead session aborts the batch.
pub async fn run_transcribe_command(
    mut config: Config,
    files: Vec<PathBuf>,
    options: TranscribeOptions,
) -> Result<BatchSummary> {
    apply_overrides(&mut config, &options);
    config.validate()?;

    let model_path = resolve_model(&config, options.no_download, options.quiet).await?;
    let session_config = config.to_session_config(&model_path);

    // The session API blocks on its worker; keep it off the async executor.
    let summary = tokio::task::spawn_blocking(move || -> Result<BatchSummary> {
        let session = SenseVoiceSession::start(session_config)?;
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        let result = transcribe_files(&session, &files, &mut out, files.len() > 1);
        match session.shutdown() {
            Ok(state) => tracing::debug!(%state, "engine stopped"),
            Err(e) => tracing::warn!(error = %e, "engine did not shut down cleanly"),
        }
        result
    })
    .await
    .map_err(|e| SenseVoiceError::Other(format!("transcription task failed: {e}")))??;

    if summary.failed > 0 {
        return Err(SenseVoiceError::Other(format!(
            "{} of {} files failed",
            summary.failed,
            summary.failed + summary.succeeded
        )));
    }
    Ok(summary)
}

fn apply_overrides(config: &mut Config, options: &TranscribeOptions) {
    if let Some(executable) = &options.executable {
        config.engine.executable = executable.clone();
    }
    if let Some(model) = &options.model {
        config.engine.model = Some(model.clone());
    }
    if let Some(language) = options.language {
        config.engine.language = language;
    }
    if options.raw {
        config.engine.raw = true;
    }
    if let Some(timeout) = options.startup_timeout {
        config.timeouts.startup_secs = timeout.as_secs().max(1);
    }
}

/// Find the model file, downloading the configured one if allowed.
///
/// An explicit `engine.model` is never downloaded: it must already exist.
pub async fn resolve_model(config: &Config, no_download: bool, quiet: bool) -> Result<PathBuf> {
    let path = config.model_path();
    if path.is_file() {
        return Ok(path);
    }

    if config.engine.model.is_some() {
        return Err(SenseVoiceError::ConfigInvalidValue {
            key: "engine.model".to_string(),
            message: format!("model file {} does not exist", path.display()),
        });
    }

    if no_download {
        return Err(SenseVoiceError::Other(format!(
            "Model {} not installed and --no-download specified.\n\
             Run: sensevoice models fetch",
            path.display()
        )));
    }

    tracing::info!(id = %config.model.id, file = %config.model.file, "model missing, downloading");
    let fetched = fetch_model_from(&config.model_source(), &config.model.dir, !quiet).await?;
    Ok(fetched)
}

/// Transcribe `files` in order, writing their lines to `out`.
///
/// With `headers`, each file's output is preceded by `==> <path> <==`.
pub fn transcribe_files<T, W>(
    transcriber: &T,
    files: &[PathBuf],
    out: &mut W,
    headers: bool,
) -> Result<BatchSummary>
where
    T: Transcriber + ?Sized,
    W: Write,
{
    let mut summary = BatchSummary::default();
    for file in files {
        if !file.is_file() {
            tracing::error!(file = %file.display(), "no such audio file, skipping");
            summary.failed += 1;
            continue;
        }

        let lines = match transcriber.transcribe_file(file) {
            Ok(lines) => lines,
            Err(e @ SenseVoiceError::InvalidRecordPath { .. }) => {
                tracing::error!(file = %file.display(), error = %e, "skipping file");
                summary.failed += 1;
                continue;
            }
            Err(e) => return Err(e),
        };

        if headers {
            if summary.succeeded > 0 {
                writeln!(out)?;
            }
            writeln!(out, "==> {} <==", file.display())?;
        }
        for line in &lines {
            writeln!(out, "{line}")?;
        }
        out.flush()?;
        summary.succeeded += 1;
    }
    Ok(summary)
}

/// Print helper for `models path`.
pub fn describe_model_path(config: &Config) -> String {
    let path = config.model_path();
    let status = if path.is_file() {
        "[installed]"
    } else {
        "[not installed]"
    };
    format!("{}   {}", path.display(), status)
}
