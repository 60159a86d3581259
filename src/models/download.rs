//! Model download and installation management.
//!
//! Fetches a single GGUF file from a ModelScope-compatible hub, verifying its
//! size and SHA-256 digest against the repository listing, and stores it under
//! a local directory. Failures are classified into [`ModelError`] codes.

use crate::defaults;
use crate::error::ModelError;
use crate::models::remote::{RemoteFile, list_repo_files};
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

/// Where a model file lives on the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSource {
    pub endpoint: String,
    /// Repository identifier, `owner/name`.
    pub id: String,
    /// File path inside the repository.
    pub file: String,
    pub revision: String,
}

impl Default for ModelSource {
    fn default() -> Self {
        Self::new(defaults::MODEL_ID, defaults::MODEL_FILE)
    }
}

impl ModelSource {
    pub fn new(id: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            endpoint: defaults::MODEL_ENDPOINT.to_string(),
            id: id.into(),
            file: file.into(),
            revision: defaults::MODEL_REVISION.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = revision.into();
        self
    }

    /// Repository listing URL.
    pub fn files_url(&self) -> String {
        format!(
            "{}/api/v1/models/{}/repo/files?Revision={}&Recursive=true",
            self.endpoint.trim_end_matches('/'),
            self.id,
            self.revision
        )
    }

    /// Direct download URL for the file.
    pub fn resolve_url(&self) -> String {
        format!(
            "{}/models/{}/resolve/{}/{}",
            self.endpoint.trim_end_matches('/'),
            self.id,
            self.revision,
            self.file
        )
    }

    /// Check the identifier and file path before touching the network.
    ///
    /// # Errors
    ///
    /// [`ModelError::Unexpected`] for a malformed identifier or file path.
    pub fn validate(&self) -> Result<(), ModelError> {
        let invalid = |message: String| ModelError::Unexpected { message };

        let mut segments = self.id.split('/');
        let well_formed = matches!(
            (segments.next(), segments.next(), segments.next()),
            (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty()
        );
        if !well_formed || self.id.chars().any(char::is_whitespace) {
            return Err(invalid(format!(
                "model id '{}' must have the form owner/name",
                self.id
            )));
        }

        if self.file.trim().is_empty() {
            return Err(invalid("model file path is empty".to_string()));
        }
        let file = Path::new(&self.file);
        if !file
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
        {
            return Err(invalid(format!(
                "model file path '{}' must be relative and stay inside the repository",
                self.file
            )));
        }
        if self.endpoint.trim().is_empty() {
            return Err(invalid("model hub endpoint is empty".to_string()));
        }
        Ok(())
    }
}

/// Local path of a model file inside `dir`. The file may not exist yet.
pub fn local_model_path(dir: &Path, file: &str) -> PathBuf {
    dir.join(file)
}

/// Check if a model file is present in `dir`.
pub fn is_model_installed(dir: &Path, file: &str) -> bool {
    local_model_path(dir, file).is_file()
}

/// Download `file` from repository `id` on the default hub into `dir`.
///
/// Returns the local path. An already present file is returned without any
/// network access.
pub async fn fetch_model(id: &str, file: &str, dir: &Path) -> Result<PathBuf, ModelError> {
    fetch_model_from(&ModelSource::new(id, file), dir, false).await
}

/// Download a model file described by `source` into `dir`.
///
/// # Errors
///
/// - [`ModelError::Unexpected`] for malformed parameters, unparseable hub
///   responses and local filesystem failures
/// - [`ModelError::InvalidModelName`] when the repository or file does not
///   exist on the hub
/// - [`ModelError::Network`] when the transfer fails or does not verify
pub async fn fetch_model_from(
    source: &ModelSource,
    dir: &Path,
    progress: bool,
) -> Result<PathBuf, ModelError> {
    source.validate()?;

    let path = local_model_path(dir, &source.file);
    if path.is_file() {
        tracing::debug!(path = %path.display(), "model already installed");
        return Ok(path);
    }

    let client = reqwest::Client::new();
    let files = list_repo_files(&client, source).await?;
    let remote = files
        .into_iter()
        .find(|f| f.path == source.file)
        .ok_or_else(|| ModelError::InvalidModelName {
            message: format!(
                "file '{}' not found in repository '{}'",
                source.file, source.id
            ),
        })?;

    download_to_path(&client, source, &remote, &path, progress).await?;
    tracing::info!(path = %path.display(), "model installed");
    Ok(path)
}

/// Core download: stream into `<path>.part`, verify, then rename into place.
async fn download_to_path(
    client: &reqwest::Client,
    source: &ModelSource,
    remote: &RemoteFile,
    path: &Path,
    progress: bool,
) -> Result<(), ModelError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| ModelError::Unexpected {
            message: format!("failed to create model directory: {e}"),
        })?;
    }

    let url = source.resolve_url();
    tracing::info!(%url, size = ?remote.size, "downloading model");

    let response = client.get(&url).send().await.map_err(|e| ModelError::Network {
        message: format!("failed to start download: {e}"),
    })?;

    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(ModelError::InvalidModelName {
            message: format!("file '{}' could not be resolved", source.file),
        });
    }
    if !status.is_success() {
        return Err(ModelError::Network {
            message: format!("download failed with status: {status}"),
        });
    }

    let total_size = remote.size.or(response.content_length()).unwrap_or(0);
    let pb = progress.then(|| {
        let pb = ProgressBar::new(total_size);
        pb.set_style(
            // SAFETY: hardcoded template string, always valid
            #[allow(clippy::expect_used)]
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                .expect("hardcoded progress bar template")
                .progress_chars("#>-"),
        );
        pb
    });

    let partial = partial_path(path);
    let result = stream_to_file(response, &partial, pb.as_ref()).await;
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    let (written, digest) = match result {
        Ok(done) => done,
        Err(e) => {
            remove_partial(&partial);
            return Err(e);
        }
    };

    if let Some(expected) = remote.size
        && written != expected
    {
        remove_partial(&partial);
        return Err(ModelError::Network {
            message: format!("size mismatch: expected {expected} bytes, got {written}"),
        });
    }
    if let Some(expected) = &remote.sha256
        && !digest.eq_ignore_ascii_case(expected)
    {
        remove_partial(&partial);
        return Err(ModelError::Network {
            message: format!("SHA-256 checksum mismatch. Expected: {expected}, got: {digest}"),
        });
    }

    fs::rename(&partial, path).map_err(|e| {
        remove_partial(&partial);
        ModelError::Unexpected {
            message: format!("failed to move download into place: {e}"),
        }
    })
}

/// Write the response body to `partial`, returning bytes written and hex digest.
async fn stream_to_file(
    response: reqwest::Response,
    partial: &Path,
    pb: Option<&ProgressBar>,
) -> Result<(u64, String), ModelError> {
    let mut file = fs::File::create(partial).map_err(|e| ModelError::Unexpected {
        message: format!("failed to create output file: {e}"),
    })?;

    let mut hasher = Sha256::new();
    let mut written = 0u64;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ModelError::Network {
            message: format!("failed to read download chunk: {e}"),
        })?;
        file.write_all(&chunk).map_err(|e| ModelError::Unexpected {
            message: format!("failed to write to file: {e}"),
        })?;
        hasher.update(&chunk);
        written += chunk.len() as u64;
        if let Some(pb) = pb {
            pb.inc(chunk.len() as u64);
        }
    }
    file.flush().map_err(|e| ModelError::Unexpected {
        message: format!("failed to flush model file: {e}"),
    })?;

    Ok((written, format!("{:x}", hasher.finalize())))
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

fn remove_partial(partial: &Path) {
    if let Err(e) = fs::remove_file(partial)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(path = %partial.display(), error = %e, "failed to remove partial download");
    }
}
