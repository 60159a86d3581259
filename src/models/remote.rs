//! Repository file listing from a ModelScope-compatible hub.
//!
//! The listing endpoint answers with an envelope like
//! `{"Code": 200, "Success": true, "Data": {"Files": [{"Path", "Type", "Size", "Sha256"}]}}`.

use crate::error::ModelError;
use crate::models::download::ModelSource;
use reqwest::StatusCode;
use serde::Deserialize;

/// A file published in a hub repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub path: String,
    pub size: Option<u64>,
    pub sha256: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Envelope {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<ListingData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListingData {
    #[serde(default)]
    files: Vec<ListingEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListingEntry {
    path: String,
    #[serde(default, rename = "Type")]
    kind: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    sha256: Option<String>,
}

/// Fetch every file in the source repository at its revision.
///
/// # Errors
///
/// - [`ModelError::InvalidModelName`] when the hub reports the repository
///   missing (HTTP 404 or an unsuccessful envelope)
/// - [`ModelError::Network`] on transport failure or a server error status
/// - [`ModelError::Unexpected`] when the body cannot be parsed
pub async fn list_repo_files(
    client: &reqwest::Client,
    source: &ModelSource,
) -> Result<Vec<RemoteFile>, ModelError> {
    let url = source.files_url();
    tracing::debug!(%url, "listing model repository");

    let response = client.get(&url).send().await.map_err(|e| ModelError::Network {
        message: format!("failed to reach model hub: {e}"),
    })?;

    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(ModelError::InvalidModelName {
            message: format!("repository '{}' does not exist", source.id),
        });
    }
    if !status.is_success() {
        return Err(ModelError::Network {
            message: format!("model hub returned status {status}"),
        });
    }

    let text = response.text().await.map_err(|e| ModelError::Network {
        message: format!("failed to read model hub response: {e}"),
    })?;

    parse_listing(&text, &source.id)
}

/// Parse a listing body into its blob entries. Directory entries are skipped.
pub fn parse_listing(text: &str, id: &str) -> Result<Vec<RemoteFile>, ModelError> {
    let envelope: Envelope = serde_json::from_str(text).map_err(|e| ModelError::Unexpected {
        message: format!("failed to parse model hub listing: {e}"),
    })?;

    if envelope.success == Some(false) {
        return Err(ModelError::InvalidModelName {
            message: format!(
                "repository '{id}' rejected by hub: {}",
                envelope.message.unwrap_or_default()
            ),
        });
    }

    let data = envelope.data.ok_or_else(|| ModelError::Unexpected {
        message: "model hub listing has no Data field".to_string(),
    })?;

    Ok(data
        .files
        .into_iter()
        .filter(|entry| entry.kind.as_deref() != Some("tree"))
        .map(|entry| RemoteFile {
            path: entry.path,
            size: entry.size,
            sha256: entry.sha256.filter(|digest| !digest.is_empty()),
        })
        .collect())
}
