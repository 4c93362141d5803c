//! Outbound integrations: recording storage and the conferencing provider.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::{ProviderError, UploadError};

/// Moves a provider recording into durable media storage.
#[async_trait]
pub trait MediaUploader: Send + Sync {
    /// Returns the public URL of the stored file.
    ///
    /// `expected_size` of 0 means the provider did not report a size.
    ///
    /// # Errors
    ///
    /// Returns `UploadError` if the download or the write fails.
    async fn upload_recording(
        &self,
        download_url: &str,
        download_token: Option<&str>,
        expected_size: u64,
    ) -> Result<String, UploadError>;
}

/// Stores recordings under a local media root served at `public_base_url`.
#[derive(Clone)]
pub struct FileSystemUploader {
    client: Client,
    media_root: PathBuf,
    public_base_url: String,
}

impl FileSystemUploader {
    #[must_use]
    pub fn new(client: Client, media_root: impl Into<PathBuf>, public_base_url: &str) -> Self {
        Self {
            client,
            media_root: media_root.into(),
            public_base_url: public_base_url.trim_end_matches('/').to_owned(),
        }
    }
}

#[async_trait]
impl MediaUploader for FileSystemUploader {
    async fn upload_recording(
        &self,
        download_url: &str,
        download_token: Option<&str>,
        expected_size: u64,
    ) -> Result<String, UploadError> {
        let mut request = self.client.get(download_url);
        if let Some(token) = download_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(UploadError::HttpStatus(response.status()));
        }

        let dir = self.media_root.join("recordings");
        tokio::fs::create_dir_all(&dir).await?;
        let file_name = format!("{}.mp4", Uuid::new_v4());
        let path = dir.join(&file_name);

        let written = match write_body(response, &path).await {
            Ok(written) if expected_size == 0 || written == expected_size => written,
            Ok(written) => {
                discard(&path).await;
                return Err(UploadError::SizeMismatch {
                    expected: expected_size,
                    actual: written,
                });
            }
            Err(err) => {
                discard(&path).await;
                return Err(err);
            }
        };

        tracing::debug!(path = %path.display(), bytes = written, "stored recording part");
        Ok(format!("{}/recordings/{file_name}", self.public_base_url))
    }
}

/// Streams the response body into a new file at `path`.
async fn write_body(mut response: reqwest::Response, path: &Path) -> Result<u64, UploadError> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut written: u64 = 0;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

async fn discard(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "failed to remove partial recording");
        }
    }
}

/// Conferencing provider operations used after ingestion.
#[async_trait]
pub trait MeetingProvider: Send + Sync {
    /// Deletes every cloud recording of the meeting.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError` if the provider rejects the request.
    async fn delete_recordings(&self, meeting_number: u64) -> Result<(), ProviderError>;
}

#[derive(Clone, Debug)]
pub struct ZoomConfig {
    pub api_base_url: String,
    pub api_token: String,
}

/// Zoom REST client for recording cleanup.
#[derive(Clone)]
pub struct ZoomClient {
    client: Client,
    config: Option<ZoomConfig>,
}

impl ZoomClient {
    #[must_use]
    pub fn new(client: Client, config: Option<ZoomConfig>) -> Self {
        Self { client, config }
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.config.is_some()
    }
}

#[async_trait]
impl MeetingProvider for ZoomClient {
    async fn delete_recordings(&self, meeting_number: u64) -> Result<(), ProviderError> {
        let config = self.config.as_ref().ok_or(ProviderError::Disabled)?;
        let url = format!(
            "{}/meetings/{meeting_number}/recordings",
            config.api_base_url.trim_end_matches('/')
        );

        let response = self
            .client
            .delete(url)
            .bearer_auth(&config.api_token)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            // Already gone.
            StatusCode::NOT_FOUND => {
                tracing::debug!(meeting_number, "remote recordings already deleted");
                Ok(())
            }
            status => Err(ProviderError::HttpStatus(status)),
        }
    }
}
