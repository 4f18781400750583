//! Artifact store: uploads finished artifacts to pre-signed URLs.

use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::info;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("artifact not found: {0}")]
    MissingFile(PathBuf),
    #[error("failed to read artifact: {0}")]
    Io(#[from] std::io::Error),
    #[error("upload request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("upload rejected with status {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// Tar bundle of audio plus transcript.
    Bundle,
    /// Standalone audio file.
    Audio,
}

impl ArtifactKind {
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Bundle => "application/x-tar",
            Self::Audio => "audio/opus",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bundle => "bundle",
            Self::Audio => "audio",
        }
    }
}

/// Pre-signed destination URL. Displayed without its query string, which
/// carries the signature.
#[derive(Clone, PartialEq, Eq)]
pub struct UploadTarget(String);

impl UploadTarget {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn url(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UploadTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.split_once('?') {
            Some((base, _)) => write!(f, "{}?<redacted>", base),
            None => f.write_str(&self.0),
        }
    }
}

impl fmt::Debug for UploadTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UploadTarget({})", self)
    }
}

/// Where each artifact goes. Missing entries are skipped.
#[derive(Debug, Clone, Default)]
pub struct UploadTargets {
    pub bundle: Option<UploadTarget>,
    pub audio: Option<UploadTarget>,
}

impl UploadTargets {
    pub fn get(&self, kind: ArtifactKind) -> Option<&UploadTarget> {
        match kind {
            ArtifactKind::Bundle => self.bundle.as_ref(),
            ArtifactKind::Audio => self.audio.as_ref(),
        }
    }
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(
        &self,
        path: &Path,
        kind: ArtifactKind,
        target: &UploadTarget,
    ) -> Result<(), UploadError>;
}

/// PUTs artifacts straight from disk to pre-signed URLs.
pub struct PresignedUrlStore {
    client: reqwest::Client,
}

impl PresignedUrlStore {
    pub fn new(timeout: Duration) -> Result<Self, UploadError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ArtifactStore for PresignedUrlStore {
    async fn put(
        &self,
        path: &Path,
        kind: ArtifactKind,
        target: &UploadTarget,
    ) -> Result<(), UploadError> {
        let file = match File::open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(UploadError::MissingFile(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };
        let size = file.metadata().await?.len();

        info!("Uploading {} ({} bytes) to {}", kind.as_str(), size, target);

        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let response = self
            .client
            .put(target.url())
            .header(CONTENT_TYPE, kind.content_type())
            .header(CONTENT_LENGTH, size)
            .body(body)
            .send()
            .await
            .map_err(|e| UploadError::Http(e.without_url()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::Status {
                status: status.as_u16(),
                body,
            });
        }

        info!("Uploaded {} successfully", kind.as_str());
        Ok(())
    }
}
