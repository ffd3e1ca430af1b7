//! Error types surfaced by the uploader.
//!
//! Each stage of a run has its own error type so callers can tell a broken
//! credential file apart from a missing video or a rejected upload. [`Error`]
//! ties them together for the top-level runner.

use std::path::PathBuf;

/// Boxed error produced by an external collaborator such as the OAuth flow.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Any error that aborts a run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    File(#[from] FileError),
    #[error(transparent)]
    Upload(#[from] UploadError),
}

/// Failure to obtain an authorized credential.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("read client secret file {}", path.display())]
    ReadSecret {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse client secret file {}", path.display())]
    ParseSecret {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("client secret file {} has neither an `installed` nor a `web` section", path.display())]
    MissingClientSection { path: PathBuf },
    #[error("authorize access for scope {scope}")]
    Flow {
        scope: String,
        #[source]
        source: BoxError,
    },
}

/// Failure to read the local video file.
#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error("open video file {}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("read video file at byte {offset}")]
    Read {
        offset: u64,
        #[source]
        source: std::io::Error,
    },
}

/// Failure reported by, or while talking to, the upload endpoint.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("send request to upload endpoint")]
    Transport(#[from] reqwest::Error),
    #[error("upload endpoint answered {status}: {body}")]
    Status {
        status: http::StatusCode,
        body: String,
    },
    #[error("upload endpoint did not return a session URI")]
    MissingSessionUri,
    #[error("upload endpoint returned a malformed Range header: {0:?}")]
    InvalidRange(String),
    #[error("upload endpoint acknowledged {received} bytes of a {total} byte upload")]
    Overrun { received: u64, total: u64 },
    #[error("upload made no progress past byte {offset}")]
    Stalled { offset: u64 },
    #[error("upload endpoint returned a video without an id")]
    MissingVideoId,
    #[error("refresh access token")]
    Refresh(#[source] BoxError),
}

impl UploadError {
    /// Whether retrying the same request may succeed.
    ///
    /// Connection problems and 5xx answers are transient; everything else
    /// means the request itself was rejected.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => !e.is_decode() && !e.is_builder(),
            Self::Status { status, .. } => status.is_server_error(),
            Self::MissingSessionUri
            | Self::InvalidRange(_)
            | Self::Overrun { .. }
            | Self::Stalled { .. }
            | Self::MissingVideoId
            | Self::Refresh(_) => false,
        }
    }
}
