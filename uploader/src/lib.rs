//! Uploads a single video to YouTube.
//!
//! A run authenticates against the upload API, attaches fixed metadata to the
//! video, and uploads it in chunks while reporting progress:
//!
//! ```rust,no_run
//! use youtube_uploader::{RunConfig, run};
//! use youtube_uploader::oauth::InstalledFlow;
//! use youtube_uploader::report::ConsoleReporter;
//! use youtube_uploader::upload::Uploader;
//! use youtube_uploader::youtube_api::YouTubeClient;
//!
//! # async fn example() -> eyre::Result<()> {
//! let config = RunConfig::default();
//! let flow = InstalledFlow::new("<p>done</p>").persist_tokens_to(config.token_cache.clone());
//! let uploader = Uploader::new(YouTubeClient::new()?).with_chunk_size(config.chunk_size);
//! run(&config, &flow, &uploader, &mut ConsoleReporter::stdout()).await?;
//! # Ok(())
//! # }
//! ```

use crate::auth::{AuthorizationFlow, UPLOAD_SCOPE};
use crate::upload::{CHUNK_SIZE, UploadObserver, UploadOutcome, UploadTransport, Uploader};
use std::path::PathBuf;
use tracing::instrument;

pub mod auth;
pub mod client_secret;
pub mod error;
pub mod metadata;
pub mod oauth;
pub mod report;
pub mod upload;
pub mod youtube_api;

pub use error::{AuthError, Error, FileError, UploadError};

/// OAuth client descriptor, read from the working directory.
pub const CLIENT_SECRET_FILE: &str = "client_secret.json";

/// The video that gets uploaded.
pub const VIDEO_FILE: &str = "BuupTestVideo.mp4";

/// Where granted tokens are kept between runs.
pub const TOKEN_CACHE_FILE: &str = "tokens.json";

/// Inputs of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub client_secret: PathBuf,
    pub video: PathBuf,
    /// `None` disables token persistence.
    pub token_cache: Option<PathBuf>,
    pub chunk_size: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            client_secret: PathBuf::from(CLIENT_SECRET_FILE),
            video: PathBuf::from(VIDEO_FILE),
            token_cache: Some(PathBuf::from(TOKEN_CACHE_FILE)),
            chunk_size: CHUNK_SIZE,
        }
    }
}

/// Authenticates, builds the metadata, and uploads the configured video.
///
/// Errors that stop the run are returned. A transfer that fails after the
/// upload has started is reported through `observer` only, and comes back as
/// [`UploadOutcome::Failed`].
#[instrument(skip(flow, uploader, observer))]
pub async fn run<F, T, O>(
    config: &RunConfig,
    flow: &F,
    uploader: &Uploader<T>,
    observer: &mut O,
) -> Result<UploadOutcome, Error>
where
    F: AuthorizationFlow,
    T: UploadTransport,
    O: UploadObserver,
{
    let credential = auth::authenticate(&config.client_secret, UPLOAD_SCOPE, flow).await?;
    let metadata = metadata::build_metadata();
    let outcome = uploader
        .upload(&credential, &metadata, &config.video, observer)
        .await?;
    if let UploadOutcome::Failed(e) = &outcome {
        tracing::warn!(error = %e, "upload did not finish");
    }
    Ok(outcome)
}
