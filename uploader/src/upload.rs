//! Chunked, resumable upload of a single video file.
//!
//! [`Uploader`] reads the file in fixed-size chunks and hands them to an
//! [`UploadTransport`], reporting to an [`UploadObserver`] as the server
//! acknowledges bytes. Transient transport failures are retried by asking the
//! server how much it has received and resuming from there.

use crate::auth::Credential;
use crate::error::{Error, FileError, UploadError};
use crate::metadata::VideoMetadata;
use crate::youtube_api::videos::Video;
use bytes::Bytes;
use std::future::Future;
use std::io::SeekFrom;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};
use tracing::instrument;

/// Bytes sent per request. The API wants multiples of 256 KiB.
pub const CHUNK_SIZE: usize = 8 * 256 * 1024;

/// Declared media type of the upload.
pub const MEDIA_TYPE: &str = "video/*";

/// Which parts of the video resource the upload sets.
pub const PARTS: &str = "snippet,status";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    /// The upload session is being created.
    Starting,
    /// Some bytes have been acknowledged by the server.
    Uploading,
    /// The server has received every byte.
    Completed,
    /// The upload was abandoned. Nothing follows.
    Failed,
}

#[derive(Debug, Clone, Copy)]
pub struct ProgressEvent<'a> {
    pub status: UploadStatus,
    /// Bytes the server has acknowledged so far.
    pub bytes_sent: u64,
    /// Set only for [`UploadStatus::Failed`].
    pub error: Option<&'a UploadError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionResult {
    pub video_id: String,
}

/// How an upload that got off the ground ended.
#[derive(Debug)]
pub enum UploadOutcome {
    Completed(CompletionResult),
    /// Already reported to the observer as a [`UploadStatus::Failed`] event.
    Failed(UploadError),
}

/// Receives upload notifications, one at a time.
///
/// Zero or more `on_progress` calls are followed by at most one
/// `on_complete`, which only happens if the upload succeeded.
pub trait UploadObserver {
    fn on_progress(&mut self, event: &ProgressEvent<'_>);
    fn on_complete(&mut self, result: &CompletionResult);
}

/// Everything the upload endpoint needs to open a session.
#[derive(Debug, Clone, Copy)]
pub struct UploadRequest<'a> {
    pub metadata: &'a VideoMetadata,
    pub parts: &'a str,
    pub media_type: &'a str,
    pub content_length: u64,
}

/// Opaque handle to a resumable upload session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUri(pub String);

/// The server's answer to a chunk, or to a status query.
#[derive(Debug)]
pub enum ChunkReply {
    /// More bytes are expected. `received` is how many the server has.
    Incomplete { received: u64 },
    /// The upload is done and the video resource was created.
    Complete(Video),
}

/// The network side of a resumable upload.
pub trait UploadTransport {
    /// Opens an upload session for `request`.
    fn start_session(
        &self,
        credential: &Credential,
        request: &UploadRequest<'_>,
    ) -> impl Future<Output = Result<SessionUri, UploadError>> + Send;

    /// Sends `chunk`, which starts at byte `offset` of a `total`-byte upload.
    fn send_chunk(
        &self,
        credential: &Credential,
        session: &SessionUri,
        offset: u64,
        chunk: Bytes,
        total: u64,
    ) -> impl Future<Output = Result<ChunkReply, UploadError>> + Send;

    /// Asks how much of a `total`-byte upload the server has received.
    fn query_status(
        &self,
        credential: &Credential,
        session: &SessionUri,
        total: u64,
    ) -> impl Future<Output = Result<ChunkReply, UploadError>> + Send;
}

/// How often, and how patiently, transient failures are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed before a chunk is given up on.
    pub max_retries: u32,
    /// Delay before the first retry; doubles with every further one.
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Uploader<T> {
    transport: T,
    chunk_size: usize,
    retry: RetryPolicy,
}

impl<T> Uploader<T>
where
    T: UploadTransport,
{
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            chunk_size: CHUNK_SIZE,
            retry: RetryPolicy::default(),
        }
    }

    /// # Panics
    ///
    /// Panics if `chunk_size` is zero.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk size must be positive");
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Uploads the file at `path` with `metadata`.
    ///
    /// Failing to open the file or to start the upload session is returned as
    /// an error. A failure while the bytes are being transferred is instead
    /// reported to `observer` and returned as [`UploadOutcome::Failed`].
    #[instrument(skip(self, credential, metadata, observer))]
    pub async fn upload<O>(
        &self,
        credential: &Credential,
        metadata: &VideoMetadata,
        path: &Path,
        observer: &mut O,
    ) -> Result<UploadOutcome, Error>
    where
        O: UploadObserver,
    {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|source| FileError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        let len = file
            .metadata()
            .await
            .map_err(|source| FileError::Open {
                path: path.to_path_buf(),
                source,
            })?
            .len();
        self.upload_stream(credential, metadata, file, len, observer)
            .await
    }

    /// Uploads `len` bytes from `reader`, which is dropped before this returns.
    pub async fn upload_stream<R, O>(
        &self,
        credential: &Credential,
        metadata: &VideoMetadata,
        mut reader: R,
        len: u64,
        observer: &mut O,
    ) -> Result<UploadOutcome, Error>
    where
        R: AsyncRead + AsyncSeek + Unpin,
        O: UploadObserver,
    {
        observer.on_progress(&ProgressEvent {
            status: UploadStatus::Starting,
            bytes_sent: 0,
            error: None,
        });

        let request = UploadRequest {
            metadata,
            parts: PARTS,
            media_type: MEDIA_TYPE,
            content_length: len,
        };
        let session = self.transport.start_session(credential, &request).await?;
        tracing::info!(bytes = len, "upload session started");

        let mut offset = 0;
        let mut retries = 0;
        let mut backoff = self.retry.initial_backoff;
        loop {
            let chunk = read_chunk(&mut reader, offset, self.chunk_size).await?;
            let sent = chunk.len();
            tracing::debug!(offset, sent, "sending chunk");

            let mut resumed = false;
            let reply = match self
                .transport
                .send_chunk(credential, &session, offset, chunk, len)
                .await
            {
                Ok(reply) => reply,
                Err(e) if e.is_transient() && retries < self.retry.max_retries => {
                    retries += 1;
                    tracing::warn!(error = %e, retries, ?backoff, "chunk failed, will resume");
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                    resumed = true;
                    match self.transport.query_status(credential, &session, len).await {
                        Ok(reply) => reply,
                        // resend from where we were
                        Err(e) if e.is_transient() => continue,
                        Err(e) => return Ok(fail(observer, offset, e)),
                    }
                }
                Err(e) => return Ok(fail(observer, offset, e)),
            };

            match reply {
                ChunkReply::Incomplete { received } => {
                    if received > len {
                        let e = UploadError::Overrun {
                            received,
                            total: len,
                        };
                        return Ok(fail(observer, offset, e));
                    }
                    if received > offset {
                        offset = received;
                        retries = 0;
                        backoff = self.retry.initial_backoff;
                        observer.on_progress(&ProgressEvent {
                            status: UploadStatus::Uploading,
                            bytes_sent: offset,
                            error: None,
                        });
                    } else if !resumed {
                        // also covers an empty chunk, once the file has run out
                        return Ok(fail(observer, offset, UploadError::Stalled { offset }));
                    }
                }
                ChunkReply::Complete(video) => {
                    let Some(video_id) = video.id else {
                        return Ok(fail(observer, len, UploadError::MissingVideoId));
                    };
                    observer.on_progress(&ProgressEvent {
                        status: UploadStatus::Completed,
                        bytes_sent: len,
                        error: None,
                    });
                    let result = CompletionResult { video_id };
                    tracing::info!(video_id = %result.video_id, "upload complete");
                    observer.on_complete(&result);
                    return Ok(UploadOutcome::Completed(result));
                }
            }
        }
    }
}

/// Reads up to `chunk_size` bytes starting at `offset`.
async fn read_chunk<R>(reader: &mut R, offset: u64, chunk_size: usize) -> Result<Bytes, FileError>
where
    R: AsyncRead + AsyncSeek + Unpin,
{
    let read_error = |source| FileError::Read { offset, source };
    reader
        .seek(SeekFrom::Start(offset))
        .await
        .map_err(read_error)?;
    let mut buf = Vec::with_capacity(chunk_size);
    (&mut *reader)
        .take(chunk_size as u64)
        .read_to_end(&mut buf)
        .await
        .map_err(read_error)?;
    Ok(Bytes::from(buf))
}

fn fail<O>(observer: &mut O, bytes_sent: u64, error: UploadError) -> UploadOutcome
where
    O: UploadObserver,
{
    tracing::error!(%error, bytes_sent, "upload failed");
    observer.on_progress(&ProgressEvent {
        status: UploadStatus::Failed,
        bytes_sent,
        error: Some(&error),
    });
    UploadOutcome::Failed(error)
}
