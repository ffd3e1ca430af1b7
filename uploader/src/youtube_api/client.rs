//! HTTP client for the YouTube resumable upload protocol.
//!
//! An upload starts with a `POST` carrying the metadata, whose response names
//! a session URI in its `Location` header. The media is then `PUT` to that URI
//! in pieces, each labelled with a `Content-Range`. The server answers every
//! piece but the last with `308 Resume Incomplete` and a `Range` header
//! listing what it has; the last one gets the created video resource.
//!
//! See: <https://developers.google.com/youtube/v3/guides/using_resumable_upload_protocol>

use crate::auth::Credential;
use crate::error::UploadError;
use crate::upload::{ChunkReply, SessionUri, UploadRequest, UploadTransport};
use crate::youtube_api::videos::Video;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, header};
use tracing::instrument;

/// Endpoint that accepts new video uploads.
const UPLOAD_URL: &str = "https://www.googleapis.com/upload/youtube/v3/videos";

/// Client for the `videos.insert` upload endpoint of the YouTube Data API v3.
#[derive(Debug, Clone)]
pub struct YouTubeClient {
    /// HTTP client for API requests
    client: reqwest::Client,
    upload_url: String,
}

impl YouTubeClient {
    pub fn new() -> reqwest::Result<Self> {
        Self::with_upload_url(UPLOAD_URL)
    }

    /// Creates a client that talks to `upload_url` instead of YouTube.
    pub fn with_upload_url(upload_url: impl Into<String>) -> reqwest::Result<Self> {
        let client = reqwest::ClientBuilder::new()
            // 308 means "resume incomplete" here, never "go elsewhere".
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            client,
            upload_url: upload_url.into(),
        })
    }

    /// Sends a request to an upload session and interprets the answer.
    ///
    /// A rejected access token is refreshed and the request sent once more.
    async fn put_to_session(
        &self,
        credential: &Credential,
        session: &SessionUri,
        content_range: String,
        body: Bytes,
    ) -> Result<ChunkReply, UploadError> {
        let mut refreshed = false;
        let response = loop {
            let response = self
                .client
                .request(Method::PUT, &session.0)
                .bearer_auth(access_token(credential).await?)
                .header(header::CONTENT_RANGE, &content_range)
                .body(body.clone())
                .send()
                .await?;
            if response.status() != StatusCode::UNAUTHORIZED || refreshed {
                break response;
            }
            refreshed = true;
            if !credential
                .refresh()
                .await
                .map_err(|e| UploadError::Refresh(e.into()))?
            {
                break response;
            }
            tracing::debug!("access token rejected, retrying with a refreshed one");
        };

        let status = response.status();
        if status == StatusCode::PERMANENT_REDIRECT {
            let received = received_bytes(response.headers())?;
            return Ok(ChunkReply::Incomplete { received });
        }
        if !status.is_success() {
            return Err(status_error(response).await);
        }

        let video: Video = response.json().await?;
        Ok(ChunkReply::Complete(video))
    }
}

impl UploadTransport for YouTubeClient {
    /// Opens a resumable session with `uploadType=resumable`.
    ///
    /// # Required Scopes
    ///
    /// * `https://www.googleapis.com/auth/youtube.upload`
    ///
    /// # API Reference
    ///
    /// <https://developers.google.com/youtube/v3/docs/videos/insert>
    #[instrument(skip_all, fields(bytes = request.content_length))]
    async fn start_session(
        &self,
        credential: &Credential,
        request: &UploadRequest<'_>,
    ) -> Result<SessionUri, UploadError> {
        let query_params = [("uploadType", "resumable"), ("part", request.parts)];
        let response = self
            .client
            .request(Method::POST, &self.upload_url)
            .bearer_auth(access_token(credential).await?)
            .query(&query_params)
            .header("X-Upload-Content-Type", request.media_type)
            .header("X-Upload-Content-Length", request.content_length)
            .json(&Video::from(request.metadata))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let session = response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(UploadError::MissingSessionUri)?;
        tracing::debug!(session, "opened upload session");
        Ok(SessionUri(session.to_string()))
    }

    #[instrument(skip(self, credential, session, chunk), fields(len = chunk.len()))]
    async fn send_chunk(
        &self,
        credential: &Credential,
        session: &SessionUri,
        offset: u64,
        chunk: Bytes,
        total: u64,
    ) -> Result<ChunkReply, UploadError> {
        let content_range = if chunk.is_empty() {
            format!("bytes */{total}")
        } else {
            format!("bytes {}-{}/{total}", offset, offset + chunk.len() as u64 - 1)
        };
        self.put_to_session(credential, session, content_range, chunk)
            .await
    }

    #[instrument(skip(self, credential, session))]
    async fn query_status(
        &self,
        credential: &Credential,
        session: &SessionUri,
        total: u64,
    ) -> Result<ChunkReply, UploadError> {
        self.put_to_session(credential, session, format!("bytes */{total}"), Bytes::new())
            .await
    }
}

async fn access_token(credential: &Credential) -> Result<String, UploadError> {
    credential
        .access_token()
        .await
        .map_err(|e| UploadError::Refresh(e.into()))
}

/// Reads how many bytes the server holds from a `Range: bytes=0-<last>` header.
///
/// A missing header means nothing has arrived yet.
fn received_bytes(headers: &HeaderMap) -> Result<u64, UploadError> {
    let Some(range) = headers.get(header::RANGE) else {
        return Ok(0);
    };
    let range = range
        .to_str()
        .map_err(|_| UploadError::InvalidRange(format!("{range:?}")))?;
    range
        .strip_prefix("bytes=0-")
        .and_then(|last| last.trim().parse::<u64>().ok())
        .map(|last| last + 1)
        .ok_or_else(|| UploadError::InvalidRange(range.to_string()))
}

async fn status_error(response: reqwest::Response) -> UploadError {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown error".to_string());
    UploadError::Status { status, body }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tests::{credential, refreshable, token_endpoint};
    use crate::error::Error;
    use crate::metadata::build_metadata;
    use crate::upload::tests::Recorder;
    use crate::upload::{UploadOutcome, Uploader};
    use http_body_util::{BodyExt, Full};
    use hyper::service::service_fn;
    use hyper::{Request, Response, body};
    use pretty_assertions::assert_eq;
    use std::convert::Infallible;
    use std::sync::{Arc, Mutex};

    /// What the fake endpoint saw.
    #[derive(Debug, Default)]
    struct Seen {
        session_query: Option<String>,
        session_headers: Vec<(String, String)>,
        metadata: Option<serde_json::Value>,
        ranges: Vec<(String, usize)>,
        /// Chunks refused for carrying the stale token.
        rejected: usize,
    }

    /// Serves a fake upload endpoint on a random local port.
    ///
    /// `reject` makes it refuse to open sessions.
    async fn fake_endpoint(reject: bool) -> (String, Arc<Mutex<Seen>>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let seen = Arc::new(Mutex::new(Seen::default()));

        let session_uri = format!("{base}/session/1");
        let state = Arc::clone(&seen);
        tokio::spawn(async move {
            loop {
                let (conn, _) = listener.accept().await.unwrap();
                let conn = hyper_util::rt::TokioIo::new(conn);
                let state = Arc::clone(&state);
                let session_uri = session_uri.clone();
                let service = service_fn(move |req: Request<body::Incoming>| {
                    let state = Arc::clone(&state);
                    let session_uri = session_uri.clone();
                    async move {
                        let (parts, body) = req.into_parts();
                        let body = body.collect().await.unwrap().to_bytes();
                        let header_value = |name: &str| {
                            parts
                                .headers
                                .get(name)
                                .and_then(|v| v.to_str().ok())
                                .unwrap_or_default()
                                .to_string()
                        };

                        let mut response = Response::builder();
                        let reply = if parts.method == Method::POST {
                            if reject {
                                response = response.status(StatusCode::UNAUTHORIZED);
                                Bytes::from_static(b"invalid credentials")
                            } else {
                                let mut seen = state.lock().unwrap();
                                seen.session_query = parts.uri.query().map(str::to_string);
                                for name in [
                                    "authorization",
                                    "x-upload-content-type",
                                    "x-upload-content-length",
                                ] {
                                    seen.session_headers.push((name.to_string(), header_value(name)));
                                }
                                seen.metadata = serde_json::from_slice(&body).ok();
                                response = response.header(header::LOCATION, &session_uri);
                                Bytes::new()
                            }
                        } else if header_value("authorization") == "Bearer ya29.stale" {
                            state.lock().unwrap().rejected += 1;
                            response = response.status(StatusCode::UNAUTHORIZED);
                            Bytes::from_static(b"Invalid Credentials")
                        } else {
                            let range = header_value("content-range");
                            state.lock().unwrap().ranges.push((range.clone(), body.len()));
                            // "bytes 0-3/10" -> last byte 3 of 10
                            let (span, total) = range
                                .trim_start_matches("bytes ")
                                .split_once('/')
                                .unwrap();
                            let total: u64 = total.parse().unwrap();
                            let last = span.split_once('-').map(|(_, last)| last.parse::<u64>().unwrap());
                            match last {
                                Some(last) if last + 1 == total => {
                                    Bytes::from_static(br#"{"kind":"youtube#video","id":"vid42"}"#)
                                }
                                Some(last) => {
                                    response = response
                                        .status(StatusCode::PERMANENT_REDIRECT)
                                        .header(header::RANGE, format!("bytes=0-{last}"));
                                    Bytes::new()
                                }
                                None => {
                                    response = response.status(StatusCode::PERMANENT_REDIRECT);
                                    Bytes::new()
                                }
                            }
                        };
                        Ok::<_, Infallible>(response.body(Full::new(reply)).unwrap())
                    }
                });
                tokio::spawn(async move {
                    let _ = hyper::server::conn::http1::Builder::new()
                        .serve_connection(conn, service)
                        .await;
                });
            }
        });

        (format!("{base}/upload/youtube/v3/videos"), seen)
    }

    #[tokio::test]
    async fn uploads_through_resumable_session() {
        let (url, seen) = fake_endpoint(false).await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("BuupTestVideo.mp4");
        std::fs::write(&path, b"0123456789").unwrap();

        let uploader = Uploader::new(YouTubeClient::with_upload_url(url).unwrap()).with_chunk_size(4);
        let mut recorder = Recorder::default();
        let outcome = uploader
            .upload(&credential("ya29.test"), &build_metadata(), &path, &mut recorder)
            .await
            .unwrap();

        let UploadOutcome::Completed(result) = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(result.video_id, "vid42");

        let seen = seen.lock().unwrap();
        assert_eq!(
            seen.session_query.as_deref(),
            Some("uploadType=resumable&part=snippet%2Cstatus")
        );
        assert_eq!(
            seen.session_headers,
            vec![
                ("authorization".to_string(), "Bearer ya29.test".to_string()),
                ("x-upload-content-type".to_string(), "video/*".to_string()),
                ("x-upload-content-length".to_string(), "10".to_string()),
            ]
        );
        assert_eq!(
            seen.metadata,
            Some(serde_json::to_value(Video::from(&build_metadata())).unwrap())
        );
        assert_eq!(
            seen.ranges,
            vec![
                ("bytes 0-3/10".to_string(), 4),
                ("bytes 4-7/10".to_string(), 4),
                ("bytes 8-9/10".to_string(), 2),
            ]
        );
        assert_eq!(
            recorder.events,
            vec![
                "Starting 0",
                "Uploading 4",
                "Uploading 8",
                "Completed 10",
                "complete vid42",
            ]
        );
    }

    #[tokio::test]
    async fn status_query_reports_received_bytes() {
        let (url, seen) = fake_endpoint(false).await;
        let session = SessionUri(url.replace("/upload/youtube/v3/videos", "/session/1"));
        let client = YouTubeClient::with_upload_url(url).unwrap();

        let reply = client
            .query_status(&credential("ya29.test"), &session, 10)
            .await
            .unwrap();
        assert!(matches!(reply, ChunkReply::Incomplete { received: 0 }), "{reply:?}");
        assert_eq!(seen.lock().unwrap().ranges, vec![("bytes */10".to_string(), 0)]);
    }

    #[tokio::test]
    async fn refused_session_is_an_upload_error() {
        let (url, _) = fake_endpoint(true).await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("BuupTestVideo.mp4");
        std::fs::write(&path, b"0123456789").unwrap();

        let uploader = Uploader::new(YouTubeClient::with_upload_url(url).unwrap());
        let mut recorder = Recorder::default();
        let err = uploader
            .upload(&credential("ya29.test"), &build_metadata(), &path, &mut recorder)
            .await
            .unwrap_err();

        let Error::Upload(UploadError::Status { status, body }) = err else {
            panic!("expected status error, got {err:?}");
        };
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, "invalid credentials");
    }

    #[tokio::test]
    async fn rejected_token_is_refreshed_mid_upload() {
        let (url, seen) = fake_endpoint(false).await;
        let (token_uri, hits) = token_endpoint().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("BuupTestVideo.mp4");
        std::fs::write(&path, b"0123456789").unwrap();

        // still valid by its own clock, but the endpoint no longer takes it
        let credential = refreshable("ya29.stale", 3600, &token_uri);
        let uploader = Uploader::new(YouTubeClient::with_upload_url(url).unwrap()).with_chunk_size(4);
        let mut recorder = Recorder::default();
        let outcome = uploader
            .upload(&credential, &build_metadata(), &path, &mut recorder)
            .await
            .unwrap();

        assert!(matches!(outcome, UploadOutcome::Completed(_)), "{outcome:?}");
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.rejected, 1);
        assert_eq!(
            seen.ranges,
            vec![
                ("bytes 0-3/10".to_string(), 4),
                ("bytes 4-7/10".to_string(), 4),
                ("bytes 8-9/10".to_string(), 2),
            ]
        );
    }

    #[tokio::test]
    async fn rejected_token_without_grant_fails_the_transfer() {
        let (url, seen) = fake_endpoint(false).await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("BuupTestVideo.mp4");
        std::fs::write(&path, b"0123456789").unwrap();

        let uploader = Uploader::new(YouTubeClient::with_upload_url(url).unwrap());
        let mut recorder = Recorder::default();
        let outcome = uploader
            .upload(&credential("ya29.stale"), &build_metadata(), &path, &mut recorder)
            .await
            .unwrap();

        let UploadOutcome::Failed(UploadError::Status { status, .. }) = outcome else {
            panic!("expected status failure, got {outcome:?}");
        };
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(seen.lock().unwrap().rejected, 1);
    }

    #[tokio::test]
    async fn empty_file_that_never_completes_is_reported_stalled() {
        let (url, seen) = fake_endpoint(false).await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("BuupTestVideo.mp4");
        std::fs::write(&path, b"").unwrap();

        let uploader = Uploader::new(YouTubeClient::with_upload_url(url).unwrap());
        let mut recorder = Recorder::default();
        let outcome = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            uploader.upload(&credential("ya29.test"), &build_metadata(), &path, &mut recorder),
        )
        .await
        .expect("upload gave up on its own")
        .unwrap();

        assert!(
            matches!(outcome, UploadOutcome::Failed(UploadError::Stalled { offset: 0 })),
            "{outcome:?}"
        );
        assert_eq!(seen.lock().unwrap().ranges, vec![("bytes */0".to_string(), 0)]);
        assert_eq!(
            recorder.events,
            vec!["Starting 0", "Failed 0 (upload made no progress past byte 0)"]
        );
    }

    #[test]
    fn parses_range_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(received_bytes(&headers).unwrap(), 0);

        headers.insert(header::RANGE, "bytes=0-2097151".parse().unwrap());
        assert_eq!(received_bytes(&headers).unwrap(), 2_097_152);

        headers.insert(header::RANGE, "bytes=5-9".parse().unwrap());
        assert!(matches!(
            received_bytes(&headers),
            Err(UploadError::InvalidRange(_))
        ));
    }
}
