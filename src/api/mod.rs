//! Client for the clip server API
//!
//! Provides the upload and status endpoints behind the [`UploadTransport`] and
//! [`StatusService`] traits so the lifecycle can run against fakes in tests.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, Stream};
use reqwest::{header, multipart, RequestBuilder, StatusCode};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{Config, PollingConfig, ServerConfig, UploadConfig};
use crate::error::{StatusError, TransportError};
use crate::state::JobId;
use crate::upload::UploadRequest;

pub mod models;

use models::{ClipMetadata, ProgressResponse, StatusReply, UploadResponse};

/// Byte-level transfer callback: `(bytes_sent, bytes_total)`
pub type TransferProgress = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Transport carrying one upload to the server
#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// Perform exactly one transfer and return the identifier of the created job
    async fn upload(
        &self,
        request: &UploadRequest,
        progress: TransferProgress,
    ) -> Result<JobId, TransportError>;
}

/// Source of job status readings
#[async_trait]
pub trait StatusService: Send + Sync {
    async fn fetch_status(&self, job_id: &JobId) -> Result<StatusReply, StatusError>;
}

/// HTTP client for the clip server
#[derive(Debug, Clone)]
pub struct ClipApiClient {
    server: ServerConfig,
    upload: UploadConfig,
    polling: PollingConfig,
    client: reqwest::Client,
}

impl ClipApiClient {
    pub fn new(config: &Config) -> Result<Self, TransportError> {
        // Per-request timeouts only: uploads may legitimately run for a long time.
        let client = reqwest::Client::builder()
            .user_agent(concat!("clip-uploader/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            server: config.server.clone(),
            upload: config.upload.clone(),
            polling: config.polling.clone(),
            client,
        })
    }

    fn with_session(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.server.session_cookie {
            Some(cookie) => builder.header(header::COOKIE, cookie),
            None => builder,
        }
    }

    /// Multipart form with the metadata part followed by the streamed payload part
    fn build_form(
        &self,
        request: &UploadRequest,
        progress: TransferProgress,
    ) -> Result<multipart::Form, TransportError> {
        let metadata = ClipMetadata {
            title: request.title().to_string(),
            description: request.description().to_string(),
            unlisted: request.unlisted(),
        };
        let metadata_json = serde_json::to_string(&metadata)
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;

        let total = request.payload_len();
        let body = payload_body(request.payload(), self.upload.chunk_size, progress);
        let video = multipart::Part::stream_with_length(body, total)
            .file_name(request.file_name().to_string())
            .mime_str(video_mime_type(request.file_name()))?;

        Ok(multipart::Form::new()
            .text("json", metadata_json)
            .part("video", video))
    }
}

#[async_trait]
impl UploadTransport for ClipApiClient {
    async fn upload(
        &self,
        request: &UploadRequest,
        progress: TransferProgress,
    ) -> Result<JobId, TransportError> {
        let url = self.server.endpoint(&self.server.upload_path)?;
        let form = self.build_form(request, progress)?;

        info!("📤 Uploading {} ({} bytes) to {}", request.file_name(), request.payload_len(), url);

        let mut builder = self.client.post(url).multipart(form);
        if let Some(timeout) = self.upload.timeout() {
            builder = builder.timeout(timeout);
        }

        let response = self.with_session(builder).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let text = response.text().await?;
        let parsed: UploadResponse = serde_json::from_str(&text)
            .map_err(|e| TransportError::MalformedResponse(format!("{e}: {text}")))?;

        if parsed.id.trim().is_empty() {
            return Err(TransportError::MalformedResponse("empty clip id".to_string()));
        }

        debug!("Upload accepted as clip {}", parsed.id);
        Ok(JobId::from(parsed.id))
    }
}

#[async_trait]
impl StatusService for ClipApiClient {
    async fn fetch_status(&self, job_id: &JobId) -> Result<StatusReply, StatusError> {
        let mut url = self.server.endpoint(&self.server.progress_path)?;
        url.query_pairs_mut().append_pair("cid", job_id.as_str());

        let mut builder = self.client.get(url);
        if let Some(timeout) = self.polling.request_timeout() {
            builder = builder.timeout(timeout);
        }

        let response = self.with_session(builder).send().await?;

        match response.status() {
            StatusCode::OK => {
                let text = response.text().await?;
                let body: ProgressResponse = serde_json::from_str(&text)
                    .map_err(|e| StatusError::MalformedBody(format!("{e}: {text}")))?;
                Ok(StatusReply::Progress(body.reading_for(job_id.as_str())))
            }
            StatusCode::NO_CONTENT => Ok(StatusReply::Finished),
            other => Err(StatusError::UnexpectedStatus(other.as_u16())),
        }
    }
}

/// Stream the payload in chunks, reporting each chunk as it is handed to the connection
fn payload_body(payload: Bytes, chunk_size: usize, progress: TransferProgress) -> reqwest::Body {
    reqwest::Body::wrap_stream(payload_chunks(payload, chunk_size, progress))
}

/// Zero-copy views over `payload`, `chunk_size` bytes each
fn payload_chunks(
    payload: Bytes,
    chunk_size: usize,
    progress: TransferProgress,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    let total = payload.len() as u64;
    let chunk_size = chunk_size.max(1);

    stream::unfold(0usize, move |offset| {
        let payload = payload.clone();
        let progress = Arc::clone(&progress);
        async move {
            if offset >= payload.len() {
                return None;
            }
            let end = (offset + chunk_size).min(payload.len());
            let chunk = payload.slice(offset..end);
            progress(end as u64, total);
            Some((Ok(chunk), end))
        }
    })
}

/// MIME type for the video part, from the file extension
pub fn video_mime_type(file_name: &str) -> &'static str {
    let extension = Path::new(file_name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "ogv" => "video/ogg",
        _ => "application/octet-stream",
    }
}
