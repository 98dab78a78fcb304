use bytes::Bytes;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::api::{TransferProgress, UploadTransport};
use crate::error::TransportError;
use crate::progress::ProgressScale;
use crate::state::JobId;

/// One clip submission. Immutable once built.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    title: String,
    description: String,
    unlisted: bool,
    file_name: String,
    payload: Bytes,
}

impl UploadRequest {
    pub fn new(title: impl Into<String>, file_name: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            unlisted: false,
            file_name: file_name.into(),
            payload: Bytes::from(payload),
        }
    }

    /// Read a clip from disk.
    ///
    /// An empty or missing title is derived from the file name.
    pub async fn from_file(path: &Path, title: Option<String>) -> Result<Self, TransportError> {
        let payload = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video".to_string());

        let title = title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| title_from_file_name(&file_name));

        debug!("Loaded {} ({} bytes)", path.display(), payload.len());
        Ok(Self::new(title, file_name, payload))
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_unlisted(mut self, unlisted: bool) -> Self {
        self.unlisted = unlisted;
        self
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn unlisted(&self) -> bool {
        self.unlisted
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Cheap handle on the payload; clones share one buffer
    pub fn payload(&self) -> Bytes {
        self.payload.clone()
    }

    pub fn payload_len(&self) -> u64 {
        self.payload.len() as u64
    }

    /// A request may start only with a title and a non-empty payload
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("title must not be empty".to_string());
        }
        if self.payload.is_empty() {
            return Err("no file payload".to_string());
        }
        Ok(())
    }
}

/// Derive a clip title from a file name: `my_first.clip.mp4` becomes `my first clip`
pub fn title_from_file_name(file_name: &str) -> String {
    let segments: Vec<&str> = file_name.split('.').collect();
    let stem = match segments.len() {
        0 | 1 => file_name.to_string(),
        n => segments[..n - 1].join(" "),
    };
    stem.replace('_', " ").trim().to_string()
}

/// A single upload attempt with percent progress reporting
#[derive(Clone)]
pub struct UploadSession {
    transport: Arc<dyn UploadTransport>,
}

impl UploadSession {
    pub fn new(transport: Arc<dyn UploadTransport>) -> Self {
        Self { transport }
    }

    /// Run the upload once.
    ///
    /// `on_progress` receives strictly increasing percents while the transfer is in flight.
    /// The returned result is reported exactly once; there are no retries here.
    pub async fn run<F>(&self, request: &UploadRequest, on_progress: F) -> Result<JobId, TransportError>
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        if let Err(reason) = request.validate() {
            warn!("Refusing to upload {}: {}", request.file_name(), reason);
            return Err(TransportError::InvalidRequest(reason));
        }

        let tracker = Arc::new(PercentTracker::new(on_progress));
        let reporter = Arc::clone(&tracker);
        let progress: TransferProgress = Arc::new(move |sent: u64, total: u64| reporter.record(sent, total));

        let result = self.transport.upload(request, progress).await;
        tracker.finish();

        match &result {
            Ok(id) => info!("✅ Upload of {} accepted as job {}", request.file_name(), id),
            Err(e) => warn!("❌ Upload of {} failed: {}", request.file_name(), e),
        }
        result
    }
}

/// Converts byte counts to percents and forwards only increases
struct PercentTracker<F> {
    on_progress: F,
    last: Mutex<Option<f64>>,
    finished: AtomicBool,
}

impl<F: Fn(f64)> PercentTracker<F> {
    fn new(on_progress: F) -> Self {
        Self {
            on_progress,
            last: Mutex::new(None),
            finished: AtomicBool::new(false),
        }
    }

    fn record(&self, sent: u64, total: u64) {
        if self.finished.load(Ordering::Acquire) {
            return;
        }

        let percent = ProgressScale::transfer_percent(sent, total);
        let Ok(mut last) = self.last.lock() else {
            return;
        };
        if last.map_or(true, |previous| percent > previous) {
            *last = Some(percent);
            drop(last);
            (self.on_progress)(percent);
        }
    }

    fn finish(&self) {
        self.finished.store(true, Ordering::Release);
    }
}
