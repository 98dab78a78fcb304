//! Shared fakes for the lifecycle integration tests.
//!
//! - `ScriptedTransport`: upload transport replaying scripted outcomes
//! - `ScriptedStatusService`: per-job scripted status replies
//! - `RecordingNavigator`: remembers every completed job

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clip_uploader::{
    JobId, LifecycleController, Navigator, PollPolicy, StatusError, StatusReply, StatusService,
    TransferProgress, TransportError, UploadRequest, UploadTransport,
};

/// One scripted upload attempt
#[derive(Debug, Clone)]
pub struct ScriptedUpload {
    pub progress: Vec<(u64, u64)>,
    pub delay: Duration,
    pub outcome: Result<String, u16>,
}

impl ScriptedUpload {
    pub fn accepted(id: &str) -> Self {
        Self {
            progress: vec![(500, 1000), (1000, 1000)],
            delay: Duration::ZERO,
            outcome: Ok(id.to_string()),
        }
    }

    pub fn rejected(status: u16) -> Self {
        Self {
            progress: vec![(250, 1000)],
            delay: Duration::ZERO,
            outcome: Err(status),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Default)]
pub struct ScriptedTransport {
    uploads: Mutex<VecDeque<ScriptedUpload>>,
    titles: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new(uploads: Vec<ScriptedUpload>) -> Arc<Self> {
        Arc::new(Self {
            uploads: Mutex::new(uploads.into()),
            titles: Mutex::new(Vec::new()),
        })
    }

    /// Titles of every request that reached the transport
    pub fn titles(&self) -> Vec<String> {
        self.titles.lock().unwrap().clone()
    }
}

#[async_trait]
impl UploadTransport for ScriptedTransport {
    async fn upload(
        &self,
        request: &UploadRequest,
        progress: TransferProgress,
    ) -> Result<JobId, TransportError> {
        self.titles.lock().unwrap().push(request.title().to_string());
        let script = self
            .uploads
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ScriptedUpload::rejected(500));

        for (sent, total) in &script.progress {
            progress(*sent, *total);
        }
        if !script.delay.is_zero() {
            tokio::time::sleep(script.delay).await;
        }

        match script.outcome {
            Ok(id) => Ok(JobId::new(id)),
            Err(status) => Err(TransportError::Rejected {
                status,
                body: "scripted rejection".to_string(),
            }),
        }
    }
}

#[derive(Default)]
pub struct ScriptedStatusService {
    scripts: Mutex<HashMap<String, VecDeque<Result<StatusReply, StatusError>>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedStatusService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(self: &Arc<Self>, job_id: &str, replies: Vec<Result<StatusReply, StatusError>>) -> Arc<Self> {
        self.scripts
            .lock()
            .unwrap()
            .insert(job_id.to_string(), replies.into());
        Arc::clone(self)
    }

    pub fn calls_for(&self, job_id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|id| id.as_str() == job_id)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl StatusService for ScriptedStatusService {
    async fn fetch_status(&self, job_id: &JobId) -> Result<StatusReply, StatusError> {
        self.calls.lock().unwrap().push(job_id.to_string());
        self.scripts
            .lock()
            .unwrap()
            .get_mut(job_id.as_str())
            .and_then(|replies| replies.pop_front())
            .unwrap_or(Ok(StatusReply::Progress(None)))
    }
}

#[derive(Default)]
pub struct RecordingNavigator {
    visited: Mutex<Vec<JobId>>,
}

impl RecordingNavigator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn visited(&self) -> Vec<String> {
        self.visited
            .lock()
            .unwrap()
            .iter()
            .map(|id| id.to_string())
            .collect()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate_to_result(&self, job_id: &JobId) {
        self.visited.lock().unwrap().push(job_id.clone());
    }
}

pub fn progress(value: f64) -> Result<StatusReply, StatusError> {
    Ok(StatusReply::Progress(Some(value)))
}

pub fn no_entry() -> Result<StatusReply, StatusError> {
    Ok(StatusReply::Progress(None))
}

pub fn finished() -> Result<StatusReply, StatusError> {
    Ok(StatusReply::Finished)
}

pub fn unavailable(status: u16) -> Result<StatusReply, StatusError> {
    Err(StatusError::UnexpectedStatus(status))
}

pub fn request(title: &str) -> UploadRequest {
    UploadRequest::new(title, "clip.mp4", vec![7u8; 1000])
        .with_description("Drilling session")
        .with_unlisted(true)
}

pub fn one_second_policy() -> PollPolicy {
    PollPolicy {
        interval: Duration::from_secs(1),
        max_consecutive_failures: None,
        max_polls: None,
    }
}

pub fn controller(
    transport: Arc<ScriptedTransport>,
    status: Arc<ScriptedStatusService>,
    navigator: Arc<RecordingNavigator>,
    policy: PollPolicy,
) -> LifecycleController {
    LifecycleController::new(transport, status, policy, navigator)
}
