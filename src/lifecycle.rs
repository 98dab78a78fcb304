//! Top-level lifecycle state machine for one clip at a time
//!
//! The controller owns the phase, the display progress, the current [`JobId`] and a
//! generation counter. Upload and poller tasks only report events over channels; every
//! mutation happens in `&mut self` methods, and events tagged with an older generation
//! are dropped before they reach the transition table.

use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::api::{ClipApiClient, StatusService, UploadTransport};
use crate::config::{Config, ServerConfig};
use crate::error::{LifecycleError, TransportError};
use crate::poller::{JobPoller, PollEvent, PollPolicy, PollSignal};
use crate::state::{JobId, LifecycleStatus, Phase};
use crate::upload::{UploadRequest, UploadSession};

/// Receives the completed job so the caller can show its result
pub trait Navigator: Send + Sync {
    fn navigate_to_result(&self, job_id: &JobId);
}

/// Navigator that does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNavigator;

impl Navigator for NoopNavigator {
    fn navigate_to_result(&self, _job_id: &JobId) {}
}

/// Navigator resolving the server's result page for a finished clip
#[derive(Debug)]
pub struct ResultLinkNavigator {
    server: ServerConfig,
    last: Mutex<Option<Url>>,
}

impl ResultLinkNavigator {
    pub fn new(server: ServerConfig) -> Self {
        Self {
            server,
            last: Mutex::new(None),
        }
    }

    /// Result page of the most recently completed clip
    pub fn last_result(&self) -> Option<Url> {
        self.last.lock().ok().and_then(|last| last.clone())
    }
}

impl Navigator for ResultLinkNavigator {
    fn navigate_to_result(&self, job_id: &JobId) {
        match self.server.result_url(job_id.as_str()) {
            Ok(url) => {
                info!("🔗 Clip available at {}", url);
                if let Ok(mut last) = self.last.lock() {
                    *last = Some(url);
                }
            }
            Err(e) => warn!("Cannot build result URL for {}: {}", job_id, e),
        }
    }
}

#[derive(Debug)]
enum UploadEvent {
    Progress { generation: u64, percent: f64 },
    Done { generation: u64, result: Result<JobId, TransportError> },
}

#[derive(Debug)]
enum LifecycleEvent {
    Upload(UploadEvent),
    Poll(PollEvent),
}

impl LifecycleEvent {
    fn generation(&self) -> u64 {
        match self {
            LifecycleEvent::Upload(UploadEvent::Progress { generation, .. })
            | LifecycleEvent::Upload(UploadEvent::Done { generation, .. }) => *generation,
            LifecycleEvent::Poll(event) => event.generation,
        }
    }
}

/// State machine driving upload, queueing and encoding of a clip
pub struct LifecycleController {
    session: UploadSession,
    poller: JobPoller,
    navigator: Arc<dyn Navigator>,

    phase: Phase,
    progress: f64,
    job_id: Option<JobId>,
    generation: u64,

    upload_task: Option<JoinHandle<()>>,
    upload_tx: mpsc::UnboundedSender<UploadEvent>,
    upload_rx: mpsc::UnboundedReceiver<UploadEvent>,
    poll_tx: mpsc::UnboundedSender<PollEvent>,
    poll_rx: mpsc::UnboundedReceiver<PollEvent>,
    status_tx: watch::Sender<LifecycleStatus>,
}

impl LifecycleController {
    pub fn new(
        transport: Arc<dyn UploadTransport>,
        status_service: Arc<dyn StatusService>,
        policy: PollPolicy,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        let (upload_tx, upload_rx) = mpsc::unbounded_channel();
        let (poll_tx, poll_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = watch::channel(LifecycleStatus::idle());

        Self {
            session: UploadSession::new(transport),
            poller: JobPoller::new(status_service, policy),
            navigator,
            phase: Phase::Idle,
            progress: 0.0,
            job_id: None,
            generation: 0,
            upload_task: None,
            upload_tx,
            upload_rx,
            poll_tx,
            poll_rx,
            status_tx,
        }
    }

    /// Controller talking to a real clip server through one HTTP client
    pub fn with_client(client: Arc<ClipApiClient>, config: &Config, navigator: Arc<dyn Navigator>) -> Self {
        let transport: Arc<dyn UploadTransport> = client.clone();
        Self::new(transport, client, PollPolicy::from(&config.polling), navigator)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Display progress in `[0, 100]`
    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub fn job_id(&self) -> Option<&JobId> {
        self.job_id.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn status(&self) -> LifecycleStatus {
        LifecycleStatus {
            phase: self.phase,
            progress: self.progress,
            job_id: self.job_id.clone(),
            generation: self.generation,
            updated_at: chrono::Utc::now(),
        }
    }

    /// Receiver notified on every phase or progress change
    pub fn subscribe(&self) -> watch::Receiver<LifecycleStatus> {
        self.status_tx.subscribe()
    }

    /// Submit a new clip.
    ///
    /// Any job in flight is superseded: its generation is invalidated before the upload
    /// task and poller are stopped. Returns the generation of the new attempt.
    pub fn start(&mut self, request: UploadRequest) -> Result<u64, LifecycleError> {
        request.validate().map_err(LifecycleError::InvalidRequest)?;

        self.generation += 1;
        let generation = self.generation;

        self.poller.cancel();
        if let Some(task) = self.upload_task.take() {
            debug!("Aborting upload task of generation {}", generation - 1);
            task.abort();
        }
        if let Some(previous) = self.job_id.take() {
            info!("🔄 Superseding job {}", previous);
        }

        self.progress = 0.0;
        self.set_phase(Phase::Uploading);

        info!("🚀 Starting upload of \"{}\" (generation {})", request.title(), generation);

        let session = self.session.clone();
        let events = self.upload_tx.clone();
        self.upload_task = Some(tokio::spawn(async move {
            let progress_events = events.clone();
            let result = session
                .run(&request, move |percent| {
                    let _ = progress_events.send(UploadEvent::Progress { generation, percent });
                })
                .await;
            let _ = events.send(UploadEvent::Done { generation, result });
        }));

        Ok(generation)
    }

    /// Wait for the next event and apply it.
    ///
    /// Returns `None` without waiting when no job is active.
    pub async fn step(&mut self) -> Option<Phase> {
        if !self.phase.is_active() {
            return None;
        }

        let event = tokio::select! {
            biased;
            Some(event) = self.upload_rx.recv() => LifecycleEvent::Upload(event),
            Some(event) = self.poll_rx.recv() => LifecycleEvent::Poll(event),
            else => return None,
        };

        self.apply(event);
        Some(self.phase)
    }

    /// Drive the current job until it reaches a terminal phase
    pub async fn run_until_terminal(&mut self) -> Phase {
        while self.phase.is_active() {
            self.step().await;
        }
        self.phase
    }

    /// Stop the upload task and poller without changing the phase
    pub fn shutdown(mut self) -> LifecycleStatus {
        self.stop_tasks();
        self.status()
    }

    fn stop_tasks(&mut self) {
        self.poller.cancel();
        if let Some(task) = self.upload_task.take() {
            task.abort();
        }
    }

    fn apply(&mut self, event: LifecycleEvent) -> bool {
        if event.generation() != self.generation {
            debug!(
                "Discarding event from generation {} (current {})",
                event.generation(),
                self.generation
            );
            return false;
        }

        match (self.phase, event) {
            (Phase::Uploading, LifecycleEvent::Upload(UploadEvent::Progress { percent, .. })) => {
                self.progress = percent;
                self.publish();
            }
            (Phase::Uploading, LifecycleEvent::Upload(UploadEvent::Done { result: Ok(job_id), .. })) => {
                self.upload_task = None;
                self.job_id = Some(job_id.clone());
                self.set_phase(Phase::Queued);
                self.poller.start(job_id, self.generation, self.poll_tx.clone());
            }
            (Phase::Uploading, LifecycleEvent::Upload(UploadEvent::Done { result: Err(e), .. })) => {
                self.upload_task = None;
                warn!("❌ Upload failed: {}", e);
                self.set_phase(Phase::UploadFailed);
            }
            (Phase::Queued | Phase::Encoding, LifecycleEvent::Poll(PollEvent { job_id, signal, .. }))
                if self.job_id.as_ref() == Some(&job_id) =>
            {
                match signal {
                    PollSignal::Progress(value) => {
                        self.progress = value;
                        self.set_phase(Phase::Encoding);
                    }
                    PollSignal::Failed(reason) => {
                        self.poller.cancel();
                        self.job_id = None;
                        warn!("❌ Job {} failed: {}", job_id, reason);
                        self.set_phase(Phase::EncodingFailed);
                    }
                    PollSignal::Completed => {
                        self.poller.cancel();
                        self.job_id = None;
                        self.set_phase(Phase::Completed);
                        self.navigator.navigate_to_result(&job_id);
                    }
                }
            }
            (phase, event) => {
                debug!("Ignoring {:?} in phase {:?}", event, phase);
                return false;
            }
        }

        true
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            info!("📊 {:?} → {:?}", self.phase, phase);
            self.phase = phase;
        }
        self.publish();
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.status());
    }
}

impl Drop for LifecycleController {
    fn drop(&mut self) {
        self.stop_tasks();
    }
}
