//! Fixed-interval status polling for one remote job
//!
//! A [`JobPoller`] owns at most one polling task. Each task is bound to a single
//! [`JobId`] and generation, ticks on a tokio interval, and stops on a terminal signal
//! or when its [`CancellationToken`] fires. Responses that resolve after cancellation
//! are dropped, and the token is checked again right before every send.
//!
//! On a multi-threaded runtime a `cancel()` racing with that last check can still let one
//! signal through; consumers must key events on their generation, as the lifecycle
//! controller does.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::models::StatusReply;
use crate::api::StatusService;
use crate::config::PollingConfig;
use crate::progress::{ProgressScale, RawProgress};
use crate::state::JobId;

/// Shortest period a poller will tick at. `tokio::time::interval` panics on zero.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Why polling ended in failure
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollFailure {
    #[error("server reported an encoding failure")]
    Encoding,

    #[error("status endpoint unavailable after {attempts} consecutive failures")]
    StatusUnavailable { attempts: u32 },

    #[error("no terminal status after {polls} polls")]
    DeadlineExceeded { polls: u64 },
}

/// Signal emitted by a poller tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PollSignal {
    /// Normalised progress in `[0, 100]`
    Progress(f64),

    /// Terminal failure
    Failed(PollFailure),

    /// Terminal success
    Completed,
}

impl PollSignal {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PollSignal::Progress(_))
    }
}

/// A signal tagged with the job and generation it belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct PollEvent {
    pub generation: u64,
    pub job_id: JobId,
    pub signal: PollSignal,
}

/// Timing and give-up rules for a poller
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_consecutive_failures: Option<u32>,
    pub max_polls: Option<u64>,
}

impl PollPolicy {
    /// Same policy with the interval raised to at least [`MIN_POLL_INTERVAL`]
    pub fn sanitized(mut self) -> Self {
        if self.interval < MIN_POLL_INTERVAL {
            warn!("Poll interval {:?} too short, using {:?}", self.interval, MIN_POLL_INTERVAL);
            self.interval = MIN_POLL_INTERVAL;
        }
        self
    }
}

impl From<&PollingConfig> for PollPolicy {
    fn from(config: &PollingConfig) -> Self {
        Self {
            interval: config.interval(),
            max_consecutive_failures: config.max_consecutive_failures,
            max_polls: config.max_polls,
        }
        .sanitized()
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from(&PollingConfig::default())
    }
}

/// Translate one status reply into the signal it carries, if any
pub fn interpret(job_id: &JobId, reply: &StatusReply) -> Option<PollSignal> {
    match reply {
        StatusReply::Finished => Some(PollSignal::Completed),
        StatusReply::Progress(None) => {
            debug!("No progress entry for job {} yet", job_id);
            None
        }
        StatusReply::Progress(Some(raw)) => match ProgressScale::classify(*raw) {
            RawProgress::Percent(value) => Some(PollSignal::Progress(value)),
            RawProgress::Failed => Some(PollSignal::Failed(PollFailure::Encoding)),
            RawProgress::Reserved(value) => {
                warn!("Ignoring reserved progress value {} for job {}", value, job_id);
                None
            }
        },
    }
}

struct PollerHandle {
    job_id: JobId,
    generation: u64,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Owner of the single live polling task
pub struct JobPoller {
    service: Arc<dyn StatusService>,
    policy: PollPolicy,
    active: Option<PollerHandle>,
}

impl JobPoller {
    pub fn new(service: Arc<dyn StatusService>, policy: PollPolicy) -> Self {
        Self {
            service,
            policy: policy.sanitized(),
            active: None,
        }
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Start polling `job_id`. Any previous task is cancelled first.
    ///
    /// The first query is issued one interval after this call.
    pub fn start(&mut self, job_id: JobId, generation: u64, events: mpsc::UnboundedSender<PollEvent>) {
        self.cancel();

        let token = CancellationToken::new();
        let task = tokio::spawn(poll_loop(
            Arc::clone(&self.service),
            job_id.clone(),
            generation,
            self.policy.clone(),
            token.clone(),
            events,
        ));

        info!("⏱️  Polling job {} every {:?}", job_id, self.policy.interval);
        self.active = Some(PollerHandle {
            job_id,
            generation,
            token,
            task,
        });
    }

    /// Stop the live task, if any. Returns whether one was running.
    pub fn cancel(&mut self) -> bool {
        match self.active.take() {
            Some(handle) => {
                debug!("Cancelling poller for job {} (generation {})", handle.job_id, handle.generation);
                handle.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Whether a task is alive and still polling
    pub fn is_running(&self) -> bool {
        self.active
            .as_ref()
            .map_or(false, |handle| !handle.task.is_finished())
    }

    /// Job and generation of the current task
    pub fn current(&self) -> Option<(&JobId, u64)> {
        self.active
            .as_ref()
            .map(|handle| (&handle.job_id, handle.generation))
    }
}

async fn poll_loop(
    service: Arc<dyn StatusService>,
    job_id: JobId,
    generation: u64,
    policy: PollPolicy,
    token: CancellationToken,
    events: mpsc::UnboundedSender<PollEvent>,
) {
    let mut ticker = interval_at(Instant::now() + policy.interval, policy.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut polls: u64 = 0;
    let mut consecutive_failures: u32 = 0;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        polls += 1;
        let reply = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            reply = service.fetch_status(&job_id) => reply,
        };

        if token.is_cancelled() {
            break;
        }

        let mut signal = match reply {
            Ok(reply) => {
                consecutive_failures = 0;
                interpret(&job_id, &reply)
            }
            Err(e) => {
                consecutive_failures += 1;
                warn!("Status query {} for job {} failed: {}", polls, job_id, e);
                match policy.max_consecutive_failures {
                    Some(max) if consecutive_failures >= max => Some(PollSignal::Failed(
                        PollFailure::StatusUnavailable {
                            attempts: consecutive_failures,
                        },
                    )),
                    _ => None,
                }
            }
        };

        let terminal = signal.map_or(false, |s| s.is_terminal());
        if !terminal {
            if let Some(max) = policy.max_polls {
                if polls >= max {
                    if let Some(PollSignal::Progress(value)) = signal {
                        emit(&token, &events, &job_id, generation, PollSignal::Progress(value));
                    }
                    signal = Some(PollSignal::Failed(PollFailure::DeadlineExceeded { polls }));
                }
            }
        }

        if let Some(signal) = signal {
            if !emit(&token, &events, &job_id, generation, signal) || signal.is_terminal() {
                break;
            }
        }
    }

    debug!("Poller for job {} stopped after {} polls", job_id, polls);
}

/// Send one signal unless the task was cancelled. Returns whether polling may continue.
fn emit(
    token: &CancellationToken,
    events: &mpsc::UnboundedSender<PollEvent>,
    job_id: &JobId,
    generation: u64,
    signal: PollSignal,
) -> bool {
    if token.is_cancelled() {
        return false;
    }
    events
        .send(PollEvent {
            generation,
            job_id: job_id.clone(),
            signal,
        })
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StatusError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Notify;

    struct ScriptedService {
        replies: Mutex<VecDeque<Result<StatusReply, StatusError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedService {
        fn new(replies: Vec<Result<StatusReply, StatusError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl StatusService for ScriptedService {
        async fn fetch_status(&self, _job_id: &JobId) -> Result<StatusReply, StatusError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(StatusReply::Progress(None)))
        }
    }

    struct GatedService {
        release: Notify,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl StatusService for GatedService {
        async fn fetch_status(&self, _job_id: &JobId) -> Result<StatusReply, StatusError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.release.notified().await;
            Ok(StatusReply::Progress(Some(50.0)))
        }
    }

    fn policy() -> PollPolicy {
        PollPolicy {
            interval: Duration::from_secs(1),
            max_consecutive_failures: None,
            max_polls: None,
        }
    }

    #[test]
    fn test_interpret_replies() {
        let id = JobId::new("abc123");
        assert_eq!(interpret(&id, &StatusReply::Progress(Some(0.0))), Some(PollSignal::Progress(1.0)));
        assert_eq!(interpret(&id, &StatusReply::Progress(Some(45.0))), Some(PollSignal::Progress(45.0)));
        assert_eq!(
            interpret(&id, &StatusReply::Progress(Some(-2.0))),
            Some(PollSignal::Failed(PollFailure::Encoding))
        );
        assert_eq!(interpret(&id, &StatusReply::Progress(Some(-1.0))), None);
        assert_eq!(interpret(&id, &StatusReply::Progress(None)), None);
        assert_eq!(interpret(&id, &StatusReply::Finished), Some(PollSignal::Completed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_query_after_one_interval() {
        let service = ScriptedService::new(vec![]);
        let mut poller = JobPoller::new(service.clone(), policy());
        let (tx, _rx) = mpsc::unbounded_channel();

        poller.start(JobId::new("abc123"), 1, tx);
        tokio::time::sleep(Duration::from_millis(999)).await;
        assert_eq!(service.calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(service.calls.load(Ordering::SeqCst), 3);
        assert!(poller.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_after_failure_sentinel() {
        let service = ScriptedService::new(vec![
            Ok(StatusReply::Progress(Some(10.0))),
            Ok(StatusReply::Progress(Some(-2.0))),
        ]);
        let mut poller = JobPoller::new(service.clone(), policy());
        let (tx, mut rx) = mpsc::unbounded_channel();

        poller.start(JobId::new("abc123"), 7, tx);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.signal, PollSignal::Progress(10.0));
        assert_eq!(first.generation, 7);

        let second = rx.recv().await.unwrap();
        assert_eq!(second.signal, PollSignal::Failed(PollFailure::Encoding));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
        assert!(rx.recv().await.is_none());
        assert!(!poller.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_absorbed() {
        let service = ScriptedService::new(vec![
            Err(StatusError::UnexpectedStatus(502)),
            Err(StatusError::UnexpectedStatus(503)),
            Ok(StatusReply::Finished),
        ]);
        let mut poller = JobPoller::new(service.clone(), policy());
        let (tx, mut rx) = mpsc::unbounded_channel();

        poller.start(JobId::new("abc123"), 1, tx);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.signal, PollSignal::Completed);
        assert_eq!(service.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_failure_cap() {
        let service = ScriptedService::new(vec![
            Err(StatusError::UnexpectedStatus(500)),
            Ok(StatusReply::Progress(None)),
            Err(StatusError::UnexpectedStatus(500)),
            Err(StatusError::UnexpectedStatus(500)),
            Err(StatusError::UnexpectedStatus(500)),
        ]);
        let policy = PollPolicy {
            max_consecutive_failures: Some(3),
            ..policy()
        };
        let mut poller = JobPoller::new(service.clone(), policy);
        let (tx, mut rx) = mpsc::unbounded_channel();

        poller.start(JobId::new("abc123"), 1, tx);

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event.signal,
            PollSignal::Failed(PollFailure::StatusUnavailable { attempts: 3 })
        );
        assert_eq!(service.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_deadline() {
        let service = ScriptedService::new(vec![
            Ok(StatusReply::Progress(Some(5.0))),
            Ok(StatusReply::Progress(Some(6.0))),
        ]);
        let policy = PollPolicy {
            max_polls: Some(2),
            ..policy()
        };
        let mut poller = JobPoller::new(service, policy);
        let (tx, mut rx) = mpsc::unbounded_channel();

        poller.start(JobId::new("abc123"), 1, tx);

        assert_eq!(rx.recv().await.unwrap().signal, PollSignal::Progress(5.0));
        assert_eq!(rx.recv().await.unwrap().signal, PollSignal::Progress(6.0));
        assert_eq!(
            rx.recv().await.unwrap().signal,
            PollSignal::Failed(PollFailure::DeadlineExceeded { polls: 2 })
        );
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_response_after_cancel_is_discarded() {
        let service = Arc::new(GatedService {
            release: Notify::new(),
            calls: AtomicUsize::new(0),
        });
        let mut poller = JobPoller::new(service.clone(), policy());
        let (tx, mut rx) = mpsc::unbounded_channel();

        poller.start(JobId::new("abc123"), 1, tx);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);

        assert!(poller.cancel());
        service.release.notify_waiters();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(rx.try_recv().is_err());
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
        assert!(!poller.is_running());
        assert!(!poller.cancel());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_raised_to_minimum() {
        let service = ScriptedService::new(vec![Ok(StatusReply::Finished)]);
        let zero = PollPolicy {
            interval: Duration::ZERO,
            ..policy()
        };
        let mut poller = JobPoller::new(service.clone(), zero);
        assert_eq!(poller.policy().interval, MIN_POLL_INTERVAL);

        let (tx, mut rx) = mpsc::unbounded_channel();
        poller.start(JobId::new("abc123"), 1, tx);

        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("poller must keep running")
            .unwrap();
        assert_eq!(event.signal, PollSignal::Completed);
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_policy_from_config_never_zero() {
        let config = PollingConfig {
            interval_ms: 0,
            ..PollingConfig::default()
        };
        assert_eq!(PollPolicy::from(&config).interval, MIN_POLL_INTERVAL);
        assert_eq!(PollPolicy::default().interval, Duration::from_secs(1));
    }

    #[test]
    fn test_emit_after_cancel_sends_nothing() {
        let token = CancellationToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let job = JobId::new("abc123");

        assert!(emit(&token, &tx, &job, 1, PollSignal::Progress(10.0)));
        token.cancel();
        assert!(!emit(&token, &tx, &job, 1, PollSignal::Completed));

        assert_eq!(rx.try_recv().unwrap().signal, PollSignal::Progress(10.0));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_previous_task() {
        let service = ScriptedService::new(vec![]);
        let mut poller = JobPoller::new(service, policy());
        let (old_tx, mut old_rx) = mpsc::unbounded_channel();
        let (new_tx, _new_rx) = mpsc::unbounded_channel();

        poller.start(JobId::new("old"), 1, old_tx);
        poller.start(JobId::new("new"), 2, new_tx);

        assert_eq!(poller.current().map(|(id, g)| (id.as_str(), g)), Some(("new", 2)));

        // The old task observed cancellation and dropped its sender.
        assert!(old_rx.recv().await.is_none());
    }
}
