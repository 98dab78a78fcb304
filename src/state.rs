use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Job identifier returned by the upload endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Lifecycle phases of one clip upload
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Nothing submitted yet
    Idle,

    /// The upload request failed; terminal
    UploadFailed,

    /// The server reported an encoding failure; terminal
    EncodingFailed,

    /// The server finished encoding; terminal
    Completed,

    /// Payload transfer in flight
    Uploading,

    /// Upload accepted, waiting for the first progress reading
    Queued,

    /// Server actively encoding
    Encoding,
}

impl Phase {
    /// Phases left only through a new `start`
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::UploadFailed | Phase::EncodingFailed | Phase::Completed)
    }

    /// Phases with an upload task or a poller behind them
    pub fn is_active(&self) -> bool {
        matches!(self, Phase::Uploading | Phase::Queued | Phase::Encoding)
    }

    /// One-line message for the presentation layer
    pub fn status_message(&self) -> &'static str {
        match self {
            Phase::Idle => "Upload",
            Phase::UploadFailed => "Error uploading video",
            Phase::EncodingFailed => "Error encoding video",
            Phase::Completed => "Video uploaded successfully",
            Phase::Uploading => "Uploading...",
            Phase::Queued => "Queued...",
            Phase::Encoding => "Encoding...",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.status_message())
    }
}

/// Snapshot published to subscribers on every change
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LifecycleStatus {
    /// Current phase
    pub phase: Phase,

    /// Display progress in `[0, 100]`
    pub progress: f64,

    /// Identifier of the job being tracked, if any
    pub job_id: Option<JobId>,

    /// Generation of the current attempt (0 before the first start)
    pub generation: u64,

    /// When this snapshot was taken
    pub updated_at: DateTime<Utc>,
}

impl LifecycleStatus {
    pub fn idle() -> Self {
        Self {
            phase: Phase::Idle,
            progress: 0.0,
            job_id: None,
            generation: 0,
            updated_at: Utc::now(),
        }
    }

    /// Progress rounded for display
    pub fn percent(&self) -> u8 {
        self.progress.round().clamp(0.0, 100.0) as u8
    }
}

impl Default for LifecycleStatus {
    fn default() -> Self {
        Self::idle()
    }
}
