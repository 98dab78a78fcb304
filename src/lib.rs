//! Clip Uploader
//!
//! Submits a video clip to a clip server and tracks it through upload, queueing and
//! server-side encoding with a polling-driven lifecycle state machine.

pub mod api;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod poller;
pub mod progress;
pub mod state;
pub mod upload;

// Re-export main types for easy access
pub use crate::api::{ClipApiClient, StatusService, TransferProgress, UploadTransport};
pub use crate::api::models::StatusReply;
pub use crate::config::{Config, ConfigBuilder};
pub use crate::error::{LifecycleError, StatusError, TransportError};
pub use crate::lifecycle::{LifecycleController, Navigator, NoopNavigator, ResultLinkNavigator};
pub use crate::poller::{JobPoller, PollEvent, PollFailure, PollPolicy, PollSignal};
pub use crate::progress::{ProgressScale, RawProgress};
pub use crate::state::{JobId, LifecycleStatus, Phase};
pub use crate::upload::{UploadRequest, UploadSession};
