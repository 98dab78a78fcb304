//! Error types for the upload and polling layers

/// Failure of the single upload attempt. Always terminal for the job.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid endpoint: {0}")]
    Endpoint(#[from] url::ParseError),

    #[error("Upload rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Malformed upload response: {0}")]
    MalformedResponse(String),

    #[error("Invalid upload request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of one status query. Transient: the poller retries on the next tick.
#[derive(thiserror::Error, Debug)]
pub enum StatusError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid endpoint: {0}")]
    Endpoint(#[from] url::ParseError),

    #[error("Unexpected status code: {0}")]
    UnexpectedStatus(u16),

    #[error("Malformed status body: {0}")]
    MalformedBody(String),
}

/// Errors surfaced directly by the lifecycle controller's caller-facing API
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("Invalid upload request: {0}")]
    InvalidRequest(String),
}
