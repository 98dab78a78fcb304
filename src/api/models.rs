//! Wire models for the clip server endpoints

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metadata part of the multipart upload, sent under the `json` field
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClipMetadata {
    pub title: String,
    pub description: String,
    pub unlisted: bool,
}

/// Successful upload response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub id: String,
}

/// Body of a 200 response from the progress endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressResponse {
    #[serde(default)]
    pub clips: HashMap<String, Option<f64>>,
}

impl ProgressResponse {
    /// Raw reading for one job; `None` when the server has no entry yet
    pub fn reading_for(&self, job_id: &str) -> Option<f64> {
        self.clips.get(job_id).copied().flatten()
    }
}

/// Interpreted reply of one status query
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatusReply {
    /// 200 with a reading, or without an entry for the job
    Progress(Option<f64>),

    /// 204: the job finished successfully
    Finished,
}
