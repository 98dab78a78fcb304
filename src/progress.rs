//! Progress normalisation for upload and encoding readings

/// Raw value the status endpoint uses to report that encoding failed
pub const FAILURE_SENTINEL: f64 = -2.0;

/// Smallest value shown while a job is accepted but not yet started
pub const MIN_VISIBLE_PROGRESS: f64 = 1.0;

/// Upper bound of every display-safe progress value
pub const MAX_PROGRESS: f64 = 100.0;

/// Classification of a raw reading from the status endpoint
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawProgress {
    /// Display-safe percent, already normalised
    Percent(f64),

    /// The failure sentinel
    Failed,

    /// Negative (other than the sentinel) or non-numeric reading with no defined meaning
    Reserved(f64),
}

/// Pure helpers turning raw progress signals into display-safe values
pub struct ProgressScale;

impl ProgressScale {
    /// Normalise a raw reading into `[0, 100]`.
    ///
    /// `0` becomes [`MIN_VISIBLE_PROGRESS`] so an in-flight job never shows an empty bar.
    pub fn normalize(raw: f64) -> f64 {
        if raw.is_nan() || raw < 0.0 {
            0.0
        } else if raw == 0.0 {
            MIN_VISIBLE_PROGRESS
        } else {
            raw.min(MAX_PROGRESS)
        }
    }

    /// Classify a reading from the status endpoint before it reaches the state machine
    pub fn classify(raw: f64) -> RawProgress {
        if raw == FAILURE_SENTINEL {
            RawProgress::Failed
        } else if raw.is_nan() || raw < 0.0 {
            RawProgress::Reserved(raw)
        } else {
            RawProgress::Percent(Self::normalize(raw))
        }
    }

    /// Percent of a transfer, rounded up. An empty transfer counts as complete.
    pub fn transfer_percent(sent: u64, total: u64) -> f64 {
        if total == 0 {
            return MAX_PROGRESS;
        }

        let percent = (sent as f64 / total as f64 * 100.0).ceil();
        percent.clamp(0.0, MAX_PROGRESS)
    }
}
