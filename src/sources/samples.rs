//! Heart rate sample files
//!
//! Sample recordings are stored either as NDJSON (one sample per line) or as a
//! JSON array. Each sample is `{"start": ..., "end": ..., "bpm": ...}` with
//! RFC 3339 timestamps.

use crate::types::HeartRateSample;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Highest plausible heart rate accepted from a recording
pub const MAX_PLAUSIBLE_BPM: f64 = 300.0;

/// Errors while reading a sample file
#[derive(Debug, Error)]
pub enum SampleFileError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to parse line {line}: {source}")]
    Line {
        line: usize,
        source: serde_json::Error,
    },
}

/// Reasons a parsed sample is rejected
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SampleValidationError {
    #[error("sample ends ({end}) before it starts ({start})")]
    EndsBeforeStart {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("heart rate {bpm} is outside the plausible range (0, 300)")]
    RateOutOfRange { bpm: f64 },
}

/// A rejected sample and its position in the file
#[derive(Debug)]
pub struct SampleIssue {
    pub index: usize,
    pub error: SampleValidationError,
}

/// Loader for heart rate sample files
pub struct SampleFile;

impl SampleFile {
    /// Parse a JSON array of samples
    pub fn parse_array(json: &str) -> Result<Vec<HeartRateSample>, SampleFileError> {
        let samples: Vec<HeartRateSample> = serde_json::from_str(json)?;
        Ok(samples)
    }

    /// Parse NDJSON, one sample per non-empty line
    pub fn parse_ndjson(ndjson: &str) -> Result<Vec<HeartRateSample>, SampleFileError> {
        let mut samples = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let sample = serde_json::from_str::<HeartRateSample>(trimmed).map_err(|source| {
                SampleFileError::Line {
                    line: line_num + 1,
                    source,
                }
            })?;
            samples.push(sample);
        }
        Ok(samples)
    }

    pub fn validate(sample: &HeartRateSample) -> Result<(), SampleValidationError> {
        if sample.end < sample.start {
            return Err(SampleValidationError::EndsBeforeStart {
                start: sample.start,
                end: sample.end,
            });
        }
        if !(sample.bpm > 0.0 && sample.bpm < MAX_PLAUSIBLE_BPM) {
            return Err(SampleValidationError::RateOutOfRange { bpm: sample.bpm });
        }
        Ok(())
    }

    /// Validate a batch of samples, returning only the rejected ones
    pub fn validate_samples(samples: &[HeartRateSample]) -> Vec<SampleIssue> {
        samples
            .iter()
            .enumerate()
            .filter_map(|(index, sample)| {
                Self::validate(sample)
                    .err()
                    .map(|error| SampleIssue { index, error })
            })
            .collect()
    }

    /// Shift a recording so its earliest sample starts at `origin`.
    ///
    /// Returns each shifted sample paired with its delay from `origin` until
    /// the sample is complete, ordered by that delay.
    pub fn rebase(
        samples: &[HeartRateSample],
        origin: DateTime<Utc>,
    ) -> Vec<(Duration, HeartRateSample)> {
        let Some(first) = samples.iter().map(|s| s.start).min() else {
            return Vec::new();
        };
        let shift = origin - first;

        let mut rebased: Vec<(Duration, HeartRateSample)> = samples
            .iter()
            .map(|sample| {
                let shifted = HeartRateSample {
                    start: sample.start + shift,
                    end: sample.end + shift,
                    bpm: sample.bpm,
                };
                let delay = (shifted.end - origin).to_std().unwrap_or_default();
                (delay, shifted)
            })
            .collect();
        rebased.sort_by_key(|(delay, _)| *delay);
        rebased
    }
}
