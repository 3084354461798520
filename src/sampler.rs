//! Heart rate sampling
//!
//! The sampler asks the source for samples at or after a cursor and keeps only
//! the newest one. Earlier samples in the same window are discarded, not
//! averaged. The returned cursor is the chosen sample's end timestamp and is
//! the `since` value for the next query.

use crate::error::SamplerError;
use crate::sources::HeartRateSource;
use crate::types::{HeartRateSample, Reading};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Newest reading in a query window and where the next window starts
#[derive(Debug, Clone, PartialEq)]
pub struct SampledReading {
    pub reading: Reading,
    pub cursor: DateTime<Utc>,
}

/// Picks the latest heart rate reading from a [`HeartRateSource`]
#[derive(Clone)]
pub struct Sampler {
    source: Arc<dyn HeartRateSource>,
}

impl Sampler {
    pub fn new(source: Arc<dyn HeartRateSource>) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &Arc<dyn HeartRateSource> {
        &self.source
    }

    /// Latest reading whose sample starts at or after `since`.
    ///
    /// Returns [`SamplerError::NoData`] when the window is empty, so a zero
    /// reading is never confused with missing data.
    pub async fn query(&self, since: DateTime<Utc>) -> Result<SampledReading, SamplerError> {
        let samples = self.source.query_since(since).await?;

        let latest = latest_sample(samples.iter().filter(|s| s.start >= since))
            .ok_or(SamplerError::NoData)?;

        Ok(SampledReading {
            reading: Reading::from_sample(latest),
            cursor: latest.end,
        })
    }
}

/// Latest sample by end timestamp; on ties the one later in source order wins
fn latest_sample<'a>(
    samples: impl Iterator<Item = &'a HeartRateSample>,
) -> Option<&'a HeartRateSample> {
    samples.fold(None, |best: Option<&HeartRateSample>, sample| match best {
        Some(current) if current.end > sample.end => Some(current),
        _ => Some(sample),
    })
}
