//! In-memory heart rate source
//!
//! A push-fed source: samples appended with [`MemorySource::push`] become
//! visible to the next query. Used by the CLI replay and by tests.

use super::HeartRateSource;
use crate::error::SamplerError;
use crate::types::HeartRateSample;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct MemoryState {
    samples: Vec<HeartRateSample>,
    failure: Option<SamplerError>,
    queries: Vec<DateTime<Utc>>,
    activity_started_at: Option<DateTime<Utc>>,
    refuse_activity: bool,
}

/// Heart rate source holding samples in memory
#[derive(Debug, Default)]
pub struct MemorySource {
    state: Mutex<MemoryState>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_samples(samples: Vec<HeartRateSample>) -> Self {
        let source = Self::new();
        source.state().samples = samples;
        source
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a sample; it is visible to the next query
    pub fn push(&self, sample: HeartRateSample) {
        self.state().samples.push(sample);
    }

    pub fn len(&self) -> usize {
        self.state().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().samples.is_empty()
    }

    /// Make every query fail with `failure` until cleared with `None`
    pub fn set_failure(&self, failure: Option<SamplerError>) {
        self.state().failure = failure;
    }

    /// Make `begin_activity` fail, as when the platform refuses a workout session
    pub fn refuse_activity(&self, refuse: bool) {
        self.state().refuse_activity = refuse;
    }

    /// Every `since` value queried so far, oldest first
    pub fn queries(&self) -> Vec<DateTime<Utc>> {
        self.state().queries.clone()
    }

    /// Start time of the running activity, if any
    pub fn activity_started_at(&self) -> Option<DateTime<Utc>> {
        self.state().activity_started_at
    }
}

#[async_trait]
impl HeartRateSource for MemorySource {
    async fn query_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<HeartRateSample>, SamplerError> {
        let mut state = self.state();
        state.queries.push(since);

        if let Some(failure) = &state.failure {
            return Err(failure.clone());
        }

        Ok(state
            .samples
            .iter()
            .filter(|sample| sample.start >= since)
            .cloned()
            .collect())
    }

    fn begin_activity(&self, started_at: DateTime<Utc>) -> Result<(), SamplerError> {
        let mut state = self.state();
        if state.refuse_activity {
            return Err(SamplerError::Source(
                "workout activity refused".to_string(),
            ));
        }
        state.activity_started_at = Some(started_at);
        Ok(())
    }

    fn end_activity(&self, _ended_at: DateTime<Utc>) {
        self.state().activity_started_at = None;
    }
}
