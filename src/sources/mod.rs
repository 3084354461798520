//! Biometric source collaborators
//!
//! The session engine reads heart rate through [`HeartRateSource`] and asks
//! for data access through [`AccessAuthorizer`]. Platform integrations
//! implement these traits; this module ships an in-memory source and sample
//! file loading for replays and tests.

mod memory;
pub mod samples;

pub use memory::MemorySource;
pub use samples::{SampleFile, SampleFileError, SampleIssue, SampleValidationError};

use crate::error::SamplerError;
use crate::types::HeartRateSample;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Source of heart rate samples
#[async_trait]
pub trait HeartRateSource: Send + Sync {
    /// Samples whose interval starts at or after `since`
    async fn query_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<HeartRateSample>, SamplerError>;

    /// Begin the platform's workout-recording activity
    fn begin_activity(&self, _started_at: DateTime<Utc>) -> Result<(), SamplerError> {
        Ok(())
    }

    /// End the workout-recording activity started by `begin_activity`
    fn end_activity(&self, _ended_at: DateTime<Utc>) {}
}

/// Platform authorization for reading biometric data
#[async_trait]
pub trait AccessAuthorizer: Send + Sync {
    /// Ask for access; `true` when granted
    async fn request_access(&self) -> bool;
}

/// Authorizer for environments without an access prompt
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysGranted;

#[async_trait]
impl AccessAuthorizer for AlwaysGranted {
    async fn request_access(&self) -> bool {
        true
    }
}
