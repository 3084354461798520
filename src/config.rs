//! Relay configuration
//!
//! Endpoint and timing settings shared by the transport and the session engine.
//! Durations are stored in milliseconds so the config can be loaded from JSON.

use crate::error::WorkoutError;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default server base URL
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

/// Path of the workout endpoint on the server
pub const DEFAULT_ENDPOINT_PATH: &str = "/api/v1/workout";

/// Default polling period of the sampling timer
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;

/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Scheme, host and port of the workout server
    pub base_url: String,
    /// Path appended to the base URL
    pub endpoint_path: String,
    /// Sampling timer period (ms)
    pub tick_interval_ms: u64,
    /// Timeout for each outbound request (ms)
    pub request_timeout_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            endpoint_path: DEFAULT_ENDPOINT_PATH.to_string(),
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

impl RelayConfig {
    /// Default configuration pointed at another server
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Load configuration from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, WorkoutError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| WorkoutError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Full endpoint URL (base URL joined with the endpoint path)
    pub fn endpoint(&self) -> Result<Url, WorkoutError> {
        let path = if self.endpoint_path.starts_with('/') {
            self.endpoint_path.clone()
        } else {
            format!("/{}", self.endpoint_path)
        };
        let raw = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        Url::parse(&raw).map_err(|e| WorkoutError::Config(format!("bad endpoint {raw}: {e}")))
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<(), WorkoutError> {
        if self.tick_interval_ms == 0 {
            return Err(WorkoutError::Config(
                "tick_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(WorkoutError::Config(
                "request_timeout_ms must be greater than zero".to_string(),
            ));
        }
        self.endpoint().map(|_| ())
    }
}
