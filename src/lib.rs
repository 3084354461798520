//! Workout Relay - Live heart rate relay for workout sessions
//!
//! A workout session is announced to a remote server, heart rate readings are
//! sampled on a fixed cadence while it runs and pushed to the server, and the
//! session end is announced when the user stops: start event → periodic
//! sample-then-send cycles → end event.
//!
//! ## Modules
//!
//! - **Engine**: Session lifecycle, sampling timer and single-flight cycles
//! - **Transport**: JSON-over-HTTP delivery with cancellation of the outstanding request
//! - **Sources**: Heart rate data sources, access authorization and sample files
//! - **Controller**: Glue between workout screen events and the engine

pub mod config;
pub mod controller;
pub mod display;
pub mod engine;
pub mod error;
pub mod sampler;
pub mod sources;
pub mod transport;
pub mod types;

#[cfg(test)]
mod testing;

pub use config::RelayConfig;
pub use controller::{ControllerOutcome, WorkoutController};
pub use display::{TracingDisplay, WorkoutDisplay};
pub use engine::{EngineSnapshot, WorkoutEngine};
pub use error::{SamplerError, WorkoutError};
pub use sources::{AccessAuthorizer, AlwaysGranted, HeartRateSource, MemorySource};
pub use transport::{HttpTransport, Transport};

/// Relay version reported in the user agent
pub const RELAY_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported in the user agent
pub const PRODUCER_NAME: &str = "workout-relay";
