//! Presentation collaborator
//!
//! The engine and controller never draw anything themselves; they call into a
//! [`WorkoutDisplay`] supplied by the host.

use tracing::{error, info};

/// Outbound UI calls
pub trait WorkoutDisplay: Send + Sync {
    /// Show a busy indicator with a message
    fn show_busy(&self, message: &str);

    /// Dismiss the busy indicator
    fn hide_busy(&self);

    /// Surface a failure to the user
    fn show_failure(&self, message: &str);

    /// Replace the heart rate text, e.g. `72BPM` or `--BPM`
    fn update_reading_display(&self, text: &str);
}

/// Display that renders to the log, for headless runs
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDisplay;

impl WorkoutDisplay for TracingDisplay {
    fn show_busy(&self, message: &str) {
        info!(message, "busy");
    }

    fn hide_busy(&self) {}

    fn show_failure(&self, message: &str) {
        error!(message, "workout failure");
    }

    fn update_reading_display(&self, text: &str) {
        info!(reading = text, "heart rate");
    }
}
