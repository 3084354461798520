//! Workout screen controller
//!
//! Thin glue between UI lifecycle events and the session engine. It shows the
//! busy indicator around start and stop, surfaces failures, and tells the host
//! whether the workout screen should stay or exit.

use crate::display::WorkoutDisplay;
use crate::engine::WorkoutEngine;
use std::sync::Arc;
use tracing::warn;

pub const STARTING_MESSAGE: &str = "Starting workout...";
pub const FINISHING_MESSAGE: &str = "Finishing workout...";

/// What the host should do with the workout screen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerOutcome {
    Stay,
    Exit,
}

pub struct WorkoutController {
    engine: WorkoutEngine,
    display: Arc<dyn WorkoutDisplay>,
}

impl WorkoutController {
    pub fn new(engine: WorkoutEngine, display: Arc<dyn WorkoutDisplay>) -> Self {
        Self { engine, display }
    }

    pub fn engine(&self) -> &WorkoutEngine {
        &self.engine
    }

    /// The workout screen appeared: start a session
    pub async fn on_start_requested(&self) -> ControllerOutcome {
        self.display.show_busy(STARTING_MESSAGE);
        let result = self.engine.start().await;
        self.display.hide_busy();

        match result {
            Ok(()) => ControllerOutcome::Stay,
            Err(e) => {
                if let Err(stop_err) = self.engine.stop(true).await {
                    warn!(error = %stop_err, "Cleanup after failed start reported an error");
                }
                self.display.show_failure(&e.to_string());
                ControllerOutcome::Exit
            }
        }
    }

    /// The user ended the workout
    pub async fn on_stop_requested(&self) -> ControllerOutcome {
        self.display.show_busy(FINISHING_MESSAGE);
        let result = self.engine.stop(false).await;
        self.display.hide_busy();

        if let Err(e) = result {
            self.display.show_failure(&e.to_string());
        }
        self.engine.reset();
        ControllerOutcome::Exit
    }

    /// The workout screen is going away
    pub fn on_teardown(&self) {
        self.engine.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;
    use crate::error::WorkoutError;
    use crate::sources::{AlwaysGranted, MemorySource};
    use crate::testing::{FakeTransport, RecordingDisplay};
    use crate::types::SessionState;
    use pretty_assertions::assert_eq;

    fn controller() -> (WorkoutController, Arc<FakeTransport>, Arc<RecordingDisplay>) {
        let transport = Arc::new(FakeTransport::default());
        let display = Arc::new(RecordingDisplay::default());
        let config = RelayConfig {
            tick_interval_ms: 3_600_000,
            ..RelayConfig::default()
        };
        let engine = WorkoutEngine::new(
            &config,
            transport.clone(),
            Arc::new(MemorySource::new()),
            Arc::new(AlwaysGranted),
            display.clone(),
        )
        .unwrap();
        (
            WorkoutController::new(engine, display.clone()),
            transport,
            display,
        )
    }

    #[tokio::test]
    async fn test_start_success_stays_on_screen() {
        let (controller, _transport, display) = controller();

        assert_eq!(
            controller.on_start_requested().await,
            ControllerOutcome::Stay
        );
        assert_eq!(display.calls(), vec!["busy:Starting workout...", "hide"]);
        assert_eq!(
            controller.engine().snapshot().session.state,
            SessionState::Running
        );
    }

    #[tokio::test]
    async fn test_start_failure_shows_error_and_exits() {
        let (controller, transport, display) = controller();
        transport.respond_with(Err(WorkoutError::Server {
            status: 503,
            reason: "Service Unavailable".to_string(),
        }));

        assert_eq!(
            controller.on_start_requested().await,
            ControllerOutcome::Exit
        );
        assert_eq!(
            display.calls(),
            vec![
                "busy:Starting workout...",
                "hide",
                "failure:Can't start workout: Server responded 503: Service Unavailable",
            ]
        );
        // The failure stop never reaches the network.
        assert_eq!(transport.calls(), vec!["send:start"]);
    }

    #[tokio::test]
    async fn test_stop_sends_end_and_resets() {
        let (controller, transport, display) = controller();
        controller.on_start_requested().await;

        assert_eq!(
            controller.on_stop_requested().await,
            ControllerOutcome::Exit
        );
        assert_eq!(
            transport.calls(),
            vec!["send:start", "cancel", "send:end"]
        );
        assert!(display
            .calls()
            .ends_with(&["busy:Finishing workout...".to_string(), "hide".to_string()]));

        let snapshot = controller.engine().snapshot();
        assert_eq!(snapshot.session.state, SessionState::Stopped);
        assert!(!snapshot.timer_armed);
    }

    #[tokio::test]
    async fn test_stop_failure_is_shown() {
        let (controller, transport, display) = controller();
        controller.on_start_requested().await;
        transport.respond_with(Err(WorkoutError::Transport(
            "connection reset".to_string(),
        )));

        controller.on_stop_requested().await;
        assert_eq!(
            display.calls().last().map(String::as_str),
            Some("failure:Transport failure: connection reset")
        );
    }

    #[tokio::test]
    async fn test_teardown_resets_engine() {
        let (controller, _transport, _display) = controller();
        controller.on_start_requested().await;
        controller.on_teardown();
        assert!(!controller.engine().snapshot().timer_armed);
    }
}
