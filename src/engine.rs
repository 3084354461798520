//! Workout session engine
//!
//! The engine owns the session, the last heart rate reading, the read cursor
//! and the in-flight guard. It drives a periodic timer; each tick samples the
//! heart rate source and sends the reading to the server. At most one
//! sample-then-send cycle runs at a time, and a tick that finds one running is
//! dropped, not queued.
//!
//! All state lives behind one mutex that is never held across an await, so
//! every mutation is serialized. A generation counter, bumped by start, stop
//! and reset, lets a cycle that completes after the session ended recognize
//! itself as stale and leave the state alone. The running cycle's task is
//! tracked in the state as well; stop and reset abort it, and stop waits for
//! it to wind down before the end event goes out, so no update can follow it.

use crate::config::RelayConfig;
use crate::display::WorkoutDisplay;
use crate::error::WorkoutError;
use crate::sampler::Sampler;
use crate::sources::{AccessAuthorizer, HeartRateSource};
use crate::transport::Transport;
use crate::types::{
    OutboundMessage, Reading, ReadingUpdate, Session, SessionState, UNKNOWN_READING_TEXT,
};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Read-only copy of the engine state
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSnapshot {
    pub session: Session,
    pub reading: Option<Reading>,
    /// Lower bound of the next sampler query
    pub cursor: DateTime<Utc>,
    /// Whether a sample-then-send cycle is running
    pub in_flight: bool,
    pub timer_armed: bool,
}

/// Handle on a running sample-then-send cycle
struct CycleHandle {
    abort: AbortHandle,
    /// Resolves once the cycle's task has finished or been dropped
    done: oneshot::Receiver<()>,
}

impl CycleHandle {
    /// Abort the cycle and wait until its task is gone
    async fn cancel(self) {
        self.abort.abort();
        let _ = self.done.await;
    }
}

struct EngineState {
    session: Session,
    reading: Option<Reading>,
    cursor: DateTime<Utc>,
    in_flight: bool,
    timer: Option<AbortHandle>,
    cycle: Option<CycleHandle>,
    activity_active: bool,
    access_granted: bool,
    generation: u64,
}

impl EngineState {
    fn disarm_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }
}

struct EngineInner {
    transport: Arc<dyn Transport>,
    sampler: Sampler,
    authorizer: Arc<dyn AccessAuthorizer>,
    display: Arc<dyn WorkoutDisplay>,
    tick_interval: Duration,
    state: Mutex<EngineState>,
}

impl EngineInner {
    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn end_activity(&self, state: &mut EngineState, ended_at: DateTime<Utc>) {
        if state.activity_active {
            self.sampler.source().end_activity(ended_at);
            state.activity_active = false;
        }
    }
}

/// Session engine for one workout screen.
///
/// Cloning is cheap and yields a handle to the same engine.
#[derive(Clone)]
pub struct WorkoutEngine {
    inner: Arc<EngineInner>,
}

impl WorkoutEngine {
    pub fn new(
        config: &RelayConfig,
        transport: Arc<dyn Transport>,
        source: Arc<dyn HeartRateSource>,
        authorizer: Arc<dyn AccessAuthorizer>,
        display: Arc<dyn WorkoutDisplay>,
    ) -> Result<Self, WorkoutError> {
        config.validate()?;
        let now = Utc::now();

        Ok(Self {
            inner: Arc::new(EngineInner {
                transport,
                sampler: Sampler::new(source),
                authorizer,
                display,
                tick_interval: config.tick_interval(),
                state: Mutex::new(EngineState {
                    session: Session::stopped_at(now),
                    reading: None,
                    cursor: now,
                    in_flight: false,
                    timer: None,
                    cycle: None,
                    activity_active: false,
                    access_granted: false,
                    generation: 0,
                }),
            }),
        })
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let state = self.inner.state();
        EngineSnapshot {
            session: state.session.clone(),
            reading: state.reading,
            cursor: state.cursor,
            in_flight: state.in_flight,
            timer_armed: state.timer.is_some(),
        }
    }

    /// Start a new session.
    ///
    /// The session flips to running locally, then the start event is sent.
    /// Only after the server acknowledges it does the recording activity begin
    /// and the sampling timer get armed. Any failure reverts to stopped.
    pub async fn start(&self) -> Result<(), WorkoutError> {
        if self.inner.state().session.is_running() {
            return Err(WorkoutError::AlreadyRunning);
        }

        if !self.ensure_access().await {
            error!("Access to heart rate data denied");
            return Err(WorkoutError::SessionStart(
                "access to heart rate data denied".to_string(),
            ));
        }

        let (event, generation, session_id) = {
            let mut state = self.inner.state();
            if state.session.is_running() {
                return Err(WorkoutError::AlreadyRunning);
            }
            let now = Utc::now();
            state.generation += 1;
            state.session = Session {
                id: Uuid::new_v4(),
                start_time: now,
                end_time: now,
                state: SessionState::Running,
            };
            state.cursor = now;
            state.reading = None;
            state.in_flight = false;
            (state.session.event(), state.generation, state.session.id)
        };

        info!(session_id = %session_id, "Starting workout session");

        if let Err(e) = self
            .inner
            .transport
            .send_now(&OutboundMessage::from(event))
            .await
        {
            error!(
                session_id = %session_id,
                error = %e,
                status = e.status_code(),
                "Server did not acknowledge session start"
            );
            self.revert_start(generation);
            return Err(WorkoutError::SessionStart(e.to_string()));
        }

        let mut state = self.inner.state();
        if !state.is_current(generation) {
            return Err(WorkoutError::SessionStart(
                "session stopped before the server acknowledged it".to_string(),
            ));
        }

        let started_at = state.session.start_time;
        if let Err(e) = self.inner.sampler.source().begin_activity(started_at) {
            error!(session_id = %session_id, error = %e, "Failed to begin workout activity");
            state.session.state = SessionState::Stopped;
            state.session.end_time = Utc::now();
            return Err(WorkoutError::SessionStart(format!(
                "can't create workout session: {e}"
            )));
        }
        state.activity_active = true;
        state.timer = Some(self.arm_timer());

        info!(session_id = %session_id, "Workout session running");
        Ok(())
    }

    /// Stop the session.
    ///
    /// Disarms the timer before anything else, then aborts a running cycle
    /// and waits for it to wind down. Unless the stop is due to a failure, any
    /// outstanding request is cancelled and the end event sent; the result
    /// reflects that send. A failure stop never touches the network.
    pub async fn stop(&self, due_to_failure: bool) -> Result<(), WorkoutError> {
        let (event, session_id, cycle) = {
            let mut state = self.inner.state();
            state.disarm_timer();
            let now = Utc::now();
            self.inner.end_activity(&mut state, now);
            state.session.end_time = now;
            state.session.state = SessionState::Stopped;
            state.generation += 1;
            state.in_flight = false;
            (state.session.event(), state.session.id, state.cycle.take())
        };

        if let Some(cycle) = cycle {
            debug!(session_id = %session_id, "Aborting running sample cycle");
            cycle.cancel().await;
        }

        info!(session_id = %session_id, due_to_failure, "Workout session stopped");

        if due_to_failure {
            return Ok(());
        }

        self.inner.transport.cancel_last();
        self.inner
            .transport
            .send_now(&OutboundMessage::from(event))
            .await
            .map(|status| debug!(session_id = %session_id, status, "Session end acknowledged"))
            .map_err(|e| {
                warn!(
                    session_id = %session_id,
                    error = %e,
                    status = e.status_code(),
                    "Failed to send session end"
                );
                e
            })
    }

    /// Force everything back to a clean stopped state
    pub fn reset(&self) {
        let mut state = self.inner.state();
        state.disarm_timer();
        if let Some(cycle) = state.cycle.take() {
            cycle.abort.abort();
        }
        let now = Utc::now();
        self.inner.end_activity(&mut state, now);
        state.session.state = SessionState::Stopped;
        state.session.start_time = now;
        state.session.end_time = now;
        state.cursor = now;
        state.in_flight = false;
        state.generation += 1;
        debug!(session_id = %state.session.id, "Engine reset");
    }

    async fn ensure_access(&self) -> bool {
        if self.inner.state().access_granted {
            return true;
        }
        let granted = self.inner.authorizer.request_access().await;
        if granted {
            self.inner.state().access_granted = true;
        }
        granted
    }

    fn revert_start(&self, generation: u64) {
        let mut state = self.inner.state();
        if state.is_current(generation) {
            state.session.state = SessionState::Stopped;
            state.session.end_time = Utc::now();
        }
    }

    fn arm_timer(&self) -> AbortHandle {
        let engine = Arc::downgrade(&self.inner);
        let period = self.inner.tick_interval;

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let Some(inner) = engine.upgrade() else {
                    break;
                };
                WorkoutEngine { inner }.handle_tick();
            }
        });
        task.abort_handle()
    }

    /// Timer callback. Starts a sample-then-send cycle unless one is running.
    pub(crate) fn handle_tick(&self) -> Option<JoinHandle<()>> {
        let mut state = self.inner.state();
        if !state.session.is_running() {
            debug!("Tick without a running session, ignoring");
            return None;
        }
        if state.in_flight {
            debug!("Sample cycle in progress, skipping tick");
            return None;
        }
        state.in_flight = true;
        let (generation, since) = (state.generation, state.cursor);

        // The cycle is registered under the same lock that set the guard, so
        // a stop can always find it.
        let (done_tx, done_rx) = oneshot::channel();
        let engine = self.clone();
        let task = tokio::spawn(async move {
            let _done = done_tx;
            engine.run_cycle(generation, since).await;
        });
        state.cycle = Some(CycleHandle {
            abort: task.abort_handle(),
            done: done_rx,
        });
        Some(task)
    }

    async fn run_cycle(&self, generation: u64, since: DateTime<Utc>) {
        match self.sample_and_send(generation, since).await {
            Ok(Some((bpm, status))) => debug!(bpm, status, "Heart rate update sent"),
            Ok(None) => debug!("Sample cycle outlived its session, dropped"),
            Err(e @ WorkoutError::Sampler(_)) => {
                warn!(error = %e, "Heart rate sampling failed")
            }
            Err(e) => {
                warn!(error = %e, status = e.status_code(), "Failed to send heart rate update")
            }
        }
    }

    /// One cycle: sample, record, display, send.
    ///
    /// Returns `Ok(None)` when the session changed underneath the cycle. The
    /// generation is checked again right before sending, so a stop that lands
    /// while the display is updating still keeps the update off the wire.
    async fn sample_and_send(
        &self,
        generation: u64,
        since: DateTime<Utc>,
    ) -> Result<Option<(i32, u16)>, WorkoutError> {
        let sampled = self.inner.sampler.query(since).await;

        let reading = {
            let mut state = self.inner.state();
            if !state.is_current(generation) {
                return Ok(None);
            }
            match sampled {
                Ok(sampled) => {
                    state.reading = Some(sampled.reading);
                    state.cursor = sampled.cursor;
                    sampled.reading
                }
                Err(e) => {
                    state.in_flight = false;
                    drop(state);
                    self.inner
                        .display
                        .update_reading_display(UNKNOWN_READING_TEXT);
                    return Err(e.into());
                }
            }
        };

        debug!(bpm = reading.bpm, "Current heart rate");
        self.inner
            .display
            .update_reading_display(&reading.display_text());

        if !self.inner.state().is_current(generation) {
            return Ok(None);
        }

        let result = self
            .inner
            .transport
            .send_now(&OutboundMessage::from(ReadingUpdate::from(reading)))
            .await;

        {
            let mut state = self.inner.state();
            if state.is_current(generation) {
                state.in_flight = false;
            }
        }

        result.map(|status| Some((reading.bpm, status)))
    }
}
