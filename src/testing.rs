//! Test doubles shared by the engine and controller tests

use crate::display::WorkoutDisplay;
use crate::error::WorkoutError;
use crate::sources::AccessAuthorizer;
use crate::transport::Transport;
use crate::types::{Label, OutboundMessage};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::oneshot;

/// Transport that records every call and answers from a script.
///
/// With `hold_updates` set, update sends stay outstanding until `cancel_last`
/// is called, and then fail the way a cancelled request does.
#[derive(Default)]
pub struct FakeTransport {
    calls: Mutex<Vec<String>>,
    sent: Mutex<Vec<OutboundMessage>>,
    responses: Mutex<VecDeque<Result<u16, WorkoutError>>>,
    hold_updates: AtomicBool,
    pending: Mutex<Option<oneshot::Sender<()>>>,
}

impl FakeTransport {
    /// Queue the outcome of the next send (default outcome is `Ok(200)`)
    pub fn respond_with(&self, outcome: Result<u16, WorkoutError>) {
        self.responses.lock().unwrap().push_back(outcome);
    }

    pub fn hold_updates(&self, hold: bool) {
        self.hold_updates.store(hold, Ordering::SeqCst);
    }

    pub fn has_pending(&self) -> bool {
        self.pending.lock().unwrap().is_some()
    }

    /// Ordered log such as `["send:start", "send:update", "cancel", "send:end"]`
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_labels(&self) -> Vec<Label> {
        self.sent().iter().map(OutboundMessage::label).collect()
    }

    /// Yield until an update send is outstanding
    pub async fn wait_for_pending(&self) {
        for _ in 0..1_000 {
            if self.has_pending() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("no update send became outstanding");
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send_now(&self, message: &OutboundMessage) -> Result<u16, WorkoutError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("send:{}", message.label()));
        self.sent.lock().unwrap().push(message.clone());

        if message.label() == Label::Update && self.hold_updates.load(Ordering::SeqCst) {
            let (tx, rx) = oneshot::channel();
            *self.pending.lock().unwrap() = Some(tx);
            let _ = rx.await;
            return Err(WorkoutError::Transport("request cancelled".to_string()));
        }

        self.responses.lock().unwrap().pop_front().unwrap_or(Ok(200))
    }

    fn cancel_last(&self) {
        self.calls.lock().unwrap().push("cancel".to_string());
        if let Some(tx) = self.pending.lock().unwrap().take() {
            let _ = tx.send(());
        }
    }
}

/// Display that records every call
#[derive(Default)]
pub struct RecordingDisplay {
    calls: Mutex<Vec<String>>,
}

impl RecordingDisplay {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn last_reading(&self) -> Option<String> {
        self.calls()
            .iter()
            .rev()
            .find_map(|call| call.strip_prefix("reading:").map(str::to_string))
    }
}

impl WorkoutDisplay for RecordingDisplay {
    fn show_busy(&self, message: &str) {
        self.calls.lock().unwrap().push(format!("busy:{message}"));
    }

    fn hide_busy(&self) {
        self.calls.lock().unwrap().push("hide".to_string());
    }

    fn show_failure(&self, message: &str) {
        self.calls.lock().unwrap().push(format!("failure:{message}"));
    }

    fn update_reading_display(&self, text: &str) {
        self.calls.lock().unwrap().push(format!("reading:{text}"));
    }
}

/// Authorizer that always refuses
pub struct Denied;

#[async_trait]
impl AccessAuthorizer for Denied {
    async fn request_access(&self) -> bool {
        false
    }
}
