//! Core types for the workout session engine
//!
//! This module defines the data that flows between the sampler, the session
//! engine, and the transport: the session itself, heart rate samples and
//! readings, and the outbound messages with their wire labels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Placeholder shown while no heart rate reading is available
pub const UNKNOWN_READING_TEXT: &str = "--BPM";

/// Lifecycle state of a workout session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Stopped,
    Running,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Stopped => "stopped",
            SessionState::Running => "running",
        }
    }
}

/// One workout attempt, bounded by start and stop
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// Identity of this attempt (not part of the wire body)
    pub id: Uuid,
    /// When the session started
    pub start_time: DateTime<Utc>,
    /// When the session ended; only meaningful once stopped
    pub end_time: DateTime<Utc>,
    /// Current lifecycle state
    pub state: SessionState,
}

impl Session {
    /// Create a stopped session with both bounds at `now`
    pub fn stopped_at(now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            start_time: now,
            end_time: now,
            state: SessionState::Stopped,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }

    /// Snapshot of the session as a lifecycle event for the server
    pub fn event(&self) -> SessionEvent {
        SessionEvent {
            start_date: self.start_time,
            end_date: self.end_time,
            state: self.state,
        }
    }
}

/// A single heart rate sample reported by the biometric source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartRateSample {
    /// Start of the measurement interval
    pub start: DateTime<Utc>,
    /// End of the measurement interval
    pub end: DateTime<Utc>,
    /// Beats per minute
    pub bpm: f64,
}

/// Last known heart rate value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reading {
    pub bpm: i32,
}

impl Reading {
    /// Convert a sample's fractional rate, truncating toward zero
    pub fn from_sample(sample: &HeartRateSample) -> Self {
        Self {
            bpm: sample.bpm.trunc() as i32,
        }
    }

    /// Text rendered on the reading display, e.g. `72BPM`
    pub fn display_text(&self) -> String {
        format!("{}BPM", self.bpm)
    }
}

/// Session lifecycle event body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEvent {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub state: SessionState,
}

/// Periodic heart rate update body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingUpdate {
    pub heart_rate: i32,
}

impl From<Reading> for ReadingUpdate {
    fn from(reading: Reading) -> Self {
        Self {
            heart_rate: reading.bpm,
        }
    }
}

/// Query-parameter tag identifying a message's role to the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    Start,
    End,
    Update,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Start => "start",
            Label::End => "end",
            Label::Update => "update",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the transport knows how to send
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    SessionEvent(SessionEvent),
    ReadingUpdate(ReadingUpdate),
}

impl OutboundMessage {
    /// Label derived from the message tag.
    ///
    /// A running session event starts a workout; any other session event ends one.
    pub fn label(&self) -> Label {
        match self {
            OutboundMessage::SessionEvent(event) if event.state == SessionState::Running => {
                Label::Start
            }
            OutboundMessage::SessionEvent(_) => Label::End,
            OutboundMessage::ReadingUpdate(_) => Label::Update,
        }
    }

    /// Serialize the message body (untagged) to JSON bytes
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            OutboundMessage::SessionEvent(event) => serde_json::to_vec(event),
            OutboundMessage::ReadingUpdate(update) => serde_json::to_vec(update),
        }
    }
}

impl From<SessionEvent> for OutboundMessage {
    fn from(event: SessionEvent) -> Self {
        OutboundMessage::SessionEvent(event)
    }
}

impl From<ReadingUpdate> for OutboundMessage {
    fn from(update: ReadingUpdate) -> Self {
        OutboundMessage::ReadingUpdate(update)
    }
}
