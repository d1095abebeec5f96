//! Event types for provisioning progress and session lifecycle

use chrono::{DateTime, Utc};
use provision_core::OutputStream;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Workflow stage of one provisioning run.
///
/// Stages only move forward in declaration order; `Error` may be entered
/// from any non-terminal stage. `Complete` and `Error` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Preparing,
    Creating,
    Configuring,
    Installing,
    Finalizing,
    Complete,
    Error,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preparing => "preparing",
            Self::Creating => "creating",
            Self::Configuring => "configuring",
            Self::Installing => "installing",
            Self::Finalizing => "finalizing",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "preparing" => Some(Self::Preparing),
            "creating" => Some(Self::Creating),
            "configuring" => Some(Self::Configuring),
            "installing" => Some(Self::Installing),
            "finalizing" => Some(Self::Finalizing),
            "complete" => Some(Self::Complete),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }

    fn ordinal(&self) -> u8 {
        match self {
            Self::Preparing => 0,
            Self::Creating => 1,
            Self::Configuring => 2,
            Self::Installing => 3,
            Self::Finalizing => 4,
            Self::Complete => 5,
            Self::Error => 6,
        }
    }

    /// Whether a stream currently at `self` may move to `next`.
    pub fn can_advance_to(&self, next: Stage) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == Stage::Error || next.ordinal() > self.ordinal()
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    /// Stage transition
    Stage,
    /// Streamed remote output, stage unchanged
    Output,
    /// Recoverable failure in an optional step
    Warning,
}

impl ProgressKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressKind::Stage => "stage",
            ProgressKind::Output => "output",
            ProgressKind::Warning => "warning",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OutputChunk {
    pub stream: OutputStream,
    pub text: String,
}

/// One entry in a tracking stream.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProgressEvent {
    pub tracking_id: Uuid,
    /// Position in the stream, starting at 0. Used as the poll cursor.
    pub seq: u64,
    pub stage: Stage,
    pub kind: ProgressKind,
    pub message: String,
    pub instance_id: Option<String>,
    pub output: Option<OutputChunk>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    /// Whether this event closes its stream.
    pub fn is_terminal(&self) -> bool {
        self.kind == ProgressKind::Stage && self.stage.is_terminal()
    }

    pub fn approx_bytes(&self) -> usize {
        const OVERHEAD: usize = 96;
        OVERHEAD
            + self.message.len()
            + self.output.as_ref().map(|o| o.text.len()).unwrap_or(0)
    }
}

/// Envelope wrapping all events with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event ID
    pub id: Uuid,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// The actual event
    pub event: Event,
}

impl EventEnvelope {
    /// Create a new event envelope with auto-generated ID and timestamp
    pub fn new(event: Event) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event,
        }
    }
}

/// All events published on the process-wide bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A progress stream received a new entry
    #[serde(rename = "provisioning.progress")]
    Progress { event: ProgressEvent },

    /// A script execution was registered
    #[serde(rename = "session.started")]
    SessionStarted {
        session_id: Uuid,
        instance_id: String,
        user_id: String,
    },

    /// A script execution reached a terminal outcome
    #[serde(rename = "session.ended")]
    SessionEnded {
        session_id: Uuid,
        instance_id: String,
        outcome: String,
    },

    /// Generic error event
    #[serde(rename = "error")]
    Error {
        message: String,
        context: Option<String>,
    },
}

impl Event {
    /// Get the tracking ID associated with this event, if any
    pub fn tracking_id(&self) -> Option<Uuid> {
        match self {
            Event::Progress { event } => Some(event.tracking_id),
            Event::SessionStarted { .. } | Event::SessionEnded { .. } | Event::Error { .. } => None,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Event::Progress { .. } => "provisioning.progress",
            Event::SessionStarted { .. } => "session.started",
            Event::SessionEnded { .. } => "session.ended",
            Event::Error { .. } => "error",
        }
    }
}
