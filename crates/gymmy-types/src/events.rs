use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::frame::FrameId;

/// What the scheduler did with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameOutcome {
    /// Converted and submitted to the detector.
    Admitted,
    /// Released untouched because an inference was already in flight.
    DroppedBusy,
    /// The camera delivered no image payload.
    NoPayload,
    /// The planar buffer violated its contract or failed to decode.
    ConversionFailed,
    /// Detection succeeded and an overlay reached the display.
    Rendered,
    /// Detection failed; the previous overlay stays on screen.
    DetectionFailed,
    /// Arrived while the session was shutting down.
    Rejected,
}

/// Immutable record of one scheduling decision or completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub id: Uuid,
    pub frame: FrameId,
    pub outcome: FrameOutcome,
    pub timestamp: DateTime<Utc>,
    /// Admission-to-completion time, set on completion outcomes.
    pub latency_ms: Option<u64>,
}

impl PipelineEvent {
    pub fn new(frame: FrameId, outcome: FrameOutcome) -> Self {
        Self {
            id: Uuid::new_v4(),
            frame,
            outcome,
            timestamp: Utc::now(),
            latency_ms: None,
        }
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }
}
