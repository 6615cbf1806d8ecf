use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counters folded at session teardown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameCounters {
    pub received: u64,
    pub admitted: u64,
    pub dropped_busy: u64,
    pub no_payload: u64,
    pub conversion_failed: u64,
    pub rendered: u64,
    pub detection_failed: u64,
    pub rejected: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub counters: FrameCounters,
    pub frames_released: u64,
    pub mean_inference_ms: Option<f64>,
}
