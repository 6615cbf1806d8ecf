//! Camera source abstraction and frame release accounting.

mod synthetic;

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gymmy_types::{
    frame::{FrameId, FrameLease, FrameRecycler, RawFrame},
    GymmyError, Result,
};
use tracing::warn;

pub use synthetic::{test_pattern, SyntheticCamera};

/// Serial producer of planar frames.
///
/// Frames are handed out as [`FrameLease`]s; the source learns about each release through
/// the lease's recycler, so a frame is returned exactly once whatever path consumes it.
#[async_trait]
pub trait CameraSource: Send {
    async fn start(&mut self) -> Result<()>;
    /// Waits for the next frame; `Ok(None)` once the stream has ended or was stopped.
    async fn next_frame(&mut self) -> Result<Option<FrameLease>>;
    async fn stop(&mut self) -> Result<()>;
    fn metrics(&self) -> CameraMetrics;
}

/// Aggregated delivery counters.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CameraMetrics {
    pub delivered: u64,
    pub released: u64,
    /// Releases for frames that were not outstanding. Always zero in a healthy pipeline.
    pub unexpected_releases: u64,
    pub outstanding: u64,
    pub last_delivery: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct LedgerState {
    metrics: CameraMetrics,
    outstanding: HashSet<FrameId>,
}

/// Tracks which delivered frames are still held downstream.
#[derive(Clone, Default)]
pub struct FrameLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl FrameLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `frame` as delivered and wrap it in a lease that reports back here.
    pub fn lease(&self, frame: RawFrame) -> FrameLease {
        if let Ok(mut state) = self.state.lock() {
            state.outstanding.insert(frame.id);
            state.metrics.delivered += 1;
            state.metrics.outstanding = state.outstanding.len() as u64;
            state.metrics.last_delivery = Some(frame.captured_at);
        }
        FrameLease::new(frame, Arc::new(self.clone()))
    }

    pub fn metrics(&self) -> CameraMetrics {
        self.state
            .lock()
            .map(|state| state.metrics.clone())
            .unwrap_or_default()
    }

    pub fn is_outstanding(&self, id: FrameId) -> bool {
        self.state
            .lock()
            .map(|state| state.outstanding.contains(&id))
            .unwrap_or(false)
    }
}

impl FrameRecycler for FrameLedger {
    fn release(&self, id: FrameId) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if state.outstanding.remove(&id) {
            state.metrics.released += 1;
        } else {
            state.metrics.unexpected_releases += 1;
            warn!(frame = %id, "release for a frame that is not outstanding");
        }
        state.metrics.outstanding = state.outstanding.len() as u64;
    }
}

pub fn camera_error(message: impl Into<String>) -> GymmyError {
    GymmyError::Camera(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gymmy_types::frame::Rotation;

    fn frame(id: u64) -> RawFrame {
        RawFrame {
            id: FrameId(id),
            rotation: Rotation::Deg0,
            captured_at: Utc::now(),
            image: None,
        }
    }

    #[test]
    fn ledger_counts_each_release_once() {
        let ledger = FrameLedger::new();
        let first = ledger.lease(frame(1));
        let second = ledger.lease(frame(2));
        assert_eq!(ledger.metrics().outstanding, 2);

        first.release();
        drop(second);

        let metrics = ledger.metrics();
        assert_eq!(metrics.delivered, 2);
        assert_eq!(metrics.released, 2);
        assert_eq!(metrics.outstanding, 0);
        assert_eq!(metrics.unexpected_releases, 0);
    }

    #[test]
    fn ledger_flags_unknown_releases() {
        let ledger = FrameLedger::new();
        ledger.release(FrameId(99));
        assert_eq!(ledger.metrics().unexpected_releases, 1);
        assert!(!ledger.is_outstanding(FrameId(99)));
    }
}
