//! Operational helpers: logging and in-memory telemetry.

use std::{collections::VecDeque, sync::Arc};

use gymmy_types::{
    config::OpsConfig,
    events::{FrameOutcome, PipelineEvent},
    telemetry::SessionSummary,
    GymmyError, Result,
};
use tokio::sync::Mutex;
use tracing_subscriber::{fmt, EnvFilter};

pub fn init_tracing(config: &OpsConfig) -> Result<()> {
    let filter = EnvFilter::try_new(config.log_level.clone())
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|err| GymmyError::Ops(format!("failed to create log filter: {err}")))?;

    fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| GymmyError::Ops(format!("tracing init error: {err}")))?;
    Ok(())
}

/// Events kept by [`TelemetryStore::new`] before the oldest are evicted.
pub const DEFAULT_EVENT_CAPACITY: usize = 10_000;

/// In-memory telemetry; nothing is written to disk.
///
/// Events live in a ring of fixed capacity so endless sessions stay bounded. Session
/// summaries carry the full counters regardless of eviction.
#[derive(Clone)]
pub struct TelemetryStore {
    events: Arc<Mutex<VecDeque<PipelineEvent>>>,
    event_capacity: usize,
    sessions: Arc<Mutex<Vec<SessionSummary>>>,
}

impl Default for TelemetryStore {
    fn default() -> Self {
        Self::with_event_capacity(DEFAULT_EVENT_CAPACITY)
    }
}

impl TelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(1_024)))),
            event_capacity: capacity,
            sessions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn record_event(&self, event: PipelineEvent) -> Result<()> {
        let mut events = self.events.lock().await;
        if events.len() >= self.event_capacity {
            events.pop_front();
        }
        events.push_back(event);
        Ok(())
    }

    pub async fn record_session(&self, summary: SessionSummary) -> Result<()> {
        self.sessions.lock().await.push(summary);
        Ok(())
    }

    /// The retained events, oldest first.
    pub async fn snapshot_events(&self) -> Vec<PipelineEvent> {
        self.events.lock().await.iter().cloned().collect()
    }

    pub async fn snapshot_sessions(&self) -> Vec<SessionSummary> {
        self.sessions.lock().await.clone()
    }

    pub async fn count(&self, outcome: FrameOutcome) -> usize {
        self.events
            .lock()
            .await
            .iter()
            .filter(|event| event.outcome == outcome)
            .count()
    }

    pub async fn sessions_json(&self) -> Result<String> {
        let sessions = self.sessions.lock().await;
        serde_json::to_string_pretty(&*sessions)
            .map_err(|err| GymmyError::Ops(format!("failed to encode telemetry: {err}")))
    }
}
