//! Session orchestration: camera frames in, skeleton overlays out.

mod scheduler;
mod session;

use async_trait::async_trait;
use gymmy_types::{GymmyError, Result};

pub use scheduler::{FrameScheduler, PipelineMetrics};
pub use session::PoseSession;

#[async_trait]
pub trait SessionRunner {
    /// Feed frames to the scheduler until the camera stream ends.
    async fn run(&mut self) -> Result<()>;
}

pub fn pipeline_error(message: impl Into<String>) -> GymmyError {
    GymmyError::Pipeline(message.into())
}
