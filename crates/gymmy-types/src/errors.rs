use thiserror::Error;

pub type Result<T, E = GymmyError> = std::result::Result<T, E>;

/// Unified error type covering common failure scenarios across subsystems.
#[derive(Debug, Error)]
pub enum GymmyError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("camera error: {0}")]
    Camera(String),
    #[error("conversion error: {0}")]
    Conversion(String),
    #[error("detection error: {0}")]
    Detection(String),
    #[error("pipeline error: {0}")]
    Pipeline(String),
    #[error("operational error: {0}")]
    Ops(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
