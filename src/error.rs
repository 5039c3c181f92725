use thiserror::Error;

use crate::crosshair::SessionId;

pub type Result<T, E = ReconstructionError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ReconstructionError {
    /// A volume needs at least two slices; callers should fall back to 2D display.
    #[error("Insufficient data: {slices} slice(s) given, at least 2 are required")]
    InsufficientData { slices: usize },

    #[error("Geometry mismatch: {0}")]
    GeometryMismatch(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Voxel index ({x}, {y}, {z}) outside volume of dimensions {dimensions:?}")]
    OutOfRange {
        x: usize,
        y: usize,
        z: usize,
        dimensions: (usize, usize, usize),
    },

    #[error("Unknown session: {0}")]
    UnknownSession(SessionId),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("GPU error: {0}")]
    Gpu(String),
}

impl ReconstructionError {
    pub(crate) fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}
