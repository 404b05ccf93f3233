use marker_track_core::ImageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("unknown detection method code {0} (expected 0..=6)")]
    UnknownMethod(i32),
    #[error("feature size must be positive and finite, got {0}")]
    InvalidSize(f64),
    #[error(transparent)]
    Image(#[from] ImageError),
}
