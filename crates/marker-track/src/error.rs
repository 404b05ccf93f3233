use marker_track_core::ImageError;
use marker_track_detect::DetectError;
use marker_track_store::StoreError;

/// Errors produced by the tracking coordinator and the image helpers.
#[derive(thiserror::Error, Debug)]
pub enum TrackError {
    #[error("invalid grayscale image buffer length (expected {expected} bytes, got {got})")]
    InvalidGrayBuffer { expected: usize, got: usize },

    #[error("invalid grayscale image dimensions (width={width}, height={height})")]
    InvalidGrayDimensions { width: u32, height: u32 },

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Detect(#[from] DetectError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
