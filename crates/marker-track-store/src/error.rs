use thiserror::Error;

use crate::MarkerStatus;

#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("camera index {camera} out of range (marker has {cameras} cameras)")]
    CameraOutOfRange { camera: usize, cameras: usize },
    #[error("frame index {frame} out of range (marker has {frames} frames)")]
    FrameOutOfRange { frame: usize, frames: usize },
    #[error("expected {expected} camera models, got {got}")]
    CameraCountMismatch { expected: usize, got: usize },
    #[error("cannot reset cells to {0:?}; only Undefined or Untrackable are allowed")]
    InvalidResetStatus(MarkerStatus),
    #[error("unknown status code {0}")]
    UnknownStatus(i32),
    #[error("epipolar line needs two distinct cameras, got {0} twice")]
    SameCamera(usize),
}
