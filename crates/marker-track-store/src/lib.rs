//! Per-marker observation store and multi-view reconstruction.
//!
//! [`Marker`] keeps every 2D observation of one feature (camera × frame) with
//! its [`MarkerStatus`], triangulates a 3D point per frame from the defined
//! views, tracks reprojection error, and fills or predicts missing frames.
//!
//! ```
//! use marker_track_core::{Intrinsics, PinholeCamera};
//! use marker_track_store::{Marker, MarkerStatus};
//! use nalgebra::{Point2, Rotation3, Vector3};
//!
//! let k = Intrinsics { fx: 800.0, fy: 800.0, cx: 320.0, cy: 240.0, skew: 0.0 };
//! let cams = vec![
//!     PinholeCamera::new(k, Rotation3::identity(), Vector3::new(0.0, 0.0, 3.0)),
//!     PinholeCamera::new(k, Rotation3::identity(), Vector3::new(-0.5, 0.0, 3.0)),
//! ];
//! let mut marker = Marker::new(2, 10);
//! marker.set_point(0, 0, Point2::new(320.0, 240.0), MarkerStatus::Set).unwrap();
//! marker.set_point(1, 0, Point2::new(186.7, 240.0), MarkerStatus::Set).unwrap();
//! let status = marker.reconstruct_3d_point(0, &cams).unwrap();
//! assert_eq!(status, MarkerStatus::Set);
//! ```

mod epipolar;
mod error;
mod grid;
pub mod interpolation;
mod marker;
mod prediction;
mod status;
pub mod triangulate;

pub use epipolar::{fundamental_from_projections, sample_line};
pub use error::StoreError;
pub use grid::Grid;
pub use interpolation::{fill_gaps, InterpolationMethod};
pub use marker::{ErrorStats, FrameState, Marker, MarkerConfig, Observation, DEFAULT_MARKER_SIZE};
pub use prediction::predict_position;
pub use status::{DetectionMode, MarkerStatus, WritePolicy};
