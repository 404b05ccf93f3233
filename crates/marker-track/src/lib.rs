//! Multi-camera marker localisation and 3D reconstruction.
//!
//! This crate ties the workspace together:
//! - re-exports of the core, detector and store crates
//! - a [`Tracker`] that runs one detector task per (marker, camera) on a rayon
//!   pool and triangulates each marker once its cameras are done
//! - (feature `image`) adapters from `image::GrayImage`
//! - synthetic image rendering used by the demo and the tests
//!
//! ## Quickstart
//!
//! ```no_run
//! use marker_track::{share_markers, Marker, MarkerStatus, PinholeCamera, Tracker, TrackingParams};
//! use marker_track::core::GrayImage;
//! use nalgebra::Point2;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cameras: Vec<PinholeCamera> = Vec::new(); // calibrated rig
//! let images: Vec<Vec<GrayImage>> = Vec::new(); // [camera][frame]
//! let mut marker = Marker::new(cameras.len(), 100);
//! marker.set_point(0, 0, Point2::new(320.0, 240.0), MarkerStatus::Set)?;
//!
//! let markers = share_markers(vec![marker]);
//! let tracker = Tracker::new(cameras, TrackingParams::default());
//! for report in tracker.track_range(&markers, &images, 1..100)? {
//!     println!("frame {}: {} detections", report.frame, report.detected);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `marker_track::core`: images, sub-image extraction, camera models, logging.
//! - `marker_track::detect`: detection methods, strategies and the subpixel refiner.
//! - `marker_track::store`: marker store, statuses, triangulation, interpolation.
//! - `marker_track::image_io` (feature `image`): conversions from `image::GrayImage`.

pub use marker_track_core as core;
pub use marker_track_detect as detect;
pub use marker_track_store as store;

pub use marker_track_core::{CameraModel, GrayImage, GrayImageView, ImageSource, PinholeCamera};
pub use marker_track_detect::{Detection, DetectionMethod, DetectionRequest, DetectorParams, MarkerDetector};
pub use marker_track_store::{
    DetectionMode, InterpolationMethod, Marker, MarkerConfig, MarkerStatus, StoreError, WritePolicy,
};

mod barrier;
mod error;
pub mod synthetic;
pub mod tracking;

#[cfg(feature = "image")]
pub mod image_io;

pub use barrier::StepBarrier;
pub use error::TrackError;
pub use tracking::{share_markers, FrameSource, StepReport, StopHandle, Tracker, TrackingParams};
