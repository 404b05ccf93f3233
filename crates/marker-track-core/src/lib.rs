//! Core types shared by the marker tracking crates.
//!
//! This crate is small and free of any detection logic: grayscale image
//! views and patch extraction, the camera model contract used by
//! triangulation, and logger initialisation.

mod camera;
mod error;
mod image;
mod logger;

pub use camera::{BrownConrady5, CameraModel, Intrinsics, PinholeCamera};
pub use error::ImageError;
pub use image::{sample_bilinear, GrayImage, GrayImageView, ImageSource, SubImage};

#[cfg(feature = "tracing")]
pub use logger::{init_tracing, TraceOutput};

pub use logger::{init, init_with_level, LogOptions};

/// Re-exported so downstream crates name the same nalgebra types.
pub use nalgebra::{Point2, Point3};
