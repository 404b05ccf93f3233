//! 2D marker localisation for one camera image.
//!
//! A [`MarkerDetector`] cuts a search window around a predicted centre, runs
//! one of three localisation strategies and optionally polishes the result
//! with the quadric subpixel refiner.
//!
//! ```no_run
//! use marker_track_core::GrayImage;
//! use marker_track_detect::{DetectionMethod, DetectionRequest, MarkerDetector};
//! use nalgebra::Point2;
//!
//! let frame = GrayImage::try_filled(640, 480, 200).unwrap();
//! let detector = MarkerDetector::default();
//! let request = DetectionRequest {
//!     center: Point2::new(320.0, 240.0),
//!     search_radius: 15,
//!     size: 5.0,
//!     threshold_offset: 8.0,
//!     method: DetectionMethod::DarkContourRefined,
//! };
//! if let Some(det) = detector.detect(&frame, &request) {
//!     println!("marker at {:?}, radius {:.2}", det.center, det.radius);
//! }
//! ```

mod blob;
mod contour_blob;
pub mod contours;
mod corner;
mod detector;
mod error;
pub mod filters;
mod method;
mod params;
mod refine;
mod strategy;

pub use blob::{detect_blobs, BlobKeypoint, BlobLocator};
pub use contour_blob::ContourLocator;
pub use corner::{corner_subpix, CornerLocator};
pub use detector::{Detection, DetectionRequest, MarkerDetector};
pub use error::DetectError;
pub use method::{DetectionMethod, Strategy};
pub use params::{BlobDetectorParams, ContourParams, CornerParams, DetectorParams, RefineParams};
pub use refine::{refine_center, RefineDiagnostics, RefineOutcome, Refinement};
pub use strategy::{Locate, LocateContext, Located};

#[cfg(test)]
pub(crate) mod test_support {
    use marker_track_core::{GrayImage, ImageSource, SubImage};

    /// Disk of intensity `fg` on `bg`, edge pixels blended by 8x8 coverage.
    pub fn dark_disk(w: usize, h: usize, cx: f64, cy: f64, r: f64, bg: u8, fg: u8) -> GrayImage {
        const SS: usize = 8;
        GrayImage::from_fn(w, h, |x, y| {
            let mut inside = 0usize;
            for sy in 0..SS {
                for sx in 0..SS {
                    let px = x as f64 - 0.5 + (sx as f64 + 0.5) / SS as f64;
                    let py = y as f64 - 0.5 + (sy as f64 + 0.5) / SS as f64;
                    if (px - cx).powi(2) + (py - cy).powi(2) <= r * r {
                        inside += 1;
                    }
                }
            }
            let t = inside as f64 / (SS * SS) as f64;
            (bg as f64 + t * (fg as f64 - bg as f64)).round() as u8
        })
    }

    pub fn gaussian_blob(
        w: usize,
        h: usize,
        cx: f64,
        cy: f64,
        sigma: f64,
        base: f64,
        amplitude: f64,
    ) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            let d2 = (x as f64 - cx).powi(2) + (y as f64 - cy).powi(2);
            (base + amplitude * (-d2 / (2.0 * sigma * sigma)).exp()).round() as u8
        })
    }

    /// X-junction of dark and bright quadrants with exact area coverage.
    pub fn saddle(w: usize, h: usize, cx: f64, cy: f64) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            let fx = (cx - (x as f64 - 0.5)).clamp(0.0, 1.0);
            let fy = (cy - (y as f64 - 0.5)).clamp(0.0, 1.0);
            let dark = fx * (1.0 - fy) + (1.0 - fx) * fy;
            (40.0 + 170.0 * dark).round() as u8
        })
    }

    pub fn patch_around(img: &GrayImage, x: f64, y: f64, radius: u32) -> SubImage {
        let r = radius as f64;
        img.sub_image(
            radius,
            (x - r + 0.5).floor() as i64,
            (y - r + 0.5).floor() as i64,
        )
        .expect("patch")
    }
}
