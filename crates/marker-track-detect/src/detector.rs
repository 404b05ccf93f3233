use marker_track_core::{ImageError, ImageSource};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::refine::{refine_center, Refinement};
use crate::strategy::LocateContext;
use crate::{DetectError, DetectionMethod, DetectorParams};

/// One localisation request for a (marker, camera, frame) cell.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionRequest {
    /// Predicted centre in frame pixels.
    pub center: Point2<f64>,
    pub search_radius: u32,
    /// Running feature size estimate in pixels.
    pub size: f64,
    pub threshold_offset: f64,
    pub method: DetectionMethod,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub center: Point2<f64>,
    pub radius: f64,
    pub method: DetectionMethod,
    /// Present when the method asked for subpixel refinement.
    pub refinement: Option<Refinement>,
}

/// Front door for 2D marker localisation.
#[derive(Clone, Debug, Default)]
pub struct MarkerDetector {
    params: DetectorParams,
}

impl MarkerDetector {
    pub fn new(params: DetectorParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &DetectorParams {
        &self.params
    }

    /// Locate a marker, logging recoverable failures as not-found.
    pub fn detect<S: ImageSource + ?Sized>(
        &self,
        image: &S,
        request: &DetectionRequest,
    ) -> Option<Detection> {
        match self.try_detect(image, request) {
            Ok(found) => found,
            Err(DetectError::Image(ImageError::Allocation { bytes })) => {
                log::warn!(
                    "detect: could not allocate {bytes} bytes for patch at ({:.1}, {:.1})",
                    request.center.x,
                    request.center.y
                );
                None
            }
            Err(e) => {
                log::warn!("detect: {e}");
                None
            }
        }
    }

    /// Locate a marker; `Ok(None)` is the not-found outcome.
    #[cfg_attr(
        feature = "tracing",
        instrument(
            level = "debug",
            skip(self, image),
            fields(method = request.method.code(), x = request.center.x, y = request.center.y)
        )
    )]
    pub fn try_detect<S: ImageSource + ?Sized>(
        &self,
        image: &S,
        request: &DetectionRequest,
    ) -> Result<Option<Detection>, DetectError> {
        let strategy = request.method.strategy();
        let radius = request
            .search_radius
            .max(strategy.min_search_radius(&self.params));
        let r = radius as f64;
        let offset_x = (request.center.x - r + 0.5).floor() as i64;
        let offset_y = (request.center.y - r + 0.5).floor() as i64;

        let patch = match image.sub_image(radius, offset_x, offset_y) {
            Ok(patch) => patch,
            Err(ImageError::EmptyRegion { .. }) => {
                log::debug!(
                    "detect: search window at ({offset_x}, {offset_y}) lies outside the image"
                );
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let ctx = LocateContext {
            predicted: request.center,
            size: request.size,
            threshold_offset: request.threshold_offset,
        };
        let Some(found) = strategy.locate(&patch, &ctx, &self.params)? else {
            log::debug!(
                "detect: method {} found nothing near ({:.2}, {:.2})",
                request.method.code(),
                request.center.x,
                request.center.y
            );
            return Ok(None);
        };

        let mut detection = Detection {
            center: found.center,
            radius: found.radius,
            method: request.method,
            refinement: None,
        };
        if request.method.refines() {
            let refined = refine_center(
                image,
                found.center,
                found.radius,
                strategy.expects_dark(),
                &self.params.refine,
            );
            log::trace!("detect: refinement {:?}", refined.outcome);
            detection.center = refined.center;
            detection.radius = refined.radius;
            detection.refinement = Some(refined);
        }
        Ok(Some(detection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{dark_disk, saddle};

    fn request(method: DetectionMethod) -> DetectionRequest {
        DetectionRequest {
            center: Point2::new(100.0, 100.0),
            search_radius: 10,
            size: 4.0,
            threshold_offset: 8.0,
            method,
        }
    }

    #[test]
    fn dark_contour_finds_disk_within_a_pixel() {
        let img = dark_disk(200, 200, 103.2, 98.7, 4.0, 200, 30);
        let det = MarkerDetector::default()
            .detect(&img, &request(DetectionMethod::DarkContour))
            .expect("detected");
        assert!((det.center - Point2::new(103.2, 98.7)).norm() < 1.0, "{det:?}");
        assert!(det.refinement.is_none());
    }

    #[test]
    fn refined_method_reaches_subpixel_accuracy() {
        let img = dark_disk(200, 200, 103.2, 98.7, 4.0, 200, 30);
        let det = MarkerDetector::default()
            .detect(&img, &request(DetectionMethod::DarkContourRefined))
            .expect("detected");
        assert!((det.center - Point2::new(103.2, 98.7)).norm() < 0.1, "{det:?}");
        let refinement = det.refinement.expect("refined");
        assert!(refinement.outcome.is_converged(), "{refinement:?}");
    }

    #[test]
    fn detection_is_idempotent() {
        let img = dark_disk(200, 200, 103.2, 98.7, 4.0, 200, 30);
        let detector = MarkerDetector::default();
        for method in DetectionMethod::ALL {
            let a = detector.detect(&img, &request(method));
            let b = detector.detect(&img, &request(method));
            assert_eq!(a, b, "method {}", method.code());
        }
    }

    #[test]
    fn light_refined_method_handles_bright_disk() {
        let img = dark_disk(200, 200, 96.6, 101.4, 4.5, 35, 215);
        let mut req = request(DetectionMethod::LightContourRefined);
        req.size = 4.5;
        let det = MarkerDetector::default().detect(&img, &req).expect("detected");
        assert!((det.center - Point2::new(96.6, 101.4)).norm() < 0.1, "{det:?}");
    }

    #[test]
    fn corner_method_widens_search_radius() {
        let img = saddle(240, 240, 131.4, 122.7);
        // The saddle lies 35 px away, outside the requested 10 px window.
        let det = MarkerDetector::default()
            .detect(&img, &request(DetectionMethod::Corner))
            .expect("corner found");
        assert!((det.center - Point2::new(131.4, 122.7)).norm() < 0.25, "{det:?}");
    }

    #[test]
    fn window_outside_image_is_not_found() {
        let img = dark_disk(50, 50, 25.0, 25.0, 4.0, 200, 30);
        let mut req = request(DetectionMethod::DarkContour);
        req.center = Point2::new(500.0, 500.0);
        assert!(MarkerDetector::default().detect(&img, &req).is_none());
        assert!(matches!(
            MarkerDetector::default().try_detect(&img, &req),
            Ok(None)
        ));
    }
}
