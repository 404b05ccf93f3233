use serde::{Deserialize, Serialize};

/// Intensity-contour strategy settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContourParams {
    pub min_search_radius: u32,
    /// Background-flattening blur radius as a multiple of the feature size.
    pub background_blur_scale: f64,
    /// Sigma of the 3x3 blur that smooths the binary mask.
    pub mask_blur_sigma: f64,
}

impl Default for ContourParams {
    fn default() -> Self {
        Self {
            min_search_radius: 10,
            background_blur_scale: 1.5,
            mask_blur_sigma: 1.3,
        }
    }
}

/// Corner-feature strategy settings (Harris + iterative subpixel search).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CornerParams {
    pub min_search_radius: u32,
    pub max_corners: usize,
    /// Minimum response as a fraction of the strongest response.
    pub quality_level: f64,
    pub min_distance: f64,
    /// Side of the structure-tensor summation block.
    pub block_size: usize,
    pub harris_k: f64,
    /// Half-size of the subpixel search window; also the reported radius.
    pub subpix_half_window: usize,
    pub subpix_max_iter: usize,
    pub subpix_eps: f64,
}

impl Default for CornerParams {
    fn default() -> Self {
        Self {
            min_search_radius: 50,
            max_corners: 50,
            quality_level: 1e-4,
            min_distance: 3.0,
            block_size: 7,
            harris_k: 0.04,
            subpix_half_window: 7,
            subpix_max_iter: 100,
            subpix_eps: 1e-3,
        }
    }
}

/// Multi-threshold blob detector settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobDetectorParams {
    pub min_search_radius: u32,
    pub threshold_step: f64,
    pub min_threshold: f64,
    pub max_threshold: f64,
    /// Number of thresholds a blob must appear at to be reported.
    pub min_repeatability: usize,
    pub min_dist_between_blobs: f64,

    pub filter_by_color: bool,
    /// 0 keeps dark blobs, 255 keeps bright ones.
    pub blob_color: u8,

    pub filter_by_area: bool,
    pub min_area: f64,
    pub max_area: f64,

    pub filter_by_circularity: bool,
    pub min_circularity: f64,
    pub max_circularity: f64,

    pub filter_by_inertia: bool,
    pub min_inertia_ratio: f64,
    pub max_inertia_ratio: f64,

    pub filter_by_convexity: bool,
    pub min_convexity: f64,
    pub max_convexity: f64,
}

impl Default for BlobDetectorParams {
    fn default() -> Self {
        Self {
            min_search_radius: 10,
            threshold_step: 10.0,
            min_threshold: 50.0,
            max_threshold: 220.0,
            min_repeatability: 2,
            min_dist_between_blobs: 10.0,
            filter_by_color: true,
            blob_color: 0,
            filter_by_area: true,
            min_area: 5.0,
            max_area: 5000.0,
            filter_by_circularity: false,
            min_circularity: 0.8,
            max_circularity: f64::MAX,
            filter_by_inertia: true,
            min_inertia_ratio: 0.1,
            max_inertia_ratio: f64::MAX,
            filter_by_convexity: true,
            min_convexity: 0.9,
            max_convexity: f64::MAX,
        }
    }
}

/// Quadric subpixel refiner settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineParams {
    /// Fit window half-width as a multiple of the radius.
    pub limmult: f64,
    /// Per-axis step clamp in pixels; also the convergence threshold.
    pub improver_thresh: f64,
    pub min_pixels: usize,
    /// Passes allowed once the step falls below `improver_thresh`.
    pub extra_passes: usize,
    /// Offset below which the extra passes stop early.
    pub settle_eps: f64,
    /// Factor from the geometric-mean principal width to the reported radius.
    pub radius_scale: f64,
}

impl Default for RefineParams {
    fn default() -> Self {
        Self {
            limmult: 1.6,
            improver_thresh: 0.5,
            min_pixels: 15,
            extra_passes: 3,
            settle_eps: 1e-3,
            radius_scale: 0.8,
        }
    }
}

/// Full detector configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorParams {
    pub contour: ContourParams,
    pub corner: CornerParams,
    pub blob: BlobDetectorParams,
    pub refine: RefineParams,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let json = r#"{ "blob": { "min_area": 20.0 }, "refine": { "limmult": 2.0 } }"#;
        let params: DetectorParams = serde_json::from_str(json).expect("parse");
        assert_eq!(params.blob.min_area, 20.0);
        assert_eq!(params.blob.threshold_step, 10.0);
        assert_eq!(params.refine.limmult, 2.0);
        assert_eq!(params.refine.min_pixels, 15);
        assert_eq!(params.corner, CornerParams::default());
    }
}
